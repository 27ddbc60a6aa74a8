//! The capsule container and its run loop.

use crate::resolver::{default_resolvers, Next, ParamResolver};
use crate::step::{Step, StepEntry};
use capsule_core::{is_blank, lookup, CapsuleError, Param, ParamKind, Setter, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Keys every capsule answers to without storing them.
///
/// Steps reach the matching capabilities through
/// [`Invocation`](crate::Invocation). They cannot be injected as parameters:
/// a step declaring `.param("halt")` gets
/// [`CapsuleError::UnresolvedParameter`] unless a mock supplies it.
pub const RESERVED_KEYS: [&str; 3] = ["capsule", "set", "halt"];

const DEFAULT_MAX_NAMESPACE_DEPTH: usize = 16;

/// A capsule shared with child capsules that resolve through it.
pub type SharedCapsule = Arc<Mutex<Capsule>>;

/// A raw stored entry: a plain value or a deferred step.
#[derive(Debug, Clone)]
pub enum Item {
    /// A plain value, returned as-is by evaluation.
    Value(Value),
    /// A step, invoked when the entry is evaluated.
    Step(Step),
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Item::Value(a), Item::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Item::Value(value)
    }
}

impl From<Step> for Item {
    fn from(step: Step) -> Self {
        Item::Step(step)
    }
}

impl From<&str> for Item {
    fn from(value: &str) -> Self {
        Item::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Item {
    fn from(value: String) -> Self {
        Item::Value(Value::String(value))
    }
}

impl From<i64> for Item {
    fn from(value: i64) -> Self {
        Item::Value(Value::from(value))
    }
}

impl From<bool> for Item {
    fn from(value: bool) -> Self {
        Item::Value(Value::Bool(value))
    }
}

/// What [`Capsule::then_return`] hands back after a run.
#[derive(Debug, Clone)]
pub enum Target {
    /// Evaluate a store key.
    Key(String),
    /// Evaluate a step.
    Step(Step),
}

impl From<&str> for Target {
    fn from(key: &str) -> Self {
        Target::Key(key.to_string())
    }
}

impl From<String> for Target {
    fn from(key: String) -> Self {
        Target::Key(key)
    }
}

impl From<Step> for Target {
    fn from(step: Step) -> Self {
        Target::Step(step)
    }
}

/// A container of ordered steps sharing one key/value store.
///
/// Steps registered with [`Capsule::through`] run in order on [`Capsule::run`].
/// Each step's declared parameters are resolved from the store (and the
/// rest of the resolver chain), and markers on the step decide whether it
/// stores its result, runs only while a key is blank, or handles failures.
///
/// # Examples
///
/// ```
/// use capsule::prelude::*;
/// use serde_json::json;
///
/// let mut capsule = Capsule::new();
/// capsule
///     .set("price", json!(20))
///     .through([
///         Step::new(|inv| Ok(json!(inv.arg_as::<i64>("price")? * 2)))
///             .param("price")
///             .setter("total"),
///     ]);
///
/// let total = capsule.then_return("total").expect("run succeeds");
/// assert_eq!(total, Some(json!(40)));
/// ```
pub struct Capsule {
    data: HashMap<String, Item>,
    resolved: HashMap<String, Value>,
    steps: Vec<Arc<StepEntry>>,
    pending: Vec<CapsuleError>,
    halted: Option<Value>,
    mocks: HashMap<String, Value>,
    kind_mocks: HashMap<ParamKind, Value>,
    resolvers: Vec<Arc<dyn ParamResolver>>,
    parent: Option<SharedCapsule>,
    max_namespace_depth: usize,
    namespace_depth: usize,
}

impl fmt::Debug for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capsule")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("steps", &self.steps.len())
            .field("halted", &self.halted)
            .field("resolvers", &self.resolvers)
            .field("has_namespace", &self.parent.is_some())
            .finish()
    }
}

impl Default for Capsule {
    fn default() -> Self {
        Self::new()
    }
}

impl Capsule {
    /// Creates an empty capsule with the default resolver chain.
    pub fn new() -> Self {
        CapsuleBuilder::new().build()
    }

    /// Creates a capsule builder.
    pub fn builder() -> CapsuleBuilder {
        CapsuleBuilder::new()
    }

    /// Creates an empty capsule that resolves missing parameters through
    /// `parent`.
    pub fn child_of(parent: &SharedCapsule) -> Self {
        CapsuleBuilder::new().parent(parent).build()
    }

    /// Moves the capsule behind a lock so children can resolve through it.
    pub fn into_shared(self) -> SharedCapsule {
        Arc::new(Mutex::new(self))
    }

    /// Writes `key`, dropping any memoized evaluation of it.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Item>) -> &mut Self {
        let key = key.into();
        self.resolved.remove(&key);
        self.data.insert(key, value.into());
        self
    }

    /// Writes several keys.
    pub fn set_many<I, K, V>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Item>,
    {
        for (key, value) in entries {
            self.set(key, value);
        }
        self
    }

    /// Serializes `value` and writes it under `key`.
    pub fn set_serialized<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<&mut Self, CapsuleError> {
        let value = serde_json::to_value(value)?;
        Ok(self.set(key, value))
    }

    /// Reads the raw entry for `key`.
    ///
    /// Dotted keys reach into stored objects and arrays (`"order.items.0"`)
    /// when no entry has the full key. Reserved keys have no raw entry.
    pub fn get(&self, key: &str) -> Option<Item> {
        if RESERVED_KEYS.contains(&key) {
            return None;
        }
        if let Some(item) = self.data.get(key) {
            return Some(item.clone());
        }

        let (head, rest) = key.split_once('.')?;
        match self.data.get(head)? {
            Item::Value(value) => lookup(value, rest).cloned().map(Item::Value),
            Item::Step(_) => None,
        }
    }

    /// Returns `true` if `key` is stored or reserved.
    ///
    /// Dotted keys count as present when [`Capsule::get`] can reach them.
    pub fn has(&self, key: &str) -> bool {
        RESERVED_KEYS.contains(&key) || self.data.contains_key(key) || self.get(key).is_some()
    }

    /// Evaluates the entry for `key`.
    ///
    /// Absent keys give `None`. Plain values, strings included, come back
    /// verbatim. Stored steps are evaluated once and memoized until the key
    /// is set again.
    pub fn evaluate_key(&mut self, key: &str) -> Result<Option<Value>, CapsuleError> {
        let Some(item) = self.get(key) else {
            return Ok(None);
        };
        let step = match item {
            Item::Value(value) => return Ok(Some(value)),
            Item::Step(step) => step,
        };
        if let Some(value) = self.resolved.get(key) {
            return Ok(Some(value.clone()));
        }

        let value = self.evaluate(step)?;
        self.resolved.insert(key.to_string(), value.clone());
        Ok(Some(value))
    }

    /// Evaluates a value or step.
    ///
    /// Plain values pass through unchanged. Steps have their parameters
    /// resolved and are invoked; a setter step's result is written to its key.
    pub fn evaluate(&mut self, item: impl Into<Item>) -> Result<Value, CapsuleError> {
        self.evaluate_with(item, std::iter::empty::<(String, Value)>())
    }

    /// Like [`Capsule::evaluate`], writing `bindings` into the store first.
    pub fn evaluate_with<I, K, V>(
        &mut self,
        item: impl Into<Item>,
        bindings: I,
    ) -> Result<Value, CapsuleError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Item>,
    {
        let step = match item.into() {
            Item::Value(value) => return Ok(value),
            Item::Step(step) => step,
        };

        self.set_many(bindings);
        let args = self.resolve_params(step.params())?;
        let value = step.invoke(self, args)?;

        if let Some(setter) = step.markers().find::<Setter>() {
            debug!("Step '{}' writing result to '{}'", step.name(), setter.key());
            self.set(setter.key(), value.clone());
        }
        Ok(value)
    }

    /// Evaluates a single step outside the run loop.
    pub fn call(&mut self, step: impl Into<Item>) -> Result<Value, CapsuleError> {
        self.evaluate(step)
    }

    /// Appends steps. Plain values become steps that return them.
    pub fn through<I, T>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Item>,
    {
        for item in items {
            self.then(item);
        }
        self
    }

    /// Alias of [`Capsule::through`].
    pub fn capsule<I, T>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Item>,
    {
        self.through(items)
    }

    /// Appends one step.
    pub fn then(&mut self, item: impl Into<Item>) -> &mut Self {
        let step = match item.into() {
            Item::Step(step) => step,
            Item::Value(value) => Step::constant(value),
        };
        self.steps.push(Arc::new(StepEntry::new(step)));
        self
    }

    /// Runs the registered steps in order.
    ///
    /// A halt stops the pass quietly. Any other failure stops the pass and is
    /// offered to every catch step; a failure no catch step claims is returned.
    /// When several failures go unclaimed they come back together as
    /// [`CapsuleError::Unhandled`], in capture order.
    pub fn run(&mut self) -> Result<&mut Self, CapsuleError> {
        self.halted = None;
        let entries = self.steps.clone();

        match self.run_pass(&entries) {
            Ok(evaluated) => {
                info!("Capsule pass completed, {} step(s) evaluated", evaluated);
            }
            Err(CapsuleError::Halted) => {
                self.halted.get_or_insert(Value::Null);
                info!("Capsule pass halted");
            }
            Err(failure) => {
                warn!("Capsule pass failed: {}", failure);
                self.pending.push(failure);
            }
        }

        self.replay_failures()?;
        Ok(self)
    }

    fn run_pass(&mut self, entries: &[Arc<StepEntry>]) -> Result<usize, CapsuleError> {
        let mut evaluated = 0;
        for entry in entries {
            if !entry.should_run(self)? {
                debug!("Skipping step '{}'", entry.step().name());
                continue;
            }
            debug!("Evaluating step '{}'", entry.step().name());
            entry.evaluate(self)?;
            evaluated += 1;
        }
        Ok(evaluated)
    }

    fn replay_failures(&mut self) -> Result<(), CapsuleError> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let entries = self.steps.clone();
        let mut unhandled = Vec::new();
        for failure in pending {
            let mut handled = false;
            for entry in entries.iter().filter(|entry| entry.is_catch(&failure)) {
                handled = true;
                match entry.handle(self, &failure) {
                    Ok(_) => {}
                    Err(CapsuleError::Halted) => {
                        self.halted.get_or_insert(Value::Null);
                    }
                    Err(error) => return Err(error),
                }
            }
            if !handled {
                warn!("Unhandled capsule failure: {}", failure);
                unhandled.push(failure);
            }
        }

        match unhandled.len() {
            0 => Ok(()),
            1 => Err(unhandled.remove(0)),
            _ => Err(CapsuleError::Unhandled(unhandled)),
        }
    }

    /// Runs, then returns the halt value if a step halted, otherwise the
    /// evaluated target.
    pub fn then_return(&mut self, target: impl Into<Target>) -> Result<Option<Value>, CapsuleError> {
        self.run()?;

        if let Some(value) = &self.halted {
            return Ok(Some(value.clone()));
        }

        match target.into() {
            Target::Key(key) => self.evaluate_key(&key),
            Target::Step(step) => self.evaluate(step).map(Some),
        }
    }

    /// Records `value` as the halt value and returns the halt signal.
    pub fn halt(&mut self, value: impl Into<Value>) -> CapsuleError {
        self.halted = Some(value.into());
        CapsuleError::Halted
    }

    /// Returns `true` if the last run halted.
    pub fn has_halt(&self) -> bool {
        self.halted.is_some()
    }

    /// Returns the value the last run halted with.
    pub fn halt_value(&self) -> Option<&Value> {
        self.halted.as_ref()
    }

    /// Returns `true` if `key` is absent or evaluates to a blank value.
    pub fn is_blank(&mut self, key: &str) -> Result<bool, CapsuleError> {
        if !self.has(key) {
            return Ok(true);
        }
        match self.get(key) {
            Some(item) => Ok(is_blank(&self.evaluate(item)?)),
            None => Ok(false),
        }
    }

    /// Returns a query about whether `key` is blank.
    pub fn on_blank(&mut self, key: impl Into<String>) -> BlankQuery<'_> {
        BlankQuery {
            capsule: self,
            key: key.into(),
        }
    }

    /// Appends `item` as a step if `key` is currently blank.
    pub fn on_blank_then(
        &mut self,
        key: &str,
        item: impl Into<Item>,
    ) -> Result<&mut Self, CapsuleError> {
        if self.is_blank(key)? {
            self.then(item);
        }
        Ok(self)
    }

    /// Alias of [`Capsule::on_blank`].
    pub fn on_null(&mut self, key: impl Into<String>) -> BlankQuery<'_> {
        self.on_blank(key)
    }

    /// Alias of [`Capsule::on_blank_then`].
    pub fn on_null_then(
        &mut self,
        key: &str,
        item: impl Into<Item>,
    ) -> Result<&mut Self, CapsuleError> {
        self.on_blank_then(key, item)
    }

    /// Writes `key` only if it is currently blank.
    pub fn set_on_blank(
        &mut self,
        key: &str,
        value: impl Into<Item>,
    ) -> Result<&mut Self, CapsuleError> {
        if self.is_blank(key)? {
            self.set(key, value);
        }
        Ok(self)
    }

    /// Registers a test override for parameters named `name`.
    pub fn mock(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.mocks.insert(name.into(), value);
        self
    }

    /// Registers a test override for parameters of `kind`.
    pub fn mock_kind(&mut self, kind: ParamKind, value: Value) -> &mut Self {
        self.kind_mocks.insert(kind, value);
        self
    }

    pub(crate) fn mocked(&self, name: &str) -> Option<&Value> {
        self.mocks.get(name)
    }

    pub(crate) fn mocked_kind(&self, kind: ParamKind) -> Option<&Value> {
        self.kind_mocks.get(&kind)
    }

    /// Appends a resolver to the end of the chain.
    pub fn push_resolver(&mut self, resolver: impl ParamResolver + 'static) -> &mut Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Resolves one parameter through the resolver chain.
    pub fn resolve_param(&mut self, param: &Param) -> Result<Value, CapsuleError> {
        let chain = self.resolvers.clone();
        Next::new(&chain).resolve(param, self)
    }

    /// Resolves a parameter list, checking each value against its kind.
    pub fn resolve_params(
        &mut self,
        params: &[Param],
    ) -> Result<Vec<(String, Value)>, CapsuleError> {
        params
            .iter()
            .map(|param| {
                let value = self.resolve_param(param)?;
                let kind = param.param_kind();
                let accepted = kind.accepts(&value) || (param.is_optional() && value.is_null());
                if !accepted {
                    return Err(CapsuleError::ParameterKind {
                        name: param.name().to_string(),
                        expected: kind,
                        found: ParamKind::of(&value),
                    });
                }
                Ok((param.name().to_string(), value))
            })
            .collect()
    }

    /// Returns the parent capsule, if this capsule is namespaced.
    pub fn parent(&self) -> Option<&SharedCapsule> {
        self.parent.as_ref()
    }

    /// Resolves missing parameters through `parent` from now on.
    pub fn set_parent(&mut self, parent: &SharedCapsule) -> &mut Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Returns `true` if this capsule has a parent.
    pub fn has_namespace(&self) -> bool {
        self.parent.is_some()
    }

    pub(crate) fn max_namespace_depth(&self) -> usize {
        self.max_namespace_depth
    }

    pub(crate) fn namespace_depth(&self) -> usize {
        self.namespace_depth
    }

    pub(crate) fn set_namespace_depth(&mut self, depth: usize) {
        self.namespace_depth = depth;
    }

    pub(crate) fn set_max_namespace_depth(&mut self, depth: usize) {
        self.max_namespace_depth = depth;
    }

    /// Returns the registered steps in execution order.
    pub fn steps(&self) -> &[Arc<StepEntry>] {
        &self.steps
    }

    /// Returns the number of registered steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Whether a key is blank, asked of a particular capsule.
///
/// Returned by [`Capsule::on_blank`].
pub struct BlankQuery<'a> {
    capsule: &'a mut Capsule,
    key: String,
}

impl<'a> BlankQuery<'a> {
    /// Returns the key being asked about.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns `true` if the key is absent or blank.
    pub fn is_blank(&mut self) -> Result<bool, CapsuleError> {
        self.capsule.is_blank(&self.key)
    }

    /// Appends `item` as a step if the key is blank.
    pub fn then(self, item: impl Into<Item>) -> Result<&'a mut Capsule, CapsuleError> {
        let BlankQuery { capsule, key } = self;
        capsule.on_blank_then(&key, item)
    }
}

/// Builder for [`Capsule`] configuration.
pub struct CapsuleBuilder {
    resolvers: Vec<Arc<dyn ParamResolver>>,
    parent: Option<SharedCapsule>,
    max_namespace_depth: usize,
}

impl Default for CapsuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CapsuleBuilder {
    /// Creates a builder with the default resolver chain.
    pub fn new() -> Self {
        Self {
            resolvers: default_resolvers(),
            parent: None,
            max_namespace_depth: DEFAULT_MAX_NAMESPACE_DEPTH,
        }
    }

    /// Replaces the resolver chain.
    pub fn resolvers(mut self, resolvers: Vec<Arc<dyn ParamResolver>>) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Sets the parent capsule.
    pub fn parent(mut self, parent: &SharedCapsule) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Limits how many ancestors a parameter lookup may climb.
    pub fn max_namespace_depth(mut self, depth: usize) -> Self {
        self.max_namespace_depth = depth;
        self
    }

    /// Builds the capsule.
    pub fn build(self) -> Capsule {
        Capsule {
            data: HashMap::new(),
            resolved: HashMap::new(),
            steps: Vec::new(),
            pending: Vec::new(),
            halted: None,
            mocks: HashMap::new(),
            kind_mocks: HashMap::new(),
            resolvers: self.resolvers,
            parent: self.parent,
            max_namespace_depth: self.max_namespace_depth,
            namespace_depth: 0,
        }
    }
}
