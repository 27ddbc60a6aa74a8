//! Step definitions and the per-registration step wrapper.

use crate::capsule::Capsule;
use crate::invocation::Invocation;
use capsule_core::{Catch, CapsuleError, Marker, Markers, OnBlank, Param, Setter, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

type StepFn = dyn Fn(&mut Invocation<'_>) -> Result<Value, CapsuleError> + Send + Sync;

/// A unit of behaviour together with its declared parameters and markers.
///
/// Steps are cheap to clone; the callable is shared.
///
/// # Examples
///
/// ```
/// use capsule::prelude::*;
/// use serde_json::json;
///
/// let total = Step::new(|inv| {
///     let price = inv.arg_as::<f64>("price")?;
///     let qty = inv.arg_as::<f64>("qty")?;
///     Ok(json!(price * qty))
/// })
/// .param("price")
/// .param("qty")
/// .setter("total");
///
/// let mut capsule = Capsule::new();
/// capsule.set("price", json!(2.5)).set("qty", json!(4));
/// assert_eq!(capsule.call(total).expect("evaluates"), json!(10.0));
/// assert_eq!(capsule.get("total"), Some(Item::Value(json!(10.0))));
/// ```
#[derive(Clone)]
pub struct Step {
    callable: Arc<StepFn>,
    params: Vec<Param>,
    markers: Markers,
    label: Option<String>,
}

impl Step {
    /// Creates a step from a callable.
    pub fn new<F>(callable: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<Value, CapsuleError> + Send + Sync + 'static,
    {
        Self {
            callable: Arc::new(callable),
            params: Vec::new(),
            markers: Markers::new(),
            label: None,
        }
    }

    /// Creates a step that always returns `value`.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::new(move |_| Ok(value.clone()))
    }

    /// Declares a parameter. Parameters are resolved in declaration order.
    pub fn param(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Attaches a marker.
    pub fn marker(mut self, marker: impl Into<Marker>) -> Self {
        self.markers.push(marker);
        self
    }

    /// Writes the step's result under `key` after evaluation.
    pub fn setter(self, key: impl Into<String>) -> Self {
        self.marker(Setter::new(key))
    }

    /// Turns the step into a failure handler.
    pub fn catch(self, catch: Catch) -> Self {
        self.marker(catch)
    }

    /// Runs the step only while `key` is absent or blank.
    pub fn run_if_blank(self, key: impl Into<String>) -> Self {
        self.marker(OnBlank::new(key))
    }

    /// Names the step for logs.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns the step's label, or `"<anonymous>"`.
    pub fn name(&self) -> &str {
        self.label.as_deref().unwrap_or("<anonymous>")
    }

    /// Returns the declared parameters.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Returns the attached markers.
    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    pub(crate) fn invoke(
        &self,
        capsule: &mut Capsule,
        args: Vec<(String, Value)>,
    ) -> Result<Value, CapsuleError> {
        let mut invocation = Invocation::new(capsule, args);
        (self.callable)(&mut invocation)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name())
            .field("params", &self.params)
            .field("markers", &self.markers)
            .finish()
    }
}

/// A step registered in a capsule.
///
/// The entry memoizes its should-run decision and its result, so the callable
/// runs at most once no matter how many times the capsule runs. A failed or
/// halted evaluation is not memoized.
///
/// The entry does not own the capsule; every operation is handed the capsule
/// it belongs to.
pub struct StepEntry {
    step: Step,
    should_run: OnceLock<bool>,
    evaluated: OnceLock<Value>,
}

impl StepEntry {
    /// Wraps a step.
    pub fn new(step: Step) -> Self {
        Self {
            step,
            should_run: OnceLock::new(),
            evaluated: OnceLock::new(),
        }
    }

    /// Returns the wrapped step.
    pub fn step(&self) -> &Step {
        &self.step
    }

    /// Decides, once, whether the step takes part in the normal pass.
    ///
    /// Catch steps never do. Run-if-blank steps do while their key is blank.
    pub fn should_run(&self, capsule: &mut Capsule) -> Result<bool, CapsuleError> {
        if let Some(decision) = self.should_run.get() {
            return Ok(*decision);
        }

        let markers = self.step.markers();
        let decision = if markers.has::<Catch>() {
            false
        } else if let Some(on_blank) = markers.find::<OnBlank>() {
            capsule.is_blank(on_blank.key())?
        } else {
            true
        };

        let _ = self.should_run.set(decision);
        Ok(decision)
    }

    /// Returns `true` if this step is a handler for `failure`.
    pub fn is_catch(&self, failure: &CapsuleError) -> bool {
        self.step
            .markers()
            .find::<Catch>()
            .is_some_and(|catch| catch.is_catch(failure))
    }

    /// Invokes the step as a handler, binding `message` to the failure text.
    pub fn handle(
        &self,
        capsule: &mut Capsule,
        failure: &CapsuleError,
    ) -> Result<Value, CapsuleError> {
        debug!("Step '{}' handling failure: {}", self.step.name(), failure);
        capsule.evaluate_with(
            self.step.clone(),
            [("message", Value::String(failure.message()))],
        )
    }

    /// Evaluates the step once and returns the memoized result afterwards.
    ///
    /// Setter steps have already written their result by the time
    /// [`Capsule::evaluate`] returns.
    pub fn evaluate(&self, capsule: &mut Capsule) -> Result<Value, CapsuleError> {
        if let Some(value) = self.evaluated.get() {
            return Ok(value.clone());
        }

        let value = capsule.evaluate(self.step.clone())?;
        let _ = self.evaluated.set(value.clone());
        Ok(value)
    }

    /// Returns `true` once the step has produced a result.
    pub fn is_evaluated(&self) -> bool {
        self.evaluated.get().is_some()
    }
}

impl fmt::Debug for StepEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepEntry")
            .field("step", &self.step)
            .field("should_run", &self.should_run.get())
            .field("evaluated", &self.evaluated.get().is_some())
            .finish()
    }
}
