//! What a step sees while it runs.

use crate::capsule::{Capsule, Item};
use capsule_core::{CapsuleError, Value};
use serde::de::DeserializeOwned;

/// The resolved arguments of one step call plus the capsule's ambient
/// capabilities.
///
/// The capsule's reserved keys map onto methods here: `capsule` is
/// [`Invocation::capsule`], `set` is [`Invocation::set`] and `halt` is
/// [`Invocation::halt`].
pub struct Invocation<'a> {
    capsule: &'a mut Capsule,
    args: Vec<(String, Value)>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(capsule: &'a mut Capsule, args: Vec<(String, Value)>) -> Self {
        Self { capsule, args }
    }

    /// Returns the resolved argument for a declared parameter.
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }

    /// Returns the resolved argument at a declaration position.
    pub fn arg_at(&self, index: usize) -> Option<&Value> {
        self.args.get(index).map(|(_, value)| value)
    }

    /// Deserializes a resolved argument into `T`.
    ///
    /// A parameter the step never declared is reported as unresolved.
    pub fn arg_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, CapsuleError> {
        let value = self
            .arg(name)
            .ok_or_else(|| CapsuleError::UnresolvedParameter {
                name: name.to_string(),
            })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Returns all resolved arguments in declaration order.
    pub fn args(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.args.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// The owning capsule.
    pub fn capsule(&mut self) -> &mut Capsule {
        &mut *self.capsule
    }

    /// Reads a raw stored entry.
    pub fn get(&self, key: &str) -> Option<Item> {
        self.capsule.get(key)
    }

    /// Writes a key in the owning capsule.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Item>) -> &mut Self {
        self.capsule.set(key, value);
        self
    }

    /// Stops the current pass, recording `value` as the halt value.
    ///
    /// Return the error from the step: `return Err(inv.halt(value))`.
    pub fn halt(&mut self, value: impl Into<Value>) -> CapsuleError {
        self.capsule.halt(value)
    }
}
