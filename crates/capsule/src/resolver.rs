//! Parameter resolution.
//!
//! A step's declared parameters are resolved one by one through an ordered
//! chain of [`ParamResolver`]s. Each resolver either answers or hands the
//! parameter to the rest of the chain through [`Next`]. Falling off the end of
//! the chain is [`CapsuleError::UnresolvedParameter`].

use crate::capsule::Capsule;
use capsule_core::{CapsuleError, Param, ParamKind, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One link of the resolver chain.
///
/// # Examples
///
/// ```
/// use capsule::prelude::*;
/// use capsule::{Next, ParamResolver};
/// use serde_json::json;
///
/// #[derive(Debug)]
/// struct Upper;
///
/// impl ParamResolver for Upper {
///     fn resolve(&self, param: &Param, capsule: &mut Capsule, next: Next<'_>) -> Result<Value, CapsuleError> {
///         match param.name().strip_suffix("_upper") {
///             Some(base) => match capsule.evaluate_key(base)? {
///                 Some(Value::String(s)) => Ok(Value::String(s.to_uppercase())),
///                 _ => next.resolve(param, capsule),
///             },
///             None => next.resolve(param, capsule),
///         }
///     }
/// }
///
/// let mut capsule = Capsule::new();
/// capsule.push_resolver(Upper).set("name", json!("ada"));
/// let shout = Step::new(|inv| Ok(inv.arg("name_upper").cloned().unwrap_or_default()))
///     .param("name_upper");
/// assert_eq!(capsule.call(shout).expect("resolves"), json!("ADA"));
/// ```
pub trait ParamResolver: Send + Sync + fmt::Debug {
    /// Resolves `param`, or delegates to `next`.
    fn resolve(
        &self,
        param: &Param,
        capsule: &mut Capsule,
        next: Next<'_>,
    ) -> Result<Value, CapsuleError>;
}

/// The remainder of a resolver chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn ParamResolver>],
}

impl<'a> Next<'a> {
    /// Starts a walk over `chain`.
    pub fn new(chain: &'a [Arc<dyn ParamResolver>]) -> Self {
        Self { chain }
    }

    /// Passes `param` to the next resolver.
    pub fn resolve(self, param: &Param, capsule: &mut Capsule) -> Result<Value, CapsuleError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.resolve(param, capsule, Next { chain: rest }),
            None => Err(CapsuleError::UnresolvedParameter {
                name: param.name().to_string(),
            }),
        }
    }
}

/// Resolves a parameter from the store entry of the same name.
#[derive(Debug, Default)]
pub struct ByName;

impl ParamResolver for ByName {
    fn resolve(
        &self,
        param: &Param,
        capsule: &mut Capsule,
        next: Next<'_>,
    ) -> Result<Value, CapsuleError> {
        match capsule.evaluate_key(param.name())? {
            Some(value) => Ok(value),
            None => next.resolve(param, capsule),
        }
    }
}

/// Resolves a parameter from a test override registered by name.
#[derive(Debug, Default)]
pub struct MockByName;

impl ParamResolver for MockByName {
    fn resolve(
        &self,
        param: &Param,
        capsule: &mut Capsule,
        next: Next<'_>,
    ) -> Result<Value, CapsuleError> {
        match capsule.mocked(param.name()) {
            Some(value) => Ok(value.clone()),
            None => next.resolve(param, capsule),
        }
    }
}

/// Resolves a parameter from a test override registered for its kind.
#[derive(Debug, Default)]
pub struct MockByKind;

impl ParamResolver for MockByKind {
    fn resolve(
        &self,
        param: &Param,
        capsule: &mut Capsule,
        next: Next<'_>,
    ) -> Result<Value, CapsuleError> {
        if param.param_kind() == ParamKind::Any {
            return next.resolve(param, capsule);
        }
        match capsule.mocked_kind(param.param_kind()) {
            Some(value) => Ok(value.clone()),
            None => next.resolve(param, capsule),
        }
    }
}

/// Asks the parent capsule to resolve the parameter with its own chain.
///
/// A parent that is already locked is on the current resolution path, so it
/// is skipped rather than re-entered. The `max_namespace_depth` of the capsule
/// where resolution started bounds the whole climb; ancestors may only lower it.
#[derive(Debug, Default)]
pub struct FromNamespace;

impl ParamResolver for FromNamespace {
    fn resolve(
        &self,
        param: &Param,
        capsule: &mut Capsule,
        next: Next<'_>,
    ) -> Result<Value, CapsuleError> {
        let Some(parent) = capsule.parent().cloned() else {
            return next.resolve(param, capsule);
        };

        let depth = capsule.namespace_depth() + 1;
        if depth > capsule.max_namespace_depth() {
            debug!(
                "Namespace depth {} exceeded while resolving '{}'",
                depth,
                param.name()
            );
            return next.resolve(param, capsule);
        }

        let resolved = match parent.try_lock() {
            Ok(mut parent) => {
                let previous_depth = parent.namespace_depth();
                let previous_limit = parent.max_namespace_depth();
                parent.set_namespace_depth(depth);
                parent
                    .set_max_namespace_depth(previous_limit.min(capsule.max_namespace_depth()));
                let resolved = parent.resolve_param(param);
                parent.set_namespace_depth(previous_depth);
                parent.set_max_namespace_depth(previous_limit);
                resolved
            }
            Err(_) => {
                debug!(
                    "Parent capsule busy, skipping namespace lookup for '{}'",
                    param.name()
                );
                return next.resolve(param, capsule);
            }
        };

        match resolved {
            Err(CapsuleError::UnresolvedParameter { .. }) => next.resolve(param, capsule),
            other => other,
        }
    }
}

/// Falls back to the parameter's declared default, then `null` for optional
/// parameters.
#[derive(Debug, Default)]
pub struct Defaults;

impl ParamResolver for Defaults {
    fn resolve(
        &self,
        param: &Param,
        capsule: &mut Capsule,
        next: Next<'_>,
    ) -> Result<Value, CapsuleError> {
        if let Some(value) = param.default_value() {
            return Ok(value.clone());
        }
        if param.is_optional() {
            return Ok(Value::Null);
        }
        next.resolve(param, capsule)
    }
}

/// The chain every capsule starts with.
pub fn default_resolvers() -> Vec<Arc<dyn ParamResolver>> {
    vec![
        Arc::new(MockByName),
        Arc::new(MockByKind),
        Arc::new(ByName),
        Arc::new(FromNamespace),
        Arc::new(Defaults),
    ]
}
