//! Capsule error types.

use crate::param::ParamKind;
use std::error::Error as StdError;
use thiserror::Error;

/// A boxed failure raised by a step's own code.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur while evaluating steps in a capsule.
///
/// [`CapsuleError::Halted`] is a control signal rather than a failure: the run
/// loop swallows it and exposes the halt value instead. Every other variant is
/// offered to catch steps and, if nobody claims it, returned to the caller.
///
/// # Non-Exhaustive
///
/// New variants may be added in future versions. Always include a wildcard
/// pattern when matching:
///
/// ```
/// use capsule_core::CapsuleError;
///
/// fn describe(error: &CapsuleError) -> String {
///     match error {
///         CapsuleError::UnresolvedParameter { name } => format!("missing input {name}"),
///         CapsuleError::Step(inner) => format!("step failed: {inner}"),
///         other => other.to_string(),
///     }
/// }
///
/// assert_eq!(describe(&CapsuleError::msg("boom")), "step failed: boom");
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CapsuleError {
    /// A step asked the capsule to stop the current pass.
    #[error("capsule halted")]
    Halted,

    /// No resolver in the chain could supply a value for a declared parameter.
    #[error("Unable to resolve parameter '{name}'")]
    UnresolvedParameter {
        /// The parameter name.
        name: String,
    },

    /// A parameter resolved to a value of the wrong kind.
    #[error("Parameter '{name}' expected {expected}, found {found}")]
    ParameterKind {
        /// The parameter name.
        name: String,
        /// The declared kind.
        expected: ParamKind,
        /// The kind of the value that was resolved.
        found: ParamKind,
    },

    /// A step's own code failed.
    #[error(transparent)]
    Step(BoxError),

    /// Several failures of one run were left unclaimed by catch steps.
    #[error("{} unhandled failures, first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    Unhandled(Vec<CapsuleError>),

    /// A value could not be converted to or from its typed form.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A plain message failure, used by [`CapsuleError::msg`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct Message(pub String);

impl CapsuleError {
    /// Wraps a domain failure.
    pub fn step<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Step(Box::new(error))
    }

    /// Creates a domain failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::step(Message(message.into()))
    }

    /// Returns `true` for the halt signal.
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halted)
    }

    /// The text handed to catch steps as their `message` binding.
    ///
    /// For [`CapsuleError::Step`] this is the inner failure's display, without
    /// any wrapping.
    pub fn message(&self) -> String {
        match self {
            Self::Step(inner) => inner.to_string(),
            other => other.to_string(),
        }
    }

    /// Returns the inner domain failure as `E`, if it is one.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        match self {
            Self::Step(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("type error: {0}")]
    struct TypeError(String);

    #[test]
    fn test_error_display() {
        let error = CapsuleError::UnresolvedParameter {
            name: "user".to_string(),
        };
        assert_eq!(error.to_string(), "Unable to resolve parameter 'user'");

        let error = CapsuleError::ParameterKind {
            name: "total".to_string(),
            expected: ParamKind::Number,
            found: ParamKind::String,
        };
        assert_eq!(
            error.to_string(),
            "Parameter 'total' expected number, found string"
        );
    }

    #[test]
    fn test_step_failure_is_transparent() {
        let error = CapsuleError::step(TypeError("bad".to_string()));
        assert_eq!(error.to_string(), "type error: bad");
        assert_eq!(error.message(), "type error: bad");
        assert!(error.downcast_ref::<TypeError>().is_some());
        assert!(error.downcast_ref::<Message>().is_none());
    }

    #[test]
    fn test_msg_failure() {
        let error = CapsuleError::msg("bad");
        assert_eq!(error.message(), "bad");
        assert_eq!(
            error.downcast_ref::<Message>(),
            Some(&Message("bad".to_string()))
        );
        assert!(!error.is_halt());
        assert!(CapsuleError::Halted.is_halt());
    }

    #[test]
    fn test_unhandled_display() {
        let error = CapsuleError::Unhandled(vec![CapsuleError::msg("a"), CapsuleError::msg("b")]);
        assert_eq!(error.to_string(), "2 unhandled failures, first: a");
    }
}
