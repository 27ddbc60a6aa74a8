//! Declared step parameters.

use crate::value::Value;
use std::fmt;

/// The kind of value a parameter accepts.
///
/// Resolvers use the kind for type-keyed mocks, and resolved values are checked
/// against it before a step is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamKind {
    /// Any value, including `null`.
    #[default]
    Any,
    /// `null`.
    Null,
    /// `true` or `false`.
    Bool,
    /// Any JSON number.
    Number,
    /// A string.
    String,
    /// An array.
    List,
    /// An object.
    Map,
}

impl ParamKind {
    /// Returns the kind of a concrete value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ParamKind::Null,
            Value::Bool(_) => ParamKind::Bool,
            Value::Number(_) => ParamKind::Number,
            Value::String(_) => ParamKind::String,
            Value::Array(_) => ParamKind::List,
            Value::Object(_) => ParamKind::Map,
        }
    }

    /// Returns `true` if `value` is acceptable for this kind.
    pub fn accepts(self, value: &Value) -> bool {
        self == ParamKind::Any || self == ParamKind::of(value)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Any => "any",
            ParamKind::Null => "null",
            ParamKind::Bool => "bool",
            ParamKind::Number => "number",
            ParamKind::String => "string",
            ParamKind::List => "list",
            ParamKind::Map => "map",
        };
        write!(f, "{}", name)
    }
}

/// A parameter declared by a step.
///
/// # Examples
///
/// ```
/// use capsule_core::{Param, ParamKind};
/// use serde_json::json;
///
/// let param = Param::new("limit").kind(ParamKind::Number).default(json!(10));
/// assert_eq!(param.name(), "limit");
/// assert_eq!(param.default_value(), Some(&json!(10)));
///
/// let param: Param = "user".into();
/// assert_eq!(param.param_kind(), ParamKind::Any);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    kind: ParamKind,
    default: Option<Value>,
    optional: bool,
}

impl Param {
    /// Creates a required parameter of any kind.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Any,
            default: None,
            optional: false,
        }
    }

    /// Sets the accepted kind.
    pub fn kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the value used when no other resolver answers.
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Resolves to `null` instead of failing when nothing answers.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Returns the parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the accepted kind.
    pub fn param_kind(&self) -> ParamKind {
        self.kind
    }

    /// Returns the declared default, if any.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Returns `true` if the parameter may resolve to `null`.
    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

impl From<&str> for Param {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Param {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}
