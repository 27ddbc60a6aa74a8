//! A small runtime composition engine.
//!
//! A [`Capsule`] holds a key/value store and an ordered list of steps. Running
//! it resolves each step's declared parameters, invokes the steps in order and
//! routes failures to catch steps. Markers attached to a step decide whether it
//! stores its result under a key, runs only while a key is blank, or handles
//! failures instead of running.
//!
//! # Example
//!
//! ```rust
//! use capsule::prelude::*;
//! use serde_json::json;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! #[error("{0}")]
//! struct TypeError(String);
//!
//! let mut capsule = Capsule::new();
//! capsule.through([
//!     Step::new(|inv| {
//!         inv.set("a", json!(1));
//!         Ok(Value::Null)
//!     }),
//!     Step::new(|_| Err(CapsuleError::step(TypeError("bad".into())))),
//!     Step::new(|inv| {
//!         let message = inv.arg_as::<String>("message")?;
//!         inv.set("caught", message);
//!         Ok(Value::Null)
//!     })
//!     .param("message")
//!     .catch(Catch::of::<TypeError>()),
//! ]);
//!
//! assert_eq!(capsule.then_return("a").expect("failure was handled"), Some(json!(1)));
//! assert_eq!(capsule.get("caught"), Some(Item::Value(json!("bad"))));
//! ```

mod capsule;
mod invocation;
mod resolver;
mod step;

// Re-export core types
pub use capsule_core::*;

pub use crate::capsule::{
    BlankQuery, Capsule, CapsuleBuilder, Item, SharedCapsule, Target, RESERVED_KEYS,
};
pub use invocation::Invocation;
pub use resolver::{
    default_resolvers, ByName, Defaults, FromNamespace, MockByKind, MockByName, Next,
    ParamResolver,
};
pub use step::{Step, StepEntry};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Capsule, CapsuleBuilder, CapsuleError, Catch, Invocation, Item, Param, ParamKind, Step,
        Value,
    };
}
