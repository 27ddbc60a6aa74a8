//! Core types for the capsule composition engine.
//!
//! This crate holds the pieces that do not need a running container.
//! Library authors can depend on it to build markers and errors without
//! pulling in the engine.
//!
//! # Core Types
//!
//! - [`Value`] - Stored values, with [`is_blank`] and [`lookup`]
//! - [`Param`] - A parameter declared by a step
//! - [`Markers`] - Setter, catch and run-if-blank markers attached to a step
//! - [`CapsuleError`] - Error types for step evaluation

mod error;
mod marker;
mod param;
mod value;

pub use error::{BoxError, CapsuleError, Message};
pub use marker::{Catch, Marker, MarkerKind, Markers, OnBlank, Setter};
pub use param::{Param, ParamKind};
pub use value::{is_blank, lookup, Value};
