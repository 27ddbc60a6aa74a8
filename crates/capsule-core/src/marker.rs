//! Declarative step markers and their discovery.
//!
//! Markers are attached to a step when it is built. The engine looks them up by
//! category with [`Markers::find`], which returns the first marker of that
//! category in declaration order.

use crate::error::CapsuleError;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Writes the step's result into the store under `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setter {
    key: String,
}

impl Setter {
    /// Creates a setter marker for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Returns the key the result is written to.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Runs the step only while `key` is absent or blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnBlank {
    key: String,
}

impl OnBlank {
    /// Creates a run-if-blank marker for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Returns the key that gates the step.
    pub fn key(&self) -> &str {
        &self.key
    }
}

type CatchRule = Arc<dyn Fn(&CapsuleError) -> bool + Send + Sync>;

/// Marks a step as a failure handler.
///
/// A catch step never runs in the normal pass. After a pass fails, it is
/// invoked for every captured failure its rule matches.
///
/// # Examples
///
/// ```
/// use capsule_core::{Catch, CapsuleError, Message};
///
/// let catch = Catch::of::<Message>();
/// assert!(catch.is_catch(&CapsuleError::msg("boom")));
/// assert!(!catch.is_catch(&CapsuleError::UnresolvedParameter { name: "x".into() }));
///
/// let catch = Catch::when(|e| matches!(e, CapsuleError::UnresolvedParameter { .. }));
/// assert!(catch.is_catch(&CapsuleError::UnresolvedParameter { name: "x".into() }));
/// ```
#[derive(Clone)]
pub struct Catch {
    rules: Vec<CatchRule>,
    described: Vec<String>,
}

impl Catch {
    /// Matches domain failures of type `E`.
    pub fn of<E>() -> Self
    where
        E: StdError + 'static,
    {
        Self::empty().or::<E>()
    }

    /// Matches failures accepted by `predicate`.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&CapsuleError) -> bool + Send + Sync + 'static,
    {
        Self::empty().or_when(predicate)
    }

    /// Matches every failure.
    pub fn any() -> Self {
        Self::when(|_| true)
    }

    /// Also matches domain failures of type `E`.
    pub fn or<E>(mut self) -> Self
    where
        E: StdError + 'static,
    {
        self.rules.push(Arc::new(|failure: &CapsuleError| {
            failure.downcast_ref::<E>().is_some()
        }));
        self.described.push(std::any::type_name::<E>().to_string());
        self
    }

    /// Also matches failures accepted by `predicate`.
    pub fn or_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CapsuleError) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Arc::new(predicate));
        self.described.push("<predicate>".to_string());
        self
    }

    /// Returns `true` if this marker claims `failure`.
    pub fn is_catch(&self, failure: &CapsuleError) -> bool {
        self.rules.iter().any(|rule| rule(failure))
    }

    fn empty() -> Self {
        Self {
            rules: Vec::new(),
            described: Vec::new(),
        }
    }
}

impl fmt::Debug for Catch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catch")
            .field("rules", &self.described)
            .finish()
    }
}

/// A marker attached to a step.
#[derive(Debug, Clone)]
pub enum Marker {
    /// See [`Setter`].
    Setter(Setter),
    /// See [`Catch`].
    Catch(Catch),
    /// See [`OnBlank`].
    OnBlank(OnBlank),
}

impl From<Setter> for Marker {
    fn from(marker: Setter) -> Self {
        Marker::Setter(marker)
    }
}

impl From<Catch> for Marker {
    fn from(marker: Catch) -> Self {
        Marker::Catch(marker)
    }
}

impl From<OnBlank> for Marker {
    fn from(marker: OnBlank) -> Self {
        Marker::OnBlank(marker)
    }
}

/// A marker category that can be looked up with [`Markers::find`].
pub trait MarkerKind {
    /// Returns the marker as `Self` if it belongs to this category.
    fn from_marker(marker: &Marker) -> Option<&Self>;
}

impl MarkerKind for Setter {
    fn from_marker(marker: &Marker) -> Option<&Self> {
        match marker {
            Marker::Setter(setter) => Some(setter),
            _ => None,
        }
    }
}

impl MarkerKind for Catch {
    fn from_marker(marker: &Marker) -> Option<&Self> {
        match marker {
            Marker::Catch(catch) => Some(catch),
            _ => None,
        }
    }
}

impl MarkerKind for OnBlank {
    fn from_marker(marker: &Marker) -> Option<&Self> {
        match marker {
            Marker::OnBlank(on_blank) => Some(on_blank),
            _ => None,
        }
    }
}

/// The markers attached to one step, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Markers(Vec<Marker>);

impl Markers {
    /// Creates an empty marker list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a marker.
    pub fn push(&mut self, marker: impl Into<Marker>) {
        self.0.push(marker.into());
    }

    /// Returns the first marker of category `M`, or `None` if the step has none.
    pub fn find<M: MarkerKind>(&self) -> Option<&M> {
        self.0.iter().find_map(M::from_marker)
    }

    /// Returns `true` if a marker of category `M` is attached.
    pub fn has<M: MarkerKind>(&self) -> bool {
        self.find::<M>().is_some()
    }

    /// Returns an iterator over all markers.
    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.0.iter()
    }

    /// Returns the number of attached markers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no markers are attached.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
