//! Core shared types - prop values, props, listeners, events, deps, modes.
//!
//! These types define the vocabulary between the virtual tree, the
//! reconciler, and the host document:
//! - [`PropValue`] - attribute values carried by intrinsic nodes
//! - [`Props`] - attribute map plus listener map (listeners diff by identity)
//! - [`Listener`] / [`Event`] - event plumbing
//! - [`Dep`] - resource dependency values compared by shallow identity
//! - [`RenderMode`] / [`CleanupMode`] - engine-wide mode switches

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

// =============================================================================
// Prop Values
// =============================================================================

/// An attribute value on an intrinsic node.
///
/// `Bool(false)` is the removal value: diffing treats it the same as an
/// absent entry and clears the attribute on the live node.
#[derive(Clone, Debug)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PropValue {
    /// Whether this value clears the attribute instead of setting it.
    pub fn is_removal(&self) -> bool {
        matches!(self, PropValue::Bool(false))
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            // Bit comparison keeps NaN stable across re-renders.
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PropValue {}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(value as i64)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

// =============================================================================
// Events and Listeners
// =============================================================================

/// An event delivered to a listener through the runtime's dispatch entry.
#[derive(Clone, Debug)]
pub struct Event {
    /// Event name, e.g. "click" or "input".
    pub name: String,
    /// Optional payload (e.g. the new value for an "input" event).
    pub payload: Option<PropValue>,
}

impl Event {
    /// Create an event with no payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), payload: None }
    }

    /// Create an event carrying a payload.
    pub fn with_payload(name: impl Into<String>, payload: impl Into<PropValue>) -> Self {
        Self { name: name.into(), payload: Some(payload.into()) }
    }
}

/// Event listener callback (Rc for shared ownership in closures).
///
/// Listener identity is pointer identity: the differ attaches a handler
/// exactly once for as long as re-renders pass the same `Rc`.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&Event)>);

impl Listener {
    pub fn new(f: impl Fn(&Event) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the listener.
    pub fn call(&self, event: &Event) {
        (self.0)(event)
    }

    /// Identity comparison - same allocation, not same behavior.
    pub fn same_identity(&self, other: &Listener) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.0))
    }
}

// =============================================================================
// Props
// =============================================================================

/// Attributes and listeners for an intrinsic node.
///
/// Attributes live under their own names; listeners are keyed by event name
/// and diffed by [`Listener::same_identity`].
#[derive(Clone, Debug, Default)]
pub struct Props {
    attrs: IndexMap<String, PropValue>,
    listeners: IndexMap<String, Listener>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set an attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Builder: attach a listener for an event name.
    pub fn on(mut self, event: impl Into<String>, listener: Listener) -> Self {
        self.listeners.insert(event.into(), listener);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.attrs.get(name)
    }

    pub fn listener(&self, event: &str) -> Option<&Listener> {
        self.listeners.get(event)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn listeners(&self) -> impl Iterator<Item = (&str, &Listener)> {
        self.listeners.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty() && self.listeners.is_empty()
    }

    /// Structural equality, with listeners compared by identity. Used to
    /// decide whether a reused component can skip re-rendering.
    pub(crate) fn same(&self, other: &Props) -> bool {
        self.attrs == other.attrs
            && self.listeners.len() == other.listeners.len()
            && self
                .listeners
                .iter()
                .all(|(k, l)| other.listeners.get(k).is_some_and(|o| o.same_identity(l)))
    }
}

// =============================================================================
// Resource Dependencies
// =============================================================================

/// A resource dependency value, compared by shallow per-element identity.
///
/// Primitive variants compare by value; `Token` carries an opaque identity
/// for values that only compare by "same object".
#[derive(Clone, Debug)]
pub enum Dep {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Token(u64),
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Dep::Unit, Dep::Unit) => true,
            (Dep::Bool(a), Dep::Bool(b)) => a == b,
            (Dep::Int(a), Dep::Int(b)) => a == b,
            (Dep::Float(a), Dep::Float(b)) => a.to_bits() == b.to_bits(),
            (Dep::Str(a), Dep::Str(b)) => a == b,
            (Dep::Token(a), Dep::Token(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Dep {}

impl From<bool> for Dep {
    fn from(value: bool) -> Self {
        Dep::Bool(value)
    }
}

impl From<i64> for Dep {
    fn from(value: i64) -> Self {
        Dep::Int(value)
    }
}

impl From<i32> for Dep {
    fn from(value: i32) -> Self {
        Dep::Int(value as i64)
    }
}

impl From<f64> for Dep {
    fn from(value: f64) -> Self {
        Dep::Float(value)
    }
}

impl From<&str> for Dep {
    fn from(value: &str) -> Self {
        Dep::Str(Rc::from(value))
    }
}

/// Shallow per-element dependency comparison.
pub fn deps_equal(a: &[Dep], b: &[Dep]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

// =============================================================================
// Modes
// =============================================================================

/// Rendering mode for the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    /// Normal client rendering: resources may stay pending across turns.
    #[default]
    Interactive,
    /// Synchronous-only rendering: a pending resource is a hard
    /// data-missing failure. All data must be pre-supplied.
    SyncOnly,
}

/// How cleanup failures during teardown are surfaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CleanupMode {
    /// Aggregate failures and re-raise after all cleanups ran.
    #[default]
    Strict,
    /// Log failures and continue.
    Lenient,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prop_value_equality() {
        assert_eq!(PropValue::from(1i64), PropValue::from(1i32));
        assert_ne!(PropValue::from(1i64), PropValue::from("1"));
        assert_eq!(PropValue::from(f64::NAN), PropValue::from(f64::NAN));
    }

    #[test]
    fn test_prop_value_removal() {
        assert!(PropValue::Bool(false).is_removal());
        assert!(!PropValue::Bool(true).is_removal());
        assert!(!PropValue::Int(0).is_removal());
        assert!(!PropValue::Str(String::new()).is_removal());
    }

    #[test]
    fn test_listener_identity() {
        let a = Listener::new(|_| {});
        let b = a.clone();
        let c = Listener::new(|_| {});

        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
    }

    #[test]
    fn test_deps_equal() {
        let a = vec![Dep::from(1), Dep::from("x"), Dep::Token(7)];
        let b = vec![Dep::from(1), Dep::from("x"), Dep::Token(7)];
        let c = vec![Dep::from(1), Dep::from("x"), Dep::Token(8)];

        assert!(deps_equal(&a, &b));
        assert!(!deps_equal(&a, &c));
        assert!(!deps_equal(&a, &b[..2]));
    }

    #[test]
    fn test_props_builder() {
        let p = Props::new()
            .attr("id", "header")
            .attr("disabled", false)
            .on("click", Listener::new(|_| {}));

        assert_eq!(p.get("id"), Some(&PropValue::Str("header".into())));
        assert!(p.get("disabled").is_some_and(PropValue::is_removal));
        assert!(p.listener("click").is_some());
        assert!(p.listener("input").is_none());
    }
}
