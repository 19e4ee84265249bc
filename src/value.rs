//! Type-erased payloads stored in a context.
//!
//! A context maps variables of different types, so entries are held as
//! `Arc<dyn Any + Send + Sync>`. The typed [`ContextVar`](crate::ContextVar)
//! handle is the only writer for its identity, which keeps the downcast
//! total in practice.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// Opaque value bound to a variable.
///
/// Cloning shares the payload.
///
/// # Examples
///
/// ```
/// use taskvars::Value;
///
/// let value = Value::new(String::from("en-US"));
/// assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("en-US"));
/// assert!(value.downcast_ref::<u32>().is_none());
/// ```
#[derive(Clone)]
pub struct Value {
    payload: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    /// Wraps a payload.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            payload: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Name of the stored Rust type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrows the payload as `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Returns true if the payload is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Returns true if both values share one payload allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
