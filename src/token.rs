//! Reset tokens returned by [`ContextVar::set`](crate::ContextVar::set).

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::ContextId;
use crate::value::Value;
use crate::var::VarId;

/// State of a variable before a `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prior<T> {
    /// The variable was bound to this value.
    Value(T),
    /// The variable had no entry in the active store.
    Missing,
}

impl<T> Prior<T> {
    /// Returns true if there was no prior entry.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Converts into an `Option`, mapping `Missing` to `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Missing => None,
        }
    }
}

/// Receipt for one `set`, able to undo exactly that mutation.
///
/// Only [`ContextVar::set`](crate::ContextVar::set) creates tokens. The first
/// successful reset marks the token used; later resets are no-ops.
#[must_use = "dropping the token makes the set irreversible"]
pub struct ResetToken<T> {
    var: VarId,
    context: ContextId,
    prior: Prior<Value>,
    used: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResetToken<T> {
    pub(crate) const fn new(var: VarId, context: ContextId, prior: Prior<Value>) -> Self {
        Self {
            var,
            context,
            prior,
            used: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// Identity of the variable this token resets.
    #[must_use]
    pub const fn var(&self) -> &VarId {
        &self.var
    }

    /// Context that was active when the token was created.
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.context
    }

    /// Returns true once the token has been consumed by a reset.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    /// Untyped state recorded at `set` time.
    #[must_use]
    pub const fn prior(&self) -> &Prior<Value> {
        &self.prior
    }

    pub(crate) fn mark_used(&self) {
        self.used.store(true, Ordering::Release);
    }
}

impl<T: 'static> ResetToken<T> {
    /// Value the variable held before the `set`.
    #[must_use]
    pub fn old_value(&self) -> Prior<&T> {
        match &self.prior {
            Prior::Value(value) => value.downcast_ref::<T>().map_or(Prior::Missing, Prior::Value),
            Prior::Missing => Prior::Missing,
        }
    }
}

impl<T> fmt::Debug for ResetToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetToken")
            .field("var", &self.var)
            .field("context", &self.context)
            .field("prior_missing", &self.prior.is_missing())
            .field("used", &self.is_used())
            .finish()
    }
}
