//! Context variables.
//!
//! A [`ContextVar`] is a typed handle to one slot in the active context of the
//! calling thread. `get`, `set` and `reset` always operate on whatever store
//! the thread currently has installed; switching stores between tasks is the
//! scheduler's job, done through [`Context::run`](crate::Context::run).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::error::{TaskVarResult, VariableError};
use crate::slot;
use crate::token::{Prior, ResetToken};
use crate::value::Value;

/// Identity of one declared variable.
///
/// Identity is by declaration, not by name: two variables declared with the
/// same name are distinct keys. Equality and hashing use only the id.
#[derive(Clone)]
pub struct VarId {
    uuid: Uuid,
    name: Arc<str>,
}

impl VarId {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: Arc::from(name.into()),
        }
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Debug name given at declaration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for VarId {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for VarId {}

impl Hash for VarId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarId({:?}, {})", self.name, self.uuid)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueSource {
    /// Entry in the active store.
    Context,
    /// Fallback passed by the caller.
    Fallback,
    /// Default given when the variable was declared.
    Declared,
}

/// A value together with the source that answered the lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    /// The value.
    pub value: T,
    /// Which source produced it.
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Discards the source.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Typed task-local variable.
///
/// Declare one per logical slot, usually in a `static` behind
/// [`std::sync::LazyLock`]; clones share the identity.
///
/// # Examples
///
/// ```
/// use taskvars::{copy_current_context, ContextVar};
///
/// let var = ContextVar::with_default("var", 42);
/// assert_eq!(var.get().unwrap(), 42);
///
/// let token = var.set(1);
/// assert_eq!(var.get().unwrap(), 1);
///
/// let ctx = copy_current_context();
/// let _second = var.set(2);
/// assert_eq!(ctx.run(|| var.get().unwrap()), 1);
/// assert_eq!(var.get().unwrap(), 2);
/// # drop(token);
/// ```
#[derive(Clone)]
pub struct ContextVar<T> {
    id: VarId,
    default: Option<T>,
}

impl<T> ContextVar<T> {
    /// Identity used as the store key.
    #[must_use]
    pub const fn id(&self) -> &VarId {
        &self.id
    }

    /// Debug name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Default given at declaration, if any.
    #[must_use]
    pub const fn default_value(&self) -> Option<&T> {
        self.default.as_ref()
    }
}

impl<T: Clone + Send + Sync + 'static> ContextVar<T> {
    /// Declares a variable without a default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: VarId::new(name),
            default: None,
        }
    }

    /// Declares a variable with a default used when the active store has no entry.
    pub fn with_default(name: impl Into<String>, default: T) -> Self {
        Self {
            id: VarId::new(name),
            default: Some(default),
        }
    }

    fn downcast(&self, value: &Value) -> Result<T, VariableError> {
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| VariableError::TypeMismatch {
                name: self.name().to_string(),
                expected: std::any::type_name::<T>(),
                found: value.type_name(),
            })
    }

    /// Entry in the active store, if any.
    fn stored(&self) -> Result<Option<T>, VariableError> {
        let (_, store) = slot::snapshot();
        store.get(&self.id).map(|value| self.downcast(value)).transpose()
    }

    /// Resolves the value with an explicit record of its source.
    ///
    /// Order: `fallback` if given, then the active store entry, then the
    /// declared default. The store is not consulted when a fallback is given.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::Lookup`] if all three are absent, or
    /// [`VariableError::TypeMismatch`] if the store entry has the wrong type.
    pub fn resolve(&self, fallback: Option<T>) -> TaskVarResult<Resolved<T>> {
        if let Some(value) = fallback {
            return Ok(Resolved {
                value,
                source: ValueSource::Fallback,
            });
        }
        if let Some(value) = self.stored()? {
            return Ok(Resolved {
                value,
                source: ValueSource::Context,
            });
        }
        if let Some(value) = self.default.clone() {
            return Ok(Resolved {
                value,
                source: ValueSource::Declared,
            });
        }
        Err(VariableError::Lookup {
            name: self.name().to_string(),
        }
        .into())
    }

    /// Current value: store entry, else declared default.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::Lookup`] if the variable is unset and has no default.
    pub fn get(&self) -> TaskVarResult<T> {
        self.resolve(None).map(Resolved::into_value)
    }

    /// Lookup with an explicit fallback, which wins over both the store
    /// entry and the declared default. Same as `resolve(Some(fallback))`.
    ///
    /// Use [`ContextVar::try_get`] to fall back only when the variable is unset.
    #[allow(clippy::unused_self)]
    pub fn get_or(&self, fallback: T) -> T {
        fallback
    }

    /// Current value, or `None` when the variable is unset and has no default.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::TypeMismatch`] if the store entry has the wrong type.
    pub fn try_get(&self) -> TaskVarResult<Option<T>> {
        match self.resolve(None) {
            Ok(resolved) => Ok(Some(resolved.value)),
            Err(err) if err.is_lookup() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Returns true if the active store has an entry for this variable.
    #[must_use]
    pub fn is_set(&self) -> bool {
        slot::snapshot().1.contains_key(&self.id)
    }

    /// Binds `value` in the active store and returns a token undoing it.
    pub fn set(&self, value: T) -> ResetToken<T> {
        let (context, store) = slot::snapshot();
        let prior = store
            .get(&self.id)
            .cloned()
            .map_or(Prior::Missing, Prior::Value);
        slot::replace_store(store.insert(self.id.clone(), Value::new(value)));
        ResetToken::new(self.id.clone(), context, prior)
    }

    /// Restores the state recorded in `token`.
    ///
    /// Resetting an already used token is a no-op.
    ///
    /// # Errors
    ///
    /// - [`VariableError::TokenVariableMismatch`] if the token belongs to another variable.
    /// - [`VariableError::TokenContextMismatch`] if the token was created in a
    ///   different context than the active one.
    pub fn reset(&self, token: &ResetToken<T>) -> TaskVarResult<()> {
        if token.is_used() {
            return Ok(());
        }
        if token.var() != &self.id {
            return Err(VariableError::TokenVariableMismatch {
                token_var: token.var().name().to_string(),
                var: self.name().to_string(),
            }
            .into());
        }

        let (context, store) = slot::snapshot();
        if token.context_id() != context {
            return Err(VariableError::TokenContextMismatch {
                name: self.name().to_string(),
                created_in: token.context_id(),
                active: context,
            }
            .into());
        }

        let restored = match token.prior() {
            Prior::Value(value) => store.insert(self.id.clone(), value.clone()),
            Prior::Missing if store.contains_key(&self.id) => store.remove(&self.id)?,
            Prior::Missing => store,
        };
        slot::replace_store(restored);
        token.mark_used();
        Ok(())
    }

    /// Runs `f` with the variable bound to `value`, resetting on every exit path.
    pub fn scope<R>(&self, value: T, f: impl FnOnce() -> R) -> R {
        let guard = ScopeGuard {
            var: self,
            token: self.set(value),
        };
        let result = f();
        drop(guard);
        result
    }
}

struct ScopeGuard<'a, T: Clone + Send + Sync + 'static> {
    var: &'a ContextVar<T>,
    token: ResetToken<T>,
}

impl<T: Clone + Send + Sync + 'static> Drop for ScopeGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.var.reset(&self.token) {
            warn!(var = %self.var.id, error = %err, "scoped value could not be reset");
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ContextVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextVar")
            .field("id", &self.id)
            .field("default", &self.default)
            .finish()
    }
}
