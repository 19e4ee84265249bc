//! Context handles.
//!
//! A [`Context`] wraps one version of the persistent store. Running a
//! function in a context installs that version as the thread's active store
//! and, when the function exits by any path, captures the resulting version
//! back into the handle and reinstates whatever was active before.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::error::{ContextError, TaskVarError, TaskVarResult};
use crate::slot::{self, ActiveSlot};
use crate::store::PersistentMap;
use crate::value::Value;
use crate::var::{ContextVar, VarId};

/// Store version held by a context: variable identity to payload.
pub type ContextMap = PersistentMap<VarId, Value>;

/// Stable identifier for a context.
///
/// Reset tokens remember the id that was active when they were created and
/// only reset inside the same context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random context ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a thread's active context as a standalone handle.
///
/// O(1): the store version is shared, not copied.
#[must_use]
pub fn copy_current_context() -> Context {
    Context::from_store(slot::snapshot().1)
}

/// Handle to one version of the context store.
///
/// Share it as `Arc<Context>` between a task and its scheduler. A context may
/// be entered by at most one caller at a time; re-entry is refused.
pub struct Context {
    id: ContextId,
    store: Mutex<ContextMap>,
    entered: AtomicBool,
}

impl Context {
    /// Creates a context with an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::from_store(ContextMap::new())
    }

    /// Same as [`copy_current_context`].
    #[must_use]
    pub fn copy_current() -> Self {
        copy_current_context()
    }

    pub(crate) fn from_store(store: ContextMap) -> Self {
        Self {
            id: ContextId::new(),
            store: Mutex::new(store),
            entered: AtomicBool::new(false),
        }
    }

    /// New handle with its own id sharing this context's current store version.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self::from_store(self.store())
    }

    /// Identity of this context.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Returns true while some caller is running inside this context.
    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, ContextMap> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a consistent version.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The wrapped store version.
    ///
    /// While the context is entered this is the version from entry time;
    /// mutations made inside are captured when `run` exits.
    #[must_use]
    pub fn store(&self) -> ContextMap {
        self.lock().clone()
    }

    /// Runs `f` with this context installed as the thread's active context.
    ///
    /// Returns whatever `f` returns. If `f` panics, the previous context is
    /// restored before the panic continues.
    ///
    /// # Panics
    ///
    /// Panics if the context is already entered. Use [`Context::try_run`] to
    /// get an error instead.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.try_run(f) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }

    /// Runs `f` in this context, refusing re-entry.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::AlreadyEntered`] if the context is already
    /// entered on this or another thread; `f` is not called.
    pub fn try_run<R>(&self, f: impl FnOnce() -> R) -> TaskVarResult<R> {
        if self
            .entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TaskVarError::Context(ContextError::AlreadyEntered { id: self.id }));
        }

        let previous = slot::swap(ActiveSlot::new(self.id, self.store()));
        let _guard = RunGuard {
            context: self,
            previous: Some(previous),
        };
        trace!(context = %self.id, "entered context");

        Ok(f())
    }

    /// Typed lookup in the wrapped store.
    pub fn get<T: Clone + 'static>(&self, var: &ContextVar<T>) -> Option<T> {
        self.lock()
            .get(var.id())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Untyped lookup in the wrapped store.
    pub fn lookup(&self, id: &VarId) -> Option<Value> {
        self.lock().get(id).cloned()
    }

    /// Returns true if the wrapped store binds `id`.
    pub fn contains(&self, id: &VarId) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no variable is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All bindings of the wrapped store.
    #[must_use]
    pub fn entries(&self) -> Vec<(VarId, Value)> {
        let store = self.store();
        store
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }

    /// Serializable description of the bindings, for debugging.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let mut entries: Vec<SnapshotEntry> = self
            .store()
            .iter()
            .map(|(id, value)| SnapshotEntry {
                var_id: *id.as_uuid(),
                name: id.name().to_string(),
                type_name: value.type_name().to_string(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name).then(a.var_id.cmp(&b.var_id)));

        ContextSnapshot {
            context_id: self.id,
            taken_at: Utc::now(),
            entries,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("entered", &self.is_entered())
            .finish()
    }
}

/// Restores the previously active slot when `run` exits.
struct RunGuard<'a> {
    context: &'a Context,
    previous: Option<ActiveSlot>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let exited = slot::swap(previous);
            let replaced = std::mem::replace(&mut *self.context.lock(), exited.store);
            drop(replaced);
        }
        self.context.entered.store(false, Ordering::Release);
        trace!(context = %self.context.id, "exited context");
    }
}

/// One binding in a [`ContextSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Variable identity.
    pub var_id: Uuid,
    /// Variable debug name.
    pub name: String,
    /// Rust type of the bound value.
    pub type_name: String,
}

/// Debug view of a context's bindings at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Context the snapshot was taken from.
    pub context_id: ContextId,
    /// Capture time.
    pub taken_at: DateTime<Utc>,
    /// Bindings sorted by variable name.
    pub entries: Vec<SnapshotEntry>,
}

impl ContextSnapshot {
    /// Renders the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an internal error if serialization fails.
    pub fn to_json(&self) -> TaskVarResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TaskVarError::internal(format!("snapshot serialization failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::slot::current_context_id;

    #[test]
    fn test_new_context_is_empty() {
        let ctx = Context::new();
        assert!(ctx.is_empty());
        assert_eq!(ctx.len(), 0);
        assert!(ctx.entries().is_empty());
        assert!(!ctx.is_entered());
    }

    #[test]
    fn test_copy_freezes_value_at_copy_time() {
        let var = ContextVar::with_default("var", 42);
        assert_eq!(var.get().unwrap(), 42);

        let _first = var.set(1);
        let ctx = copy_current_context();
        let _second = var.set(2);

        assert_eq!(ctx.run(|| var.get().unwrap()), 1);
        assert_eq!(ctx.get(&var), Some(1));
        assert_eq!(var.get().unwrap(), 2);
    }

    #[test]
    fn test_run_captures_mutations_into_handle() {
        let var = ContextVar::new("locale");
        let ctx = Context::new();

        ctx.run(|| {
            let _ = var.set("de-DE".to_string());
        });
        assert!(!var.is_set());
        assert_eq!(ctx.get(&var).as_deref(), Some("de-DE"));

        let seen = ctx.run(|| var.get().unwrap());
        assert_eq!(seen, "de-DE");
    }

    #[test]
    fn test_run_installs_context_id() {
        let root = current_context_id();
        let ctx = Context::new();
        let inside = ctx.run(current_context_id);
        assert_eq!(inside, ctx.id());
        assert_eq!(current_context_id(), root);
    }

    #[test]
    fn test_nested_runs_restore_their_own_entry_state() {
        let var = ContextVar::with_default("n", 0u32);
        let outer = Context::new();
        let inner = Context::new();

        let observed = outer.run(|| {
            let _ = var.set(1);
            inner.run(|| {
                let _ = var.set(2);
            });
            var.get().unwrap()
        });

        assert_eq!(observed, 1);
        assert_eq!(outer.get(&var), Some(1));
        assert_eq!(inner.get(&var), Some(2));
        assert_eq!(var.get().unwrap(), 0);
    }

    #[test]
    fn test_reentry_is_refused() {
        let ctx = Context::new();
        let err = ctx.run(|| ctx.try_run(|| ()).unwrap_err());
        assert!(err.is_context());
        assert!(!ctx.is_entered());
    }

    #[test]
    fn test_run_restores_on_panic() {
        let var = ContextVar::new("request");
        let root = current_context_id();
        let ctx = Context::new();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.run(|| {
                let _ = var.set(7u32);
                panic!("step failed");
            })
        }));

        assert!(outcome.is_err());
        assert_eq!(current_context_id(), root);
        assert!(!var.is_set());
        assert!(!ctx.is_entered());
        assert_eq!(ctx.get(&var), Some(7));
    }

    #[test]
    fn test_run_passes_errors_through() {
        let ctx = Context::new();
        let result: Result<(), String> = ctx.run(|| Err("bad input".to_string()));
        assert_eq!(result.unwrap_err(), "bad input");
    }

    #[test]
    fn test_copy_is_independent() {
        let var = ContextVar::new("k");
        let original = Context::new();
        original.run(|| {
            let _ = var.set(1u8);
        });

        let copy = original.copy();
        assert_ne!(copy.id(), original.id());
        copy.run(|| {
            let _ = var.set(2u8);
        });

        assert_eq!(original.get(&var), Some(1));
        assert_eq!(copy.get(&var), Some(2));
    }

    #[test]
    fn test_lookup_and_entries() {
        let name = ContextVar::new("name");
        let count = ContextVar::new("count");
        let ctx = Context::new();
        ctx.run(|| {
            let _ = name.set("worker".to_string());
            let _ = count.set(3usize);
        });

        assert_eq!(ctx.len(), 2);
        assert!(ctx.contains(name.id()));
        let value = ctx.lookup(count.id()).unwrap();
        assert_eq!(value.downcast_ref::<usize>(), Some(&3));

        let mut names: Vec<String> = ctx
            .entries()
            .into_iter()
            .map(|(id, _)| id.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["count", "name"]);
    }

    #[test]
    fn test_snapshot_serializes() {
        let var = ContextVar::new("trace_span");
        let ctx = Context::new();
        ctx.run(|| {
            let _ = var.set(17u64);
        });

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.context_id, ctx.id());
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].name, "trace_span");
        assert_eq!(snapshot.entries[0].type_name, "u64");

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("trace_span"));
        let parsed: ContextSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_context_runs_on_other_thread() {
        let var = ContextVar::new("shared");
        let ctx = Arc::new(Context::new());
        ctx.run(|| {
            let _ = var.set(5i64);
        });

        let remote = Arc::clone(&ctx);
        let remote_var = var.clone();
        let seen = thread::spawn(move || remote.run(|| remote_var.get().unwrap()))
            .join()
            .unwrap();
        assert_eq!(seen, 5);
    }
}
