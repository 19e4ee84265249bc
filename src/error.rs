//! Error types for taskvars.
//!
//! All errors are strongly typed using thiserror so callers can pattern
//! match on the exact failure. None of them is recovered silently inside the
//! crate: invariants are restored first, then the error is propagated.

use thiserror::Error;

use crate::context::ContextId;
use crate::store::StoreError;

/// Errors raised by variable access and the set/reset protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("Context variable '{name}' has no value and no default")]
    Lookup {
        name: String,
    },

    #[error("Context variable '{name}' holds a {found}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Reset token for '{token_var}' cannot reset variable '{var}'")]
    TokenVariableMismatch {
        token_var: String,
        var: String,
    },

    #[error("Reset token for '{name}' was created in context {created_in}, active context is {active}")]
    TokenContextMismatch {
        name: String,
        created_in: ContextId,
        active: ContextId,
    },
}

impl VariableError {
    /// Returns true if this error reports a misused reset token.
    #[must_use]
    pub const fn is_invalid_token_use(&self) -> bool {
        matches!(
            self,
            Self::TokenVariableMismatch { .. } | Self::TokenContextMismatch { .. }
        )
    }
}

/// Errors raised when entering a context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context {id} is already entered")]
    AlreadyEntered {
        id: ContextId,
    },
}

/// Errors raised by the scheduler integrations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Queue for '{pool}' is full (capacity {capacity})")]
    QueueFull {
        pool: String,
        capacity: usize,
    },

    #[error("Execution path '{pool}' is disconnected")]
    Disconnected {
        pool: String,
    },

    #[error("Job timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Job on '{pool}' panicked: {message}")]
    JobPanicked {
        pool: String,
        message: String,
    },
}

/// Top-level error type for taskvars.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskVarError {
    #[error("Variable error: {0}")]
    Variable(#[from] VariableError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl TaskVarError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a variable error.
    #[must_use]
    pub const fn is_variable(&self) -> bool {
        matches!(self, Self::Variable(_))
    }

    /// Returns true if this is a lookup miss.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Variable(VariableError::Lookup { .. }))
    }

    /// Returns true if a reset token was misused.
    #[must_use]
    pub const fn is_invalid_token_use(&self) -> bool {
        match self {
            Self::Variable(e) => e.is_invalid_token_use(),
            _ => false,
        }
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this is a context error.
    #[must_use]
    pub const fn is_context(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Returns true if this is a scheduler error.
    #[must_use]
    pub const fn is_scheduler(&self) -> bool {
        matches!(self, Self::Scheduler(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    ///
    /// Only backpressure and timeouts qualify. Programming errors such as
    /// token misuse never change on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Scheduler(e) => matches!(
                e,
                SchedulerError::QueueFull { .. } | SchedulerError::Timeout { .. }
            ),
            Self::Variable(_) | Self::Store(_) | Self::Context(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for taskvars operations.
pub type TaskVarResult<T> = Result<T, TaskVarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_message() {
        let err = VariableError::Lookup {
            name: "locale".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("locale"));
        assert!(msg.contains("no value"));
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = VariableError::TypeMismatch {
            name: "precision".to_string(),
            expected: "u32",
            found: "alloc::string::String",
        };
        let msg = format!("{err}");
        assert!(msg.contains("precision"));
        assert!(msg.contains("u32"));
    }

    #[test]
    fn test_token_errors_are_invalid_token_use() {
        let err = VariableError::TokenVariableMismatch {
            token_var: "a".to_string(),
            var: "b".to_string(),
        };
        assert!(err.is_invalid_token_use());

        let err = VariableError::TokenContextMismatch {
            name: "a".to_string(),
            created_in: ContextId::new(),
            active: ContextId::new(),
        };
        assert!(err.is_invalid_token_use());

        let lookup = VariableError::Lookup {
            name: "a".to_string(),
        };
        assert!(!lookup.is_invalid_token_use());
    }

    #[test]
    fn test_scheduler_error_timeout() {
        let err = SchedulerError::Timeout { duration_ms: 250 };
        let msg = format!("{err}");
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_taskvar_error_from_variable() {
        let err: TaskVarError = VariableError::Lookup {
            name: "x".to_string(),
        }
        .into();
        assert!(err.is_variable());
        assert!(err.is_lookup());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_taskvar_error_from_store() {
        let err: TaskVarError = StoreError::KeyNotFound.into();
        assert!(err.is_store());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_taskvar_error_from_context() {
        let err: TaskVarError = ContextError::AlreadyEntered { id: ContextId::new() }.into();
        assert!(err.is_context());
        assert!(format!("{err}").contains("already entered"));
    }

    #[test]
    fn test_taskvar_error_internal() {
        let err = TaskVarError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }

    #[test]
    fn test_taskvar_error_retryable() {
        let full: TaskVarError = SchedulerError::QueueFull {
            pool: "callbacks".to_string(),
            capacity: 4,
        }
        .into();
        assert!(full.is_scheduler());
        assert!(full.is_retryable());

        let timeout: TaskVarError = SchedulerError::Timeout { duration_ms: 10 }.into();
        assert!(timeout.is_retryable());

        let gone: TaskVarError = SchedulerError::Disconnected {
            pool: "callbacks".to_string(),
        }
        .into();
        assert!(!gone.is_retryable());

        let token: TaskVarError = VariableError::TokenVariableMismatch {
            token_var: "a".to_string(),
            var: "b".to_string(),
        }
        .into();
        assert!(token.is_invalid_token_use());
        assert!(!token.is_retryable());
    }
}
