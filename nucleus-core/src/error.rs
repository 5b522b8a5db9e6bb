//! Error types for atom operations.
//!
//! Most misuse of the store is treated as a silent no-op (unresolved
//! indices, redundant registrations, double destroy). The variants here
//! cover the few conditions that surface as explicit failures.

use thiserror::Error;

use crate::value::ValueKind;

/// Result alias used throughout the crate.
pub type AtomResult<T> = Result<T, AtomError>;

/// Errors raised by atoms, collections and the store.
#[derive(Debug, Error)]
pub enum AtomError {
    /// A structural-only operation was invoked on an atom whose value is not
    /// a record (or sequence, where paths are allowed).
    #[error("cannot `{operation}` on atom `{key}` holding a {kind} value")]
    InvalidOperation {
        key: String,
        operation: &'static str,
        kind: ValueKind,
    },

    /// A mutator or subscription was invoked after `destroy()`.
    #[error("atom `{key}` was destroyed; `{operation}` is no longer allowed")]
    UseAfterDestroy {
        key: String,
        operation: &'static str,
    },

    /// `dispatch` was called with a name that is not bound to the atom.
    #[error("atom `{key}` has no action named `{action}`")]
    UnknownAction { key: String, action: String },

    /// The value could not be moved across the JSON boundary used for path
    /// lookups, merges and action arguments.
    #[error("value conversion failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AtomError {
    pub(crate) fn invalid(key: &str, operation: &'static str, kind: ValueKind) -> Self {
        Self::InvalidOperation {
            key: key.to_string(),
            operation,
            kind,
        }
    }

    pub(crate) fn destroyed(key: &str, operation: &'static str) -> Self {
        Self::UseAfterDestroy {
            key: key.to_string(),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_atom_and_operation() {
        let err = AtomError::invalid("counter", "merge", ValueKind::Scalar);
        assert_eq!(
            err.to_string(),
            "cannot `merge` on atom `counter` holding a scalar value"
        );

        let err = AtomError::destroyed("user", "update");
        assert_eq!(
            err.to_string(),
            "atom `user` was destroyed; `update` is no longer allowed"
        );
    }

    #[test]
    fn serde_errors_convert() {
        let parse: Result<u32, _> = serde_json::from_str("\"nope\"");
        let err: AtomError = parse.unwrap_err().into();
        assert!(matches!(err, AtomError::Serialization(_)));
    }
}
