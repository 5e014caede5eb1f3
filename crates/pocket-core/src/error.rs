//! Error kinds shared across the Pocket ecosystem.
//!
//! The engine delivers one failure to every forcer awaiting the same
//! computation, so the error type is `Clone` and carries rendered detail
//! strings rather than source errors.

use crate::store::StoreError;

/// Errors produced anywhere in the Pocket ecosystem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PocketError {
    /// `wrap` received something that is not a named function or keyword.
    #[error("requires a named function or keyword: {0}")]
    BadFunction(String),

    /// A value of a type with no registered identity hook reached `id_of`.
    #[error("no identity hook registered for type tag `{type_tag}`")]
    UnknownIdentifiable {
        /// The type tag that had no registered hook.
        type_tag: String,
    },

    /// Serialization refused a computed value. The value is still returned
    /// to forcers; the entry is never persisted.
    #[error("failed to encode value: {detail}")]
    Encode {
        /// Rendered encoder failure.
        detail: String,
    },

    /// A persisted entry could not be read back by the current encoder.
    /// The engine treats this as a miss, deletes the entry and recomputes.
    #[error("failed to decode cached value: {detail}")]
    Decode {
        /// Rendered decoder failure.
        detail: String,
    },

    /// The wrapped computation itself raised. Never cached; the next force
    /// retries the computation.
    #[error("computation `{fn_name}` failed: {detail}")]
    Compute {
        /// Qualified name of the failing function.
        fn_name: String,
        /// Rendered failure from the user computation.
        detail: String,
    },

    /// The filesystem failed underneath the disk store.
    #[error("disk i/o failure at {path}: {detail}")]
    DiskIo {
        /// Path the operation targeted.
        path: String,
        /// Rendered i/o failure.
        detail: String,
    },

    /// A configuration setter received an invalid value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PocketError {
    /// Build a [`PocketError::Compute`] from an arbitrary thunk failure.
    pub fn compute(fn_name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Compute { fn_name: fn_name.into(), detail: err.to_string() }
    }

    /// Build a [`PocketError::Encode`] from an arbitrary encoder failure.
    pub fn encode(err: impl std::fmt::Display) -> Self {
        Self::Encode { detail: err.to_string() }
    }

    /// Build a [`PocketError::Decode`] from an arbitrary decoder failure.
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode { detail: err.to_string() }
    }
}

impl From<StoreError> for PocketError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io { path, detail } => PocketError::DiskIo { path, detail },
            StoreError::Corrupt { path, detail } => {
                PocketError::Decode { detail: format!("corrupt entry at {path}: {detail}") }
            }
        }
    }
}
