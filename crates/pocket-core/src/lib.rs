#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pocket-core** – Core abstractions for the Pocket memoization engine.
//!
//! This crate provides the fundamental value model, identity rules, keying
//! scheme and storage traits used throughout the Pocket ecosystem. It sits at
//! the bottom of the crate graph and defines the contracts for cache entry
//! persistence without providing concrete cache implementations.
//!
//! Cache tier drivers (filesystem, in-memory) implement these traits in
//! separate crates that depend on this core abstraction; the engine crate
//! composes them into the actual memoization layer.

/// Error kinds shared across the Pocket ecosystem.
pub mod error;

/// Dynamic value model: the inputs and outputs of memoized computations.
pub mod value;

/// Canonical identifier trees derived from values.
pub mod ident;

/// Identity rules and the user-extensible id-hook registry.
pub mod identity;

/// Canonical strings, fingerprints and cache entry paths.
pub mod keying;

/// Opaque value encoding capability and the default MessagePack codec.
pub mod codec;

/// Cache entry metadata and the on-disk store abstraction.
pub mod store;

/// Built-in tabular dataset type used by data-analysis workloads.
pub mod dataset;

//─────────────────────────────
//  Convenience re-exports
//─────────────────────────────

pub use error::PocketError;
pub use value::{Callable, ForeignValue, HandleState, Keyword, LazyValue, NamedFn, Value};
pub use ident::Identifier;
pub use identity::{call_identity, id_of, register_id_hook, IdHookFn};
pub use keying::{canonical_string, EntryPath, Fingerprint};
pub use codec::{register_foreign_codec, ForeignCodec, MsgpackCodec, ValueCodec};
pub use store::{EntryMeta, EntryStore, StoreError, StoredEntry};
pub use dataset::{Column, Dataset, DATASET_TAG};

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        call_identity, canonical_string, id_of, register_foreign_codec, register_id_hook,
        Callable, Column, Dataset, EntryMeta, EntryPath, EntryStore, Fingerprint, ForeignCodec,
        ForeignValue, HandleState, Identifier, Keyword, LazyValue, MsgpackCodec, NamedFn,
        PocketError, StoreError, StoredEntry, Value, ValueCodec, DATASET_TAG,
    };
}
