#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pocket** – Content-addressed memoization engine for data-analysis
//! pipelines.
//!
//! Wrap a named function with arguments and get back a lazy [`Cached`]
//! handle. The first `deref` computes the value and persists it under a
//! content-addressed key; later derefs, in this process or a later one,
//! return the cached value without recomputing. Handles may appear as
//! arguments to further wraps, forming a recipe graph: forcing a leaf forces
//! its transitive dependencies in dependency order, each node memoized under
//! single-flight.
//!
//! State is shared through a [`Pocket`] context (configuration, memory
//! store, in-flight registry). Most callers use the module-level functions,
//! which go through a lazy process-wide default context; tests and embedders
//! can run against [`Pocket::isolated`] instances instead.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Configuration record, storage modes and the resolution chain.
pub mod config;

/// The memoization context and wrapping entry points.
pub mod context;

mod engine;
mod flight;

/// Cached handles, forcing and partial application.
pub mod handle;

/// Invalidation and cache inspection.
pub mod inspect;

/// Provenance graphs over recipe edges.
pub mod story;

//─────────────────────────────
//  Re-exports
//─────────────────────────────

pub use config::{MemOptions, MemPolicyKind, PocketConfig, PolicyOverrides, StorageMode};
pub use context::Pocket;
pub use handle::{maybe_deref, Cached, WrappedFn};
pub use inspect::{CacheEntry, CacheStats};
pub use story::{origin_story, OriginStory, StoryEdge, StoryNode};

pub use pocket_core::{
    canonical_string, id_of, register_foreign_codec, register_id_hook, Callable, Column, Dataset,
    EntryPath, Fingerprint, ForeignCodec, ForeignValue, HandleState, IdHookFn, Identifier,
    Keyword, LazyValue, NamedFn, PocketError, Value, DATASET_TAG,
};
pub use pocket_store_memory::EvictionPolicy;

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        id_of, maybe_deref, origin_story, register_foreign_codec, register_id_hook, wrap,
        wrap_fn, Cached, Callable, Column, Dataset, Fingerprint, HandleState, Identifier,
        Keyword, MemOptions, MemPolicyKind, NamedFn, Pocket, PocketConfig, PocketError,
        PolicyOverrides, StorageMode, Value,
    };
}

//─────────────────────────────
//  Process-wide default context
//─────────────────────────────

static DEFAULT_CONTEXT: Lazy<Pocket> = Lazy::new(Pocket::new);

/// The lazy process-wide context the module-level functions go through.
pub fn default_context() -> &'static Pocket {
    &DEFAULT_CONTEXT
}

/// Wrap a callable and arguments into a lazy handle. See [`Pocket::wrap`].
pub fn wrap(
    callable: impl Into<Callable>,
    args: Vec<Value>,
) -> Result<Cached, PocketError> {
    default_context().wrap(callable, args)
}

/// Wrap with per-handle overrides. See [`Pocket::wrap_with`].
pub fn wrap_with(
    callable: impl Into<Callable>,
    args: Vec<Value>,
    overrides: PolicyOverrides,
) -> Result<Cached, PocketError> {
    default_context().wrap_with(callable, args, overrides)
}

/// Partially apply a callable. See [`Pocket::wrap_fn`].
pub fn wrap_fn(callable: impl Into<Callable>, overrides: Option<PolicyOverrides>) -> WrappedFn {
    default_context().wrap_fn(callable, overrides)
}

/// Remove the memory and disk entries for one exact call.
pub async fn invalidate(
    callable: impl Into<Callable>,
    args: Vec<Value>,
) -> Result<(), PocketError> {
    default_context().invalidate(callable, args).await
}

/// Remove every entry recorded under this function name.
pub async fn invalidate_all(fn_name: &str) -> Result<(), PocketError> {
    default_context().invalidate_all(fn_name).await
}

/// Empty the memory tier of the default context.
pub async fn clear_mem_cache() {
    default_context().clear_mem_cache().await
}

/// Remove the default context's cache directory and empty its memory tier.
pub async fn cleanup() -> Result<(), PocketError> {
    default_context().cleanup().await
}

/// Enumerate cache entries, optionally restricted by function-name prefix.
pub async fn cache_entries(fn_prefix: Option<&str>) -> Result<Vec<CacheEntry>, PocketError> {
    default_context().cache_entries(fn_prefix).await
}

/// Aggregate entry counts and disk usage.
pub async fn cache_stats() -> Result<CacheStats, PocketError> {
    default_context().cache_stats().await
}

/// Force experiment handles and tabulate their varying inputs and results.
pub async fn compare_experiments(handles: &[Cached]) -> Result<Dataset, PocketError> {
    default_context().compare_experiments(handles).await
}

/// The default context's resolved configuration.
pub fn config() -> PocketConfig {
    default_context().config()
}

/// Set or clear the default context's base cache directory.
pub fn set_base_cache_dir(dir: Option<PathBuf>) {
    default_context().set_base_cache_dir(dir)
}

/// Set or clear the default context's storage mode.
pub fn set_storage(mode: Option<StorageMode>) {
    default_context().set_storage(mode)
}

/// Set or clear the default context's memory cache options.
pub fn set_mem_cache_options(options: Option<MemOptions>) -> Result<(), PocketError> {
    default_context().set_mem_cache_options(options)
}

/// Reset the default context's memory cache options to the lower layers.
pub fn reset_mem_cache_options() {
    default_context().reset_mem_cache_options()
}

/// Set or clear the default context's filename length cap.
pub fn set_filename_length_limit(limit: Option<usize>) -> Result<(), PocketError> {
    default_context().set_filename_length_limit(limit)
}
