//! The cache engine: the force path behind every `deref`.
//!
//! Tier order is fixed: memory hit, then disk hit, then compute, all under
//! single-flight per fingerprint. Failed computations fulfil their slot with
//! the error and leave nothing behind, so a retry recomputes. Every outcome
//! is reported through tracing with fingerprint, function name and duration.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use pocket_core::{EntryMeta, EntryPath, Fingerprint, PocketError, StoreError, Value};

use crate::config::StorageMode;
use crate::context::Pocket;

/// Everything the engine needs to know about one force, besides the thunk.
pub(crate) struct ForceSpec {
    pub fingerprint: Fingerprint,
    pub path: EntryPath,
    pub fn_name: String,
    pub canonical_id: String,
    pub args_summary: Vec<String>,
    pub storage: StorageMode,
}

/// Force one fingerprint through the tiers.
///
/// The thunk runs on the caller that wins the in-flight race; every other
/// concurrent forcer of the same fingerprint awaits the shared slot.
pub(crate) async fn force<F>(
    ctx: &Pocket,
    spec: ForceSpec,
    thunk: F,
) -> Result<Value, PocketError>
where
    F: FnOnce() -> Result<Value, PocketError> + Send,
{
    let mem = ctx.mem_store();
    if spec.storage.uses_mem() {
        if let Some(value) = mem.lookup(&spec.fingerprint).await {
            debug!(
                fingerprint = %spec.fingerprint.prefix(8),
                fn_name = %spec.fn_name,
                "memory hit"
            );
            return Ok(value);
        }
    }

    let slot = ctx.inner.flights.acquire(spec.fingerprint);
    let outcome = slot
        .get_or_init(|| miss_path(ctx, &spec, thunk))
        .await
        .clone();
    ctx.inner.flights.release(&spec.fingerprint, &slot);
    outcome
}

/// Disk lookup, then compute-and-persist. Runs at most once per slot.
async fn miss_path<F>(ctx: &Pocket, spec: &ForceSpec, thunk: F) -> Result<Value, PocketError>
where
    F: FnOnce() -> Result<Value, PocketError> + Send,
{
    let codec = ctx.codec();
    let disk = ctx.entry_store();

    if spec.storage.uses_disk() {
        let started = Instant::now();
        match disk.read(&spec.path).await {
            Ok(Some((meta, bytes))) => {
                if meta.fingerprint != spec.fingerprint {
                    // Prefix collision inside the entry directory; the full
                    // fingerprint in the metadata is authoritative.
                    warn!(
                        fingerprint = %spec.fingerprint.prefix(8),
                        found = %meta.fingerprint.prefix(8),
                        "entry belongs to a different fingerprint, recomputing"
                    );
                } else if meta.encoder_version != codec.version() {
                    warn!(
                        fingerprint = %spec.fingerprint.prefix(8),
                        entry_version = %meta.encoder_version,
                        codec_version = %codec.version(),
                        "encoder version mismatch, discarding entry"
                    );
                    let _ = disk.delete(&spec.path).await;
                } else {
                    match codec.decode(&bytes) {
                        Ok(value) => {
                            debug!(
                                fingerprint = %spec.fingerprint.prefix(8),
                                fn_name = %spec.fn_name,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "disk hit"
                            );
                            if spec.storage.uses_mem() {
                                ctx.mem_store().insert(spec.fingerprint, value.clone()).await;
                            }
                            return Ok(value);
                        }
                        Err(err) => {
                            warn!(
                                fingerprint = %spec.fingerprint.prefix(8),
                                error = %err,
                                "undecodable entry, discarding and recomputing"
                            );
                            let _ = disk.delete(&spec.path).await;
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(err @ StoreError::Io { .. }) => return Err(err.into()),
            Err(StoreError::Corrupt { path, detail }) => {
                warn!(path = %path, error = %detail, "corrupt entry, discarding and recomputing");
                let _ = disk.delete(&spec.path).await;
            }
        }
    }

    let started = Instant::now();
    let value = thunk().map_err(|err| {
        warn!(
            fingerprint = %spec.fingerprint.prefix(8),
            fn_name = %spec.fn_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            error = %err,
            "computation failed, nothing cached"
        );
        err
    })?;
    info!(
        fingerprint = %spec.fingerprint.prefix(8),
        fn_name = %spec.fn_name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "computed"
    );

    let mut memoize = spec.storage.uses_mem();
    if spec.storage.uses_disk() {
        match codec.encode(&value) {
            Ok(bytes) => {
                let meta = EntryMeta {
                    fn_name: spec.fn_name.clone(),
                    id: spec.canonical_id.clone(),
                    fingerprint: spec.fingerprint,
                    encoder_version: codec.version().to_string(),
                    created_at: Utc::now(),
                    args_summary: spec.args_summary.clone(),
                };
                disk.write(&spec.path, &meta, &bytes).await?;
                debug!(
                    fingerprint = %spec.fingerprint.prefix(8),
                    path = %spec.path,
                    bytes = bytes.len(),
                    "entry persisted"
                );
            }
            Err(err) => {
                // The computation itself succeeded; return the value but
                // leave both tiers untouched so no retry caches it either.
                warn!(
                    fingerprint = %spec.fingerprint.prefix(8),
                    fn_name = %spec.fn_name,
                    error = %err,
                    "value not serialisable, returning uncached result"
                );
                memoize = false;
            }
        }
    }
    if memoize {
        ctx.mem_store().insert(spec.fingerprint, value.clone()).await;
    }
    Ok(value)
}
