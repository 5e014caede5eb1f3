//! Invalidation and cache inspection.
//!
//! Everything here goes through the entry store's metadata records, so the
//! value blobs are never decoded just to answer questions about the cache.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use pocket_core::{
    call_identity, Callable, Column, Dataset, EntryMeta, EntryPath, Fingerprint, PocketError,
    Value,
};

use crate::context::Pocket;
use crate::handle::Cached;

/// One inspectable cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Qualified name of the producing callable.
    pub fn_name: String,
    /// Human-readable canonical identifier of the producing call.
    pub id: String,
    /// Absolute on-disk location of the entry directory.
    pub path: PathBuf,
    /// The full metadata record.
    pub meta: EntryMeta,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of complete entries on disk.
    pub total_entries: usize,
    /// Entry count per function name.
    pub entries_per_fn: BTreeMap<String, usize>,
    /// Bytes on disk across metadata files and value blobs.
    pub disk_bytes: u64,
}

impl Pocket {
    /// Remove the memory and disk entries for one exact call.
    pub async fn invalidate(
        &self,
        callable: impl Into<Callable>,
        args: Vec<Value>,
    ) -> Result<(), PocketError> {
        let callable = callable.into();
        let identity = call_identity(&callable, &args)?;
        let fingerprint = Fingerprint::of(&identity);
        let path = EntryPath::for_call(
            &callable.name(),
            &fingerprint,
            self.config().filename_length_limit,
        );
        self.mem_store().remove(&fingerprint).await;
        self.entry_store().delete(&path).await?;
        info!(fingerprint = %fingerprint.prefix(8), fn_name = %callable.name(), "entry invalidated");
        Ok(())
    }

    /// Remove every entry whose metadata names this function.
    pub async fn invalidate_all(&self, fn_name: &str) -> Result<(), PocketError> {
        let disk = self.entry_store();
        let mem = self.mem_store();
        let mut removed = 0usize;
        for entry in disk.enumerate(None).await? {
            if entry.meta.fn_name == fn_name {
                mem.remove(&entry.meta.fingerprint).await;
                disk.delete(&entry.path).await?;
                removed += 1;
            }
        }
        info!(fn_name, removed, "function entries invalidated");
        Ok(())
    }

    /// Empty the memory tier only; disk entries survive.
    pub async fn clear_mem_cache(&self) {
        self.mem_store().clear().await;
        info!("memory cache cleared");
    }

    /// Remove the entire cache directory and empty the memory tier.
    /// The context itself stays usable.
    pub async fn cleanup(&self) -> Result<(), PocketError> {
        self.entry_store().nuke().await?;
        self.mem_store().clear().await;
        info!(base_dir = %self.config().base_cache_dir.display(), "cache cleaned up");
        Ok(())
    }

    /// Enumerate complete entries, optionally restricted to functions whose
    /// name starts with `fn_prefix`.
    pub async fn cache_entries(
        &self,
        fn_prefix: Option<&str>,
    ) -> Result<Vec<CacheEntry>, PocketError> {
        let base = self.config().base_cache_dir;
        let entries = self.entry_store().enumerate(None).await?;
        Ok(entries
            .into_iter()
            .filter(|e| fn_prefix.map_or(true, |p| e.meta.fn_name.starts_with(p)))
            .map(|e| CacheEntry {
                fn_name: e.meta.fn_name.clone(),
                id: e.meta.id.clone(),
                path: base.join(e.path.relative()),
                meta: e.meta,
            })
            .collect())
    }

    /// Aggregate entry counts and disk usage.
    pub async fn cache_stats(&self) -> Result<CacheStats, PocketError> {
        let mut stats = CacheStats::default();
        for entry in self.entry_store().enumerate(None).await? {
            stats.total_entries += 1;
            stats.disk_bytes += entry.disk_bytes;
            *stats.entries_per_fn.entry(entry.meta.fn_name).or_default() += 1;
        }
        Ok(stats)
    }

    /// Force a list of experiment handles and tabulate them: one row per
    /// handle, columns for the input-map keys that actually vary across the
    /// list, plus the forced result.
    ///
    /// Constant columns are suppressed once there are at least two rows;
    /// with a single row every column is kept.
    pub async fn compare_experiments(
        &self,
        handles: &[Cached],
    ) -> Result<Dataset, PocketError> {
        let mut column_order: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<(String, Value)>> = Vec::with_capacity(handles.len());
        let mut results = Vec::with_capacity(handles.len());

        for handle in handles {
            let inputs = match handle.args().first() {
                Some(Value::Map(entries)) => entries
                    .iter()
                    .map(|(k, v)| (column_label(k), v.clone()))
                    .collect(),
                Some(other) => vec![("input".to_string(), other.clone())],
                None => Vec::new(),
            };
            for (name, _) in &inputs {
                if !column_order.contains(name) {
                    column_order.push(name.clone());
                }
            }
            rows.push(inputs);
            results.push(handle.deref().await?);
        }

        let mut columns = Vec::new();
        for name in &column_order {
            let values: Vec<Value> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Nil)
                })
                .collect();
            let varies = values.windows(2).any(|w| w[0] != w[1]);
            if varies || rows.len() < 2 {
                columns.push(Column { name: name.clone(), values });
            }
        }
        columns.push(Column { name: "result".to_string(), values: results });

        Dataset::from_columns(columns)
            .map_err(|e| PocketError::Config(format!("experiment table construction failed: {e}")))
    }
}

/// Column label for an input-map key: the bare keyword name when the key is
/// a keyword, its canonical rendering otherwise.
fn column_label(key: &Value) -> String {
    match key {
        Value::Keyword(k) => k.name().to_string(),
        Value::Str(s) => s.clone(),
        other => format!("{other}"),
    }
}
