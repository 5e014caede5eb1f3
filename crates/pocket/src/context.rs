//! The Pocket context: configuration, memory store and in-flight registry.
//!
//! These three are the process-wide shared state. They live together in a
//! cheaply clonable context so tests can run against isolated instances
//! while ordinary callers go through the lazy global default. `cleanup`
//! wipes content but always preserves the context itself.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use pocket_core::{
    call_identity, canonical_string, id_of, Callable, EntryPath, EntryStore, Fingerprint,
    MsgpackCodec, PocketError, Value, ValueCodec,
};
use pocket_store_fs::FsStore;
use pocket_store_memory::MemoryStore;

use crate::config::{
    ConfigChain, MemOptions, PocketConfig, PolicyOverrides, StorageMode, MIN_FILENAME_LIMIT,
};
use crate::flight::FlightRegistry;
use crate::handle::{Cached, WrappedFn};

struct DiskCell {
    base: PathBuf,
    store: Arc<dyn EntryStore>,
}

pub(crate) struct PocketInner {
    chain: RwLock<ConfigChain>,
    mem: RwLock<Arc<MemoryStore>>,
    disk: RwLock<DiskCell>,
    pub(crate) flights: FlightRegistry,
    codec: Arc<dyn ValueCodec>,
}

/// A memoization context.
///
/// Clones share the same underlying state; handles keep a clone so they can
/// force through the context that wrapped them.
#[derive(Clone)]
pub struct Pocket {
    pub(crate) inner: Arc<PocketInner>,
}

impl Pocket {
    /// Create a context resolving through the full precedence chain,
    /// capturing `POCKET_*` environment variables and the defaults resource.
    pub fn new() -> Self {
        Self::from_chain(ConfigChain::from_process())
    }

    /// Create an isolated context rooted at `base_dir`, ignoring the
    /// environment and defaults resource. Intended for tests and embedders
    /// that need hermetic behavior.
    pub fn isolated(base_dir: impl Into<PathBuf>) -> Self {
        let mut chain = ConfigChain::detached();
        chain.setters.base_cache_dir = Some(base_dir.into());
        Self::from_chain(chain)
    }

    fn from_chain(chain: ConfigChain) -> Self {
        let config = chain.resolve();
        let mem = MemoryStore::new(config.mem.eviction_policy());
        let disk = DiskCell {
            base: config.base_cache_dir.clone(),
            store: Arc::new(FsStore::open(&config.base_cache_dir)),
        };
        debug!(base_dir = %config.base_cache_dir.display(), storage = %config.storage, "pocket context initialised");
        Self {
            inner: Arc::new(PocketInner {
                chain: RwLock::new(chain),
                mem: RwLock::new(Arc::new(mem)),
                disk: RwLock::new(disk),
                flights: FlightRegistry::default(),
                codec: Arc::new(MsgpackCodec),
            }),
        }
    }

    //───────────────────── configuration ─────────────────────

    /// The resolved configuration snapshot.
    pub fn config(&self) -> PocketConfig {
        self.inner.chain.read().expect("config lock poisoned").resolve()
    }

    /// Set or clear the base cache directory. Existing handles pick up the
    /// new directory on their next force.
    pub fn set_base_cache_dir(&self, dir: Option<PathBuf>) {
        self.inner.chain.write().expect("config lock poisoned").setters.base_cache_dir = dir;
    }

    /// Set or clear the storage mode.
    pub fn set_storage(&self, mode: Option<StorageMode>) {
        self.inner.chain.write().expect("config lock poisoned").setters.storage = mode;
    }

    /// Set or clear the memory cache options.
    ///
    /// Replacing policy or capacity is an atomic reset: the memory store is
    /// swapped for a new empty one.
    pub fn set_mem_cache_options(&self, options: Option<MemOptions>) -> Result<(), PocketError> {
        if let Some(opts) = options {
            opts.validate()?;
        }
        {
            let mut chain = self.inner.chain.write().expect("config lock poisoned");
            match options {
                Some(opts) => {
                    chain.setters.mem_policy = Some(opts.policy);
                    chain.setters.mem_threshold = Some(opts.threshold);
                    chain.setters.mem_ttl = Some(opts.ttl);
                }
                None => {
                    chain.setters.mem_policy = None;
                    chain.setters.mem_threshold = None;
                    chain.setters.mem_ttl = None;
                }
            }
        }
        self.rebuild_mem_store();
        Ok(())
    }

    /// Clear the memory option setters and reset the store to whatever the
    /// lower layers resolve to.
    pub fn reset_mem_cache_options(&self) {
        // A cleared setter layer always resolves, so validation cannot fail.
        let _ = self.set_mem_cache_options(None);
    }

    /// Set or clear the filename length cap for newly wrapped handles.
    pub fn set_filename_length_limit(&self, limit: Option<usize>) -> Result<(), PocketError> {
        if let Some(n) = limit {
            if n < MIN_FILENAME_LIMIT {
                return Err(PocketError::Config(format!(
                    "filename length limit must be at least {MIN_FILENAME_LIMIT}"
                )));
            }
        }
        self.inner.chain.write().expect("config lock poisoned").setters.filename_length_limit =
            limit;
        Ok(())
    }

    fn rebuild_mem_store(&self) {
        let options = self.config().mem;
        let fresh = Arc::new(MemoryStore::new(options.eviction_policy()));
        *self.inner.mem.write().expect("memory store lock poisoned") = fresh;
        info!(policy = ?options.policy, threshold = options.threshold, "memory store reset");
    }

    //───────────────────── shared components ─────────────────────

    /// The current memory store.
    pub(crate) fn mem_store(&self) -> Arc<MemoryStore> {
        self.inner.mem.read().expect("memory store lock poisoned").clone()
    }

    /// The disk store rooted at the currently configured base directory,
    /// rebuilt whenever the directory changes between forces.
    pub(crate) fn entry_store(&self) -> Arc<dyn EntryStore> {
        let base = self.config().base_cache_dir;
        {
            let cell = self.inner.disk.read().expect("disk store lock poisoned");
            if cell.base == base {
                return cell.store.clone();
            }
        }
        let store: Arc<dyn EntryStore> = Arc::new(FsStore::open(&base));
        let mut cell = self.inner.disk.write().expect("disk store lock poisoned");
        *cell = DiskCell { base, store: store.clone() };
        store
    }

    /// The configured value codec.
    pub(crate) fn codec(&self) -> Arc<dyn ValueCodec> {
        self.inner.codec.clone()
    }

    //───────────────────── wrapping ─────────────────────

    /// Wrap a callable and its arguments into a lazy cached handle.
    ///
    /// Eagerly derives the identifier, fingerprint and entry path; never
    /// forces argument handles. Fails synchronously for non-callables and
    /// for arguments whose types have no identity hook.
    pub fn wrap(
        &self,
        callable: impl Into<Callable>,
        args: Vec<Value>,
    ) -> Result<Cached, PocketError> {
        self.wrap_with(callable, args, PolicyOverrides::default())
    }

    /// [`wrap`](Self::wrap) with per-handle policy overrides.
    pub fn wrap_with(
        &self,
        callable: impl Into<Callable>,
        args: Vec<Value>,
        overrides: PolicyOverrides,
    ) -> Result<Cached, PocketError> {
        let callable = callable.into();
        let identity = call_identity(&callable, &args)?;
        let canonical = canonical_string(&identity);
        let fingerprint = Fingerprint::from_canonical(&canonical);
        let name_limit = overrides
            .filename_length_limit
            .unwrap_or_else(|| self.config().filename_length_limit);
        let path = EntryPath::for_call(&callable.name(), &fingerprint, name_limit);
        let args_summary = args
            .iter()
            .map(|a| id_of(a).map(|id| canonical_string(&id)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Cached::assemble(
            self.clone(),
            callable,
            args,
            identity,
            canonical,
            fingerprint,
            path,
            args_summary,
            overrides,
        ))
    }

    /// Partially apply a callable: returns a wrapper that turns argument
    /// lists into handles, sharing one set of overrides.
    pub fn wrap_fn(
        &self,
        callable: impl Into<Callable>,
        overrides: Option<PolicyOverrides>,
    ) -> WrappedFn {
        WrappedFn::new(self.clone(), callable.into(), overrides.unwrap_or_default())
    }
}

impl Default for Pocket {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pocket")
            .field("config", &self.config())
            .field("in_flight", &self.inner.flights.len())
            .finish()
    }
}
