//! Process-wide configuration and its resolution chain.
//!
//! Every field resolves independently on each read, walking a precedence
//! chain: per-handle override, then setter-mutated state, then `POCKET_*`
//! environment variables, then the `pocket-defaults.json` resource, then the
//! compiled-in defaults. Setters accept `None` to fall back to the next
//! level. The environment and defaults file are captured once per context;
//! setter state is swapped atomically under the context's config lock.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use pocket_core::PocketError;
use pocket_store_memory::EvictionPolicy;

/// Known resource path for overridable defaults.
pub const DEFAULTS_RESOURCE: &str = "pocket-defaults.json";

/// Default maximum length of the sanitised function-name path segment.
pub const DEFAULT_FILENAME_LIMIT: usize = 120;

/// Shortest accepted filename limit; anything below cannot hold the
/// truncation digest suffix.
pub const MIN_FILENAME_LIMIT: usize = 16;

const DEFAULT_MEM_THRESHOLD: usize = 128;
const DEFAULT_MEM_TTL: Duration = Duration::from_secs(300);

//─────────────────────────────
//  Storage modes
//─────────────────────────────

/// Which cache tiers a force consults and populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Memory tier only.
    Mem,
    /// Disk tier only.
    Disk,
    /// Both tiers. The default.
    MemDisk,
    /// Pass-through: always compute, never cache.
    None,
}

impl StorageMode {
    /// Whether the memory tier is consulted and populated.
    pub fn uses_mem(&self) -> bool {
        matches!(self, StorageMode::Mem | StorageMode::MemDisk)
    }

    /// Whether the disk tier is consulted and populated.
    pub fn uses_disk(&self) -> bool {
        matches!(self, StorageMode::Disk | StorageMode::MemDisk)
    }

    /// Parse the configuration spelling (`mem`, `disk`, `mem+disk`, `none`).
    pub fn parse(s: &str) -> Result<Self, PocketError> {
        match s {
            "mem" => Ok(StorageMode::Mem),
            "disk" => Ok(StorageMode::Disk),
            "mem+disk" => Ok(StorageMode::MemDisk),
            "none" => Ok(StorageMode::None),
            other => Err(PocketError::Config(format!(
                "invalid storage mode `{other}`; expected mem, disk, mem+disk or none"
            ))),
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StorageMode::Mem => "mem",
            StorageMode::Disk => "disk",
            StorageMode::MemDisk => "mem+disk",
            StorageMode::None => "none",
        };
        write!(f, "{s}")
    }
}

//─────────────────────────────
//  Memory cache options
//─────────────────────────────

/// Eviction policy family for the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemPolicyKind {
    /// Least recently used.
    Lru,
    /// Insertion order.
    Fifo,
    /// Time to live from last write.
    Ttl,
}

impl MemPolicyKind {
    /// Parse the configuration spelling (`lru`, `fifo`, `ttl`).
    pub fn parse(s: &str) -> Result<Self, PocketError> {
        match s {
            "lru" => Ok(MemPolicyKind::Lru),
            "fifo" => Ok(MemPolicyKind::Fifo),
            "ttl" => Ok(MemPolicyKind::Ttl),
            other => Err(PocketError::Config(format!(
                "invalid memory policy `{other}`; expected lru, fifo or ttl"
            ))),
        }
    }
}

/// Memory tier options: which policy, how many entries, how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOptions {
    /// Eviction policy family.
    pub policy: MemPolicyKind,
    /// Capacity threshold for the bounded policies.
    pub threshold: usize,
    /// Entry lifetime for the TTL policy.
    pub ttl: Duration,
}

impl MemOptions {
    /// Reject thresholds and lifetimes the eviction loop cannot honor.
    pub fn validate(&self) -> Result<(), PocketError> {
        if self.threshold == 0 {
            return Err(PocketError::Config("memory threshold must be positive".into()));
        }
        if self.ttl.is_zero() {
            return Err(PocketError::Config("memory ttl must be positive".into()));
        }
        Ok(())
    }

    /// The concrete eviction policy these options describe.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        match self.policy {
            MemPolicyKind::Lru => EvictionPolicy::Lru { capacity: self.threshold },
            MemPolicyKind::Fifo => EvictionPolicy::Fifo { capacity: self.threshold },
            MemPolicyKind::Ttl => EvictionPolicy::Ttl { ttl: self.ttl },
        }
    }
}

impl Default for MemOptions {
    fn default() -> Self {
        Self {
            policy: MemPolicyKind::Lru,
            threshold: DEFAULT_MEM_THRESHOLD,
            ttl: DEFAULT_MEM_TTL,
        }
    }
}

//─────────────────────────────
//  Resolved configuration
//─────────────────────────────

/// A fully resolved configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PocketConfig {
    /// Root of the on-disk cache tree.
    pub base_cache_dir: PathBuf,
    /// Which tiers forces consult and populate.
    pub storage: StorageMode,
    /// Memory tier options.
    pub mem: MemOptions,
    /// Length cap for sanitised function-name path segments.
    pub filename_length_limit: usize,
}

/// Per-handle overrides, the head of the precedence chain.
///
/// Only the key-affecting and tier-selection fields are overridable per
/// handle; memory eviction options stay process-wide because the memory
/// store is shared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    /// Override the storage mode for this handle's forces.
    pub storage: Option<StorageMode>,
    /// Override the filename length cap used to derive this handle's path.
    pub filename_length_limit: Option<usize>,
}

impl PolicyOverrides {
    /// Override the storage mode.
    pub fn storage(mut self, mode: StorageMode) -> Self {
        self.storage = Some(mode);
        self
    }

    /// Override the filename length cap.
    pub fn filename_length_limit(mut self, limit: usize) -> Self {
        self.filename_length_limit = Some(limit);
        self
    }
}

//─────────────────────────────
//  Layered resolution
//─────────────────────────────

/// One layer of optional settings in the precedence chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigLayer {
    pub(crate) base_cache_dir: Option<PathBuf>,
    pub(crate) storage: Option<StorageMode>,
    pub(crate) mem_policy: Option<MemPolicyKind>,
    pub(crate) mem_threshold: Option<usize>,
    pub(crate) mem_ttl: Option<Duration>,
    pub(crate) filename_length_limit: Option<usize>,
}

impl ConfigLayer {
    /// Capture the `POCKET_*` environment variables.
    ///
    /// Unparseable values are logged and fall through to the next level
    /// rather than wedging every read.
    pub(crate) fn from_env() -> Self {
        Self {
            base_cache_dir: env::var_os("POCKET_BASE_CACHE_DIR").map(PathBuf::from),
            storage: parse_env("POCKET_STORAGE", StorageMode::parse),
            mem_policy: parse_env("POCKET_MEM_POLICY", MemPolicyKind::parse),
            mem_threshold: parse_env("POCKET_MEM_THRESHOLD", parse_positive_usize),
            mem_ttl: parse_env("POCKET_MEM_TTL", parse_ttl_secs),
            filename_length_limit: parse_env("POCKET_FILENAME_LENGTH_LIMIT", parse_name_limit),
        }
    }

    /// Load the defaults resource from the working directory, if present.
    pub(crate) fn from_defaults_resource() -> Self {
        let raw = match std::fs::read(DEFAULTS_RESOURCE) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        let file: DefaultsFile = match serde_json::from_slice(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(resource = DEFAULTS_RESOURCE, error = %e, "ignoring unparseable defaults resource");
                return Self::default();
            }
        };
        Self {
            base_cache_dir: file.base_cache_dir,
            storage: file.storage.as_deref().and_then(|s| log_bad("storage", StorageMode::parse(s))),
            mem_policy: file
                .mem_policy
                .as_deref()
                .and_then(|s| log_bad("mem-policy", MemPolicyKind::parse(s))),
            mem_threshold: file.mem_threshold,
            mem_ttl: file.mem_ttl_secs.map(Duration::from_secs),
            filename_length_limit: file.filename_length_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DefaultsFile {
    #[serde(rename = "base-cache-dir")]
    base_cache_dir: Option<PathBuf>,
    #[serde(rename = "storage")]
    storage: Option<String>,
    #[serde(rename = "mem-policy")]
    mem_policy: Option<String>,
    #[serde(rename = "mem-threshold")]
    mem_threshold: Option<usize>,
    #[serde(rename = "mem-ttl-secs")]
    mem_ttl_secs: Option<u64>,
    #[serde(rename = "filename-length-limit")]
    filename_length_limit: Option<usize>,
}

fn parse_env<T>(name: &str, parse: impl Fn(&str) -> Result<T, PocketError>) -> Option<T> {
    let raw = env::var(name).ok()?;
    log_bad(name, parse(&raw))
}

fn log_bad<T>(name: &str, parsed: Result<T, PocketError>) -> Option<T> {
    match parsed {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(setting = name, error = %e, "ignoring invalid configuration value");
            None
        }
    }
}

fn parse_positive_usize(s: &str) -> Result<usize, PocketError> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(PocketError::Config(format!("expected a positive integer, got `{s}`"))),
    }
}

fn parse_ttl_secs(s: &str) -> Result<Duration, PocketError> {
    match s.parse::<u64>() {
        Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
        _ => Err(PocketError::Config(format!("expected a positive ttl in seconds, got `{s}`"))),
    }
}

fn parse_name_limit(s: &str) -> Result<usize, PocketError> {
    let n = parse_positive_usize(s)?;
    if n < MIN_FILENAME_LIMIT {
        return Err(PocketError::Config(format!(
            "filename length limit must be at least {MIN_FILENAME_LIMIT}"
        )));
    }
    Ok(n)
}

/// The full chain a context resolves through.
#[derive(Debug, Default)]
pub(crate) struct ConfigChain {
    pub(crate) setters: ConfigLayer,
    pub(crate) env: ConfigLayer,
    pub(crate) resource: ConfigLayer,
}

impl ConfigChain {
    /// Chain with environment and resource layers captured from the process.
    pub(crate) fn from_process() -> Self {
        Self {
            setters: ConfigLayer::default(),
            env: ConfigLayer::from_env(),
            resource: ConfigLayer::from_defaults_resource(),
        }
    }

    /// Chain for isolated contexts: only setters and compiled-in defaults.
    pub(crate) fn detached() -> Self {
        Self::default()
    }

    fn field<T: Clone>(&self, pick: impl Fn(&ConfigLayer) -> Option<T>, fallback: T) -> T {
        pick(&self.setters)
            .or_else(|| pick(&self.env))
            .or_else(|| pick(&self.resource))
            .unwrap_or(fallback)
    }

    /// Resolve every field through the chain.
    pub(crate) fn resolve(&self) -> PocketConfig {
        let defaults = MemOptions::default();
        PocketConfig {
            base_cache_dir: self
                .field(|l| l.base_cache_dir.clone(), default_base_cache_dir()),
            storage: self.field(|l| l.storage, StorageMode::MemDisk),
            mem: MemOptions {
                policy: self.field(|l| l.mem_policy, defaults.policy),
                threshold: self.field(|l| l.mem_threshold, defaults.threshold),
                ttl: self.field(|l| l.mem_ttl, defaults.ttl),
            },
            filename_length_limit: self
                .field(|l| l.filename_length_limit, DEFAULT_FILENAME_LIMIT),
        }
    }
}

/// Compiled-in default cache root: the platform cache directory, or a
/// dotted directory under the CWD when the platform offers none.
pub(crate) fn default_base_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("pocket"))
        .unwrap_or_else(|| PathBuf::from(".pocket-cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_mode_spellings_round_trip() {
        for mode in [StorageMode::Mem, StorageMode::Disk, StorageMode::MemDisk, StorageMode::None] {
            assert_eq!(StorageMode::parse(&mode.to_string()).unwrap(), mode);
        }
        assert!(StorageMode::parse("both").is_err());
    }

    #[test]
    fn mem_options_validation_rejects_degenerate_values() {
        let mut opts = MemOptions::default();
        opts.threshold = 0;
        assert!(matches!(opts.validate(), Err(PocketError::Config(_))));

        let mut opts = MemOptions::default();
        opts.ttl = Duration::ZERO;
        assert!(matches!(opts.validate(), Err(PocketError::Config(_))));
    }

    #[test]
    fn setter_layer_wins_over_lower_layers() {
        let mut chain = ConfigChain::detached();
        chain.resource.storage = Some(StorageMode::Disk);
        chain.env.storage = Some(StorageMode::Mem);
        assert_eq!(chain.resolve().storage, StorageMode::Mem);

        chain.setters.storage = Some(StorageMode::None);
        assert_eq!(chain.resolve().storage, StorageMode::None);

        // Clearing a setter falls through to the environment layer.
        chain.setters.storage = None;
        assert_eq!(chain.resolve().storage, StorageMode::Mem);
    }

    #[test]
    fn detached_chain_resolves_to_compiled_defaults() {
        let cfg = ConfigChain::detached().resolve();
        assert_eq!(cfg.storage, StorageMode::MemDisk);
        assert_eq!(cfg.mem, MemOptions::default());
        assert_eq!(cfg.filename_length_limit, DEFAULT_FILENAME_LIMIT);
    }
}
