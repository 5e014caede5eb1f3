//! Cached handles: lazy references to memoized computations.
//!
//! A handle eagerly knows its identity, fingerprint and entry path, but
//! computes nothing until dereferenced. Argument handles stay unforced
//! inside the recipe; forcing the downstream handle forces them first, left
//! to right, each memoized under its own fingerprint.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use pocket_core::{
    Callable, EntryPath, Fingerprint, HandleState, Identifier, LazyValue, PocketError, Value,
};

use crate::config::PolicyOverrides;
use crate::context::Pocket;
use crate::engine::{self, ForceSpec};

const ST_PENDING: u8 = 0;
const ST_IN_FLIGHT: u8 = 1;
const ST_CACHED: u8 = 2;
const ST_FAILED: u8 = 3;

struct CachedInner {
    ctx: Pocket,
    callable: Callable,
    args: Vec<Value>,
    identity: Identifier,
    canonical: String,
    fingerprint: Fingerprint,
    path: EntryPath,
    args_summary: Vec<String>,
    overrides: PolicyOverrides,
    state: AtomicU8,
}

/// A lazy handle over a memoized computation.
///
/// Cheap to clone; clones share state, so forcing one forces them all.
/// Handles may appear as arguments to further wraps, forming a recipe graph.
#[derive(Clone)]
pub struct Cached {
    inner: Arc<CachedInner>,
}

impl Cached {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        ctx: Pocket,
        callable: Callable,
        args: Vec<Value>,
        identity: Identifier,
        canonical: String,
        fingerprint: Fingerprint,
        path: EntryPath,
        args_summary: Vec<String>,
        overrides: PolicyOverrides,
    ) -> Self {
        Self {
            inner: Arc::new(CachedInner {
                ctx,
                callable,
                args,
                identity,
                canonical,
                fingerprint,
                path,
                args_summary,
                overrides,
                state: AtomicU8::new(ST_PENDING),
            }),
        }
    }

    /// Force the handle: forces argument handles left to right, then runs
    /// the computation through the cache engine.
    ///
    /// Idempotent on success; a failed force leaves the handle retryable.
    pub async fn deref(&self) -> Result<Value, PocketError> {
        let inner = &self.inner;
        inner.state.store(ST_IN_FLIGHT, Ordering::SeqCst);

        let mut forced = Vec::with_capacity(inner.args.len());
        for arg in &inner.args {
            match deep_force(arg).await {
                Ok(value) => forced.push(value),
                Err(err) => {
                    inner.state.store(ST_FAILED, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }

        let storage = inner
            .overrides
            .storage
            .unwrap_or_else(|| inner.ctx.config().storage);
        let spec = ForceSpec {
            fingerprint: inner.fingerprint,
            path: inner.path.clone(),
            fn_name: inner.callable.name(),
            canonical_id: inner.canonical.clone(),
            args_summary: inner.args_summary.clone(),
            storage,
        };
        let callable = inner.callable.clone();
        let thunk = move || callable.invoke(&forced);

        let result = engine::force(&inner.ctx, spec, thunk).await;
        inner.state.store(
            if result.is_ok() { ST_CACHED } else { ST_FAILED },
            Ordering::SeqCst,
        );
        result
    }

    /// Identifier of the producing call, stable across forcing.
    pub fn id(&self) -> &Identifier {
        &self.inner.identity
    }

    /// Fingerprint this handle is cached under.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.inner.fingerprint
    }

    /// On-disk entry location, relative to the base cache directory.
    pub fn entry_path(&self) -> &EntryPath {
        &self.inner.path
    }

    /// Name of the wrapped callable.
    pub fn fn_name(&self) -> String {
        self.inner.callable.name()
    }

    /// Current diagnostic state.
    pub fn state(&self) -> HandleState {
        match self.inner.state.load(Ordering::SeqCst) {
            ST_IN_FLIGHT => HandleState::InFlight,
            ST_CACHED => HandleState::Cached,
            ST_FAILED => HandleState::Failed,
            _ => HandleState::Pending,
        }
    }

    /// The captured argument values, unforced.
    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    /// The per-handle policy overrides.
    pub fn overrides(&self) -> &PolicyOverrides {
        &self.inner.overrides
    }

    /// Human-readable canonical identifier of the producing call.
    pub fn canonical_id(&self) -> &str {
        &self.inner.canonical
    }

    /// The context this handle forces through.
    pub fn context(&self) -> &Pocket {
        &self.inner.ctx
    }

    /// Wrap this handle as a value, so it can be passed as an argument to a
    /// further wrap.
    pub fn to_value(&self) -> Value {
        Value::Lazy(Arc::new(self.clone()))
    }
}

#[async_trait]
impl LazyValue for Cached {
    fn fn_name(&self) -> String {
        self.inner.callable.name()
    }

    fn identity(&self) -> &Identifier {
        &self.inner.identity
    }

    fn fingerprint(&self) -> &Fingerprint {
        &self.inner.fingerprint
    }

    fn state(&self) -> HandleState {
        Cached::state(self)
    }

    fn recipe_args(&self) -> &[Value] {
        &self.inner.args
    }

    async fn force(&self) -> Result<Value, PocketError> {
        self.deref().await
    }
}

impl fmt::Display for Cached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#pocket/cached[{} @ {} {}]",
            self.fn_name(),
            self.inner.fingerprint.prefix(8),
            self.state()
        )
    }
}

impl fmt::Debug for Cached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl PartialEq for Cached {
    fn eq(&self, other: &Self) -> bool {
        self.inner.fingerprint == other.inner.fingerprint
    }
}

//─────────────────────────────
//  Forcing values
//─────────────────────────────

/// Force a value if it is a handle; return it unchanged otherwise.
pub async fn maybe_deref(value: Value) -> Result<Value, PocketError> {
    match value {
        Value::Lazy(handle) => handle.force().await,
        other => Ok(other),
    }
}

/// Recursively force every handle reachable inside a value, so wrapped
/// functions always see materialised arguments even under collection
/// nesting.
pub(crate) fn deep_force(value: &Value) -> BoxFuture<'_, Result<Value, PocketError>> {
    Box::pin(async move {
        match value {
            Value::Lazy(handle) => handle.force().await,
            Value::List(items) => {
                let mut forced = Vec::with_capacity(items.len());
                for item in items {
                    forced.push(deep_force(item).await?);
                }
                Ok(Value::List(forced))
            }
            Value::Map(entries) => {
                let mut forced = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    forced.push((deep_force(k).await?, deep_force(v).await?));
                }
                Ok(Value::Map(forced))
            }
            Value::Set(items) => {
                let mut forced = Vec::with_capacity(items.len());
                for item in items {
                    forced.push(deep_force(item).await?);
                }
                Ok(Value::Set(forced))
            }
            other => Ok(other.clone()),
        }
    })
}

//─────────────────────────────
//  Partial application
//─────────────────────────────

/// A callable pre-bound to a context and overrides; applying it to an
/// argument list yields a handle.
#[derive(Clone)]
pub struct WrappedFn {
    ctx: Pocket,
    callable: Callable,
    overrides: PolicyOverrides,
}

impl WrappedFn {
    pub(crate) fn new(ctx: Pocket, callable: Callable, overrides: PolicyOverrides) -> Self {
        Self { ctx, callable, overrides }
    }

    /// Build a handle for one argument list.
    pub fn call(&self, args: Vec<Value>) -> Result<Cached, PocketError> {
        self.ctx.wrap_with(self.callable.clone(), args, self.overrides)
    }
}

impl fmt::Debug for WrappedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedFn").field("callable", &self.callable.name()).finish()
    }
}
