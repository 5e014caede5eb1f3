//! Dynamic value model for memoized computations.
//!
//! Pocket memoizes functions over a small dynamic value universe: nil,
//! booleans, numbers, strings, keywords, ordered collections, sets, foreign
//! (type-tagged) domain objects, and lazy handles produced by earlier wraps.
//! Values are cheap to clone; collections and foreign payloads sit behind
//! shared ownership where it matters.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PocketError;
use crate::ident::Identifier;
use crate::keying::Fingerprint;

//─────────────────────────────
//  Keywords and qualified names
//─────────────────────────────

/// A symbolic keyword token, optionally namespaced (`:ns/name` or `:name`).
///
/// Keywords serve two roles: as plain data inside values, and as callable
/// accessors that look themselves up in a map argument.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Keyword {
    ns: Option<String>,
    name: String,
}

impl Keyword {
    /// Create an unqualified keyword (`:name`).
    pub fn new(name: impl Into<String>) -> Self {
        Self { ns: None, name: name.into() }
    }

    /// Create a namespaced keyword (`:ns/name`).
    pub fn namespaced(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self { ns: Some(ns.into()), name: name.into() }
    }

    /// The local name, without namespace or leading colon.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace segment, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    /// The canonical spelling, colon included.
    pub fn spelled(&self) -> String {
        match &self.ns {
            Some(ns) => format!(":{ns}/{}", self.name),
            None => format!(":{}", self.name),
        }
    }

    /// Parse a spelled keyword (`:ns/name` or `:name`) back into a token.
    pub fn parse(spelled: &str) -> Option<Self> {
        let rest = spelled.strip_prefix(':')?;
        if rest.is_empty() {
            return None;
        }
        match rest.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                Some(Self::namespaced(ns, name))
            }
            Some(_) => None,
            None => Some(Self::new(rest)),
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spelled())
    }
}

//─────────────────────────────
//  Named functions
//─────────────────────────────

/// Signature of a wrapped computation body.
pub type ComputeFn = dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync;

/// A computation with a stable qualified name (`ns/name`).
///
/// Pocket keys cache entries by function identity, so every wrapped function
/// must carry a name that is stable across processes. Anonymous closures
/// without a name are rejected at construction time.
#[derive(Clone)]
pub struct NamedFn {
    namespace: String,
    name: String,
    func: Arc<ComputeFn>,
}

impl NamedFn {
    /// Create a named function from a namespace, a local name and a body.
    ///
    /// Both name segments must be non-empty; the pair is what identifies the
    /// computation in cache keys and on disk.
    pub fn new<F>(
        namespace: impl Into<String>,
        name: impl Into<String>,
        func: F,
    ) -> Result<Self, PocketError>
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let namespace = namespace.into();
        let name = name.into();
        if namespace.is_empty() || name.is_empty() {
            return Err(PocketError::BadFunction(
                "function name must be qualified as ns/name".into(),
            ));
        }
        Ok(Self { namespace, name, func: Arc::new(func) })
    }

    /// The qualified `ns/name` spelling.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Apply the function body to already-forced argument values.
    pub fn apply(&self, args: &[Value]) -> Result<Value, PocketError> {
        (self.func)(args).map_err(|e| PocketError::compute(self.qualified_name(), e))
    }
}

impl fmt::Debug for NamedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedFn").field("name", &self.qualified_name()).finish()
    }
}

//─────────────────────────────
//  Callables
//─────────────────────────────

/// Something Pocket can wrap: a named function, or a keyword standing in as
/// a map accessor.
#[derive(Debug, Clone)]
pub enum Callable {
    /// A named computation body.
    Function(NamedFn),
    /// A keyword accessor; applied to a map it looks itself up, with an
    /// optional second argument as the not-found default.
    Keyword(Keyword),
}

impl Callable {
    /// The name used in cache keys and entry paths.
    pub fn name(&self) -> String {
        match self {
            Callable::Function(f) => f.qualified_name(),
            Callable::Keyword(k) => k.spelled(),
        }
    }

    /// Apply the callable to already-forced argument values.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, PocketError> {
        match self {
            Callable::Function(f) => f.apply(args),
            Callable::Keyword(k) => {
                let found = match args.first() {
                    Some(Value::Map(entries)) => {
                        let key = Value::Keyword(k.clone());
                        entries.iter().find(|(ek, _)| *ek == key).map(|(_, v)| v.clone())
                    }
                    Some(Value::Nil) | None => None,
                    Some(other) => {
                        return Err(PocketError::compute(
                            k.spelled(),
                            format!("keyword lookup expects a map argument, got {other}"),
                        ))
                    }
                };
                Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::Nil))
            }
        }
    }

    /// Interpret a dynamic value as a callable.
    ///
    /// Only keywords qualify; anything else is a [`PocketError::BadFunction`],
    /// raised synchronously the way `wrap` requires.
    pub fn try_from_value(value: &Value) -> Result<Self, PocketError> {
        match value {
            Value::Keyword(k) => Ok(Callable::Keyword(k.clone())),
            other => Err(PocketError::BadFunction(format!(
                "cannot call {other}; pass a named function or keyword"
            ))),
        }
    }
}

impl From<NamedFn> for Callable {
    fn from(f: NamedFn) -> Self {
        Callable::Function(f)
    }
}

impl From<Keyword> for Callable {
    fn from(k: Keyword) -> Self {
        Callable::Keyword(k)
    }
}

//─────────────────────────────
//  Foreign values
//─────────────────────────────

/// A type-tagged domain object opaque to the core.
///
/// Identity and serialization for foreign values go through the hook and
/// codec registries, keyed by the tag. Equality is shared-ownership identity;
/// value equality for foreign types is the hook's business.
#[derive(Clone)]
pub struct ForeignValue {
    tag: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl ForeignValue {
    /// Wrap a domain object under a type tag.
    pub fn new(tag: impl Into<String>, value: Arc<dyn Any + Send + Sync>) -> Self {
        Self { tag: tag.into(), value }
    }

    /// The registry tag this value dispatches under.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The untyped payload, for hooks and codecs to downcast.
    pub fn payload(&self) -> &(dyn Any + Send + Sync) {
        self.value.as_ref()
    }

    /// Downcast the payload to a concrete domain type.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for ForeignValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}<..>", self.tag)
    }
}

impl PartialEq for ForeignValue {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && Arc::ptr_eq(&self.value, &other.value)
    }
}

//─────────────────────────────
//  Lazy handles
//─────────────────────────────

/// Diagnostic state of a lazy handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Never forced.
    Pending,
    /// A force is currently running or being awaited.
    InFlight,
    /// Forced successfully at least once.
    Cached,
    /// The last force failed; the next force retries.
    Failed,
}

impl HandleState {
    /// Keyword-style label used when printing handles.
    pub fn label(&self) -> &'static str {
        match self {
            HandleState::Pending => ":pending",
            HandleState::InFlight => ":in-flight",
            HandleState::Cached => ":cached",
            HandleState::Failed => ":failed",
        }
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A lazy reference to a memoized computation's future result.
///
/// The engine crate provides the concrete handle; the core only needs enough
/// surface to compute identities, build provenance graphs and force nested
/// handles found inside argument values.
#[async_trait]
pub trait LazyValue: Send + Sync {
    /// Name of the producing callable.
    fn fn_name(&self) -> String;

    /// Identifier of the producing call. A handle is identified by its
    /// recipe, not by the materialised bytes, so this is stable across
    /// forcing.
    fn identity(&self) -> &Identifier;

    /// Fingerprint of the producing call.
    fn fingerprint(&self) -> &Fingerprint;

    /// Current diagnostic state.
    fn state(&self) -> HandleState;

    /// The argument values captured by the recipe, unforced.
    fn recipe_args(&self) -> &[Value];

    /// Force the handle, memoizing through the engine.
    async fn force(&self) -> Result<Value, PocketError>;
}

//─────────────────────────────
//  The value universe
//─────────────────────────────

/// A dynamic value: input to or output of a memoized computation.
#[derive(Clone)]
pub enum Value {
    /// The absent value. Caches like any other result.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Integer, canonicalised to the widest integer type.
    Int(i64),
    /// Double-precision float. Identity is bit-exact.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Keyword token.
    Keyword(Keyword),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Mapping, kept in insertion order; identity sorts entries by key id.
    Map(Vec<(Value, Value)>),
    /// Unordered set of distinct values; identity sorts element ids.
    Set(Vec<Value>),
    /// Type-tagged domain object.
    Foreign(ForeignValue),
    /// Unforced handle produced by an earlier wrap.
    Lazy(Arc<dyn LazyValue>),
}

impl Value {
    /// Build a map value from key/value pairs, preserving order.
    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::Map(entries.into_iter().collect())
    }

    /// Build a keyword value.
    pub fn keyword(name: impl Into<String>) -> Self {
        Value::Keyword(Keyword::new(name))
    }

    /// Wrap a domain object as a tagged foreign value.
    pub fn foreign(tag: impl Into<String>, value: Arc<dyn Any + Send + Sync>) -> Self {
        Value::Foreign(ForeignValue::new(tag, value))
    }

    /// Whether this value is the absent value.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// View this value as an unforced handle, if it is one.
    pub fn as_lazy(&self) -> Option<&Arc<dyn LazyValue>> {
        match self {
            Value::Lazy(l) => Some(l),
            _ => None,
        }
    }

    /// Integer accessor.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// String accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bit equality so NaN-bearing results still compare stably.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Foreign(a), Value::Foreign(b)) => a == b,
            (Value::Lazy(a), Value::Lazy(b)) => a.fingerprint() == b.fingerprint(),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Keyword(k) => write!(f, "{k}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(entries) => {
                f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish()
            }
            Value::Set(items) => {
                write!(f, "#")?;
                f.debug_set().entries(items).finish()
            }
            Value::Foreign(fv) => write!(f, "{fv:?}"),
            Value::Lazy(l) => write!(f, "#cached[{}]", l.fingerprint().prefix(8)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Keyword> for Value {
    fn from(k: Keyword) -> Self {
        Value::Keyword(k)
    }
}
