//! Identity rules and the user-extensible id-hook registry.
//!
//! [`id_of`] maps any value to a stable [`Identifier`]. The rules are applied
//! in a fixed order; there is deliberately no fallback to object identity, so
//! a type without a registered hook is a typed error rather than a silently
//! unstable key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::dataset::{self, Dataset, DATASET_TAG};
use crate::error::PocketError;
use crate::ident::Identifier;
use crate::value::{Callable, ForeignValue, Value};

/// Signature of a registered identity hook.
///
/// The hook receives the untyped foreign payload and produces the identifier
/// body; the registry wraps the result with the type tag.
pub type IdHookFn =
    Arc<dyn Fn(&ForeignValue) -> Result<Identifier, PocketError> + Send + Sync>;

static ID_HOOKS: Lazy<RwLock<HashMap<String, IdHookFn>>> = Lazy::new(|| {
    let mut hooks: HashMap<String, IdHookFn> = HashMap::new();
    // Built-in hook for the tabular dataset type.
    hooks.insert(
        DATASET_TAG.to_string(),
        Arc::new(|fv: &ForeignValue| match fv.downcast::<Dataset>() {
            Some(ds) => dataset::dataset_identity(ds),
            None => Err(PocketError::UnknownIdentifiable { type_tag: fv.tag().to_string() }),
        }),
    );
    RwLock::new(hooks)
});

/// Register an identity hook for a foreign type tag.
///
/// Replaces any previous hook under the same tag. Hooks are process-wide;
/// value identity must be a pure function of the payload for keys to stay
/// stable across runs.
pub fn register_id_hook(tag: impl Into<String>, hook: IdHookFn) {
    ID_HOOKS
        .write()
        .expect("id hook registry poisoned")
        .insert(tag.into(), hook);
}

fn foreign_identity(fv: &ForeignValue) -> Result<Identifier, PocketError> {
    let hook = ID_HOOKS
        .read()
        .expect("id hook registry poisoned")
        .get(fv.tag())
        .cloned();
    match hook {
        Some(hook) => Ok(Identifier::Tagged {
            tag: fv.tag().to_string(),
            body: Box::new(hook(fv)?),
        }),
        None => Err(PocketError::UnknownIdentifiable { type_tag: fv.tag().to_string() }),
    }
}

/// Compute the stable identifier of a value.
///
/// Pure and deterministic: equal values produce equal identifiers, map entry
/// order never matters, and a lazy handle is identified by the call that
/// produced it rather than by its materialised result.
pub fn id_of(value: &Value) -> Result<Identifier, PocketError> {
    match value {
        Value::Nil => Ok(Identifier::Nil),
        Value::Bool(b) => Ok(Identifier::Bool(*b)),
        Value::Int(n) => Ok(Identifier::Int(*n)),
        Value::Float(x) => Ok(Identifier::float(*x)),
        Value::Str(s) => Ok(Identifier::Str(s.clone())),
        Value::Keyword(k) => Ok(Identifier::Keyword(k.spelled())),
        Value::List(items) => {
            let ids = items.iter().map(id_of).collect::<Result<Vec<_>, _>>()?;
            Ok(Identifier::Seq(ids))
        }
        Value::Map(entries) => {
            let pairs = entries
                .iter()
                .map(|(k, v)| Ok((id_of(k)?, id_of(v)?)))
                .collect::<Result<Vec<_>, PocketError>>()?;
            Ok(Identifier::entries(pairs))
        }
        Value::Set(items) => {
            let ids = items.iter().map(id_of).collect::<Result<Vec<_>, _>>()?;
            Ok(Identifier::sorted_set(ids))
        }
        Value::Foreign(fv) => foreign_identity(fv),
        Value::Lazy(handle) => Ok(handle.identity().clone()),
    }
}

/// Compute the identifier of a call signature: callable plus arguments.
///
/// This is the identifier a `Cached` handle carries, and the tree the
/// fingerprint is derived from. Defined for arity zero as well.
pub fn call_identity(callable: &Callable, args: &[Value]) -> Result<Identifier, PocketError> {
    let callee = match callable {
        Callable::Function(f) => Identifier::Name(f.qualified_name()),
        Callable::Keyword(k) => Identifier::Keyword(k.spelled()),
    };
    let arg_ids = args.iter().map(id_of).collect::<Result<Vec<_>, _>>()?;
    Ok(Identifier::Call { callee: Box::new(callee), args: arg_ids })
}
