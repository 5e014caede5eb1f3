//! Opaque value encoding capability and the default MessagePack codec.
//!
//! The engine treats the serializer as a capability: encode to bytes, decode
//! back, report a version tag. Only three outcomes matter to callers: OK,
//! encode-failed, decode-failed. User-defined types round-trip through a
//! registry of per-tag codecs so the set of serialisable types is open.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::dataset::{Column, Dataset, DATASET_TAG};
use crate::error::PocketError;
use crate::value::{ForeignValue, Keyword, Value};

//─────────────────────────────
//  Codec capability
//─────────────────────────────

/// Byte encoder/decoder for computed values.
///
/// Implementations must round-trip the value domain; the version tag is
/// recorded in entry metadata so a mismatch on read is surfaced instead of
/// silently mis-decoded.
pub trait ValueCodec: Send + Sync {
    /// Version tag recorded alongside every persisted entry.
    fn version(&self) -> &'static str;

    /// Encode a value to an opaque blob.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, PocketError>;

    /// Decode a blob produced by the same codec version.
    fn decode(&self, bytes: &[u8]) -> Result<Value, PocketError>;
}

//─────────────────────────────
//  Foreign codec registry
//─────────────────────────────

/// Encode half of a foreign codec.
pub type ForeignEncodeFn =
    Arc<dyn Fn(&ForeignValue) -> Result<Vec<u8>, PocketError> + Send + Sync>;

/// Decode half of a foreign codec.
pub type ForeignDecodeFn =
    Arc<dyn Fn(&[u8]) -> Result<ForeignValue, PocketError> + Send + Sync>;

/// A registered encoder/decoder pair for one foreign type tag.
#[derive(Clone)]
pub struct ForeignCodec {
    /// Serialise the tagged payload.
    pub encode: ForeignEncodeFn,
    /// Rebuild the tagged payload from bytes.
    pub decode: ForeignDecodeFn,
}

static FOREIGN_CODECS: Lazy<RwLock<HashMap<String, ForeignCodec>>> = Lazy::new(|| {
    let mut codecs = HashMap::new();
    codecs.insert(DATASET_TAG.to_string(), dataset_codec());
    RwLock::new(codecs)
});

/// Register a codec for a foreign type tag, replacing any previous one.
pub fn register_foreign_codec(tag: impl Into<String>, codec: ForeignCodec) {
    FOREIGN_CODECS
        .write()
        .expect("foreign codec registry poisoned")
        .insert(tag.into(), codec);
}

fn foreign_codec(tag: &str) -> Option<ForeignCodec> {
    FOREIGN_CODECS
        .read()
        .expect("foreign codec registry poisoned")
        .get(tag)
        .cloned()
}

//─────────────────────────────
//  Wire form
//─────────────────────────────

/// Serde-friendly mirror of [`Value`] used by the default codec.
#[derive(Debug, Serialize, Deserialize)]
enum WireValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(String),
    List(Vec<WireValue>),
    Map(Vec<(WireValue, WireValue)>),
    Set(Vec<WireValue>),
    Foreign { tag: String, bytes: Vec<u8> },
}

fn to_wire(value: &Value) -> Result<WireValue, PocketError> {
    Ok(match value {
        Value::Nil => WireValue::Nil,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Int(n) => WireValue::Int(*n),
        Value::Float(x) => WireValue::Float(*x),
        Value::Str(s) => WireValue::Str(s.clone()),
        Value::Keyword(k) => WireValue::Keyword(k.spelled()),
        Value::List(items) => {
            WireValue::List(items.iter().map(to_wire).collect::<Result<_, _>>()?)
        }
        Value::Map(entries) => WireValue::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((to_wire(k)?, to_wire(v)?)))
                .collect::<Result<_, PocketError>>()?,
        ),
        Value::Set(items) => {
            WireValue::Set(items.iter().map(to_wire).collect::<Result<_, _>>()?)
        }
        Value::Foreign(fv) => {
            let codec = foreign_codec(fv.tag()).ok_or_else(|| {
                PocketError::encode(format!("no codec registered for type tag `{}`", fv.tag()))
            })?;
            WireValue::Foreign { tag: fv.tag().to_string(), bytes: (codec.encode)(fv)? }
        }
        Value::Lazy(handle) => {
            return Err(PocketError::encode(format!(
                "cannot encode unforced handle {}",
                handle.fingerprint().prefix(8)
            )))
        }
    })
}

fn from_wire(wire: WireValue) -> Result<Value, PocketError> {
    Ok(match wire {
        WireValue::Nil => Value::Nil,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Int(n) => Value::Int(n),
        WireValue::Float(x) => Value::Float(x),
        WireValue::Str(s) => Value::Str(s),
        WireValue::Keyword(spelled) => Value::Keyword(
            Keyword::parse(&spelled)
                .ok_or_else(|| PocketError::decode(format!("bad keyword spelling {spelled}")))?,
        ),
        WireValue::List(items) => {
            Value::List(items.into_iter().map(from_wire).collect::<Result<_, _>>()?)
        }
        WireValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((from_wire(k)?, from_wire(v)?)))
                .collect::<Result<_, PocketError>>()?,
        ),
        WireValue::Set(items) => {
            Value::Set(items.into_iter().map(from_wire).collect::<Result<_, _>>()?)
        }
        WireValue::Foreign { tag, bytes } => {
            let codec = foreign_codec(&tag).ok_or_else(|| {
                PocketError::decode(format!("no codec registered for type tag `{tag}`"))
            })?;
            Value::Foreign((codec.decode)(&bytes)?)
        }
    })
}

//─────────────────────────────
//  Default MessagePack codec
//─────────────────────────────

/// The default codec: MessagePack over the wire form.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl ValueCodec for MsgpackCodec {
    fn version(&self) -> &'static str {
        "pocket-msgpack/1"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, PocketError> {
        let wire = to_wire(value)?;
        rmp_serde::to_vec_named(&wire).map_err(PocketError::encode)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, PocketError> {
        let wire: WireValue = rmp_serde::from_slice(bytes).map_err(PocketError::decode)?;
        from_wire(wire)
    }
}

//─────────────────────────────
//  Built-in dataset codec
//─────────────────────────────

#[derive(Serialize, Deserialize)]
struct WireDataset {
    columns: Vec<(String, Vec<WireValue>)>,
    target: Option<String>,
}

fn dataset_codec() -> ForeignCodec {
    ForeignCodec {
        encode: Arc::new(|fv: &ForeignValue| {
            let ds = fv
                .downcast::<Dataset>()
                .ok_or_else(|| PocketError::encode("dataset codec got a non-dataset payload"))?;
            let columns = ds
                .columns()
                .iter()
                .map(|c| {
                    Ok((
                        c.name.clone(),
                        c.values.iter().map(to_wire).collect::<Result<Vec<_>, _>>()?,
                    ))
                })
                .collect::<Result<_, PocketError>>()?;
            let wire = WireDataset { columns, target: ds.target().map(str::to_owned) };
            rmp_serde::to_vec_named(&wire).map_err(PocketError::encode)
        }),
        decode: Arc::new(|bytes: &[u8]| {
            let wire: WireDataset = rmp_serde::from_slice(bytes).map_err(PocketError::decode)?;
            let columns = wire
                .columns
                .into_iter()
                .map(|(name, cells)| {
                    Ok(Column {
                        name,
                        values: cells.into_iter().map(from_wire).collect::<Result<_, _>>()?,
                    })
                })
                .collect::<Result<Vec<_>, PocketError>>()?;
            let mut ds = Dataset::from_columns(columns)
                .map_err(|e| PocketError::decode(format!("bad dataset shape: {e}")))?;
            if let Some(target) = wire.target {
                ds.set_target(target);
            }
            Ok(ForeignValue::new(DATASET_TAG, Arc::new(ds)))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Value) -> Value {
        let codec = MsgpackCodec;
        let bytes = codec.encode(&value).unwrap();
        codec.decode(&bytes).unwrap()
    }

    #[test]
    fn primitives_round_trip() {
        assert_eq!(round_trip(Value::Nil), Value::Nil);
        assert_eq!(round_trip(Value::Int(-3)), Value::Int(-3));
        assert_eq!(round_trip(Value::Float(0.25)), Value::Float(0.25));
        assert_eq!(round_trip(Value::from("hi")), Value::from("hi"));
        assert_eq!(round_trip(Value::keyword("lr")), Value::keyword("lr"));
    }

    #[test]
    fn nested_collections_round_trip() {
        let v = Value::map([
            (Value::keyword("xs"), Value::List(vec![Value::Int(1), Value::Nil])),
            (Value::keyword("tags"), Value::Set(vec![Value::from("a")])),
        ]);
        assert_eq!(round_trip(v.clone()), v);
    }

    #[test]
    fn datasets_round_trip_through_the_registry() {
        let ds = Dataset::from_columns(vec![
            Column { name: "x".into(), values: vec![Value::Int(1), Value::Int(2)] },
            Column { name: "y".into(), values: vec![Value::Float(0.5), Value::Float(1.5)] },
        ])
        .unwrap();
        let v = Value::foreign(DATASET_TAG, Arc::new(ds.clone()));

        let codec = MsgpackCodec;
        let bytes = codec.encode(&v).unwrap();
        match codec.decode(&bytes).unwrap() {
            Value::Foreign(fv) => {
                let back = fv.downcast::<Dataset>().unwrap();
                assert_eq!(back.shape(), ds.shape());
                assert_eq!(back.column_names(), ds.column_names());
            }
            other => panic!("unexpected decode result {other:?}"),
        }
    }

    #[test]
    fn unregistered_foreign_type_fails_to_encode() {
        let v = Value::foreign("mystery/blob", Arc::new(1_u8));
        let err = MsgpackCodec.encode(&v).unwrap_err();
        assert!(matches!(err, PocketError::Encode { .. }));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = MsgpackCodec.decode(&[0xc1, 0xff, 0x00]).unwrap_err();
        assert!(matches!(err, PocketError::Decode { .. }));
    }
}
