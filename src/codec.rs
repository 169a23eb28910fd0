//! Typed key/value codec (C1). A finite tagged-variant universe —
//! `{Int, Float, Str, List, Map, Uuid}` — replaces the runtime-reflection
//! dispatch of the source drafts per the REDESIGN FLAGS: the 1-byte tag
//! already on disk is the discriminant of a closed Rust enum.

use crate::errors::{DbError, DbResult};
use uuid::Uuid;

pub const TAG_INT: u8 = 0;
pub const TAG_FLOAT: u8 = 1;
pub const TAG_STR: u8 = 2;
pub const TAG_LIST: u8 = 3;
pub const TAG_MAP: u8 = 4;
pub const TAG_UUID: u8 = 5;

/// The typed value universe handled by the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(std::collections::BTreeMap<String, Value>),
    Uuid(Uuid),
}

impl Eq for Value {}

/// Total order over the key universe: values of the same variant compare
/// by their payload; values of different variants compare by type tag.
/// `Float` uses `f64::total_cmp` so keys remain totally ordered even
/// across NaN, which the engine's B-tree invariants require.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            _ => self.type_tag().cmp(&other.type_tag()),
        }
    }
}

impl Value {
    #[must_use]
    pub const fn type_tag(&self) -> u8 {
        match self {
            Self::Int(_) => TAG_INT,
            Self::Float(_) => TAG_FLOAT,
            Self::Str(_) => TAG_STR,
            Self::List(_) => TAG_LIST,
            Self::Map(_) => TAG_MAP,
            Self::Uuid(_) => TAG_UUID,
        }
    }

    /// Serialize to raw bytes (no type tag, no length prefix — the caller
    /// owns slot framing). Fails if encoding is not representable, though
    /// in practice only JSON encoding of List/Map can fail.
    pub fn serialize(&self) -> DbResult<Vec<u8>> {
        Ok(match self {
            Self::Int(v) => v.to_be_bytes().to_vec(),
            Self::Float(v) => v.to_be_bytes().to_vec(),
            Self::Str(s) => s.as_bytes().to_vec(),
            Self::List(items) => serde_json::to_vec(&json_from_list(items))?,
            Self::Map(map) => serde_json::to_vec(&json_from_map(map))?,
            Self::Uuid(u) => u.as_bytes().to_vec(),
        })
    }

    /// Deserialize from raw bytes given the type tag that identified them.
    pub fn deserialize(tag: u8, bytes: &[u8]) -> DbResult<Self> {
        match tag {
            TAG_INT => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| DbError::CorruptData("int slot is not 8 bytes".into()))?;
                Ok(Self::Int(i64::from_be_bytes(arr)))
            }
            TAG_FLOAT => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| DbError::CorruptData("float slot is not 8 bytes".into()))?;
                Ok(Self::Float(f64::from_be_bytes(arr)))
            }
            TAG_STR => {
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| DbError::CorruptData(format!("invalid utf-8: {e}")))?;
                Ok(Self::Str(s.to_string()))
            }
            TAG_LIST => {
                let json: serde_json::Value = serde_json::from_slice(bytes)?;
                Ok(Self::List(list_from_json(json)?))
            }
            TAG_MAP => {
                let json: serde_json::Value = serde_json::from_slice(bytes)?;
                Ok(Self::Map(map_from_json(json)?))
            }
            TAG_UUID => {
                let arr: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| DbError::CorruptData("uuid slot is not 16 bytes".into()))?;
                Ok(Self::Uuid(Uuid::from_bytes(arr)))
            }
            other => Err(DbError::CorruptData(format!("unknown type tag {other}"))),
        }
    }
}

fn json_from_list(items: &[Value]) -> serde_json::Value {
    serde_json::Value::Array(items.iter().map(json_from_value).collect())
}

fn json_from_map(map: &std::collections::BTreeMap<String, Value>) -> serde_json::Value {
    serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), json_from_value(v))).collect())
}

fn json_from_value(v: &Value) -> serde_json::Value {
    match v {
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => {
            serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => json_from_list(items),
        Value::Map(map) => json_from_map(map),
        Value::Uuid(u) => serde_json::Value::String(u.to_string()),
    }
}

fn list_from_json(json: serde_json::Value) -> DbResult<Vec<Value>> {
    match json {
        serde_json::Value::Array(items) => items.into_iter().map(value_from_json).collect(),
        _ => Err(DbError::CorruptData("expected JSON array for List value".into())),
    }
}

fn map_from_json(json: serde_json::Value) -> DbResult<std::collections::BTreeMap<String, Value>> {
    match json {
        serde_json::Value::Object(obj) => {
            obj.into_iter().map(|(k, v)| Ok((k, value_from_json(v)?))).collect()
        }
        _ => Err(DbError::CorruptData("expected JSON object for Map value".into())),
    }
}

fn value_from_json(json: serde_json::Value) -> DbResult<Value> {
    match json {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else {
                n.as_f64().map(Value::Float).ok_or_else(|| {
                    DbError::CorruptData("numeric value out of range".into())
                })
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s)),
        serde_json::Value::Array(_) => Ok(Value::List(list_from_json(json)?)),
        serde_json::Value::Object(_) => Ok(Value::Map(map_from_json(json)?)),
        other => Err(DbError::CorruptData(format!("unsupported nested JSON value: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trips() {
        let v = Value::Int(-42);
        let bytes = v.serialize().unwrap();
        assert_eq!(Value::deserialize(TAG_INT, &bytes).unwrap(), v);
    }

    #[test]
    fn float_round_trips() {
        let v = Value::Float(3.25);
        let bytes = v.serialize().unwrap();
        assert_eq!(Value::deserialize(TAG_FLOAT, &bytes).unwrap(), v);
    }

    #[test]
    fn str_round_trips() {
        let v = Value::Str("hello".into());
        let bytes = v.serialize().unwrap();
        assert_eq!(Value::deserialize(TAG_STR, &bytes).unwrap(), v);
    }

    #[test]
    fn uuid_round_trips() {
        let v = Value::Uuid(Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0));
        let bytes = v.serialize().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(Value::deserialize(TAG_UUID, &bytes).unwrap(), v);
    }

    #[test]
    fn map_round_trips() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("f".to_string(), Value::Str("asd".into()));
        let v = Value::Map(map);
        let bytes = v.serialize().unwrap();
        assert_eq!(Value::deserialize(TAG_MAP, &bytes).unwrap(), v);
    }

    #[test]
    fn unknown_tag_is_corrupt_data() {
        assert!(matches!(Value::deserialize(99, &[]), Err(DbError::CorruptData(_))));
    }

    #[test]
    fn malformed_int_is_corrupt_data() {
        assert!(matches!(Value::deserialize(TAG_INT, &[0u8; 3]), Err(DbError::CorruptData(_))));
    }

    #[test]
    fn ordering_is_total_across_variants() {
        let mut values = vec![Value::Str("b".into()), Value::Int(5), Value::Int(1), Value::Str("a".into())];
        values.sort();
        assert_eq!(
            values,
            vec![Value::Int(1), Value::Int(5), Value::Str("a".into()), Value::Str("b".into())]
        );
    }
}
