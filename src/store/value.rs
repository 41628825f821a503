//! Value - reified polymorphic store value
//!
//! The shared store is typed-polymorphic: any value type is legal, including
//! binary blobs. `Value` replaces ad-hoc JSON with an explicit variant so
//! bytes survive the trip through templates and node params without
//! stringification.
//!
//! Conversions:
//! - `From<serde_json::Value>` preserves integers as `Int`
//! - `to_json` encodes bytes as base64 (JSON boundaries only; traces apply
//!   their own redaction instead)

use std::collections::BTreeMap;

use base64::Engine;
use bytes::Bytes;
use smallvec::SmallVec;

/// Stack-allocated path segments: most paths are `node.key` deep
pub type PathVec = SmallVec<[PathSeg; 4]>;

/// Map type used throughout the store and node params
pub type ValueMap = BTreeMap<String, Value>;

/// A single path segment for nested access (`key` or `[index]`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathSeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Polymorphic store value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    List(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    /// Human-readable type name (for error messages)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Check whether any bytes value is nested anywhere in this value
    pub fn contains_bytes(&self) -> bool {
        match self {
            Self::Bytes(_) => true,
            Self::List(items) => items.iter().any(Value::contains_bytes),
            Self::Map(m) => m.values().any(Value::contains_bytes),
            _ => false,
        }
    }

    /// Traverse a nested path, returning `None` when a segment is missing
    pub fn get_path(&self, path: &[PathSeg]) -> Option<&Value> {
        let mut current = self;
        for seg in path {
            current = match (seg, current) {
                (PathSeg::Key(k), Value::Map(m)) => m.get(k)?,
                (PathSeg::Index(i), Value::List(items)) => items.get(*i)?,
                // Numeric keys also index lists, so `${node.items.0}` works
                (PathSeg::Key(k), Value::List(items)) => {
                    let idx: usize = k.parse().ok()?;
                    items.get(idx)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Stringify for embedding into a surrounding-text template.
    ///
    /// Strings embed as-is; other scalars and structures embed as compact
    /// JSON. Bytes have no legal string form and return `None` - callers
    /// must fail fast.
    pub fn embed_string(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Bytes(_) => None,
            other => {
                if other.contains_bytes() {
                    None
                } else {
                    Some(other.to_json().to_string())
                }
            }
        }
    }

    /// Convert to JSON. Bytes become base64 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::Number((*n).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(b),
            ),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Convert to JSON, rejecting bytes anywhere in the value.
    ///
    /// Used at boundaries that cannot carry binary (MCP tool arguments).
    pub fn to_json_strict(&self) -> Option<serde_json::Value> {
        if self.contains_bytes() {
            None
        } else {
            Some(self.to_json())
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(m) => {
                Self::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<ValueMap> for Value {
    fn from(m: ValueMap) -> Self {
        Self::Map(m)
    }
}

/// Parse a dotted/indexed path string into segments.
///
/// `"node.key[0].sub"` → `[Key("node"), Key("key"), Index(0), Key("sub")]`
pub fn parse_path(path: &str) -> PathVec {
    let mut segs = PathVec::new();
    for part in path.split('.') {
        let mut rest = part;
        while let Some(open) = rest.find('[') {
            let key = &rest[..open];
            if !key.is_empty() {
                segs.push(PathSeg::Key(key.to_string()));
            }
            match rest[open..].find(']') {
                Some(close) => {
                    let idx_str = &rest[open + 1..open + close];
                    if let Ok(idx) = idx_str.parse::<usize>() {
                        segs.push(PathSeg::Index(idx));
                    }
                    rest = &rest[open + close + 1..];
                }
                None => break,
            }
        }
        if !rest.is_empty() {
            segs.push(PathSeg::Key(rest.to_string()));
        }
    }
    segs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_preserves_integers() {
        let v = Value::from(json!(42));
        assert_eq!(v, Value::Int(42));
        let v = Value::from(json!(1.5));
        assert_eq!(v, Value::Float(1.5));
    }

    #[test]
    fn from_json_nested() {
        let v = Value::from(json!({"a": [1, "x", true], "b": null}));
        let m = v.as_map().unwrap();
        assert_eq!(
            m["a"],
            Value::List(vec![Value::Int(1), Value::Str("x".into()), Value::Bool(true)])
        );
        assert!(m["b"].is_null());
    }

    #[test]
    fn json_roundtrip_without_bytes() {
        let original = json!({"n": 3, "s": "hi", "l": [1, 2], "f": 2.5});
        let v = Value::from(original.clone());
        assert_eq!(v.to_json(), original);
    }

    #[test]
    fn get_path_map_and_list() {
        let v = Value::from(json!({"items": [{"name": "a"}, {"name": "b"}]}));
        let path = parse_path("items[1].name");
        assert_eq!(v.get_path(&path), Some(&Value::Str("b".into())));
        // Numeric dotted key also indexes lists
        let path = parse_path("items.0.name");
        assert_eq!(v.get_path(&path), Some(&Value::Str("a".into())));
    }

    #[test]
    fn get_path_missing_returns_none() {
        let v = Value::from(json!({"a": 1}));
        assert!(v.get_path(&parse_path("b")).is_none());
        assert!(v.get_path(&parse_path("a.b")).is_none());
    }

    #[test]
    fn embed_string_rejects_bytes() {
        let v = Value::Bytes(Bytes::from_static(b"\x89PNG"));
        assert!(v.embed_string().is_none());

        let nested = Value::List(vec![Value::Bytes(Bytes::from_static(b"x"))]);
        assert!(nested.embed_string().is_none());
    }

    #[test]
    fn embed_string_formats() {
        assert_eq!(Value::Str("hi".into()).embed_string().unwrap(), "hi");
        assert_eq!(Value::Int(7).embed_string().unwrap(), "7");
        assert_eq!(Value::Bool(true).embed_string().unwrap(), "true");
        assert_eq!(
            Value::from(json!({"a": 1})).embed_string().unwrap(),
            "{\"a\":1}"
        );
    }

    #[test]
    fn contains_bytes_detects_nesting() {
        let mut m = ValueMap::new();
        m.insert("blob".into(), Value::Bytes(Bytes::from_static(b"abc")));
        let v = Value::List(vec![Value::Map(m)]);
        assert!(v.contains_bytes());
        assert!(v.to_json_strict().is_none());
    }

    #[test]
    fn parse_path_variants() {
        assert_eq!(
            parse_path("node.key").to_vec(),
            vec![PathSeg::Key("node".into()), PathSeg::Key("key".into())]
        );
        assert_eq!(
            parse_path("node.key[2]").to_vec(),
            vec![
                PathSeg::Key("node".into()),
                PathSeg::Key("key".into()),
                PathSeg::Index(2)
            ]
        );
    }
}
