//! Ordered document data model.
//!
//! Commands, filters, and shard replies are all self-describing documents:
//! insertion-ordered key/value maps with typed scalar, nested-document, and
//! array values. Field order is significant and survives round-trips, so the
//! map is backed by a plain vector of pairs rather than a hash map.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single typed value inside a [`Document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    /// Opaque ordering token, compared by raw value.
    Timestamp(u64),
    ObjectId([u8; 12]),
    Document(Document),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Int64(_) | Value::Double(_))
    }

    /// Numeric coercion across widths; non-numeric values read as 0.
    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Int32(v) => *v as i64,
            Value::Int64(v) => *v,
            Value::Double(v) => *v as i64,
            _ => 0,
        }
    }

    pub fn as_i32(&self) -> i32 {
        self.as_i64() as i32
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int32(v) => *v as f64,
            Value::Int64(v) => *v as f64,
            Value::Double(v) => *v,
            _ => 0.0,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Rank used by the canonical cross-type ordering. All numeric widths
    /// share a rank and compare by value.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_) => 1,
            Value::String(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Binary(_) => 5,
            Value::ObjectId(_) => 6,
            Value::Bool(_) => 7,
            Value::Timestamp(_) => 8,
        }
    }
}

/// Total order over values: type rank first, then value. Numeric variants
/// compare numerically regardless of width, doubles via `total_cmp` so NaN
/// cannot poison a sorted set. Drives `distinct`'s set semantics and the
/// deterministic order of merged output.
pub fn canonical_cmp(a: &Value, b: &Value) -> Ordering {
    let rank = a.type_rank().cmp(&b.type_rank());
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Binary(x), Value::Binary(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::ObjectId(x), Value::ObjectId(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => cmp_values(x, y),
        (Value::Document(x), Value::Document(y)) => cmp_documents(x, y),
        // both numeric at this point
        (x, y) => x.as_f64().total_cmp(&y.as_f64()),
    }
}

fn cmp_values(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = canonical_cmp(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn cmp_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ord = ka.cmp(kb).then_with(|| canonical_cmp(va, vb));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// `Value` wrapper ordered by [`canonical_cmp`], usable as a `BTreeSet` key.
#[derive(Debug, Clone)]
pub struct OrderedValue(pub Value);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        canonical_cmp(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        canonical_cmp(&self.0, &other.0)
    }
}

/// An insertion-ordered key/value document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Append a field, preserving insertion order. Duplicate names are
    /// allowed; lookups return the first occurrence.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The first field: by convention the command name and its target.
    pub fn first(&self) -> Option<(&str, &Value)> {
        self.fields.first().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_document(&self, name: &str) -> Option<&Document> {
        self.get(name).and_then(Value::as_document)
    }

    pub fn get_array(&self, name: &str) -> Option<&[Value]> {
        self.get(name).and_then(Value::as_array)
    }

    /// Numeric field with coercion; missing or non-numeric reads as 0.
    pub fn get_i64(&self, name: &str) -> i64 {
        self.get(name).map(Value::as_i64).unwrap_or(0)
    }

    pub fn get_i32(&self, name: &str) -> i32 {
        self.get(name).map(Value::as_i32).unwrap_or(0)
    }

    pub fn get_f64(&self, name: &str) -> f64 {
        self.get(name).map(Value::as_f64).unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "\"{v}\""),
            Value::Binary(v) => write!(f, "bin({} bytes)", v.len()),
            Value::Timestamp(v) => write!(f, "ts({v})"),
            Value::ObjectId(v) => {
                write!(f, "oid(")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                write!(f, ")")
            }
            Value::Document(d) => write!(f, "{d}"),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, " }}")
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// Build a [`Document`] literal: `doc! { "count" => "users", "skip" => 10 }`.
#[macro_export]
macro_rules! doc {
    () => { $crate::document::Document::new() };
    ($($key:expr => $val:expr),+ $(,)?) => {{
        let mut d = $crate::document::Document::new();
        $( d.push($key, $crate::document::Value::from($val)); )+
        d
    }};
}

/// Build a [`Value::Array`] literal: `array![1, 2, "three"]`.
#[macro_export]
macro_rules! array {
    () => { $crate::document::Value::Array(Vec::new()) };
    ($($val:expr),+ $(,)?) => {
        $crate::document::Value::Array(vec![ $( $crate::document::Value::from($val) ),+ ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_order_is_preserved() {
        let d = doc! { "b" => 1, "a" => 2, "c" => 3 };
        let keys: Vec<&str> = d.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(d.first().unwrap().0, "b");
    }

    #[test]
    fn numeric_widths_compare_equal() {
        assert_eq!(
            canonical_cmp(&Value::Int32(2), &Value::Int64(2)),
            Ordering::Equal
        );
        assert_eq!(
            canonical_cmp(&Value::Double(2.0), &Value::Int32(2)),
            Ordering::Equal
        );
        assert_eq!(
            canonical_cmp(&Value::Int64(1), &Value::Double(1.5)),
            Ordering::Less
        );
    }

    #[test]
    fn cross_type_order_is_total() {
        let mut values = vec![
            Value::String("a".into()),
            Value::Null,
            Value::Int32(7),
            Value::Bool(true),
        ];
        values.sort_by(canonical_cmp);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Int32(7),
                Value::String("a".into()),
                Value::Bool(true),
            ]
        );
    }

    #[test]
    fn coercion_reads_numbers_across_widths() {
        let d = doc! { "a" => 42i64, "b" => 2.5, "c" => "nope" };
        assert_eq!(d.get_i64("a"), 42);
        assert_eq!(d.get_f64("b"), 2.5);
        assert_eq!(d.get_i64("c"), 0);
        assert_eq!(d.get_i64("missing"), 0);
    }

    #[test]
    fn display_is_compact() {
        let d = doc! { "n" => 5, "q" => doc! { "x" => "y" } };
        assert_eq!(d.to_string(), "{ n: 5, q: { x: \"y\" } }");
    }

    #[test]
    fn serde_round_trip_preserves_field_order() {
        let d = doc! { "z" => 1, "a" => doc! { "nested" => true }, "m" => array![1i64, 2i64] };
        let json = serde_json::to_string(&d).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        let keys: Vec<&str> = back.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
