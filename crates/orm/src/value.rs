//! Field values
//!
//! The typed value enumeration shared by schemas, queries, and the row-store
//! contract, plus the coded-value wrapper used for domain lookups and the
//! placeholder for columns that have not been fetched yet.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A single field value.
///
/// `Coded` wraps a stored code together with its domain label; equality
/// against the underlying code still holds, so a coded value compares equal
/// to the raw value it stores. `Label` is the counterpart marker used to
/// compare against (or assign by) a domain label rather than a code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Coded(CodedValue),
    Label(String),
    List(Vec<Value>),
}

/// A stored code paired with its domain label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodedValue {
    pub code: Box<Value>,
    pub label: String,
}

impl CodedValue {
    pub fn new(code: Value, label: impl Into<String>) -> Self {
        Self {
            code: Box::new(code),
            label: label.into(),
        }
    }
}

// Coded values compare by code; labels only match other labels.
impl PartialEq for CodedValue {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Value {
    /// Create a coded value
    pub fn coded(code: Value, label: impl Into<String>) -> Self {
        Value::Coded(CodedValue::new(code, label))
    }

    /// Create a domain-label marker
    pub fn label(label: impl Into<String>) -> Self {
        Value::Label(label.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self.raw(), Value::Null)
    }

    /// The underlying value, unwrapping a coded wrapper
    pub fn raw(&self) -> &Value {
        match self {
            Value::Coded(coded) => coded.code.as_ref(),
            other => other,
        }
    }

    /// Consume the value, unwrapping a coded wrapper
    pub fn into_raw(self) -> Value {
        match self {
            Value::Coded(coded) => *coded.code,
            other => other,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.raw() {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.raw() {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.raw() {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Compare against a previously stored value at the backend's storage
    /// precision. Numeric values are rounded to `scale` decimal digits
    /// before comparison so storage rounding does not report a change.
    pub fn has_changed(&self, other: &Value, scale: Option<u32>) -> bool {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return match scale {
                Some(digits) => round_to_scale(a, digits) != round_to_scale(b, digits),
                None => a != b,
            };
        }
        self != other
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number(serde_json::Number::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
            Value::Uuid(u) => JsonValue::String(u.to_string()),
            Value::Date(d) => JsonValue::String(d.to_string()),
            Value::Coded(coded) => coded.code.to_json(),
            Value::Label(l) => JsonValue::String(l.clone()),
            Value::List(values) => JsonValue::Array(values.iter().map(Value::to_json).collect()),
        }
    }

    /// Create a value from a JSON value
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            JsonValue::String(s) => Value::Str(s),
            JsonValue::Array(arr) => Value::List(arr.into_iter().map(Value::from_json).collect()),
            JsonValue::Object(_) => Value::Null,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Unwrap coded values on either side before comparing.
            (Value::Coded(a), b) => a.code.as_ref() == b,
            (a, Value::Coded(b)) => a == b.code.as_ref(),
            // A label matches nothing but another label here; matching a
            // label against a coded value goes through PartialEq<Label>.
            (Value::Label(a), Value::Label(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

/// A domain label, used to compare coded values by description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label(pub String);

impl Label {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

impl PartialEq<Label> for CodedValue {
    fn eq(&self, other: &Label) -> bool {
        self.label == other.0
    }
}

impl PartialEq<CodedValue> for Label {
    fn eq(&self, other: &CodedValue) -> bool {
        other == self
    }
}

impl PartialEq<Label> for Value {
    fn eq(&self, other: &Label) -> bool {
        match self {
            Value::Coded(coded) => coded == other,
            Value::Label(label) => label == &other.0,
            _ => false,
        }
    }
}

impl PartialEq<Value> for Label {
    fn eq(&self, other: &Value) -> bool {
        other == self
    }
}

/// A field value that is only retrieved from the row store when needed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredValue {
    pub field_name: String,
    pub storage_name: String,
}

impl DeferredValue {
    pub fn new(field_name: impl Into<String>, storage_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            storage_name: storage_name.into(),
        }
    }
}

/// Round a value to the given number of decimal digits
pub fn round_to_scale(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<Label> for Value {
    fn from(value: Label) -> Self {
        Value::Label(value.0)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coded_value_equals_raw_code() {
        let coded = Value::coded(Value::Int(10), "Integer");
        assert_eq!(coded, Value::Int(10));
        assert_eq!(Value::Int(10), coded);
        assert_ne!(coded, Value::Str("Integer".to_string()));
    }

    #[test]
    fn label_equality() {
        let coded = CodedValue::new(Value::Int(3), "Test");
        assert_eq!(coded, Label::new("Test"));
        assert_eq!(Label::new("Test"), coded);
        assert_ne!(Value::Coded(CodedValue::new(Value::Int(3), "Test 2")), Label::new("Test 1"));
        assert_eq!(Label::new("Test"), Label::new("Test"));
        // A label never equals a plain string value.
        assert_ne!(Value::Label("Test".to_string()), Value::Str("Test".to_string()));
    }

    #[test]
    fn has_changed_applies_storage_scale() {
        let a = Value::Float(1.001);
        assert!(!a.has_changed(&Value::Float(1.004), Some(2)));
        assert!(a.has_changed(&Value::Float(1.02), Some(2)));
        assert!(!Value::Float(1.002).has_changed(&Value::Float(1.0022), Some(3)));
        assert!(Value::Float(1.002).has_changed(&Value::Float(1.0026), Some(3)));
        assert!(Value::Int(10).has_changed(&Value::Int(15), None));
        assert!(!Value::Int(10).has_changed(&Value::Int(10), None));
    }

    #[test]
    fn int_float_cross_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Float(2.5));
    }

    #[test]
    fn json_round_trip() {
        let value = Value::List(vec![Value::Int(1), Value::Str("two".to_string()), Value::Null]);
        assert_eq!(Value::from_json(value.to_json()), value);
    }
}
