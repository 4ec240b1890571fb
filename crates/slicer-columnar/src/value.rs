use crate::ColumnarError;
use std::fmt;
use std::sync::Arc;

/// Sentinel returned by raw integer reads of a key that holds no integer.
pub const NULL_INT: i64 = 0;

/// Sentinel returned by raw float reads of a key that holds no float.
pub const NULL_FLOAT: f64 = f64::NAN;

/// A measure output stored in a column.
///
/// `Int` and `Float` travel through the typed arenas of a
/// [`MultitypeColumn`](crate::MultitypeColumn); every other variant lands in the generic arena.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(Arc<str>),
    /// A per-slice evaluation failure kept as data so sibling measures stay visible.
    Error(Arc<str>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Numeric view of the value. Integers are promoted to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
            Value::Error(_) => "error",
        }
    }

    /// Bitwise equality: unlike `==`, two `NaN` floats with the same bits are equal.
    pub fn bit_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Error(msg) => write!(f, "#ERROR({msg})"),
        }
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

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::Text(value)
    }
}

/// Push-style consumer of a stored value.
///
/// This is the only way values leave storage: each channel is typed so the integer and float
/// paths never box.
pub trait ValueReceiver {
    fn on_int(&mut self, value: i64);
    fn on_float(&mut self, value: f64);
    /// Any non-numeric, non-null value.
    fn on_object(&mut self, value: &Value);
    fn on_null(&mut self) {}
}

/// Producer side of [`ValueReceiver`].
pub trait ValueProvider {
    fn accept(&self, receiver: &mut dyn ValueReceiver);

    /// Materialize the provided value. Convenience for non-hot paths.
    fn to_value(&self) -> Value {
        let mut capture = ValueCapture::default();
        self.accept(&mut capture);
        capture.into_value()
    }
}

impl ValueProvider for Value {
    fn accept(&self, receiver: &mut dyn ValueReceiver) {
        match self {
            Value::Null => receiver.on_null(),
            Value::Int(v) => receiver.on_int(*v),
            Value::Float(v) => receiver.on_float(*v),
            other => receiver.on_object(other),
        }
    }

    fn to_value(&self) -> Value {
        self.clone()
    }
}

/// Receiver materializing whatever it is pushed into a [`Value`].
#[derive(Debug, Default)]
pub struct ValueCapture {
    value: Value,
}

impl ValueCapture {
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl ValueReceiver for ValueCapture {
    fn on_int(&mut self, value: i64) {
        self.value = Value::Int(value);
    }

    fn on_float(&mut self, value: f64) {
        self.value = Value::Float(value);
    }

    fn on_object(&mut self, value: &Value) {
        self.value = value.clone();
    }

    fn on_null(&mut self) {
        self.value = Value::Null;
    }
}

/// Combines a value already stored under a key with an incoming one.
///
/// Used by the merge-aware write paths; plain `append` never accumulates.
pub trait ValueMerger {
    fn merge(&self, existing: Value, incoming: Value) -> Result<Value, ColumnarError>;
}

impl<F> ValueMerger for F
where
    F: Fn(Value, Value) -> Result<Value, ColumnarError>,
{
    fn merge(&self, existing: Value, incoming: Value) -> Result<Value, ColumnarError> {
        self(existing, incoming)
    }
}
