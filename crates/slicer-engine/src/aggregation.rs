use crate::error::{EngineError, EngineResult};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use slicer_columnar::{ColumnarError, Value, ValueMerger};
use std::cmp::Ordering;

/// How partial aggregates roll up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Min,
    Max,
    /// Number of non-null source values. Partial counts roll up by sum.
    Count,
}

impl Aggregation {
    pub fn name(self) -> &'static str {
        match self {
            Aggregation::Sum => "SUM",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
            Aggregation::Count => "COUNT",
        }
    }

    /// Partial aggregate of a single source value.
    pub fn wrap(self, value: &Value) -> Value {
        match self {
            Aggregation::Count if value.is_null() => Value::Null,
            Aggregation::Count => Value::Int(1),
            _ => value.clone(),
        }
    }

    /// Combine two partial aggregates. Null is the identity; the first error value wins.
    pub fn merge(self, left: Value, right: Value) -> EngineResult<Value> {
        match (&left, &right) {
            (Value::Null, _) | (Value::Error(_), _) => return Ok(pick_error_or(right, left)),
            (_, Value::Null) => return Ok(left),
            (_, Value::Error(_)) => return Ok(right),
            _ => {}
        }
        match self {
            Aggregation::Sum | Aggregation::Count => add(&left, &right),
            Aggregation::Min => pick(left, right, Ordering::Less),
            Aggregation::Max => pick(left, right, Ordering::Greater),
        }
    }

    pub fn merger(self) -> AggregationMerger {
        AggregationMerger(self)
    }
}

// `left` is null or an error here: an error on the left sticks, otherwise take `right`.
fn pick_error_or(right: Value, left: Value) -> Value {
    if left.is_error() {
        left
    } else {
        right
    }
}

/// Adapter plugging an [`Aggregation`] into merge-aware column writes.
#[derive(Clone, Copy, Debug)]
pub struct AggregationMerger(pub Aggregation);

impl ValueMerger for AggregationMerger {
    fn merge(&self, existing: Value, incoming: Value) -> Result<Value, ColumnarError> {
        self.0
            .merge(existing, incoming)
            .map_err(|err| match err {
                EngineError::Type(message) => ColumnarError::Merge(message),
                other => ColumnarError::Merge(other.to_string()),
            })
    }
}

/// Numeric addition with int -> float promotion. Integer overflow promotes too.
pub(crate) fn add(left: &Value, right: &Value) -> EngineResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a
            .checked_add(*b)
            .map_or(Value::Float(*a as f64 + *b as f64), Value::Int)),
        _ => {
            let (a, b) = numeric_pair(left, right, "+")?;
            Ok(Value::Float(a + b))
        }
    }
}

pub(crate) fn sub(left: &Value, right: &Value) -> EngineResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a
            .checked_sub(*b)
            .map_or(Value::Float(*a as f64 - *b as f64), Value::Int)),
        _ => {
            let (a, b) = numeric_pair(left, right, "-")?;
            Ok(Value::Float(a - b))
        }
    }
}

pub(crate) fn mul(left: &Value, right: &Value) -> EngineResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a
            .checked_mul(*b)
            .map_or(Value::Float(*a as f64 * *b as f64), Value::Int)),
        _ => {
            let (a, b) = numeric_pair(left, right, "*")?;
            Ok(Value::Float(a * b))
        }
    }
}

fn numeric_pair(left: &Value, right: &Value, op: &str) -> EngineResult<(f64, f64)> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EngineError::Type(format!(
            "cannot apply {op} to {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Total order over comparable values: numbers (with promotion), texts, booleans.
pub(crate) fn compare_values(left: &Value, right: &Value) -> EngineResult<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(OrderedFloat(a).cmp(&OrderedFloat(b))),
            _ => Err(EngineError::Type(format!(
                "cannot compare {} with {}",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

/// Keep `left` unless `right` is strictly `wanted` relative to it.
pub(crate) fn pick(left: Value, right: Value, wanted: Ordering) -> EngineResult<Value> {
    if compare_values(&right, &left)? == wanted {
        Ok(right)
    } else {
        Ok(left)
    }
}
