use crate::aggregation::{add, compare_values, mul, sub};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use slicer_columnar::{Coordinate, Slice, Value};
use std::cmp::Ordering;

/// Pure per-slice function of the underlying values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combination {
    /// Sum of the non-null inputs.
    Sum,
    /// First input minus the others; nulls count as zero.
    Subtract,
    /// Product of the inputs; null if any input is null.
    Product,
    /// First input divided by the second, as a float. Null on a null operand or a zero divisor.
    Divide,
    Max,
    Min,
    /// First non-null input.
    Coalesce,
    /// The same value for every slice produced by the underlyings.
    Constant(Coordinate),
}

impl Combination {
    pub fn name(&self) -> &'static str {
        match self {
            Combination::Sum => "SUM",
            Combination::Subtract => "SUBTRACT",
            Combination::Product => "PRODUCT",
            Combination::Divide => "DIVIDE",
            Combination::Max => "MAX",
            Combination::Min => "MIN",
            Combination::Coalesce => "COALESCE",
            Combination::Constant(_) => "CONSTANT",
        }
    }

    /// Combine the underlying values of one slice.
    ///
    /// An error value among the inputs is passed through unchanged.
    pub fn combine(&self, _slice: &Slice, inputs: &[Value]) -> EngineResult<Value> {
        if let Combination::Constant(value) = self {
            return Ok(value.to_value());
        }
        if let Some(err) = inputs.iter().find(|v| v.is_error()) {
            return Ok(err.clone());
        }
        let mut present = inputs.iter().filter(|v| !v.is_null());
        match self {
            Combination::Sum => present.try_fold(Value::Null, |acc, v| match acc {
                Value::Null => Ok(v.clone()),
                acc => add(&acc, v),
            }),
            Combination::Subtract => {
                if inputs.iter().all(Value::is_null) {
                    return Ok(Value::Null);
                }
                let mut rest = inputs.iter();
                let first = rest.next().cloned().unwrap_or_default();
                let mut acc = if first.is_null() { Value::Int(0) } else { first };
                for v in rest.filter(|v| !v.is_null()) {
                    acc = sub(&acc, v)?;
                }
                Ok(acc)
            }
            Combination::Product => {
                if inputs.is_empty() || inputs.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                inputs[1..]
                    .iter()
                    .try_fold(inputs[0].clone(), |acc, v| mul(&acc, v))
            }
            Combination::Divide => {
                let [numerator, denominator] = inputs else {
                    return Err(EngineError::Type(format!(
                        "DIVIDE expects 2 operands, got {}",
                        inputs.len()
                    )));
                };
                match (numerator.as_f64(), denominator.as_f64()) {
                    _ if numerator.is_null() || denominator.is_null() => Ok(Value::Null),
                    (Some(_), Some(d)) if d == 0.0 => Ok(Value::Null),
                    (Some(n), Some(d)) => Ok(Value::Float(n / d)),
                    _ => Err(EngineError::Type(format!(
                        "cannot divide {} by {}",
                        numerator.type_name(),
                        denominator.type_name()
                    ))),
                }
            }
            Combination::Max => extremum(present, Ordering::Greater),
            Combination::Min => extremum(present, Ordering::Less),
            Combination::Coalesce => Ok(present.next().cloned().unwrap_or_default()),
            Combination::Constant(_) => Ok(Value::Null),
        }
    }
}

fn extremum<'a>(mut values: impl Iterator<Item = &'a Value>, wanted: Ordering) -> EngineResult<Value> {
    values.try_fold(Value::Null, |acc, v| {
        if acc.is_null() || compare_values(v, &acc)? == wanted {
            Ok(v.clone())
        } else {
            Ok(acc)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combine(c: Combination, inputs: &[Value]) -> Value {
        c.combine(&Slice::grand_total(), inputs).unwrap()
    }

    #[test]
    fn arithmetic_combinations() {
        let inputs = [Value::Int(10), Value::Null, Value::Int(4)];
        assert_eq!(combine(Combination::Sum, &inputs), Value::Int(14));
        assert_eq!(combine(Combination::Subtract, &inputs), Value::Int(6));
        assert_eq!(combine(Combination::Product, &inputs), Value::Null);
        assert_eq!(combine(Combination::Max, &inputs), Value::Int(10));
        assert_eq!(combine(Combination::Min, &inputs), Value::Int(4));
        assert_eq!(combine(Combination::Coalesce, &inputs[1..]), Value::Int(4));
        assert_eq!(
            combine(Combination::Subtract, &[Value::Null, Value::Int(3)]),
            Value::Int(-3)
        );
        assert_eq!(combine(Combination::Sum, &[Value::Null]), Value::Null);
    }

    #[test]
    fn divide_guards_zero_and_arity() {
        assert_eq!(
            combine(Combination::Divide, &[Value::Int(1), Value::Int(4)]),
            Value::Float(0.25)
        );
        assert_eq!(
            combine(Combination::Divide, &[Value::Int(1), Value::Int(0)]),
            Value::Null
        );
        assert!(Combination::Divide
            .combine(&Slice::grand_total(), &[Value::Int(1)])
            .is_err());
        assert!(Combination::Divide
            .combine(&Slice::grand_total(), &[Value::from("a"), Value::Int(2)])
            .is_err());
    }

    #[test]
    fn constant_ignores_inputs() {
        assert_eq!(
            combine(Combination::Constant(Coordinate::Int(7)), &[Value::Null]),
            Value::Int(7)
        );
    }
}
