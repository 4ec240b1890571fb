use crate::Value;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A group-by coordinate: the value of one column in a [`Slice`].
///
/// Coordinates are totally ordered (floats through [`OrderedFloat`]) so slices can be sorted and
/// merged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Coordinate {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Text(Arc<str>),
}

impl Coordinate {
    pub fn is_null(&self) -> bool {
        matches!(self, Coordinate::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Coordinate::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Coordinate of a source value. Error values have none.
    pub fn from_value(value: &Value) -> Option<Coordinate> {
        match value {
            Value::Null => Some(Coordinate::Null),
            Value::Int(v) => Some(Coordinate::Int(*v)),
            Value::Float(v) => Some(Coordinate::Float(OrderedFloat(*v))),
            Value::Bool(v) => Some(Coordinate::Bool(*v)),
            Value::Text(v) => Some(Coordinate::Text(v.clone())),
            Value::Error(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Coordinate::Null => Value::Null,
            Coordinate::Bool(v) => Value::Bool(*v),
            Coordinate::Int(v) => Value::Int(*v),
            Coordinate::Float(v) => Value::Float(v.0),
            Coordinate::Text(v) => Value::Text(v.clone()),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinate::Null => f.write_str("null"),
            Coordinate::Bool(v) => write!(f, "{v}"),
            Coordinate::Int(v) => write!(f, "{v}"),
            Coordinate::Float(v) => write!(f, "{}", v.0),
            Coordinate::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for Coordinate {
    fn from(value: &str) -> Self {
        Coordinate::Text(Arc::from(value))
    }
}

impl From<Arc<str>> for Coordinate {
    fn from(value: Arc<str>) -> Self {
        Coordinate::Text(value)
    }
}

impl From<i64> for Coordinate {
    fn from(value: i64) -> Self {
        Coordinate::Int(value)
    }
}

impl From<f64> for Coordinate {
    fn from(value: f64) -> Self {
        Coordinate::Float(OrderedFloat(value))
    }
}

impl From<bool> for Coordinate {
    fn from(value: bool) -> Self {
        Coordinate::Bool(value)
    }
}

/// An immutable multi-column coordinate: `column -> coordinate`, kept sorted by column name.
///
/// Ordering is lexicographic over `(column, coordinate)` pairs, so two slices over the same
/// columns compare coordinate by coordinate in column-name order. The empty slice is the grand
/// total. Cloning is a reference-count bump.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Slice {
    coordinates: Arc<[(Arc<str>, Coordinate)]>,
}

impl Slice {
    pub fn grand_total() -> Self {
        Self::default()
    }

    /// Build a slice from `(column, coordinate)` pairs. A repeated column keeps its last value.
    pub fn from_pairs<C, I>(pairs: I) -> Self
    where
        C: Into<Arc<str>>,
        I: IntoIterator<Item = (C, Coordinate)>,
    {
        let mut coordinates: Vec<(Arc<str>, Coordinate)> =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).collect();
        // Stable sort keeps insertion order among duplicates; the last one wins below.
        coordinates.sort_by(|a, b| a.0.cmp(&b.0));
        let mut deduped: Vec<(Arc<str>, Coordinate)> = Vec::with_capacity(coordinates.len());
        for (column, coordinate) in coordinates {
            match deduped.last_mut() {
                Some(last) if last.0 == column => last.1 = coordinate,
                _ => deduped.push((column, coordinate)),
            }
        }
        Self {
            coordinates: deduped.into(),
        }
    }

    pub fn is_grand_total(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&Coordinate> {
        self.coordinates
            .binary_search_by(|(c, _)| c.as_ref().cmp(column))
            .ok()
            .map(|idx| &self.coordinates[idx].1)
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = &Arc<str>> + '_ {
        self.coordinates.iter().map(|(c, _)| c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Coordinate)> + '_ {
        self.coordinates.iter().map(|(c, v)| (c, v))
    }

    /// Keep only the columns accepted by `keep`. Returns `self` unchanged (no allocation) when
    /// every column is kept.
    pub fn retain_columns(&self, mut keep: impl FnMut(&str) -> bool) -> Slice {
        let flags: Vec<bool> = self.coordinates.iter().map(|(c, _)| keep(c)).collect();
        if flags.iter().all(|k| *k) {
            return self.clone();
        }
        let coordinates: Vec<(Arc<str>, Coordinate)> = self
            .coordinates
            .iter()
            .zip(flags)
            .filter(|(_, k)| *k)
            .map(|(pair, _)| pair.clone())
            .collect();
        Slice {
            coordinates: coordinates.into(),
        }
    }

    /// A copy of this slice with `column` set to `coordinate` (added or replaced).
    pub fn with(&self, column: impl Into<Arc<str>>, coordinate: Coordinate) -> Slice {
        let column = column.into();
        let mut coordinates: Vec<(Arc<str>, Coordinate)> = self.coordinates.to_vec();
        match coordinates.binary_search_by(|(c, _)| c.cmp(&column)) {
            Ok(idx) => coordinates[idx].1 = coordinate,
            Err(idx) => coordinates.insert(idx, (column, coordinate)),
        }
        Slice {
            coordinates: coordinates.into(),
        }
    }

    pub fn without(&self, column: &str) -> Slice {
        self.retain_columns(|c| c != column)
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (column, coordinate)) in self.coordinates.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={coordinate}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_order_by_coordinates_in_column_order() {
        let a = Slice::from_pairs([("country", "France".into()), ("ccy", "EUR".into())]);
        let b = Slice::from_pairs([("ccy", "EUR".into()), ("country", "Germany".into())]);
        let c = Slice::from_pairs([("ccy", "USD".into()), ("country", "Alaska".into())]);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.to_string(), "{ccy=EUR, country=France}");
    }

    #[test]
    fn repeated_column_keeps_last_value() {
        let s = Slice::from_pairs([("t", Coordinate::Int(1)), ("t", Coordinate::Int(2))]);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("t"), Some(&Coordinate::Int(2)));
    }

    #[test]
    fn with_and_without_edit_copies() {
        let s = Slice::from_pairs([("a", Coordinate::Int(1))]);
        let edited = s.with("b", Coordinate::Int(2)).with("a", Coordinate::Int(3));
        assert_eq!(s.get("a"), Some(&Coordinate::Int(1)));
        assert_eq!(edited.get("a"), Some(&Coordinate::Int(3)));
        assert_eq!(edited.without("a").to_string(), "{b=2}");
        assert!(Slice::grand_total().is_grand_total());
    }
}
