use crate::filter::{ColumnFilter, Filter};
use serde::{Deserialize, Serialize};
use slicer_columnar::{Coordinate, Slice};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Moves a query along one column: the shifted measure reads its underlying somewhere else.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shift {
    /// Read the underlying at `column = coordinate`, whatever the query says about `column`.
    Fixed {
        column: Arc<str>,
        coordinate: Coordinate,
    },
    /// Read the underlying `offset` integer positions away along `column`.
    Offset { column: Arc<str>, offset: i64 },
}

impl Shift {
    pub fn column(&self) -> &Arc<str> {
        match self {
            Shift::Fixed { column, .. } | Shift::Offset { column, .. } => column,
        }
    }

    fn offset_coordinate(offset: i64, coordinate: &Coordinate) -> Coordinate {
        match coordinate {
            Coordinate::Int(v) => Coordinate::Int(v.saturating_add(offset)),
            other => other.clone(),
        }
    }

    /// The filter the underlying is evaluated with.
    ///
    /// `Fixed` drops every conjunct mentioning the column (mixed OR conjuncts included) and pins
    /// the column instead; `Offset` moves every integer operand on the column.
    pub fn shift_filter(&self, filter: &Filter) -> Filter {
        match self {
            Shift::Fixed { column, coordinate } => {
                let dropped = BTreeSet::from([column.clone()]);
                filter
                    .without_columns(&dropped)
                    .and(Filter::eq(column.clone(), coordinate.clone()))
            }
            Shift::Offset { column, offset } => filter.map_column_filters(&|cf: &ColumnFilter| {
                if cf.column == *column {
                    Filter::column(
                        cf.column.clone(),
                        cf.matcher
                            .map_operands(&|c| Self::offset_coordinate(*offset, c)),
                    )
                } else {
                    Filter::Column(cf.clone())
                }
            }),
        }
    }

    /// The underlying slice whose value lands on `slice`.
    pub fn shift_slice(&self, slice: &Slice) -> Slice {
        match self {
            Shift::Fixed { column, coordinate } if slice.contains_column(column) => {
                slice.with(column.clone(), coordinate.clone())
            }
            Shift::Offset { column, offset } => match slice.get(column) {
                Some(coordinate @ Coordinate::Int(_)) => {
                    slice.with(column.clone(), Self::offset_coordinate(*offset, coordinate))
                }
                _ => slice.clone(),
            },
            _ => slice.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pins_the_column() {
        let shift = Shift::Fixed {
            column: "ccy".into(),
            coordinate: "EUR".into(),
        };
        let filter = Filter::eq("ccy", "USD").and(Filter::eq("country", "USA"));
        assert_eq!(
            shift.shift_filter(&filter),
            Filter::eq("ccy", "EUR").and(Filter::eq("country", "USA"))
        );
        let slice = Slice::from_pairs([("ccy", Coordinate::from("USD"))]);
        assert_eq!(shift.shift_slice(&slice).to_string(), "{ccy=EUR}");
        assert!(shift.shift_slice(&Slice::grand_total()).is_grand_total());
    }

    #[test]
    fn offset_moves_operands_and_slices() {
        let shift = Shift::Offset {
            column: "t".into(),
            offset: -1,
        };
        let filter = Filter::is_in("t", [3i64, 5]).and(Filter::eq("ccy", "EUR"));
        assert_eq!(
            shift.shift_filter(&filter),
            Filter::is_in("t", [2i64, 4]).and(Filter::eq("ccy", "EUR"))
        );
        let slice = Slice::from_pairs([("t", Coordinate::Int(3))]);
        assert_eq!(shift.shift_slice(&slice), Slice::from_pairs([("t", Coordinate::Int(2))]));
    }
}
