use crate::aggregation::Aggregation;
use crate::error::{EngineError, EngineResult};
use crate::filter::Filter;
use crate::query::GroupBy;
use ahash::AHashMap;
use slicer_columnar::{BitVec, Coordinate, Slice, Value};
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Column name an aggregator uses to count rows rather than values.
pub const ROW_COUNT_COLUMN: &str = "*";

/// One aggregate a physical scan computes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableAggregate {
    pub column: Arc<str>,
    pub aggregation: Aggregation,
}

/// A physical query against the source table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableQuery {
    pub filter: Filter,
    pub group_by: GroupBy,
    pub aggregates: Vec<TableAggregate>,
}

/// One row of a scan: a group-by slice and one partial aggregate per requested aggregate.
///
/// Rows need not be distinct by slice; the engine rolls duplicates up.
#[derive(Clone, Debug, PartialEq)]
pub struct TableRow {
    pub slice: Slice,
    pub values: SmallVec<[Value; 4]>,
}

pub type RowStream<'a> = Box<dyn Iterator<Item = EngineResult<TableRow>> + Send + 'a>;

/// Source-table collaborator.
///
/// `stream_rows` is single pass and synchronous. An error item aborts the query.
pub trait TableWrapper: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn columns(&self) -> &[Arc<str>];
    fn stream_rows(&self, query: &TableQuery) -> EngineResult<RowStream<'_>>;

    fn has_column(&self, column: &str) -> bool {
        self.columns().iter().any(|c| c.as_ref() == column)
    }
}

/// Row-oriented in-memory table. Every scan streams one row per matching source row.
#[derive(Debug)]
pub struct InMemoryTable {
    name: Arc<str>,
    columns: Vec<Arc<str>>,
    column_index: AHashMap<Arc<str>, usize>,
    rows: Vec<Vec<Value>>,
    scans: AtomicUsize,
}

impl InMemoryTable {
    pub fn new<I, S>(name: impl Into<Arc<str>>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let columns: Vec<Arc<str>> = columns.into_iter().map(Into::into).collect();
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.clone(), idx))
            .collect();
        Self {
            name: name.into(),
            columns,
            column_index,
            rows: Vec::new(),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> EngineResult<()> {
        if row.len() != self.columns.len() {
            return Err(EngineError::SchemaMismatch {
                table: self.name.to_string(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> EngineResult<Self> {
        for row in rows {
            self.push_row(row)?;
        }
        Ok(self)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of `stream_rows` calls so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    fn column_idx(&self, column: &str) -> EngineResult<usize> {
        self.column_index
            .get(column)
            .copied()
            .ok_or_else(|| EngineError::UnknownColumn {
                column: column.to_string(),
            })
    }

    fn coordinate(&self, row: usize, idx: usize) -> Option<Coordinate> {
        Coordinate::from_value(&self.rows[row][idx])
    }
}

impl TableWrapper for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> &[Arc<str>] {
        &self.columns
    }

    fn stream_rows(&self, query: &TableQuery) -> EngineResult<RowStream<'_>> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        for column in query.filter.columns() {
            self.column_idx(&column)?;
        }
        let group_idx = query
            .group_by
            .iter()
            .map(|c| Ok((c.clone(), self.column_idx(c)?)))
            .collect::<EngineResult<Vec<_>>>()?;
        let aggregate_idx = query
            .aggregates
            .iter()
            .map(|a| {
                if a.column.as_ref() == ROW_COUNT_COLUMN {
                    Ok((None, a.aggregation))
                } else {
                    Ok((Some(self.column_idx(&a.column)?), a.aggregation))
                }
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let selection = BitVec::from_fn(self.rows.len(), |row| {
            query.filter.matches_by(&|column| {
                self.column_index
                    .get(column)
                    .and_then(|idx| self.coordinate(row, *idx))
            })
        });
        log::debug!(
            "scan {}: {} of {} rows match {}",
            self.name,
            selection.count_ones(),
            self.rows.len(),
            query.filter
        );

        let selected: Vec<usize> = selection.iter_ones().collect();
        Ok(Box::new(selected.into_iter().map(move |row| {
            let mut pairs = Vec::with_capacity(group_idx.len());
            for (column, idx) in &group_idx {
                let coordinate =
                    self.coordinate(row, *idx)
                        .ok_or_else(|| EngineError::TableScan {
                            table: self.name.to_string(),
                            message: format!("error value in group-by column {column} at row {row}"),
                        })?;
                pairs.push((column.clone(), coordinate));
            }
            let values = aggregate_idx
                .iter()
                .map(|(idx, aggregation)| match idx {
                    Some(idx) => aggregation.wrap(&self.rows[row][*idx]),
                    None => Value::Int(1),
                })
                .collect();
            Ok(TableRow {
                slice: Slice::from_pairs(pairs),
                values,
            })
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sales() -> InMemoryTable {
        InMemoryTable::new("sales", ["ccy", "country", "amount"])
            .with_rows([
                vec!["EUR".into(), "France".into(), Value::Int(100)],
                vec!["EUR".into(), "France".into(), Value::Int(23)],
                vec!["USD".into(), "USA".into(), Value::Null],
            ])
            .unwrap()
    }

    #[test]
    fn streams_one_row_per_source_row() {
        let table = sales();
        let query = TableQuery {
            filter: Filter::eq("ccy", "EUR"),
            group_by: GroupBy::from([Arc::from("country")]),
            aggregates: vec![
                TableAggregate {
                    column: "amount".into(),
                    aggregation: Aggregation::Sum,
                },
                TableAggregate {
                    column: ROW_COUNT_COLUMN.into(),
                    aggregation: Aggregation::Count,
                },
            ],
        };
        let rows: Vec<TableRow> = table
            .stream_rows(&query)
            .unwrap()
            .collect::<EngineResult<_>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].slice.to_string(), "{country=France}");
        assert_eq!(rows[1].values.as_slice(), &[Value::Int(23), Value::Int(1)]);
        assert_eq!(table.scan_count(), 1);
    }

    #[test]
    fn unknown_columns_and_bad_rows_are_rejected() {
        let mut table = sales();
        let query = TableQuery {
            filter: Filter::MatchAll,
            group_by: GroupBy::from([Arc::from("region")]),
            aggregates: Vec::new(),
        };
        assert!(matches!(
            table.stream_rows(&query),
            Err(EngineError::UnknownColumn { column }) if column == "region"
        ));
        assert!(matches!(
            table.push_row(vec![Value::Null]),
            Err(EngineError::SchemaMismatch { expected: 3, actual: 1, .. })
        ));
    }
}
