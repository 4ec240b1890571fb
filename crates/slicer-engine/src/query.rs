use crate::filter::Filter;
use crate::measure::Measure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Group-by column set. Ordered so that equal sets hash and print identically.
pub type GroupBy = BTreeSet<Arc<str>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOption {
    /// Log the DAG and the table plan before evaluating.
    Explain,
    /// Log every evaluated step with its output size.
    Debug,
    /// Evaluate independent steps of a DAG level on the worker pool.
    Concurrent,
    /// Neither read nor populate the query-step cache.
    NoCache,
    /// Turn per-step evaluation failures into error values instead of failing the query.
    ErrorsAsValues,
}

impl QueryOption {
    /// Whether the option changes what a step computes, and so belongs to its identity.
    pub fn is_step_identity(self) -> bool {
        matches!(self, QueryOption::ErrorsAsValues)
    }
}

/// A request: measures to evaluate for every slice of `group_by` matching `filter`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeQuery {
    pub measures: Vec<Arc<str>>,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default)]
    pub options: BTreeSet<QueryOption>,
    /// Opaque tag separating otherwise identical steps, e.g. per data snapshot.
    #[serde(default)]
    pub custom_marker: Option<Arc<str>>,
}

impl CubeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measure(mut self, name: impl Into<Arc<str>>) -> Self {
        self.measures.push(name.into());
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Filter::and_all([std::mem::take(&mut self.filter), filter]);
        self
    }

    pub fn option(mut self, option: QueryOption) -> Self {
        self.options.insert(option);
        self
    }

    pub fn custom_marker(mut self, marker: impl Into<Arc<str>>) -> Self {
        self.custom_marker = Some(marker.into());
        self
    }

    pub fn has_option(&self, option: QueryOption) -> bool {
        self.options.contains(&option)
    }
}

/// One node of the query DAG: a measure under one filter and group-by.
///
/// Equality and hashing are structural, so identical steps requested by different measures or
/// different queries collapse to one DAG node and one cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryStep {
    pub measure: Arc<Measure>,
    pub filter: Filter,
    pub group_by: GroupBy,
    pub options: BTreeSet<QueryOption>,
    pub custom_marker: Option<Arc<str>>,
}

impl QueryStep {
    pub fn new(
        measure: Arc<Measure>,
        filter: Filter,
        group_by: GroupBy,
        options: &BTreeSet<QueryOption>,
        custom_marker: Option<Arc<str>>,
    ) -> Self {
        Self {
            measure,
            filter,
            group_by,
            options: options
                .iter()
                .copied()
                .filter(|o| o.is_step_identity())
                .collect(),
            custom_marker,
        }
    }

    /// A step for another measure sharing this step's options and marker.
    pub fn derive(&self, measure: Arc<Measure>, filter: Filter, group_by: GroupBy) -> Self {
        Self {
            measure,
            filter,
            group_by,
            options: self.options.clone(),
            custom_marker: self.custom_marker.clone(),
        }
    }

    pub fn errors_as_values(&self) -> bool {
        self.options.contains(&QueryOption::ErrorsAsValues)
    }

    /// Whether two steps only differ by filter and group-by.
    pub fn same_context(&self, other: &QueryStep) -> bool {
        self.measure == other.measure
            && self.options == other.options
            && self.custom_marker == other.custom_marker
    }
}

impl fmt::Display for QueryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] filter={} groupBy=[", self.measure.name(), self.measure.kind(), self.filter)?;
        for (idx, column) in self.group_by.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            f.write_str(column)?;
        }
        f.write_str("]")?;
        if let Some(marker) = &self.custom_marker {
            write!(f, " marker={marker}")?;
        }
        Ok(())
    }
}
