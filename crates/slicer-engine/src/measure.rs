use crate::aggregation::Aggregation;
use crate::combination::Combination;
use crate::decomposition::Decomposition;
use crate::filter::Filter;
use crate::shift::Shift;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A node definition of the measure DAG.
///
/// Each kind carries its own payload; the evaluator dispatches on the variant. Underlyings are
/// referenced by name and resolved through a
/// [`MeasureResolver`](crate::registry::MeasureResolver) when the DAG is built.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measure {
    /// Table-facing leaf: aggregates `column` of the source rows. `*` counts rows.
    Aggregator {
        name: Arc<str>,
        column: Arc<str>,
        aggregation: Aggregation,
    },
    Combinator {
        name: Arc<str>,
        underlyings: Vec<Arc<str>>,
        combination: Combination,
    },
    /// The underlying under an additional filter.
    Filtrator {
        name: Arc<str>,
        underlying: Arc<str>,
        filter: Filter,
    },
    /// The underlying with the query filter on `columns` lifted.
    Unfiltrator {
        name: Arc<str>,
        underlying: Arc<str>,
        columns: BTreeSet<Arc<str>>,
    },
    Shiftor {
        name: Arc<str>,
        underlying: Arc<str>,
        shift: Shift,
    },
    Dispatchor {
        name: Arc<str>,
        underlying: Arc<str>,
        decomposition: Decomposition,
        aggregation: Aggregation,
    },
    /// Combines the underlyings at a finer grain (`group_by ∪ partition_by`), then rolls the
    /// per-partition results up with `aggregation`.
    Partitionor {
        name: Arc<str>,
        underlyings: Vec<Arc<str>>,
        partition_by: BTreeSet<Arc<str>>,
        combination: Combination,
        aggregation: Aggregation,
    },
}

fn names<I, S>(items: I) -> Vec<Arc<str>>
where
    I: IntoIterator<Item = S>,
    S: Into<Arc<str>>,
{
    items.into_iter().map(Into::into).collect()
}

impl Measure {
    pub fn aggregator(
        name: impl Into<Arc<str>>,
        column: impl Into<Arc<str>>,
        aggregation: Aggregation,
    ) -> Self {
        Measure::Aggregator {
            name: name.into(),
            column: column.into(),
            aggregation,
        }
    }

    pub fn combinator<I, S>(name: impl Into<Arc<str>>, underlyings: I, combination: Combination) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Measure::Combinator {
            name: name.into(),
            underlyings: names(underlyings),
            combination,
        }
    }

    pub fn filtrator(
        name: impl Into<Arc<str>>,
        underlying: impl Into<Arc<str>>,
        filter: Filter,
    ) -> Self {
        Measure::Filtrator {
            name: name.into(),
            underlying: underlying.into(),
            filter,
        }
    }

    pub fn unfiltrator<I, S>(name: impl Into<Arc<str>>, underlying: impl Into<Arc<str>>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Measure::Unfiltrator {
            name: name.into(),
            underlying: underlying.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shiftor(name: impl Into<Arc<str>>, underlying: impl Into<Arc<str>>, shift: Shift) -> Self {
        Measure::Shiftor {
            name: name.into(),
            underlying: underlying.into(),
            shift,
        }
    }

    pub fn dispatchor(
        name: impl Into<Arc<str>>,
        underlying: impl Into<Arc<str>>,
        decomposition: Decomposition,
        aggregation: Aggregation,
    ) -> Self {
        Measure::Dispatchor {
            name: name.into(),
            underlying: underlying.into(),
            decomposition,
            aggregation,
        }
    }

    pub fn partitionor<I, S, P, Q>(
        name: impl Into<Arc<str>>,
        underlyings: I,
        partition_by: P,
        combination: Combination,
        aggregation: Aggregation,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
        P: IntoIterator<Item = Q>,
        Q: Into<Arc<str>>,
    {
        Measure::Partitionor {
            name: name.into(),
            underlyings: names(underlyings),
            partition_by: partition_by.into_iter().map(Into::into).collect(),
            combination,
            aggregation,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        match self {
            Measure::Aggregator { name, .. }
            | Measure::Combinator { name, .. }
            | Measure::Filtrator { name, .. }
            | Measure::Unfiltrator { name, .. }
            | Measure::Shiftor { name, .. }
            | Measure::Dispatchor { name, .. }
            | Measure::Partitionor { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Measure::Aggregator { .. } => "aggregator",
            Measure::Combinator { .. } => "combinator",
            Measure::Filtrator { .. } => "filtrator",
            Measure::Unfiltrator { .. } => "unfiltrator",
            Measure::Shiftor { .. } => "shiftor",
            Measure::Dispatchor { .. } => "dispatchor",
            Measure::Partitionor { .. } => "partitionor",
        }
    }

    pub fn is_aggregator(&self) -> bool {
        matches!(self, Measure::Aggregator { .. })
    }

    /// Names of the measures this one reads, in declaration order.
    pub fn underlying_names(&self) -> Vec<&Arc<str>> {
        match self {
            Measure::Aggregator { .. } => Vec::new(),
            Measure::Combinator { underlyings, .. } | Measure::Partitionor { underlyings, .. } => {
                underlyings.iter().collect()
            }
            Measure::Filtrator { underlying, .. }
            | Measure::Unfiltrator { underlying, .. }
            | Measure::Shiftor { underlying, .. }
            | Measure::Dispatchor { underlying, .. } => vec![underlying],
        }
    }

    /// Group-by columns this measure makes available downstream without the table having them.
    pub fn generated_columns(&self) -> Vec<Arc<str>> {
        match self {
            Measure::Dispatchor { decomposition, .. } => decomposition.generated_columns(),
            _ => Vec::new(),
        }
    }

    /// The aggregation used to roll this measure's values up, when it has one.
    pub fn aggregation(&self) -> Option<Aggregation> {
        match self {
            Measure::Aggregator { aggregation, .. }
            | Measure::Dispatchor { aggregation, .. }
            | Measure::Partitionor { aggregation, .. } => Some(*aggregation),
            _ => None,
        }
    }
}
