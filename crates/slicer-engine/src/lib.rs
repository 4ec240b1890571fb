//! In-memory OLAP query engine over a DAG of measures.
//!
//! A [`CubeQuery`] names measures, a filter and a group-by. The engine resolves the measures
//! into a [`QueryStepsDag`] of structurally deduplicated [`QueryStep`]s, lets the optimizer
//! induce fine leaf steps from coarser scans, streams the remaining table queries through a
//! [`TableWrapper`], and evaluates the DAG bottom-up by merging underlying
//! [`SliceColumn`](slicer_columnar::SliceColumn)s slice by slice.

#![forbid(unsafe_code)]

mod aggregation;
mod cache;
mod combination;
mod dag;
mod decomposition;
mod engine;
mod error;
mod evaluator;
mod filter;
mod measure;
mod merge;
mod optimizer;
mod parallel;
mod pod;
mod query;
mod registry;
mod shift;
mod table;

pub use crate::engine::{CubeEngine, EngineOptions, QueryResult, QueryStatistics};
pub use crate::error::{EngineError, EngineResult};
pub use crate::measure::Measure;
pub use crate::query::{CubeQuery, GroupBy, QueryOption, QueryStep};
pub use crate::registry::{MeasureForest, MeasureResolver};

pub use crate::aggregation::{Aggregation, AggregationMerger};
pub use crate::combination::Combination;
pub use crate::decomposition::{Decomposition, DispatchPlan};
pub use crate::filter::{ColumnFilter, CompareOp, Filter, Matcher};
pub use crate::shift::Shift;

pub use crate::cache::{BoundedCache, CachePolicy, NoCache, QueryStepCache, UnboundedCache};
pub use crate::dag::{PrunedDag, QueryStepsDag, StepId, StepNode};
pub use crate::evaluator::evaluate_step;
pub use crate::merge::{MergedSlice, UnderlyingMerge};
pub use crate::optimizer::{
    can_induce, evaluate_induced, split_induced, table_queries, OptimizerStrategy,
    SplitTableQueries, TableQueryPlan,
};
pub use crate::pod::{CancellationToken, Executor, QueryPod};
pub use crate::table::{
    InMemoryTable, RowStream, TableAggregate, TableQuery, TableRow, TableWrapper,
    ROW_COUNT_COLUMN,
};

pub use slicer_columnar::{Coordinate, Slice, SliceColumn, Value};
