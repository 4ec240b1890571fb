use crate::cache::{CachePolicy, QueryStepCache};
use crate::dag::{PrunedDag, QueryStepsDag, StepId};
use crate::error::{EngineError, EngineResult};
use crate::evaluator::evaluate_levels;
use crate::measure::Measure;
use crate::optimizer::{
    evaluate_induced, split_induced, table_queries, OptimizerStrategy, SplitTableQueries,
    TableQueryPlan,
};
use crate::pod::{CancellationToken, Executor, QueryPod};
use crate::query::{CubeQuery, QueryOption, QueryStep};
use crate::registry::MeasureResolver;
use crate::table::{TableQuery, TableWrapper, ROW_COUNT_COLUMN};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use slicer_columnar::{Slice, SliceColumn, Value};
use std::fmt::Write as _;
use std::sync::Arc;

/// Engine-wide settings. The `Default` impl is the recommended configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub optimizer: OptimizerStrategy,
    pub cache: CachePolicy,
    /// Evaluate on the worker pool even without [`QueryOption::Concurrent`].
    pub concurrent_by_default: bool,
}

/// Counters of one query execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryStatistics {
    /// Physical table queries issued.
    pub table_scans: usize,
    /// Leaf steps derived from another leaf instead of being scanned.
    pub induced: usize,
    /// Steps served by the query-step cache.
    pub cache_hits: usize,
    /// Non-leaf steps evaluated.
    pub steps_evaluated: usize,
}

/// Answer to a [`CubeQuery`]: one sorted column per requested measure, in query order.
#[derive(Clone, Debug)]
pub struct QueryResult {
    columns: Vec<(Arc<str>, SliceColumn)>,
    statistics: QueryStatistics,
}

impl QueryResult {
    pub fn measure(&self, name: &str) -> Option<&SliceColumn> {
        self.columns
            .iter()
            .find(|(measure, _)| measure.as_ref() == name)
            .map(|(_, column)| column)
    }

    /// Value of `name` at `slice`; null when the measure or the slice is absent.
    pub fn value(&self, name: &str, slice: &Slice) -> Value {
        self.measure(name)
            .map_or(Value::Null, |column| column.get_value(slice))
    }

    pub fn columns(&self) -> impl Iterator<Item = (&Arc<str>, &SliceColumn)> + '_ {
        self.columns.iter().map(|(name, column)| (name, column))
    }

    pub fn statistics(&self) -> QueryStatistics {
        self.statistics
    }
}

/// Entry point: evaluates cube queries against one table and one measure registry.
#[derive(Debug)]
pub struct CubeEngine {
    table: Arc<dyn TableWrapper>,
    measures: Arc<dyn MeasureResolver>,
    options: EngineOptions,
    cache: Arc<dyn QueryStepCache>,
}

impl CubeEngine {
    pub fn new(table: Arc<dyn TableWrapper>, measures: Arc<dyn MeasureResolver>) -> Self {
        Self::with_options(table, measures, EngineOptions::default())
    }

    pub fn with_options(
        table: Arc<dyn TableWrapper>,
        measures: Arc<dyn MeasureResolver>,
        options: EngineOptions,
    ) -> Self {
        Self {
            table,
            measures,
            cache: options.cache.build(),
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn table(&self) -> &Arc<dyn TableWrapper> {
        &self.table
    }

    pub fn execute(&self, query: &CubeQuery) -> EngineResult<QueryResult> {
        self.execute_with_token(query, CancellationToken::new())
    }

    /// Execute `query`, giving up between steps once `token` is cancelled.
    pub fn execute_with_token(
        &self,
        query: &CubeQuery,
        token: CancellationToken,
    ) -> EngineResult<QueryResult> {
        let dag = QueryStepsDag::build(query, self.measures.as_ref())?;
        let cache = (!query.has_option(QueryOption::NoCache)).then_some(&*self.cache);

        let mut hits: AHashMap<QueryStep, Arc<SliceColumn>> = AHashMap::new();
        let pruned = dag.prune(|step| match cache.and_then(|cache| cache.get(step)) {
            Some(column) => {
                hits.insert(step.clone(), column);
                true
            }
            None => false,
        });
        self.validate_columns(query, &dag, &pruned)?;

        let executor = if query.has_option(QueryOption::Concurrent) || self.options.concurrent_by_default
        {
            Executor::Pool
        } else {
            Executor::Direct
        };
        let pod = QueryPod::new(token, executor, query.has_option(QueryOption::Debug));

        let mut columns: AHashMap<StepId, Arc<SliceColumn>> = AHashMap::new();
        for id in &pruned.cached {
            if let Some(column) = hits.remove(&**dag.step(*id)) {
                pod.record_cache_hit();
                columns.insert(*id, column);
            }
        }

        let (leaves, rest): (Vec<StepId>, Vec<StepId>) = pruned
            .evaluate
            .iter()
            .partition(|id| dag.step(**id).measure.is_aggregator());
        let split = split_induced(
            &leaves.iter().map(|id| dag.step(*id).clone()).collect::<Vec<_>>(),
            self.options.optimizer,
        );
        let plans = table_queries(&split)?;
        if query.has_option(QueryOption::Explain) {
            log::info!("{}", render_explain(&dag, &plans));
        }

        pod.check_cancelled()?;
        self.evaluate_leaves(&dag, &split, &plans, &mut columns, cache, &pod)?;
        evaluate_levels(&dag, &rest, &mut columns, &pod, cache)?;

        let mut results = Vec::with_capacity(dag.roots().len());
        for (name, id) in dag.roots() {
            let column = columns.get(id).ok_or_else(|| {
                EngineError::Unsupported(format!("measure {name} produced no column"))
            })?;
            results.push((name.clone(), column.sorted()?));
        }
        let statistics = QueryStatistics {
            table_scans: plans.len(),
            induced: split.induceds.len(),
            cache_hits: pod.cache_hits(),
            steps_evaluated: pod.steps_evaluated(),
        };
        log::debug!("query done: {statistics:?}");
        Ok(QueryResult {
            columns: results,
            statistics,
        })
    }

    /// The DAG and the physical scans `query` would run, without running them.
    pub fn explain(&self, query: &CubeQuery) -> EngineResult<String> {
        let dag = QueryStepsDag::build(query, self.measures.as_ref())?;
        let leaves: Vec<Arc<QueryStep>> = dag
            .topological_order()
            .map(|id| dag.step(id))
            .filter(|step| step.measure.is_aggregator())
            .cloned()
            .collect();
        let plans = table_queries(&split_induced(&leaves, self.options.optimizer))?;
        Ok(render_explain(&dag, &plans))
    }

    pub fn invalidate_cache(&self) {
        log::info!("invalidating {} cached steps", self.cache.len());
        self.cache.invalidate_all();
    }

    /// Query columns must exist in the table or be generated by a dispatchor of the DAG; leaf
    /// steps must only reference table columns.
    fn validate_columns(
        &self,
        query: &CubeQuery,
        dag: &QueryStepsDag,
        pruned: &PrunedDag,
    ) -> EngineResult<()> {
        let unknown = |column: &str| EngineError::UnknownColumn {
            column: column.to_string(),
        };
        let generated = dag.generated_columns(
            pruned
                .evaluate
                .iter()
                .chain(&pruned.cached)
                .chain(&pruned.retained),
        );
        for column in query.group_by.iter().chain(&query.filter.columns()) {
            if !self.table.has_column(column) && !generated.contains(column) {
                return Err(unknown(column));
            }
        }
        for id in &pruned.evaluate {
            let step = dag.step(*id);
            let Measure::Aggregator { column, .. } = step.measure.as_ref() else {
                continue;
            };
            if column.as_ref() != ROW_COUNT_COLUMN && !self.table.has_column(column) {
                return Err(unknown(column));
            }
            for column in step.group_by.iter().chain(&step.filter.columns()) {
                if !self.table.has_column(column) {
                    return Err(unknown(column));
                }
            }
        }
        Ok(())
    }

    /// Scan the inducers, derive the induced steps, and publish every leaf column.
    fn evaluate_leaves(
        &self,
        dag: &QueryStepsDag,
        split: &SplitTableQueries,
        plans: &[TableQueryPlan],
        columns: &mut AHashMap<StepId, Arc<SliceColumn>>,
        cache: Option<&dyn QueryStepCache>,
        pod: &QueryPod,
    ) -> EngineResult<()> {
        let mut scanned: Vec<SliceColumn> = split.inducers.iter().map(|_| SliceColumn::new()).collect();
        for plan in plans {
            pod.check_cancelled()?;
            self.scan(plan, split, &mut scanned)?;
        }
        let scanned: Vec<Arc<SliceColumn>> = scanned.into_iter().map(Arc::new).collect();

        let mut publish = |step: &QueryStep, column: Arc<SliceColumn>| {
            if let Some(id) = dag.id_of(step) {
                if let Some(cache) = cache {
                    cache.insert(step, column.clone());
                }
                columns.insert(id, column);
            }
        };
        for (inducer, column) in split.inducers.iter().zip(&scanned) {
            publish(inducer, column.clone());
        }
        for (induced, edge) in split.induceds.iter().zip(&split.edges) {
            pod.check_cancelled()?;
            let inducer = &split.inducers[*edge];
            let column = evaluate_induced(&scanned[*edge], inducer, induced)
                .map_err(|err| err.in_step(induced))?;
            publish(induced, Arc::new(column));
        }
        Ok(())
    }

    fn scan(
        &self,
        plan: &TableQueryPlan,
        split: &SplitTableQueries,
        outputs: &mut [SliceColumn],
    ) -> EngineResult<()> {
        let mergers: Vec<_> = plan
            .query
            .aggregates
            .iter()
            .map(|aggregate| aggregate.aggregation.merger())
            .collect();
        let mut rows = 0usize;
        for row in self.table.stream_rows(&plan.query)? {
            let row = row?;
            if row.values.len() != plan.inducers.len() {
                return Err(EngineError::TableScan {
                    table: self.table.name().to_string(),
                    message: format!(
                        "row has {} values for {} aggregates",
                        row.values.len(),
                        plan.inducers.len()
                    ),
                });
            }
            for ((inducer, value), merger) in plan.inducers.iter().zip(row.values).zip(&mergers) {
                let output = &mut outputs[*inducer];
                if let Err(err) = output.merge(&row.slice, value, merger) {
                    let step = &split.inducers[*inducer];
                    match EngineError::from(err) {
                        EngineError::Type(message) if step.errors_as_values() => {
                            log::warn!("{step}: {} evaluates to an error: {message}", row.slice);
                            output.put(&row.slice, Value::Error(message.into()))?;
                        }
                        err => return Err(err.in_step(step)),
                    }
                }
            }
            rows += 1;
        }
        log::debug!(
            "scanned {}: {rows} rows for {} aggregates",
            describe(&plan.query),
            plan.inducers.len()
        );
        Ok(())
    }
}

fn describe(query: &TableQuery) -> String {
    let mut out = format!("filter={} groupBy=[", query.filter);
    for (idx, column) in query.group_by.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        out.push_str(column);
    }
    out.push_str("] aggregates=[");
    for (idx, aggregate) in query.aggregates.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}({})", aggregate.aggregation.name(), aggregate.column);
    }
    out.push(']');
    out
}

fn render_explain(dag: &QueryStepsDag, plans: &[TableQueryPlan]) -> String {
    let mut out = dag.explain();
    let _ = writeln!(out, "table queries: {}", plans.len());
    for plan in plans {
        let _ = writeln!(out, "  {}", describe(&plan.query));
    }
    out
}
