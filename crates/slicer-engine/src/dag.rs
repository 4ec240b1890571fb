use crate::error::{EngineError, EngineResult};
use crate::measure::Measure;
use crate::query::{CubeQuery, GroupBy, QueryStep};
use crate::registry::MeasureResolver;
use ahash::AHashMap;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

pub type StepId = usize;

#[derive(Clone, Debug)]
pub struct StepNode {
    pub step: Arc<QueryStep>,
    /// Underlying steps, in the order the measure kind consumes them.
    pub underlyings: Vec<StepId>,
}

/// The steps needed to answer one query.
///
/// Nodes are stored in topological order: every node comes after all of its underlyings.
#[derive(Debug, Default)]
pub struct QueryStepsDag {
    nodes: Vec<StepNode>,
    index: AHashMap<Arc<QueryStep>, StepId>,
    roots: Vec<(Arc<str>, StepId)>,
}

/// What is left to do once cached steps are accounted for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrunedDag {
    /// Steps to evaluate, underlyings first.
    pub evaluate: Vec<StepId>,
    /// Steps served by the cache.
    pub cached: Vec<StepId>,
    /// Column-generating steps only reachable through cached steps. They are kept because
    /// column validation depends on what they generate.
    pub retained: Vec<StepId>,
}

/// The steps `step` reads, in consumption order.
pub(crate) fn underlying_steps(
    step: &QueryStep,
    resolver: &dyn MeasureResolver,
) -> EngineResult<Vec<QueryStep>> {
    let resolve = |name: &Arc<str>| {
        resolver
            .resolve(name)
            .ok_or_else(|| EngineError::UnknownMeasure(name.to_string()))
    };
    let same_context = |name: &Arc<str>, group_by: &GroupBy| -> EngineResult<QueryStep> {
        Ok(step.derive(resolve(name)?, step.filter.clone(), group_by.clone()))
    };
    Ok(match step.measure.as_ref() {
        Measure::Aggregator { .. } => Vec::new(),
        Measure::Combinator { underlyings, .. } => underlyings
            .iter()
            .map(|name| same_context(name, &step.group_by))
            .collect::<EngineResult<_>>()?,
        Measure::Filtrator {
            underlying, filter, ..
        } => vec![step.derive(
            resolve(underlying)?,
            step.filter.clone().and(filter.clone()),
            step.group_by.clone(),
        )],
        Measure::Unfiltrator {
            underlying,
            columns,
            ..
        } => vec![step.derive(
            resolve(underlying)?,
            step.filter.without_columns(columns),
            step.group_by.clone(),
        )],
        Measure::Shiftor {
            underlying, shift, ..
        } => {
            let measure = resolve(underlying)?;
            vec![
                step.derive(measure.clone(), step.filter.clone(), step.group_by.clone()),
                step.derive(measure, shift.shift_filter(&step.filter), step.group_by.clone()),
            ]
        }
        Measure::Dispatchor {
            underlying,
            decomposition,
            ..
        } => {
            let plan = decomposition.plan(&step.filter, &step.group_by);
            vec![step.derive(resolve(underlying)?, plan.filter, plan.group_by)]
        }
        Measure::Partitionor {
            underlyings,
            partition_by,
            ..
        } => {
            let group_by: GroupBy = step.group_by.union(partition_by).cloned().collect();
            underlyings
                .iter()
                .map(|name| same_context(name, &group_by))
                .collect::<EngineResult<_>>()?
        }
    })
}

impl QueryStepsDag {
    /// Resolve the query's measures recursively into a DAG of steps.
    ///
    /// Unknown measures, cycles and malformed filters are reported here, before anything is
    /// scanned.
    pub fn build(query: &CubeQuery, resolver: &dyn MeasureResolver) -> EngineResult<Self> {
        query.filter.validate()?;
        let mut dag = Self::default();
        let mut path = Vec::new();
        for name in &query.measures {
            let measure = resolver
                .resolve(name)
                .ok_or_else(|| EngineError::UnknownMeasure(name.to_string()))?;
            let step = QueryStep::new(
                measure,
                query.filter.clone(),
                query.group_by.clone(),
                &query.options,
                query.custom_marker.clone(),
            );
            let id = dag.visit(step, resolver, &mut path)?;
            dag.roots.push((name.clone(), id));
        }
        log::debug!(
            "built query DAG: {} measures, {} steps",
            query.measures.len(),
            dag.nodes.len()
        );
        Ok(dag)
    }

    fn visit(
        &mut self,
        step: QueryStep,
        resolver: &dyn MeasureResolver,
        path: &mut Vec<Arc<str>>,
    ) -> EngineResult<StepId> {
        if let Some(id) = self.index.get(&step) {
            return Ok(*id);
        }
        let name = step.measure.name().clone();
        if path.contains(&name) {
            let mut cycle: Vec<String> = path
                .iter()
                .skip_while(|n| **n != name)
                .map(|n| n.to_string())
                .collect();
            cycle.push(name.to_string());
            return Err(EngineError::MeasureCycle { path: cycle });
        }
        step.filter.validate()?;

        path.push(name);
        let mut underlyings = Vec::new();
        for child in underlying_steps(&step, resolver)? {
            underlyings.push(self.visit(child, resolver, path)?);
        }
        path.pop();

        let step = Arc::new(step);
        let id = self.nodes.len();
        self.nodes.push(StepNode {
            step: step.clone(),
            underlyings,
        });
        self.index.insert(step, id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: StepId) -> &StepNode {
        &self.nodes[id]
    }

    pub fn step(&self, id: StepId) -> &Arc<QueryStep> {
        &self.nodes[id].step
    }

    pub fn id_of(&self, step: &QueryStep) -> Option<StepId> {
        self.index.get(step).copied()
    }

    /// Requested measures with their root step, in query order.
    pub fn roots(&self) -> &[(Arc<str>, StepId)] {
        &self.roots
    }

    /// All steps, underlyings first.
    pub fn topological_order(&self) -> impl Iterator<Item = StepId> {
        0..self.nodes.len()
    }

    /// Split the DAG into steps to evaluate and steps the cache already holds.
    ///
    /// Nothing below a cached step is evaluated, except that column-generating steps under it
    /// are retained (not evaluated) so their generated columns stay visible.
    pub fn prune(&self, mut is_cached: impl FnMut(&QueryStep) -> bool) -> PrunedDag {
        let n = self.nodes.len();
        let mut needed = vec![false; n];
        let mut below_cached = vec![false; n];
        for (_, root) in &self.roots {
            needed[*root] = true;
        }
        let mut pruned = PrunedDag::default();
        // Parents always have larger ids than their underlyings.
        for id in (0..n).rev() {
            let node = &self.nodes[id];
            if needed[id] {
                if is_cached(node.step.as_ref()) {
                    pruned.cached.push(id);
                    node.underlyings.iter().for_each(|u| below_cached[*u] = true);
                } else {
                    pruned.evaluate.push(id);
                    node.underlyings.iter().for_each(|u| needed[*u] = true);
                }
            } else if below_cached[id] {
                if !node.step.measure.generated_columns().is_empty() {
                    pruned.retained.push(id);
                }
                node.underlyings.iter().for_each(|u| below_cached[*u] = true);
            }
        }
        pruned.evaluate.reverse();
        pruned.cached.reverse();
        pruned.retained.reverse();
        pruned
    }

    /// Group `ids` into levels: a step's level is one more than its deepest underlying within
    /// `ids`. Steps of one level are independent of each other.
    pub fn levels(&self, ids: &[StepId]) -> Vec<Vec<StepId>> {
        let mut level_of: AHashMap<StepId, usize> = AHashMap::with_capacity(ids.len());
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        let mut levels: Vec<Vec<StepId>> = Vec::new();
        for id in sorted {
            let level = self.nodes[id]
                .underlyings
                .iter()
                .filter_map(|u| level_of.get(u))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id);
        }
        levels
    }

    /// Columns generated by the given steps.
    pub fn generated_columns<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a StepId>,
    ) -> BTreeSet<Arc<str>> {
        ids.into_iter()
            .flat_map(|id| self.nodes[*id].step.measure.generated_columns())
            .collect()
    }

    /// Render the DAG as an indented tree per requested measure.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        let mut printed = vec![false; self.nodes.len()];
        for (name, root) in &self.roots {
            let _ = writeln!(out, "{name}:");
            self.explain_node(*root, 1, &mut printed, &mut out);
        }
        out
    }

    fn explain_node(&self, id: StepId, depth: usize, printed: &mut [bool], out: &mut String) {
        let indent = "  ".repeat(depth);
        if printed[id] {
            let _ = writeln!(out, "{indent}#{id} (see above)");
            return;
        }
        printed[id] = true;
        let _ = writeln!(out, "{indent}#{id} {}", self.nodes[id].step);
        for u in &self.nodes[id].underlyings {
            self.explain_node(*u, depth + 1, printed, out);
        }
    }
}
