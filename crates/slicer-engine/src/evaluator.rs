use crate::aggregation::Aggregation;
use crate::cache::QueryStepCache;
use crate::combination::Combination;
use crate::dag::{QueryStepsDag, StepId};
use crate::decomposition::Decomposition;
use crate::error::{EngineError, EngineResult};
use crate::measure::Measure;
use crate::merge::UnderlyingMerge;
use crate::pod::QueryPod;
use crate::query::QueryStep;
use crate::shift::Shift;
use ahash::{AHashMap, AHashSet};
use slicer_columnar::{Slice, SliceColumn, Value, ValueProvider};
use smallvec::SmallVec;
use std::sync::Arc;

/// Output column of one step under construction.
///
/// Failures are either attributed to the step and propagated, or, when the step evaluates
/// errors as values, written as an error value at the failing slice.
struct StepWriter<'s> {
    step: &'s QueryStep,
    out: SliceColumn,
}

impl<'s> StepWriter<'s> {
    fn new(step: &'s QueryStep) -> Self {
        Self {
            step,
            out: SliceColumn::new(),
        }
    }

    fn put(&mut self, slice: &Slice, value: EngineResult<Value>) -> EngineResult<()> {
        match value {
            Ok(value) => {
                self.out
                    .put(slice, value)
                    .map_err(|err| EngineError::from(err).in_step(self.step))
            }
            Err(err) => self.put_error(slice, err),
        }
    }

    /// Roll `value` into `slice` with `aggregation`.
    fn merge(&mut self, slice: &Slice, value: Value, aggregation: Aggregation) -> EngineResult<()> {
        match self.out.merge(slice, value, &aggregation.merger()) {
            Ok(()) => Ok(()),
            Err(err) => match EngineError::from(err) {
                err @ EngineError::Type(_) => self.put_error(slice, err),
                err => Err(err.in_step(self.step)),
            },
        }
    }

    fn put_error(&mut self, slice: &Slice, err: EngineError) -> EngineResult<()> {
        if !self.step.errors_as_values() || err.is_cancellation() {
            return Err(err.in_step(self.step));
        }
        log::warn!("{}: {slice} evaluates to an error: {err}", self.step);
        self.out
            .put(slice, Value::Error(err.to_string().into()))
            .map_err(|err| EngineError::from(err).in_step(self.step))
    }

    fn finish(self) -> SliceColumn {
        self.out
    }
}

fn expect_inputs(step: &QueryStep, inputs: &[Arc<SliceColumn>], expected: usize) -> EngineResult<()> {
    if inputs.len() != expected {
        return Err(EngineError::Unsupported(format!(
            "{step} expects {expected} underlying columns, got {}",
            inputs.len()
        )));
    }
    Ok(())
}

/// Evaluate a non-leaf step from the columns of its underlyings, in DAG edge order.
pub fn evaluate_step(step: &QueryStep, inputs: &[Arc<SliceColumn>]) -> EngineResult<Arc<SliceColumn>> {
    let column = match step.measure.as_ref() {
        Measure::Aggregator { .. } => {
            return Err(EngineError::Unsupported(format!(
                "{step} is produced by a table scan"
            )))
        }
        Measure::Filtrator { .. } | Measure::Unfiltrator { .. } => {
            expect_inputs(step, inputs, 1)?;
            // The underlying already evaluated under the adjusted filter.
            return Ok(inputs[0].clone());
        }
        Measure::Combinator { combination, .. } => combine(step, inputs, combination)?,
        Measure::Shiftor { shift, .. } => {
            expect_inputs(step, inputs, 2)?;
            shifted(step, &inputs[0], &inputs[1], shift)?
        }
        Measure::Dispatchor {
            decomposition,
            aggregation,
            ..
        } => {
            expect_inputs(step, inputs, 1)?;
            dispatch(step, &inputs[0], decomposition, *aggregation)?
        }
        Measure::Partitionor {
            combination,
            aggregation,
            ..
        } => partition(step, inputs, combination, *aggregation)?,
    };
    Ok(Arc::new(column))
}

fn legs(inputs: &[Arc<SliceColumn>]) -> UnderlyingMerge<'_> {
    UnderlyingMerge::new(inputs.iter().map(|column| &**column))
}

fn combine(
    step: &QueryStep,
    inputs: &[Arc<SliceColumn>],
    combination: &Combination,
) -> EngineResult<SliceColumn> {
    let mut writer = StepWriter::new(step);
    let mut values: SmallVec<[Value; 4]> = SmallVec::new();
    for merged in legs(inputs) {
        values.clear();
        values.extend(merged.values.iter().map(ValueProvider::to_value));
        writer.put(merged.slice, combination.combine(merged.slice, &values))?;
    }
    Ok(writer.finish())
}

/// Every slice of the unshifted underlying, valued from the shifted one.
fn shifted(
    step: &QueryStep,
    universe: &SliceColumn,
    values: &SliceColumn,
    shift: &Shift,
) -> EngineResult<SliceColumn> {
    let mut writer = StepWriter::new(step);
    for (slice, _) in universe.iter() {
        let value = values.get_value(&shift.shift_slice(slice));
        writer.put(slice, Ok(value))?;
    }
    Ok(writer.finish())
}

/// Fan every underlying contribution out, re-check the deferred filter, project and roll up.
///
/// A contribution reaches each projected output slice at most once, however many fanned-out
/// slices project onto it.
fn dispatch(
    step: &QueryStep,
    input: &SliceColumn,
    decomposition: &Decomposition,
    aggregation: Aggregation,
) -> EngineResult<SliceColumn> {
    let plan = decomposition.plan(&step.filter, &step.group_by);
    let candidates = decomposition.candidates(input, &plan.deferred);
    let mut writer = StepWriter::new(step);
    let mut reached: AHashSet<Slice> = AHashSet::new();
    let mut contributions = 0usize;
    for (slice, key) in input.iter() {
        let value = input.read_value(key);
        reached.clear();
        for target in decomposition.fan_out(slice, &candidates) {
            if !plan.deferred.matches(&target) {
                continue;
            }
            let projected = target.retain_columns(|c| step.group_by.contains(c));
            if reached.insert(projected.clone()) {
                contributions += 1;
                writer.merge(&projected, value.clone(), aggregation)?;
            }
        }
    }
    log::trace!(
        "{step}: {} {} slices fanned out to {contributions} contributions over {} candidates",
        input.len(),
        decomposition.name(),
        candidates.len()
    );
    Ok(writer.finish())
}

/// Combine at the partition grain, then roll up to the step's group-by.
fn partition(
    step: &QueryStep,
    inputs: &[Arc<SliceColumn>],
    combination: &Combination,
    aggregation: Aggregation,
) -> EngineResult<SliceColumn> {
    let mut writer = StepWriter::new(step);
    let mut values: SmallVec<[Value; 4]> = SmallVec::new();
    for merged in legs(inputs) {
        values.clear();
        values.extend(merged.values.iter().map(ValueProvider::to_value));
        let projected = merged.slice.retain_columns(|c| step.group_by.contains(c));
        match combination.combine(merged.slice, &values) {
            Ok(value) => writer.merge(&projected, value, aggregation)?,
            Err(err) => writer.put_error(&projected, err)?,
        }
    }
    Ok(writer.finish())
}

/// Evaluate `ids` level by level on top of the columns already in `columns`.
///
/// Steps of one level run on the pod's executor. An underlying column is dropped once its last
/// dependent is evaluated, unless it answers one of the requested measures.
pub(crate) fn evaluate_levels(
    dag: &QueryStepsDag,
    ids: &[StepId],
    columns: &mut AHashMap<StepId, Arc<SliceColumn>>,
    pod: &QueryPod,
    cache: Option<&dyn QueryStepCache>,
) -> EngineResult<()> {
    let roots: AHashSet<StepId> = dag.roots().iter().map(|(_, id)| *id).collect();
    let mut remaining: AHashMap<StepId, usize> = AHashMap::new();
    for id in ids {
        for u in &dag.node(*id).underlyings {
            *remaining.entry(*u).or_default() += 1;
        }
    }

    for level in dag.levels(ids) {
        let available = &*columns;
        let results = pod.map(&level, |id| -> EngineResult<Arc<SliceColumn>> {
            pod.check_cancelled()?;
            let node = dag.node(*id);
            let inputs = node
                .underlyings
                .iter()
                .map(|u| {
                    available.get(u).cloned().ok_or_else(|| {
                        EngineError::Unsupported(format!(
                            "underlying #{u} of {} was not evaluated",
                            node.step
                        ))
                    })
                })
                .collect::<EngineResult<Vec<_>>>()?;
            let mut compute = || {
                pod.record_step();
                evaluate_step(&node.step, &inputs)
            };
            let column = match cache {
                Some(cache) => cache.get_or_compute(&node.step, &mut compute),
                None => compute(),
            }
            .map_err(|err| err.in_step(&node.step))?;
            if pod.debug() {
                log::info!("#{id} {} -> {} slices", node.step, column.len());
            } else {
                log::debug!("#{id} {} -> {} slices", node.step, column.len());
            }
            Ok(column)
        });

        for (id, result) in level.iter().zip(results) {
            columns.insert(*id, result?);
        }
        for id in &level {
            for u in &dag.node(*id).underlyings {
                let Some(count) = remaining.get_mut(u) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 && !roots.contains(u) {
                    columns.remove(u);
                }
            }
        }
    }
    Ok(())
}
