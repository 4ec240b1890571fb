use crate::aggregation::AggregationMerger;
use crate::error::{EngineError, EngineResult};
use crate::filter::Filter;
use crate::measure::Measure;
use crate::query::{GroupBy, QueryStep};
use crate::table::{TableAggregate, TableQuery};
use serde::{Deserialize, Serialize};
use slicer_columnar::SliceColumn;
use std::sync::Arc;

/// How leaf steps are grouped into physical scans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerStrategy {
    /// Every leaf step is scanned on its own.
    None,
    /// One synthetic wide scan per aggregator, from which every leaf of that aggregator is
    /// induced.
    SinglePerAggregator,
    /// Induce every leaf that some other leaf can produce; scan the rest.
    #[default]
    PerEquivalenceClass,
}

/// Partition of leaf steps into physically scanned inducers and locally derived induceds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitTableQueries {
    pub inducers: Vec<Arc<QueryStep>>,
    pub induceds: Vec<Arc<QueryStep>>,
    /// `induceds[i]` is derived from `inducers[edges[i]]`.
    pub edges: Vec<usize>,
}

/// A physical scan and the inducers its aggregates feed, one per aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableQueryPlan {
    pub query: TableQuery,
    pub inducers: Vec<usize>,
}

/// Whether `induced` can be computed from the result of `inducer` without touching the table.
///
/// Holds iff both are the same measure in the same context, the induced group-by is a subset of
/// the inducer's, every induced conjunct on a column the inducer does not group by appears
/// identically in the inducer (the rest is re-filtered locally), and the induced filter implies
/// every inducer conjunct, so the inducer saw a superset of the rows.
pub fn can_induce(inducer: &QueryStep, induced: &QueryStep) -> bool {
    if !inducer.same_context(induced) || !induced.group_by.is_subset(&inducer.group_by) {
        return false;
    }
    let inducer_conjuncts = inducer.filter.conjuncts();
    let outside_group_by_identical = induced.filter.conjuncts().iter().all(|conjunct| {
        conjunct.columns().is_subset(&inducer.group_by) || inducer_conjuncts.contains(conjunct)
    });
    outside_group_by_identical
        && inducer_conjuncts
            .iter()
            .all(|conjunct| induced.filter.implies(conjunct))
}

fn width(step: &QueryStep) -> (std::cmp::Reverse<usize>, usize) {
    (
        std::cmp::Reverse(step.group_by.len()),
        step.filter.conjuncts().len(),
    )
}

/// Elect inducers among the leaf steps and attach every other leaf to one of them.
pub fn split_induced(steps: &[Arc<QueryStep>], strategy: OptimizerStrategy) -> SplitTableQueries {
    let mut split = SplitTableQueries::default();
    match strategy {
        OptimizerStrategy::None => {
            split.inducers = steps.to_vec();
        }
        OptimizerStrategy::PerEquivalenceClass => {
            // Widest group-by first, then fewest conjuncts. Conjunct count only approximates the
            // laxest filter, so a newly elected inducer also absorbs the classes it covers.
            let mut ordered: Vec<&Arc<QueryStep>> = steps.iter().collect();
            ordered.sort_by_cached_key(|s| width(s));
            let mut classes: Vec<(Arc<QueryStep>, Vec<Arc<QueryStep>>)> = Vec::new();
            for step in ordered {
                if let Some((_, members)) = classes.iter_mut().find(|(i, _)| can_induce(i, step)) {
                    members.push(step.clone());
                    continue;
                }
                let mut members = Vec::new();
                classes.retain(|(inducer, induced)| {
                    let covered = can_induce(step, inducer)
                        && induced.iter().all(|member| can_induce(step, member));
                    if covered {
                        members.push(inducer.clone());
                        members.extend(induced.iter().cloned());
                    }
                    !covered
                });
                classes.push((step.clone(), members));
            }
            for (inducer, members) in classes {
                let idx = split.inducers.len();
                split.inducers.push(inducer);
                split.edges.extend(std::iter::repeat(idx).take(members.len()));
                split.induceds.extend(members);
            }
        }
        OptimizerStrategy::SinglePerAggregator => {
            let mut classes: Vec<Vec<&Arc<QueryStep>>> = Vec::new();
            for step in steps {
                match classes.iter_mut().find(|c| c[0].same_context(step)) {
                    Some(class) => class.push(step),
                    None => classes.push(vec![step]),
                }
            }
            for class in classes {
                let wide = Arc::new(widest_inducer(&class));
                let inducer = match class.iter().find(|s| ***s == wide) {
                    Some(member) => (*member).clone(),
                    None => wide,
                };
                let inducer_idx = split.inducers.len();
                split.inducers.push(inducer.clone());
                for step in class {
                    if Arc::ptr_eq(step, &inducer) || **step == *inducer {
                        continue;
                    }
                    if can_induce(&inducer, step) {
                        split.induceds.push(step.clone());
                        split.edges.push(inducer_idx);
                    } else {
                        split.inducers.push(step.clone());
                    }
                }
            }
        }
    }
    log::debug!(
        "optimizer {strategy:?}: {} inducers, {} induced",
        split.inducers.len(),
        split.induceds.len()
    );
    split
}

/// A synthetic step covering every member: the OR of their filters, grouped by everything they
/// group or filter by.
fn widest_inducer(class: &[&Arc<QueryStep>]) -> QueryStep {
    let filter = Filter::or_all(class.iter().map(|s| s.filter.clone()));
    let mut group_by = GroupBy::new();
    for step in class {
        group_by.extend(step.group_by.iter().cloned());
        group_by.extend(step.filter.columns());
    }
    class[0].derive(class[0].measure.clone(), filter, group_by)
}

/// Pack inducers sharing a filter, group-by and context into one physical scan.
pub fn table_queries(split: &SplitTableQueries) -> EngineResult<Vec<TableQueryPlan>> {
    let mut plans: Vec<(Arc<QueryStep>, TableQueryPlan)> = Vec::new();
    for (idx, inducer) in split.inducers.iter().enumerate() {
        let Measure::Aggregator {
            column,
            aggregation,
            ..
        } = inducer.measure.as_ref()
        else {
            return Err(EngineError::Unsupported(format!(
                "table query for non-aggregator step {inducer}"
            )));
        };
        let aggregate = TableAggregate {
            column: column.clone(),
            aggregation: *aggregation,
        };
        let shared = plans.iter_mut().find(|(first, _)| {
            first.filter == inducer.filter
                && first.group_by == inducer.group_by
                && first.options == inducer.options
                && first.custom_marker == inducer.custom_marker
        });
        match shared {
            Some((_, plan)) => {
                plan.query.aggregates.push(aggregate);
                plan.inducers.push(idx);
            }
            None => plans.push((
                inducer.clone(),
                TableQueryPlan {
                    query: TableQuery {
                        filter: inducer.filter.clone(),
                        group_by: inducer.group_by.clone(),
                        aggregates: vec![aggregate],
                    },
                    inducers: vec![idx],
                },
            )),
        }
    }
    Ok(plans.into_iter().map(|(_, plan)| plan).collect())
}

/// Derive the column of `induced` from the column of its inducer.
///
/// Induced conjuncts over the inducer's group-by are re-checked on each slice (the others were
/// already applied by the scan), then slices are projected to the induced group-by and rolled up
/// with the measure's aggregation.
pub fn evaluate_induced(
    inducer_column: &SliceColumn,
    inducer: &QueryStep,
    induced: &QueryStep,
) -> EngineResult<SliceColumn> {
    debug_assert!(can_induce(inducer, induced));
    let Some(aggregation) = induced.measure.aggregation() else {
        return Err(EngineError::Unsupported(format!(
            "cannot induce {induced}: no aggregation"
        )));
    };
    let local = Filter::and_all(
        induced
            .filter
            .conjuncts()
            .into_iter()
            .filter(|c| c.columns().is_subset(&inducer.group_by)),
    );
    let merger = AggregationMerger(aggregation);
    let mut out = SliceColumn::new();
    for (slice, key) in inducer_column.iter() {
        if !local.matches(slice) {
            continue;
        }
        let projected = slice.retain_columns(|c| induced.group_by.contains(c));
        out.merge(&projected, inducer_column.read_value(key), &merger)?;
    }
    log::trace!(
        "induced {} slices for {induced} from {} slices",
        out.len(),
        inducer_column.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::Aggregation;
    use slicer_columnar::{Coordinate, Slice, Value};
    use std::collections::BTreeSet;

    fn step(filter: Filter, group_by: &[&str]) -> Arc<QueryStep> {
        let measure = Arc::new(Measure::aggregator("m1", "amount", Aggregation::Sum));
        Arc::new(QueryStep::new(
            measure,
            filter,
            group_by.iter().map(|c| Arc::from(*c)).collect(),
            &BTreeSet::new(),
            None,
        ))
    }

    #[test]
    fn can_induce_rules() {
        let wide = step(Filter::MatchAll, &["ccy", "country"]);
        assert!(can_induce(&wide, &step(Filter::MatchAll, &["ccy"])));
        assert!(can_induce(&wide, &step(Filter::eq("country", "France"), &["ccy"])));
        assert!(!can_induce(&wide, &step(Filter::eq("year", 2024i64), &["ccy"])));
        assert!(!can_induce(&step(Filter::MatchAll, &["ccy"]), &wide));

        let eur = step(Filter::eq("year", 2024i64), &["ccy"]);
        assert!(can_induce(&eur, &step(Filter::eq("year", 2024i64), &[])));
        assert!(!can_induce(&eur, &step(Filter::MatchAll, &[])));

        let or = Filter::eq("year", 2024i64).or(Filter::eq("ccy", "EUR"));
        assert!(!can_induce(&step(Filter::MatchAll, &["ccy"]), &step(or.clone(), &[])));
        assert!(can_induce(&step(or.clone(), &["ccy"]), &step(or, &[])));
    }

    #[test]
    fn induced_rolls_up_without_scanning() {
        let inducer = step(Filter::MatchAll, &["ccy", "country"]);
        let induced = step(Filter::MatchAll, &["ccy"]);
        let mut column = SliceColumn::new();
        for (ccy, country, v) in [("EUR", "France", 123), ("EUR", "Germany", 234), ("USD", "USA", 345)] {
            let slice = Slice::from_pairs([
                ("ccy", Coordinate::from(ccy)),
                ("country", Coordinate::from(country)),
            ]);
            column.put(&slice, Value::Int(v)).unwrap();
        }
        let out = evaluate_induced(&column, &inducer, &induced).unwrap();
        let ccy = |c: &str| Slice::from_pairs([("ccy", Coordinate::from(c))]);
        assert_eq!(
            out.to_sorted_vec(),
            vec![(ccy("EUR"), Value::Int(357)), (ccy("USD"), Value::Int(345))]
        );
    }

    #[test]
    fn strategies_differ_only_in_scan_count() {
        let steps = vec![
            step(Filter::MatchAll, &["ccy"]),
            step(Filter::eq("ccy", "EUR"), &[]),
            step(Filter::eq("country", "France"), &["ccy"]),
        ];
        let none = split_induced(&steps, OptimizerStrategy::None);
        assert_eq!(table_queries(&none).unwrap().len(), 3);

        let classes = split_induced(&steps, OptimizerStrategy::PerEquivalenceClass);
        assert_eq!(classes.inducers.len(), 2);
        assert_eq!(classes.induceds.len(), 1);

        let single = split_induced(&steps, OptimizerStrategy::SinglePerAggregator);
        assert_eq!(single.inducers.len(), 1);
        assert_eq!(single.induceds.len(), 3);
        assert_eq!(single.edges, vec![0, 0, 0]);
    }

    #[test]
    fn a_laxer_filter_takes_over_an_elected_inducer() {
        let eur = step(Filter::is_in("ccy", ["EUR"]), &["ccy"]);
        let eur_usd = step(Filter::is_in("ccy", ["EUR", "USD"]), &["ccy"]);
        let eur_total = step(Filter::is_in("ccy", ["EUR"]), &[]);
        let split = split_induced(
            &[eur.clone(), eur_total.clone(), eur_usd.clone()],
            OptimizerStrategy::PerEquivalenceClass,
        );
        assert_eq!(split.inducers, vec![eur_usd]);
        assert_eq!(split.induceds, vec![eur, eur_total]);
        assert_eq!(split.edges, vec![0, 0]);
        assert_eq!(table_queries(&split).unwrap().len(), 1);
    }

    #[test]
    fn single_wide_scan_covers_conjunctive_members() {
        let steps = vec![
            step(Filter::eq("ccy", "EUR").and(Filter::eq("country", "France")), &[]),
            step(Filter::eq("ccy", "USD"), &[]),
        ];
        let split = split_induced(&steps, OptimizerStrategy::SinglePerAggregator);
        assert_eq!(split.inducers.len(), 1);
        assert_eq!(split.induceds.len(), 2);
        assert_eq!(table_queries(&split).unwrap().len(), 1);
    }
}
