use crate::filter::{compare_coordinates, CompareOp, Filter, Matcher};
use crate::query::GroupBy;
use serde::{Deserialize, Serialize};
use slicer_columnar::{Coordinate, Slice, SliceColumn};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Fans one underlying slice out to several output slices along a decomposed column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decomposition {
    /// Running total: the output at `x` aggregates every underlying value at `r <= x`.
    Cumulative { column: Arc<str> },
    /// Many-to-many mapping: an element of `input_column` contributes to every group listing it,
    /// under the generated `output_column`.
    Mapping {
        input_column: Arc<str>,
        output_column: Arc<str>,
        groups: BTreeMap<Coordinate, BTreeSet<Coordinate>>,
    },
}

/// How a dispatchor step reaches its underlying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchPlan {
    pub filter: Filter,
    pub group_by: GroupBy,
    /// Output-side conjuncts re-checked on every fanned-out slice.
    pub deferred: Filter,
}

#[derive(Clone, Debug, PartialEq)]
struct Bound {
    value: Coordinate,
    inclusive: bool,
}

impl Decomposition {
    pub fn name(&self) -> &'static str {
        match self {
            Decomposition::Cumulative { .. } => "CUMULATIVE",
            Decomposition::Mapping { .. } => "MAPPING",
        }
    }

    /// The output-side column whose filters cannot be pushed down as is.
    pub fn decomposed_column(&self) -> &Arc<str> {
        match self {
            Decomposition::Cumulative { column } => column,
            Decomposition::Mapping { output_column, .. } => output_column,
        }
    }

    /// Columns that exist only downstream of this decomposition.
    pub fn generated_columns(&self) -> Vec<Arc<str>> {
        match self {
            Decomposition::Cumulative { .. } => Vec::new(),
            Decomposition::Mapping { output_column, .. } => vec![output_column.clone()],
        }
    }

    /// Translate the output-side `(filter, group_by)` into the underlying query.
    ///
    /// Conjuncts not mentioning the decomposed column are pushed down unchanged. Conjuncts only
    /// on it are translated into an input-side filter (an upper bound for `Cumulative`, an `IN`
    /// over elements for `Mapping`) and deferred. Mixed conjuncts are deferred and the real
    /// columns they mention join the underlying group-by so they can be re-checked.
    pub fn plan(&self, filter: &Filter, group_by: &GroupBy) -> DispatchPlan {
        let decomposed = self.decomposed_column();
        let mut underlying_group_by = group_by.clone();
        let mut pushed = Vec::new();
        let mut deferred = Vec::new();
        for conjunct in filter.conjuncts() {
            if !conjunct.references(decomposed) {
                pushed.push(conjunct);
                continue;
            }
            let columns = conjunct.columns();
            if columns.len() == 1 {
                pushed.push(self.translate(&conjunct));
            } else {
                underlying_group_by.extend(columns.into_iter().filter(|c| c != decomposed));
            }
            deferred.push(conjunct);
        }
        match self {
            Decomposition::Cumulative { column } => {
                underlying_group_by.insert(column.clone());
            }
            Decomposition::Mapping {
                input_column,
                output_column,
                ..
            } => {
                underlying_group_by.remove(output_column);
                underlying_group_by.insert(input_column.clone());
            }
        }
        DispatchPlan {
            filter: Filter::and_all(pushed),
            group_by: underlying_group_by,
            deferred: Filter::and_all(deferred),
        }
    }

    fn translate(&self, conjunct: &Filter) -> Filter {
        match self {
            Decomposition::Cumulative { column } => match upper_bound(conjunct) {
                Some(Bound {
                    value,
                    inclusive: true,
                }) => Filter::compare(column.clone(), CompareOp::Le, value),
                Some(Bound {
                    value,
                    inclusive: false,
                }) => Filter::compare(column.clone(), CompareOp::Lt, value),
                None => Filter::MatchAll,
            },
            Decomposition::Mapping {
                input_column,
                output_column,
                groups,
            } => {
                let elements: BTreeSet<Coordinate> = groups
                    .iter()
                    .filter(|(group, _)| {
                        conjunct.matches_by(&|c| {
                            (c == output_column.as_ref()).then(|| (*group).clone())
                        })
                    })
                    .flat_map(|(_, elements)| elements.iter().cloned())
                    .collect();
                if elements.is_empty() {
                    Filter::MatchNone
                } else {
                    Filter::column(input_column.clone(), Matcher::In(elements))
                }
            }
        }
    }

    /// Coordinates the decomposed column may take on the output side.
    ///
    /// For `Cumulative`: every coordinate observed in the underlying column plus the literals the
    /// deferred filter names, so a query at a coordinate without data still gets its running
    /// total. `Mapping` targets come from its groups and need none.
    pub fn candidates(&self, input: &SliceColumn, deferred: &Filter) -> BTreeSet<Coordinate> {
        let Decomposition::Cumulative { column } = self else {
            return BTreeSet::new();
        };
        let mut out: BTreeSet<Coordinate> = input
            .iter()
            .filter_map(|(slice, _)| slice.get(column).cloned())
            .collect();
        collect_literals(deferred, column, &mut out);
        out
    }

    /// Output slices (before projection) an underlying slice contributes to.
    pub fn fan_out(&self, slice: &Slice, candidates: &BTreeSet<Coordinate>) -> Vec<Slice> {
        match self {
            Decomposition::Cumulative { column } => {
                let Some(position) = slice.get(column) else {
                    return vec![slice.clone()];
                };
                candidates
                    .iter()
                    .filter(|x| {
                        *x == position
                            || compare_coordinates(position, x) == Some(Ordering::Less)
                    })
                    .map(|x| slice.with(column.clone(), x.clone()))
                    .collect()
            }
            Decomposition::Mapping {
                input_column,
                output_column,
                groups,
            } => {
                let Some(element) = slice.get(input_column) else {
                    return Vec::new();
                };
                groups
                    .iter()
                    .filter(|(_, elements)| elements.contains(element))
                    .map(|(group, _)| slice.with(output_column.clone(), group.clone()))
                    .collect()
            }
        }
    }
}

fn tighter(a: Bound, b: Bound) -> Option<Bound> {
    match compare_coordinates(&a.value, &b.value)? {
        Ordering::Less => Some(a),
        Ordering::Greater => Some(b),
        Ordering::Equal => Some(if a.inclusive { b } else { a }),
    }
}

fn looser(a: Bound, b: Bound) -> Option<Bound> {
    match compare_coordinates(&a.value, &b.value)? {
        Ordering::Less => Some(b),
        Ordering::Greater => Some(a),
        Ordering::Equal => Some(if a.inclusive { a } else { b }),
    }
}

/// Smallest upper bound implied by a single-column filter, if any.
fn upper_bound(filter: &Filter) -> Option<Bound> {
    match filter {
        Filter::Column(cf) => match &cf.matcher {
            Matcher::Equals(v) if !v.is_null() => Some(Bound {
                value: v.clone(),
                inclusive: true,
            }),
            Matcher::In(values) => {
                let mut iter = values.iter().filter(|v| !v.is_null()).cloned();
                let first = iter.next()?;
                iter.try_fold(
                    Bound {
                        value: first,
                        inclusive: true,
                    },
                    |acc, v| {
                        looser(
                            acc,
                            Bound {
                                value: v,
                                inclusive: true,
                            },
                        )
                    },
                )
            }
            Matcher::Compare {
                op: CompareOp::Le,
                operand,
            } => Some(Bound {
                value: operand.clone(),
                inclusive: true,
            }),
            Matcher::Compare {
                op: CompareOp::Lt,
                operand,
            } => Some(Bound {
                value: operand.clone(),
                inclusive: false,
            }),
            _ => None,
        },
        Filter::And(operands) => operands
            .iter()
            .filter_map(upper_bound)
            .try_fold(None::<Bound>, |acc, b| match acc {
                None => Some(Some(b)),
                Some(a) => tighter(a, b).map(Some),
            })
            .flatten(),
        Filter::Or(operands) => {
            let mut bounds = operands.iter().map(upper_bound);
            let first = bounds.next()??;
            bounds.try_fold(first, |acc, b| looser(acc, b?))
        }
        _ => None,
    }
}

fn collect_literals(filter: &Filter, column: &str, out: &mut BTreeSet<Coordinate>) {
    match filter {
        Filter::Column(cf) if cf.column.as_ref() == column => match &cf.matcher {
            Matcher::Equals(v) => {
                out.insert(v.clone());
            }
            Matcher::In(values) => out.extend(values.iter().cloned()),
            _ => {}
        },
        Filter::And(operands) | Filter::Or(operands) => {
            operands.iter().for_each(|f| collect_literals(f, column, out));
        }
        _ => {}
    }
}
