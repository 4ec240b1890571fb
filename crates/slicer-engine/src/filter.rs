use crate::error::{EngineError, EngineResult};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use slicer_columnar::{Coordinate, Slice};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Order two coordinates for range predicates.
///
/// Integers and floats compare numerically; other variants only compare within their own type.
/// Null compares with nothing.
pub(crate) fn compare_coordinates(a: &Coordinate, b: &Coordinate) -> Option<Ordering> {
    match (a, b) {
        (Coordinate::Int(x), Coordinate::Int(y)) => Some(x.cmp(y)),
        (Coordinate::Float(x), Coordinate::Float(y)) => Some(x.cmp(y)),
        (Coordinate::Int(x), Coordinate::Float(y)) => Some(OrderedFloat(*x as f64).cmp(y)),
        (Coordinate::Float(x), Coordinate::Int(y)) => Some(x.cmp(&OrderedFloat(*y as f64))),
        (Coordinate::Text(x), Coordinate::Text(y)) => Some(x.cmp(y)),
        (Coordinate::Bool(x), Coordinate::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Predicate on the coordinate of a single column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    Equals(Coordinate),
    In(BTreeSet<Coordinate>),
    Compare { op: CompareOp, operand: Coordinate },
    Not(Box<Matcher>),
}

impl Matcher {
    pub fn matches(&self, coordinate: &Coordinate) -> bool {
        match self {
            Matcher::Equals(v) => v == coordinate,
            Matcher::In(values) => values.contains(coordinate),
            Matcher::Compare { op, operand } => compare_coordinates(coordinate, operand)
                .map_or(false, |ordering| op.holds(ordering)),
            Matcher::Not(inner) => !inner.matches(coordinate),
        }
    }

    /// Whether every coordinate accepted by `self` is accepted by `other`. Conservative.
    pub fn implies(&self, other: &Matcher) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Matcher::Equals(v), _) => other.matches(v),
            (Matcher::In(values), _) => values.iter().all(|v| other.matches(v)),
            (
                Matcher::Compare { op: a_op, operand: a },
                Matcher::Compare { op: b_op, operand: b },
            ) => {
                let Some(ordering) = compare_coordinates(a, b) else {
                    return false;
                };
                use CompareOp::*;
                match (a_op, b_op) {
                    (Lt, Lt) | (Le, Le) | (Lt, Le) => ordering != Ordering::Greater,
                    (Le, Lt) => ordering == Ordering::Less,
                    (Gt, Gt) | (Ge, Ge) | (Gt, Ge) => ordering != Ordering::Less,
                    (Ge, Gt) => ordering == Ordering::Greater,
                    _ => false,
                }
            }
            (Matcher::Not(a), Matcher::Not(b)) => b.implies(a),
            _ => false,
        }
    }

    fn validate(&self, column: &str) -> EngineResult<()> {
        match self {
            Matcher::Equals(_) => Ok(()),
            Matcher::In(values) if values.is_empty() => Err(EngineError::MalformedFilter(
                format!("empty IN set on column {column}"),
            )),
            Matcher::In(_) => Ok(()),
            Matcher::Compare { operand, .. } if operand.is_null() => Err(
                EngineError::MalformedFilter(format!("null comparison operand on column {column}")),
            ),
            Matcher::Compare { .. } => Ok(()),
            Matcher::Not(inner) => inner.validate(column),
        }
    }

    /// Rewrite every operand through `f`.
    pub fn map_operands(&self, f: &dyn Fn(&Coordinate) -> Coordinate) -> Matcher {
        match self {
            Matcher::Equals(v) => Matcher::Equals(f(v)),
            Matcher::In(values) => Matcher::In(values.iter().map(f).collect()),
            Matcher::Compare { op, operand } => Matcher::Compare {
                op: *op,
                operand: f(operand),
            },
            Matcher::Not(inner) => Matcher::Not(Box::new(inner.map_operands(f))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: Arc<str>,
    pub matcher: Matcher,
}

/// A filter tree over slice columns.
///
/// Trees built through [`Filter::and_all`] / [`Filter::or_all`] are canonical: nested
/// conjunctions and disjunctions are flattened, operands are sorted and deduplicated, and
/// `MatchAll` / `MatchNone` are folded away. Canonical trees compare structurally, which is what
/// query-step identity and induction rely on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    #[default]
    MatchAll,
    MatchNone,
    Column(ColumnFilter),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn column(column: impl Into<Arc<str>>, matcher: Matcher) -> Filter {
        Filter::Column(ColumnFilter {
            column: column.into(),
            matcher,
        })
    }

    pub fn eq(column: impl Into<Arc<str>>, value: impl Into<Coordinate>) -> Filter {
        Filter::column(column, Matcher::Equals(value.into()))
    }

    pub fn is_in<I, V>(column: impl Into<Arc<str>>, values: I) -> Filter
    where
        I: IntoIterator<Item = V>,
        V: Into<Coordinate>,
    {
        Filter::column(column, Matcher::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn compare(
        column: impl Into<Arc<str>>,
        op: CompareOp,
        operand: impl Into<Coordinate>,
    ) -> Filter {
        Filter::column(
            column,
            Matcher::Compare {
                op,
                operand: operand.into(),
            },
        )
    }

    pub fn le(column: impl Into<Arc<str>>, operand: impl Into<Coordinate>) -> Filter {
        Filter::compare(column, CompareOp::Le, operand)
    }

    pub fn ge(column: impl Into<Arc<str>>, operand: impl Into<Coordinate>) -> Filter {
        Filter::compare(column, CompareOp::Ge, operand)
    }

    pub fn and_all(filters: impl IntoIterator<Item = Filter>) -> Filter {
        let mut operands = Vec::new();
        for filter in filters {
            match filter {
                Filter::MatchAll => {}
                Filter::MatchNone => return Filter::MatchNone,
                Filter::And(inner) => operands.extend(inner),
                other => operands.push(other),
            }
        }
        operands.sort();
        operands.dedup();
        match operands.len() {
            0 => Filter::MatchAll,
            1 => operands.pop().unwrap_or_default(),
            _ => Filter::And(operands),
        }
    }

    pub fn or_all(filters: impl IntoIterator<Item = Filter>) -> Filter {
        let mut operands = Vec::new();
        for filter in filters {
            match filter {
                Filter::MatchNone => {}
                Filter::MatchAll => return Filter::MatchAll,
                Filter::Or(inner) => operands.extend(inner),
                other => operands.push(other),
            }
        }
        operands.sort();
        operands.dedup();
        match operands.len() {
            0 => Filter::MatchNone,
            1 => operands.pop().unwrap_or(Filter::MatchNone),
            _ => Filter::Or(operands),
        }
    }

    pub fn and(self, other: Filter) -> Filter {
        Filter::and_all([self, other])
    }

    pub fn or(self, other: Filter) -> Filter {
        Filter::or_all([self, other])
    }

    pub fn negate(self) -> Filter {
        match self {
            Filter::MatchAll => Filter::MatchNone,
            Filter::MatchNone => Filter::MatchAll,
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Filter::MatchAll)
    }

    /// The AND-conjuncts of this filter. `MatchAll` has none.
    pub fn conjuncts(&self) -> Vec<Filter> {
        match self {
            Filter::MatchAll => Vec::new(),
            Filter::And(operands) => operands.clone(),
            other => vec![other.clone()],
        }
    }

    /// Columns referenced anywhere in the tree.
    pub fn columns(&self) -> BTreeSet<Arc<str>> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<Arc<str>>) {
        match self {
            Filter::MatchAll | Filter::MatchNone => {}
            Filter::Column(cf) => {
                out.insert(cf.column.clone());
            }
            Filter::And(operands) | Filter::Or(operands) => {
                operands.iter().for_each(|f| f.collect_columns(out));
            }
            Filter::Not(inner) => inner.collect_columns(out),
        }
    }

    pub fn references(&self, column: &str) -> bool {
        match self {
            Filter::MatchAll | Filter::MatchNone => false,
            Filter::Column(cf) => cf.column.as_ref() == column,
            Filter::And(operands) | Filter::Or(operands) => {
                operands.iter().any(|f| f.references(column))
            }
            Filter::Not(inner) => inner.references(column),
        }
    }

    /// Evaluate against a coordinate lookup. A column the lookup cannot resolve reads as null.
    pub fn matches_by(&self, lookup: &dyn Fn(&str) -> Option<Coordinate>) -> bool {
        match self {
            Filter::MatchAll => true,
            Filter::MatchNone => false,
            Filter::Column(cf) => {
                let coordinate = lookup(&cf.column).unwrap_or(Coordinate::Null);
                cf.matcher.matches(&coordinate)
            }
            Filter::And(operands) => operands.iter().all(|f| f.matches_by(lookup)),
            Filter::Or(operands) => operands.iter().any(|f| f.matches_by(lookup)),
            Filter::Not(inner) => !inner.matches_by(lookup),
        }
    }

    pub fn matches(&self, slice: &Slice) -> bool {
        self.matches_by(&|column| slice.get(column).cloned())
    }

    /// Whether every row accepted by `self` is accepted by `other`.
    ///
    /// Sound but incomplete: identical trees, finite value-set inclusion, range narrowing and
    /// OR-introduction are recognized; anything else answers `false`.
    pub fn implies(&self, other: &Filter) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (_, Filter::MatchAll) | (Filter::MatchNone, _) => true,
            (_, Filter::And(conjuncts)) => conjuncts.iter().all(|c| self.implies(c)),
            (Filter::Or(disjuncts), _) => disjuncts.iter().all(|d| d.implies(other)),
            (Filter::And(conjuncts), _) => {
                conjuncts.iter().any(|c| c.implies(other))
                    || matches!(other, Filter::Or(disjuncts) if disjuncts.iter().any(|d| self.implies(d)))
            }
            (_, Filter::Or(disjuncts)) => disjuncts.iter().any(|d| self.implies(d)),
            (Filter::Column(a), Filter::Column(b)) => {
                a.column == b.column && a.matcher.implies(&b.matcher)
            }
            (Filter::Not(a), Filter::Not(b)) => b.implies(a),
            _ => false,
        }
    }

    /// Reject trees that can never be evaluated meaningfully.
    pub fn validate(&self) -> EngineResult<()> {
        match self {
            Filter::MatchAll | Filter::MatchNone => Ok(()),
            Filter::Column(cf) => {
                if cf.column.trim().is_empty() {
                    return Err(EngineError::MalformedFilter("empty column name".into()));
                }
                cf.matcher.validate(&cf.column)
            }
            Filter::And(operands) | Filter::Or(operands) => {
                operands.iter().try_for_each(Filter::validate)
            }
            Filter::Not(inner) => inner.validate(),
        }
    }

    /// Drop the conjuncts referencing any of `columns`.
    pub fn without_columns(&self, columns: &BTreeSet<Arc<str>>) -> Filter {
        Filter::and_all(
            self.conjuncts()
                .into_iter()
                .filter(|c| c.columns().is_disjoint(columns)),
        )
    }

    /// Rebuild the tree with every column predicate replaced by `f`.
    pub fn map_column_filters(&self, f: &dyn Fn(&ColumnFilter) -> Filter) -> Filter {
        match self {
            Filter::MatchAll | Filter::MatchNone => self.clone(),
            Filter::Column(cf) => f(cf),
            Filter::And(operands) => {
                Filter::and_all(operands.iter().map(|o| o.map_column_filters(f)))
            }
            Filter::Or(operands) => Filter::or_all(operands.iter().map(|o| o.map_column_filters(f))),
            Filter::Not(inner) => inner.map_column_filters(f).negate(),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Equals(v) => write!(f, "={v}"),
            Matcher::In(values) => {
                f.write_str(" in {")?;
                for (idx, v) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
            Matcher::Compare { op, operand } => write!(f, "{}{operand}", op.symbol()),
            Matcher::Not(inner) => write!(f, " not({inner})"),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, operands: &[Filter], sep: &str) -> fmt::Result {
            for (idx, operand) in operands.iter().enumerate() {
                if idx > 0 {
                    f.write_str(sep)?;
                }
                match operand {
                    Filter::And(_) | Filter::Or(_) => write!(f, "({operand})")?,
                    _ => write!(f, "{operand}")?,
                }
            }
            Ok(())
        }
        match self {
            Filter::MatchAll => f.write_str("*"),
            Filter::MatchNone => f.write_str("none"),
            Filter::Column(cf) => write!(f, "{}{}", cf.column, cf.matcher),
            Filter::And(operands) => join(f, operands, " & "),
            Filter::Or(operands) => join(f, operands, " | "),
            Filter::Not(inner) => write!(f, "!({inner})"),
        }
    }
}
