use pretty_assertions::assert_eq;
use proptest::prelude::*;
use slicer_engine::{
    can_induce, evaluate_induced, Aggregation, CachePolicy, Coordinate, CubeEngine, CubeQuery,
    EngineOptions, Filter, GroupBy, InMemoryTable, Measure, MeasureForest, OptimizerStrategy,
    QueryStep, Slice, SliceColumn, Value,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn sales() -> Arc<InMemoryTable> {
    Arc::new(
        InMemoryTable::new("sales", ["ccy", "country", "amount"])
            .with_rows([
                vec!["EUR".into(), "France".into(), Value::Int(123)],
                vec!["EUR".into(), "Germany".into(), Value::Int(234)],
                vec!["USD".into(), "USA".into(), Value::Int(345)],
            ])
            .unwrap(),
    )
}

fn forest() -> Arc<MeasureForest> {
    Arc::new(
        MeasureForest::with_measures([
            Measure::aggregator("revenue", "amount", Aggregation::Sum),
            Measure::filtrator("eur_revenue", "revenue", Filter::eq("ccy", "EUR")),
            Measure::partitionor(
                "revenue_by_country",
                ["revenue"],
                ["country"],
                slicer_engine::Combination::Sum,
                Aggregation::Sum,
            ),
        ])
        .unwrap(),
    )
}

fn ccy(code: &str) -> Slice {
    Slice::from_pairs([("ccy", Coordinate::from(code))])
}

#[test]
fn coarse_leaf_is_induced_from_the_fine_scan() {
    let table = sales();
    let engine = CubeEngine::new(table.clone(), forest());
    let query = CubeQuery::new()
        .measure("revenue")
        .measure("revenue_by_country")
        .group_by(["ccy"]);
    let result = engine.execute(&query).unwrap();

    let revenue = result.measure("revenue").unwrap();
    assert_eq!(
        revenue.to_sorted_vec(),
        vec![(ccy("EUR"), Value::Int(357)), (ccy("USD"), Value::Int(345))]
    );
    assert_eq!(result.value("revenue_by_country", &ccy("EUR")), Value::Int(357));
    assert_eq!(result.statistics().induced, 1);
    assert_eq!(result.statistics().table_scans, 1);
    assert_eq!(table.scan_count(), 1);
}

fn run(strategy: OptimizerStrategy, query: &CubeQuery) -> (Vec<(Slice, Value)>, Vec<(Slice, Value)>, usize) {
    let table = sales();
    let engine = CubeEngine::with_options(
        table.clone(),
        forest(),
        EngineOptions {
            optimizer: strategy,
            cache: CachePolicy::None,
            ..EngineOptions::default()
        },
    );
    let result = engine.execute(query).unwrap();
    assert_eq!(result.statistics().table_scans, table.scan_count());
    (
        result.measure("revenue").unwrap().to_sorted_vec(),
        result.measure("eur_revenue").unwrap().to_sorted_vec(),
        table.scan_count(),
    )
}

#[test]
fn strategies_agree_on_values_but_not_on_scans() {
    let query = CubeQuery::new()
        .measure("revenue")
        .measure("eur_revenue")
        .group_by(["country"]);
    let (revenue, eur, none_scans) = run(OptimizerStrategy::None, &query);
    let (revenue_classes, eur_classes, class_scans) =
        run(OptimizerStrategy::PerEquivalenceClass, &query);
    let (revenue_single, eur_single, single_scans) =
        run(OptimizerStrategy::SinglePerAggregator, &query);

    assert_eq!(revenue, revenue_classes);
    assert_eq!(revenue, revenue_single);
    assert_eq!(eur, eur_classes);
    assert_eq!(eur, eur_single);
    assert_eq!(eur.len(), 2);

    assert_eq!(none_scans, 2);
    assert_eq!(class_scans, 2);
    assert_eq!(single_scans, 1);
}

#[test]
fn one_wide_scan_serves_conjunctive_filtrators() {
    let table = sales();
    let forest = MeasureForest::with_measures([
        Measure::aggregator("revenue", "amount", Aggregation::Sum),
        Measure::filtrator(
            "french_eur",
            "revenue",
            Filter::eq("ccy", "EUR").and(Filter::eq("country", "France")),
        ),
        Measure::filtrator("usd", "revenue", Filter::eq("ccy", "USD")),
    ])
    .unwrap();
    let engine = CubeEngine::with_options(
        table.clone(),
        Arc::new(forest),
        EngineOptions {
            optimizer: OptimizerStrategy::SinglePerAggregator,
            ..EngineOptions::default()
        },
    );
    let result = engine
        .execute(&CubeQuery::new().measure("french_eur").measure("usd"))
        .unwrap();
    let total = Slice::grand_total();
    assert_eq!(result.value("french_eur", &total), Value::Int(123));
    assert_eq!(result.value("usd", &total), Value::Int(345));
    assert_eq!(result.statistics().induced, 2);
    assert_eq!(table.scan_count(), 1);
}

#[test]
fn cached_and_uncached_evaluations_are_identical() {
    let query = CubeQuery::new()
        .measure("revenue_by_country")
        .measure("eur_revenue")
        .group_by(["ccy"]);
    let cached = CubeEngine::new(sales(), forest());
    let first = cached.execute(&query).unwrap();
    let second = cached.execute(&query).unwrap();
    assert_eq!(second.statistics().table_scans, 0);
    assert_eq!(second.statistics().cache_hits, 2);

    let uncached = CubeEngine::with_options(
        sales(),
        forest(),
        EngineOptions {
            cache: CachePolicy::None,
            ..EngineOptions::default()
        },
    );
    let fresh = uncached.execute(&query).unwrap();
    for name in ["revenue_by_country", "eur_revenue"] {
        let a = first.measure(name).unwrap().to_sorted_vec();
        let b = second.measure(name).unwrap().to_sorted_vec();
        let c = fresh.measure(name).unwrap().to_sorted_vec();
        assert_eq!(a.len(), c.len());
        for ((sa, va), ((sb, vb), (sc, vc))) in a.iter().zip(b.iter().zip(&c)) {
            assert_eq!(sa, sb);
            assert_eq!(sa, sc);
            assert!(va.bit_eq(vb) && va.bit_eq(vc), "{name} at {sa}: {va} / {vb} / {vc}");
        }
    }

    cached.invalidate_cache();
    let after = cached.execute(&query).unwrap();
    assert_eq!(after.statistics().cache_hits, 0);
    assert_eq!(after.statistics().table_scans, 1);
}

const COLUMNS: [&str; 3] = ["a", "b", "c"];

fn rows() -> Vec<(i64, i64, i64, i64)> {
    let mut rows = Vec::new();
    for a in 0..3 {
        for b in 0..3 {
            for c in 0..3 {
                rows.push((a, b, c, a * 9 + b * 3 + c + 1));
            }
        }
    }
    rows
}

fn row_coordinate(row: &(i64, i64, i64, i64), column: &str) -> Option<Coordinate> {
    match column {
        "a" => Some(Coordinate::Int(row.0)),
        "b" => Some(Coordinate::Int(row.1)),
        "c" => Some(Coordinate::Int(row.2)),
        _ => None,
    }
}

/// Brute-force answer of a SUM step straight from the rows.
fn direct(step: &QueryStep) -> BTreeMap<Slice, Value> {
    let mut out: BTreeMap<Slice, i64> = BTreeMap::new();
    for row in rows() {
        if !step.filter.matches_by(&|column| row_coordinate(&row, column)) {
            continue;
        }
        let slice = Slice::from_pairs(step.group_by.iter().filter_map(|column| {
            row_coordinate(&row, column).map(|coordinate| (column.clone(), coordinate))
        }));
        *out.entry(slice).or_default() += row.3;
    }
    out.into_iter().map(|(s, v)| (s, Value::Int(v))).collect()
}

fn step(filter: Filter, group_by: &[&'static str]) -> QueryStep {
    QueryStep::new(
        Arc::new(Measure::aggregator("m", "amount", Aggregation::Sum)),
        filter,
        group_by.iter().map(|c| Arc::from(*c)).collect::<GroupBy>(),
        &BTreeSet::new(),
        None,
    )
}

fn leaf_filter(columns: Vec<&'static str>) -> BoxedStrategy<Filter> {
    let column = prop::sample::select(columns);
    prop_oneof![
        (column.clone(), 0i64..3).prop_map(|(c, v)| Filter::eq(c, v)),
        (column.clone(), prop::collection::btree_set(0i64..3, 1..3))
            .prop_map(|(c, values)| Filter::is_in(c, values)),
        (column, 0i64..3).prop_map(|(c, v)| Filter::le(c, v)),
    ]
    .boxed()
}

fn filter_tree(columns: Vec<&'static str>) -> BoxedStrategy<Filter> {
    leaf_filter(columns)
        .prop_recursive(2, 8, 3, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 2..4).prop_map(|fs| Filter::and_all(fs)),
                prop::collection::vec(inner.clone(), 2..4).prop_map(|fs| Filter::or_all(fs)),
                inner.prop_map(Filter::negate),
            ]
        })
        .boxed()
}

/// An inducer and a step it can produce: a coarser group-by and extra conjuncts over the
/// inducer's group-by.
fn induction_case(
) -> impl Strategy<Value = (Vec<&'static str>, Filter, Vec<&'static str>, Filter)> {
    (
        prop::sample::subsequence(COLUMNS.to_vec(), 1..=3),
        filter_tree(COLUMNS.to_vec()),
    )
        .prop_flat_map(|(inducer_group_by, inducer_filter)| {
            let len = inducer_group_by.len();
            (
                Just(inducer_group_by.clone()),
                Just(inducer_filter),
                prop::sample::subsequence(inducer_group_by.clone(), 0..=len),
                filter_tree(inducer_group_by),
            )
        })
}

proptest! {
    #[test]
    fn induced_steps_match_a_direct_scan(
        (inducer_group_by, inducer_filter, induced_group_by, extra) in induction_case()
    ) {
        let inducer = step(inducer_filter.clone(), &inducer_group_by);
        let induced = step(inducer_filter.and(extra), &induced_group_by);
        prop_assert!(can_induce(&inducer, &induced));

        let mut inducer_column = SliceColumn::new();
        for (slice, value) in direct(&inducer) {
            inducer_column.put(&slice, value).unwrap();
        }
        let out = evaluate_induced(&inducer_column, &inducer, &induced).unwrap();
        let expected: Vec<(Slice, Value)> = direct(&induced).into_iter().collect();
        prop_assert_eq!(out.to_sorted_vec(), expected);
    }

    #[test]
    fn a_wider_filter_never_induces_a_narrower_one(
        group_by in prop::sample::subsequence(COLUMNS.to_vec(), 0..=3),
        filter in filter_tree(vec!["a"]),
    ) {
        // The inducer never saw the rows outside `filter` on a column it does not group by.
        let inducer = step(Filter::MatchAll, &group_by);
        let induced = step(filter, &group_by);
        prop_assert_eq!(can_induce(&inducer, &induced), group_by.contains(&"a"));
    }
}
