use pretty_assertions::assert_eq;
use slicer_engine::{
    Aggregation, Combination, Coordinate, CubeEngine, CubeQuery, Decomposition, EngineError,
    Filter, InMemoryTable, Measure, MeasureForest, QueryOption, Shift, Slice, Value,
    ROW_COUNT_COLUMN,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn engine(table: InMemoryTable, measures: impl IntoIterator<Item = Measure>) -> CubeEngine {
    CubeEngine::new(
        Arc::new(table),
        Arc::new(MeasureForest::with_measures(measures).unwrap()),
    )
}

fn at(column: &str, coordinate: impl Into<Coordinate>) -> Slice {
    Slice::from_pairs([(column, coordinate.into())])
}

fn timeline() -> CubeEngine {
    let table = InMemoryTable::new("flows", ["t", "amount"])
        .with_rows([
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Int(2), Value::Int(10)],
            vec![Value::Int(3), Value::Int(100)],
        ])
        .unwrap();
    engine(
        table,
        [
            Measure::aggregator("amount", "amount", Aggregation::Sum),
            Measure::dispatchor(
                "running",
                "amount",
                Decomposition::Cumulative { column: "t".into() },
                Aggregation::Sum,
            ),
            Measure::shiftor(
                "previous",
                "amount",
                Shift::Offset {
                    column: "t".into(),
                    offset: -1,
                },
            ),
        ],
    )
}

fn running_total(filter: Filter) -> Value {
    let result = timeline()
        .execute(&CubeQuery::new().measure("running").filter(filter))
        .unwrap();
    result.value("running", &Slice::grand_total())
}

#[test]
fn cumulative_at_the_boundary() {
    assert_eq!(running_total(Filter::eq("t", 1i64)), Value::Int(1));
    assert_eq!(running_total(Filter::eq("t", 2i64)), Value::Int(11));
    assert_eq!(running_total(Filter::le("t", 2i64)), Value::Int(11));
}

#[test]
fn cumulative_under_or_counts_each_row_once() {
    let expected = Value::Int(111);
    assert_eq!(running_total(Filter::is_in("t", [2i64, 3])), expected);
    assert_eq!(
        running_total(Filter::eq("t", 2i64).or(Filter::eq("t", 3i64))),
        expected
    );
}

#[test]
fn cumulative_by_coordinate() {
    let result = timeline()
        .execute(
            &CubeQuery::new()
                .measure("running")
                .group_by(["t"])
                .filter(Filter::ge("t", 2i64)),
        )
        .unwrap();
    assert_eq!(
        result.measure("running").unwrap().to_sorted_vec(),
        vec![(at("t", 2i64), Value::Int(11)), (at("t", 3i64), Value::Int(111))]
    );
}

#[test]
fn offset_shift_reads_the_previous_coordinate() {
    let result = timeline()
        .execute(&CubeQuery::new().measure("previous").group_by(["t"]))
        .unwrap();
    assert_eq!(
        result.measure("previous").unwrap().to_sorted_vec(),
        vec![(at("t", 2i64), Value::Int(1)), (at("t", 3i64), Value::Int(10))]
    );
}

fn geography() -> CubeEngine {
    let table = InMemoryTable::new("sales", ["ccy", "country", "amount", "cost"])
        .with_rows([
            vec!["EUR".into(), "FR".into(), Value::Int(123), Value::Int(100)],
            vec!["EUR".into(), "DE".into(), Value::Int(234), Value::Int(200)],
            vec!["USD".into(), "US".into(), Value::Int(345), Value::Int(300)],
            vec!["EUR".into(), "FR".into(), Value::Int(7), Value::Null],
        ])
        .unwrap();
    let zones = BTreeMap::from([
        (
            Coordinate::from("EU"),
            BTreeSet::from([Coordinate::from("FR"), Coordinate::from("DE")]),
        ),
        (
            Coordinate::from("G7"),
            BTreeSet::from([
                Coordinate::from("FR"),
                Coordinate::from("DE"),
                Coordinate::from("US"),
            ]),
        ),
    ]);
    engine(
        table,
        [
            Measure::aggregator("revenue", "amount", Aggregation::Sum),
            Measure::aggregator("cost", "cost", Aggregation::Sum),
            Measure::aggregator("rows", ROW_COUNT_COLUMN, Aggregation::Count),
            Measure::combinator("margin", ["revenue", "cost"], Combination::Subtract),
            Measure::combinator("ratio", ["revenue", "cost"], Combination::Divide),
            Measure::shiftor(
                "revenue_in_eur",
                "revenue",
                Shift::Fixed {
                    column: "ccy".into(),
                    coordinate: "EUR".into(),
                },
            ),
            Measure::unfiltrator("all_countries", "revenue", ["country"]),
            Measure::partitionor(
                "best_country",
                ["revenue"],
                ["country"],
                Combination::Sum,
                Aggregation::Max,
            ),
            Measure::dispatchor(
                "by_zone",
                "revenue",
                Decomposition::Mapping {
                    input_column: "country".into(),
                    output_column: "zone".into(),
                    groups: zones,
                },
                Aggregation::Sum,
            ),
            Measure::combinator("zone_total", ["by_zone"], Combination::Sum),
        ],
    )
}

#[test]
fn combinators_see_every_slice_of_their_underlyings() {
    let result = geography()
        .execute(
            &CubeQuery::new()
                .measure("margin")
                .measure("rows")
                .group_by(["country"]),
        )
        .unwrap();
    let margin = result.measure("margin").unwrap();
    assert_eq!(
        margin.to_sorted_vec(),
        vec![
            (at("country", "DE"), Value::Int(34)),
            (at("country", "FR"), Value::Int(30)),
            (at("country", "US"), Value::Int(45)),
        ]
    );
    assert_eq!(result.value("rows", &at("country", "FR")), Value::Int(2));
}

#[test]
fn fixed_shift_reads_the_pinned_coordinate() {
    let result = geography()
        .execute(
            &CubeQuery::new()
                .measure("revenue")
                .measure("revenue_in_eur")
                .group_by(["ccy"]),
        )
        .unwrap();
    assert_eq!(result.value("revenue", &at("ccy", "USD")), Value::Int(345));
    assert_eq!(result.value("revenue_in_eur", &at("ccy", "USD")), Value::Int(364));
    assert_eq!(result.value("revenue_in_eur", &at("ccy", "EUR")), Value::Int(364));
}

#[test]
fn unfiltrator_lifts_the_filter_on_its_columns() {
    let result = geography()
        .execute(
            &CubeQuery::new()
                .measure("revenue")
                .measure("all_countries")
                .filter(Filter::eq("country", "FR"))
                .filter(Filter::eq("ccy", "EUR")),
        )
        .unwrap();
    let total = Slice::grand_total();
    assert_eq!(result.value("revenue", &total), Value::Int(130));
    assert_eq!(result.value("all_countries", &total), Value::Int(364));
}

#[test]
fn partitionor_rolls_partitions_up() {
    let result = geography()
        .execute(&CubeQuery::new().measure("best_country").group_by(["ccy"]))
        .unwrap();
    assert_eq!(
        result.measure("best_country").unwrap().to_sorted_vec(),
        vec![(at("ccy", "EUR"), Value::Int(234)), (at("ccy", "USD"), Value::Int(345))]
    );
}

#[test]
fn mapping_generates_a_column() {
    let engine = geography();
    let result = engine
        .execute(&CubeQuery::new().measure("by_zone").group_by(["zone"]))
        .unwrap();
    assert_eq!(
        result.measure("by_zone").unwrap().to_sorted_vec(),
        vec![(at("zone", "EU"), Value::Int(364)), (at("zone", "G7"), Value::Int(709))]
    );

    let eu_only = engine
        .execute(
            &CubeQuery::new()
                .measure("by_zone")
                .filter(Filter::eq("zone", "EU")),
        )
        .unwrap();
    assert_eq!(
        eu_only.value("by_zone", &Slice::grand_total()),
        Value::Int(364)
    );

    let err = engine
        .execute(&CubeQuery::new().measure("revenue").group_by(["zone"]))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownColumn { column } if column == "zone"));
}

#[test]
fn cached_results_keep_generated_columns_visible() {
    let engine = geography();
    let query = CubeQuery::new().measure("zone_total").group_by(["zone"]);
    let expected = vec![(at("zone", "EU"), Value::Int(364)), (at("zone", "G7"), Value::Int(709))];

    let first = engine.execute(&query).unwrap();
    assert_eq!(first.measure("zone_total").unwrap().to_sorted_vec(), expected);

    let second = engine.execute(&query).unwrap();
    assert_eq!(second.measure("zone_total").unwrap().to_sorted_vec(), expected);
    assert_eq!(second.statistics().cache_hits, 1);
    assert_eq!(second.statistics().table_scans, 0);
}

#[test]
fn concurrent_evaluation_matches_direct_evaluation() {
    let query = CubeQuery::new()
        .measure("margin")
        .measure("ratio")
        .measure("best_country")
        .measure("by_zone")
        .group_by(["ccy"])
        .option(QueryOption::NoCache);
    let engine = geography();
    let direct = engine.execute(&query).unwrap();
    let concurrent = engine
        .execute(&query.clone().option(QueryOption::Concurrent))
        .unwrap();
    for ((name, a), (_, b)) in direct.columns().zip(concurrent.columns()) {
        let a = a.to_sorted_vec();
        let b = b.to_sorted_vec();
        assert_eq!(a.len(), b.len(), "{name}");
        for ((sa, va), (sb, vb)) in a.iter().zip(&b) {
            assert_eq!(sa, sb);
            assert!(va.bit_eq(vb), "{name} at {sa}: {va} vs {vb}");
        }
    }
    assert_eq!(
        concurrent.value("ratio", &at("ccy", "USD")),
        Value::Float(345.0 / 300.0)
    );
}
