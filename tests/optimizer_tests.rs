//! Optimizer behavior observed through EXPLAIN: pushdown annotations,
//! rule counters, operator fusion and algorithm choices.

use meridian::{Engine, RowExt};

fn engine() -> Engine {
    Engine::new().expect("engine")
}

fn explain(engine: &Engine, sql: &str) -> String {
    let rows = engine
        .execute(sql)
        .expect("plan")
        .fetch_all()
        .expect("fetch");
    rows.iter()
        .map(|r| r.get_str(0).unwrap_or_default().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn counter(explained: &str, name: &str) -> u64 {
    explained
        .lines()
        .find_map(|line| {
            line.strip_prefix(&format!("{name}: "))
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0)
}

#[test]
fn test_predicate_pushdown_reaches_scan() {
    let engine = engine();
    let explained = explain(&engine, "EXPLAIN SELECT * FROM $planets WHERE id = 3");
    assert!(
        counter(&explained, "optimization_predicate_pushdown") >= 1,
        "counters missing in:\n{explained}"
    );
    // The scan itself carries the predicate.
    let scan_line = explained
        .lines()
        .find(|l| l.trim_start().starts_with("Scan($planets)"))
        .expect("scan line");
    assert!(scan_line.contains("id = 3"), "scan line: {scan_line}");
}

#[test]
fn test_projection_pushdown_annotates_columns() {
    let engine = engine();
    let explained = explain(&engine, "EXPLAIN SELECT name FROM $satellites");
    assert!(counter(&explained, "optimization_projection_pushdown") >= 1);
    let scan_line = explained
        .lines()
        .find(|l| l.trim_start().starts_with("Scan($satellites)"))
        .expect("scan line");
    assert!(scan_line.contains("columns"), "scan line: {scan_line}");
    assert!(scan_line.contains("name"));
    assert!(!scan_line.contains("radius"));
}

#[test]
fn test_sort_limit_fuses_to_heap() {
    let engine = engine();
    let explained = explain(
        &engine,
        "EXPLAIN SELECT name FROM $satellites ORDER BY radius DESC LIMIT 3",
    );
    assert!(explained.contains("HeapSort(k=3"), "plan:\n{explained}");
    assert!(counter(&explained, "optimization_operator_fusion") >= 1);
}

#[test]
fn test_unfused_sort_without_limit() {
    let engine = engine();
    let explained = explain(
        &engine,
        "EXPLAIN SELECT name FROM $satellites ORDER BY radius DESC",
    );
    assert!(explained.contains("Sort(by=["), "plan:\n{explained}");
    assert!(!explained.contains("HeapSort"));
}

#[test]
fn test_constant_folding_counter() {
    let engine = engine();
    let explained = explain(
        &engine,
        "EXPLAIN SELECT name FROM $planets WHERE id = 1 + 2",
    );
    assert!(counter(&explained, "optimization_constant_folding") >= 1);
    assert!(explained.contains("id = 3"), "plan:\n{explained}");
}

#[test]
fn test_cross_join_with_filter_becomes_inner() {
    let engine = engine();
    let explained = explain(
        &engine,
        "EXPLAIN SELECT p.name FROM $planets p CROSS JOIN $satellites s \
         WHERE p.id = s.planetId",
    );
    assert!(counter(&explained, "optimization_join_rewrite") >= 1);
    assert!(!explained.contains("CROSS"), "plan:\n{explained}");
}

#[test]
fn test_limit_pushdown_into_scan() {
    let engine = engine();
    let explained = explain(&engine, "EXPLAIN SELECT name FROM $satellites LIMIT 5");
    assert!(counter(&explained, "optimization_limit_pushdown") >= 1);
    let scan_line = explained
        .lines()
        .find(|l| l.trim_start().starts_with("Scan($satellites)"))
        .expect("scan line");
    assert!(scan_line.contains("limit=5"), "scan line: {scan_line}");
}

#[test]
fn test_small_join_uses_nested_loop() {
    let engine = engine();
    let explained = explain(
        &engine,
        "EXPLAIN SELECT a.name FROM $planets a INNER JOIN $planets b ON a.id = b.id",
    );
    assert!(explained.contains("NestedLoopJoin"), "plan:\n{explained}");
}

#[test]
fn test_explain_analyze_reports_rows() {
    let engine = engine();
    let explained = explain(
        &engine,
        "EXPLAIN ANALYZE SELECT name FROM $planets WHERE id <= 4",
    );
    assert!(explained.contains("rows="), "plan:\n{explained}");
    assert!(explained.contains("rows scanned:"), "plan:\n{explained}");
}

#[test]
fn test_temporal_range_visible_in_plan() {
    let engine = engine();
    let explained = explain(
        &engine,
        "EXPLAIN SELECT name FROM $planets FOR '1846-01-01'",
    );
    assert!(explained.contains("for=1846-01-01"), "plan:\n{explained}");
}

#[test]
fn test_statistics_surface_on_cursor() {
    let engine = engine();
    let mut cursor = engine
        .execute("SELECT name FROM $planets WHERE id = 3")
        .expect("plan");
    cursor.fetch_all().expect("fetch");
    let stats = cursor.statistics();
    assert_eq!(stats.rows_produced, 1);
    assert!(stats
        .rule_counters
        .contains_key("optimization_predicate_pushdown"));
}
