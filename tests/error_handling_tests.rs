//! Error taxonomy tests: plan-time failures carry the right kind and
//! execution failures surface through the cursor exactly once.

use meridian::{Engine, ErrorKind};

fn engine() -> Engine {
    Engine::new().expect("engine")
}

#[test]
fn test_parse_error() {
    let engine = engine();
    let err = engine.execute("SELEKT name FROM $planets").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseError);
}

#[test]
fn test_unresolved_table() {
    let engine = engine();
    let err = engine.execute("SELECT x FROM missing_table").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedName);
}

#[test]
fn test_unresolved_column() {
    let engine = engine();
    let err = engine
        .execute("SELECT no_such_column FROM $planets")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedName);
}

#[test]
fn test_ambiguous_column() {
    let engine = engine();
    let err = engine
        .execute("SELECT id FROM $planets a INNER JOIN $planets b ON a.id = b.id")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedName);
}

#[test]
fn test_unknown_function() {
    let engine = engine();
    let err = engine
        .execute("SELECT FROBNICATE(name) FROM $planets")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedName);
}

#[test]
fn test_type_mismatch_in_expression() {
    let engine = engine();
    let err = engine.execute("SELECT name + 1 FROM $planets").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[test]
fn test_dml_is_unsupported() {
    let engine = engine();
    for sql in [
        "INSERT INTO $planets (id) VALUES (10)",
        "UPDATE $planets SET name = 'X'",
        "DELETE FROM $planets",
    ] {
        let err = engine.execute(sql).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation, "for {sql}");
    }
}

#[test]
fn test_window_functions_unsupported() {
    let engine = engine();
    let err = engine
        .execute("SELECT SUM(mass) OVER () FROM $planets")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
}

#[test]
fn test_set_op_over_lists_rejected() {
    let engine = engine();
    let err = engine
        .execute("SELECT missions FROM $astronauts INTERSECT SELECT missions FROM $astronauts")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
}

#[test]
fn test_distinct_over_lists_rejected() {
    let engine = engine();
    let err = engine
        .execute("SELECT DISTINCT missions FROM $astronauts")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
}

#[test]
fn test_union_all_over_lists_allowed() {
    let engine = engine();
    let mut cursor = engine
        .execute("SELECT missions FROM $astronauts UNION ALL SELECT missions FROM $astronauts")
        .expect("plan");
    let batch = cursor.to_arrow().expect("batch");
    assert_eq!(batch.num_rows(), 52);
}

#[test]
fn test_runtime_cast_failure() {
    let engine = engine();
    let mut cursor = engine
        .execute("SELECT CAST(name AS INT) FROM $planets")
        .expect("plan");
    assert!(cursor.fetch_all().is_err());
}

#[test]
fn test_safe_cast_yields_null() {
    let engine = engine();
    let mut cursor = engine
        .execute("SELECT TRY_CAST(name AS INT) FROM $planets")
        .expect("plan");
    let rows = cursor.fetch_all().expect("rows");
    assert_eq!(rows.len(), 9);
    assert!(rows
        .iter()
        .all(|r| matches!(r[0], meridian::ScalarValue::Null)));
}

#[test]
fn test_having_without_aggregate_rejected() {
    let engine = engine();
    let err = engine
        .execute("SELECT name FROM $planets HAVING name = 'Earth'")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_select_without_from_rejected() {
    let engine = engine();
    let err = engine.execute("SELECT 1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
}

#[test]
fn test_order_by_hidden_column_with_distinct_rejected() {
    let engine = engine();
    let err = engine
        .execute("SELECT DISTINCT name FROM $planets ORDER BY mass")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
