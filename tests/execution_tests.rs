//! End-to-end execution tests over the built-in demo relations,
//! including the acceptance scenarios for joins, aggregation, top-k
//! sorting and DISTINCT.

use meridian::{Engine, Row, RowExt, ScalarValue};

fn engine() -> Engine {
    // Opt-in tracing: MERIDIAN_TEST_LOG=1 cargo test -- --nocapture
    if std::env::var("MERIDIAN_TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
    Engine::new().expect("engine")
}

fn all_rows(engine: &Engine, sql: &str) -> Vec<Row> {
    engine
        .execute(sql)
        .expect("plan")
        .fetch_all()
        .expect("fetch")
}

fn names(rows: &[Row], column: usize) -> Vec<String> {
    rows.iter()
        .map(|r| r.get_str(column).expect("utf8").to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Joins
// ---------------------------------------------------------------------------

#[test]
fn test_self_join_on_id() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT a.name FROM $planets a INNER JOIN $planets b ON a.id = b.id",
    );
    assert_eq!(rows.len(), 9);
    let mut planet_names = names(&rows, 0);
    planet_names.sort();
    assert!(planet_names.contains(&"Earth".to_string()));
    assert!(planet_names.contains(&"Pluto".to_string()));
}

#[test]
fn test_left_outer_join_with_count() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT p.name, COUNT(s.id) FROM $planets p \
         LEFT JOIN $satellites s ON p.id = s.planetId \
         GROUP BY p.name",
    );
    assert_eq!(rows.len(), 9);
    let mut counts = std::collections::HashMap::new();
    for row in &rows {
        counts.insert(
            row.get_str(0).expect("name").to_string(),
            row.get_i64(1).expect("count"),
        );
    }
    assert_eq!(counts["Mercury"], 0);
    assert_eq!(counts["Venus"], 0);
    assert_eq!(counts["Earth"], 1);
    assert_eq!(counts.values().sum::<i64>(), 177);
}

#[test]
fn test_inner_join_filters_unmatched() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT p.name FROM $planets p INNER JOIN $satellites s ON p.id = s.planetId",
    );
    // One output row per satellite; Mercury and Venus never appear.
    assert_eq!(rows.len(), 177);
    assert!(!names(&rows, 0).contains(&"Mercury".to_string()));
}

#[test]
fn test_right_outer_join_normalized() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT s.name, p.name FROM $satellites s RIGHT OUTER JOIN $planets p ON s.planetId = p.id",
    );
    // Every planet appears; moonless planets carry a NULL satellite.
    assert_eq!(rows.len(), 177 + 2);
    let null_satellites = rows
        .iter()
        .filter(|r| matches!(r[0], ScalarValue::Null))
        .count();
    assert_eq!(null_satellites, 2);
}

#[test]
fn test_full_outer_join() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT p.name, s.name FROM $planets p FULL OUTER JOIN $satellites s \
         ON p.id = s.planetId",
    );
    assert_eq!(rows.len(), 179);
}

#[test]
fn test_semi_and_anti_joins() {
    let engine = engine();
    let semi = all_rows(
        &engine,
        "SELECT p.name FROM $planets p LEFT SEMI JOIN $satellites s ON p.id = s.planetId",
    );
    // Planets that have at least one satellite.
    assert_eq!(semi.len(), 7);

    let anti = all_rows(
        &engine,
        "SELECT p.name FROM $planets p LEFT ANTI JOIN $satellites s ON p.id = s.planetId",
    );
    let mut anti_names = names(&anti, 0);
    anti_names.sort();
    assert_eq!(anti_names, vec!["Mercury", "Venus"]);
}

#[test]
fn test_cross_join_with_equality_becomes_inner() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT p.name FROM $planets p CROSS JOIN $satellites s WHERE p.id = s.planetId",
    );
    assert_eq!(rows.len(), 177);
}

#[test]
fn test_non_equi_join() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT a.name FROM $planets a INNER JOIN $planets b ON a.mass < b.mass \
         WHERE b.name = 'Earth'",
    );
    // Planets lighter than Earth: Mercury, Venus, Mars, Pluto.
    assert_eq!(rows.len(), 4);
}

#[test]
fn test_join_key_type_mismatch_rejected() {
    let engine = engine();
    let err = engine
        .execute("SELECT p.name FROM $planets p INNER JOIN $satellites s ON p.id = s.name")
        .unwrap_err();
    assert_eq!(err.kind(), meridian::ErrorKind::TypeMismatch);
}

// ---------------------------------------------------------------------------
// Sorting and limits
// ---------------------------------------------------------------------------

#[test]
fn test_top_three_satellites_by_radius() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT name FROM $satellites ORDER BY radius DESC LIMIT 3",
    );
    assert_eq!(names(&rows, 0), vec!["Ganymede", "Titan", "Callisto"]);
}

#[test]
fn test_order_by_with_offset() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT name FROM $satellites ORDER BY radius DESC LIMIT 2 OFFSET 2",
    );
    assert_eq!(names(&rows, 0), vec!["Callisto", "Io"]);
}

#[test]
fn test_heap_sort_matches_full_sort() {
    let engine = engine();
    let fused = all_rows(
        &engine,
        "SELECT name, radius FROM $satellites ORDER BY radius DESC LIMIT 10",
    );
    let full = all_rows(
        &engine,
        "SELECT name, radius FROM $satellites ORDER BY radius DESC",
    );
    assert_eq!(fused.len(), 10);
    for (a, b) in fused.iter().zip(full.iter()) {
        assert_eq!(a, b);
    }
}

#[test]
fn test_order_by_ascending_and_ordinal() {
    let engine = engine();
    let rows = all_rows(&engine, "SELECT name FROM $planets ORDER BY 1 LIMIT 2");
    assert_eq!(names(&rows, 0), vec!["Earth", "Jupiter"]);
}

#[test]
fn test_limit_zero() {
    let engine = engine();
    let rows = all_rows(&engine, "SELECT name FROM $planets LIMIT 0");
    assert!(rows.is_empty());
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[test]
fn test_global_aggregates() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT COUNT(*), SUM(numberOfMoons), AVG(gravity), MIN(mass), MAX(mass) FROM $planets",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i64(0), Some(9));
    assert_eq!(rows[0].get_i64(1), Some(190));
    assert!(rows[0].get_f64(2).expect("avg") > 0.0);
    assert_eq!(rows[0].get_f64(3), Some(0.0146));
    assert_eq!(rows[0].get_f64(4), Some(1898.0));
}

#[test]
fn test_group_by_with_having() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT planetId, COUNT(*) FROM $satellites GROUP BY planetId HAVING COUNT(*) > 20",
    );
    // Jupiter (67), Saturn (61), Uranus (27).
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_count_distinct() {
    let engine = engine();
    let rows = all_rows(&engine, "SELECT COUNT(DISTINCT planetId) FROM $satellites");
    assert_eq!(rows[0].get_i64(0), Some(7));
}

#[test]
fn test_aggregate_null_handling() {
    let engine = engine();
    // surfacePressure is NULL for the gas giants.
    let rows = all_rows(
        &engine,
        "SELECT COUNT(surfacePressure), COUNT(*) FROM $planets",
    );
    assert_eq!(rows[0].get_i64(0), Some(6));
    assert_eq!(rows[0].get_i64(1), Some(9));
}

#[test]
fn test_bare_column_outside_group_by_rejected() {
    let engine = engine();
    let err = engine
        .execute("SELECT name, COUNT(*) FROM $satellites GROUP BY planetId")
        .unwrap_err();
    assert_eq!(err.kind(), meridian::ErrorKind::UnresolvedName);
}

// ---------------------------------------------------------------------------
// DISTINCT
// ---------------------------------------------------------------------------

#[test]
fn test_distinct_composite_key() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT DISTINCT planetId, id_is_even FROM \
         (SELECT planetId, id % 2 = 0 AS id_is_even FROM $satellites)",
    );
    // Every planet with satellites has both parities except Earth
    // (a single moon): 6 * 2 + 1 = 13 pairs.
    let baseline = all_rows(
        &engine,
        "SELECT planetId, id % 2 = 0 AS id_is_even FROM $satellites",
    );
    let mut expected: Vec<&Row> = Vec::new();
    for row in &baseline {
        if !expected.iter().any(|r| **r == *row) {
            expected.push(row);
        }
    }
    assert_eq!(rows.len(), expected.len());
}

#[test]
fn test_distinct_single_column() {
    let engine = engine();
    let rows = all_rows(&engine, "SELECT DISTINCT planetId FROM $satellites");
    assert_eq!(rows.len(), 7);
}

// ---------------------------------------------------------------------------
// Set operations
// ---------------------------------------------------------------------------

#[test]
fn test_union_all_concatenates() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT name FROM $planets UNION ALL SELECT name FROM $planets",
    );
    assert_eq!(rows.len(), 18);
}

#[test]
fn test_union_deduplicates() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT name FROM $planets UNION SELECT name FROM $planets",
    );
    assert_eq!(rows.len(), 9);
}

#[test]
fn test_intersect_and_except() {
    let engine = engine();
    let intersect = all_rows(
        &engine,
        "SELECT planetId FROM $satellites INTERSECT SELECT id FROM $planets",
    );
    assert_eq!(intersect.len(), 7);

    let except = all_rows(
        &engine,
        "SELECT id FROM $planets EXCEPT SELECT planetId FROM $satellites",
    );
    // Mercury (1) and Venus (2) host no satellites.
    assert_eq!(except.len(), 2);
}

// ---------------------------------------------------------------------------
// UNNEST
// ---------------------------------------------------------------------------

#[test]
fn test_cross_join_unnest() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT a.name, m FROM $astronauts a CROSS JOIN UNNEST(a.missions) AS t(m) \
         WHERE a.name = 'John W. Young'",
    );
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0].get_str(1), Some("Gemini 3"));
}

#[test]
fn test_distinct_unnest() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT DISTINCT m FROM $astronauts a CROSS JOIN UNNEST(a.missions) AS t(m)",
    );
    // Apollo 11 flew three of the roster's astronauts but appears once.
    let missions = names(&rows, 0);
    assert_eq!(
        missions
            .iter()
            .filter(|m| m.as_str() == "Apollo 11")
            .count(),
        1
    );
}

// ---------------------------------------------------------------------------
// Expressions and filters
// ---------------------------------------------------------------------------

#[test]
fn test_where_with_functions() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT UPPER(name) FROM $planets WHERE LENGTH(name) <= 5 ORDER BY name",
    );
    assert_eq!(names(&rows, 0), vec!["EARTH", "MARS", "PLUTO", "VENUS"]);
}

#[test]
fn test_like_and_in_list() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT name FROM $satellites WHERE name LIKE 'Gany%'",
    );
    assert_eq!(names(&rows, 0), vec!["Ganymede"]);

    let rows = all_rows(
        &engine,
        "SELECT name FROM $planets WHERE id IN (1, 3, 9) ORDER BY id",
    );
    assert_eq!(names(&rows, 0), vec!["Mercury", "Earth", "Pluto"]);
}

#[test]
fn test_case_expression() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT name, CASE WHEN numberOfMoons = 0 THEN 'barren' \
         WHEN numberOfMoons < 10 THEN 'modest' ELSE 'crowded' END \
         FROM $planets WHERE name = 'Jupiter'",
    );
    assert_eq!(rows[0].get_str(1), Some("crowded"));
}

#[test]
fn test_between_and_is_null() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT name FROM $planets WHERE gravity BETWEEN 9 AND 12 ORDER BY name",
    );
    assert_eq!(names(&rows, 0), vec!["Earth", "Neptune", "Saturn"]);

    let rows = all_rows(
        &engine,
        "SELECT name FROM $planets WHERE surfacePressure IS NULL ORDER BY name",
    );
    assert_eq!(
        names(&rows, 0),
        vec!["Jupiter", "Neptune", "Saturn", "Uranus"]
    );
}

#[test]
fn test_in_subquery_rewrites_to_semi_join() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT name FROM $planets WHERE id IN (SELECT planetId FROM $satellites)",
    );
    assert_eq!(rows.len(), 7);

    let rows = all_rows(
        &engine,
        "SELECT name FROM $planets WHERE id NOT IN (SELECT planetId FROM $satellites) \
         ORDER BY name",
    );
    assert_eq!(names(&rows, 0), vec!["Mercury", "Venus"]);
}

#[test]
fn test_cte() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "WITH big AS (SELECT name, mass FROM $planets WHERE mass > 100) \
         SELECT name FROM big ORDER BY mass DESC",
    );
    assert_eq!(names(&rows, 0), vec!["Jupiter", "Saturn", "Neptune"]);
}

#[test]
fn test_try_division_by_zero() {
    let engine = engine();
    // Strict integer division by zero aborts the query.
    let mut cursor = engine
        .execute("SELECT id / (id - id) FROM $planets")
        .expect("plan");
    assert!(cursor.fetch_all().is_err());

    // TRY converts the failure to NULL.
    let rows = all_rows(&engine, "SELECT TRY(id / (id - id)) FROM $planets");
    assert_eq!(rows.len(), 9);
    assert!(rows.iter().all(|r| matches!(r[0], ScalarValue::Null)));
}
