//! Temporal binding tests: `FOR` clauses over the demo catalog and the
//! keyword-collision cases the binder must not trip over.

use meridian::{Engine, Row, RowExt};

fn engine() -> Engine {
    Engine::new().expect("engine")
}

fn all_rows(engine: &Engine, sql: &str) -> Vec<Row> {
    engine
        .execute(sql)
        .expect("plan")
        .fetch_all()
        .expect("fetch")
}

fn planet_names(engine: &Engine, sql: &str) -> Vec<String> {
    let mut out: Vec<String> = all_rows(engine, sql)
        .iter()
        .map(|r| r.get_str(0).expect("name").to_string())
        .collect();
    out.sort();
    out
}

#[test]
fn test_planets_as_of_1846() {
    let engine = engine();
    let names = planet_names(&engine, "SELECT name FROM $planets FOR '1846-01-01'");
    assert_eq!(
        names,
        vec!["Earth", "Jupiter", "Mars", "Mercury", "Neptune", "Saturn", "Venus"]
    );
}

#[test]
fn test_planets_as_of_1930() {
    let engine = engine();
    let names = planet_names(&engine, "SELECT name FROM $planets FOR '1930-03-14'");
    assert_eq!(names.len(), 8);
    assert!(names.contains(&"Uranus".to_string()));
    assert!(!names.contains(&"Pluto".to_string()));
}

#[test]
fn test_implicit_today_sees_full_catalog() {
    let engine = engine();
    let names = planet_names(&engine, "SELECT name FROM $planets");
    assert_eq!(names.len(), 9);
}

#[test]
fn test_explicit_today_placeholder() {
    let engine = engine();
    let names = planet_names(&engine, "SELECT name FROM $planets FOR TODAY");
    assert_eq!(names.len(), 9);
}

#[test]
fn test_for_dates_between() {
    let engine = engine();
    let names = planet_names(
        &engine,
        "SELECT name FROM $planets FOR DATES BETWEEN '1800-01-01' AND '1900-01-01'",
    );
    // The range ends in 1900: Uranus (catalogued 1850) is visible,
    // Pluto is not.
    assert_eq!(names.len(), 8);
    assert!(names.contains(&"Uranus".to_string()));
}

#[test]
fn test_for_dates_since() {
    let engine = engine();
    let names = planet_names(
        &engine,
        "SELECT name FROM $planets FOR DATES SINCE '1950-01-01'",
    );
    assert_eq!(names.len(), 9);
}

#[test]
fn test_temporal_join_binds_per_table() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT p.name FROM $planets p FOR '1846-01-01' \
         INNER JOIN $satellites s ON p.id = s.planetId",
    );
    // Uranus' and Pluto's satellites lose their planet.
    assert_eq!(rows.len(), 177 - 27 - 5);
}

#[test]
fn test_substring_for_keyword_untouched() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT SUBSTRING(name FROM 1 FOR 3) FROM $planets WHERE name = 'Mercury'",
    );
    assert_eq!(rows[0].get_str(0), Some("Mer"));
}

#[test]
fn test_extract_from_keyword_untouched() {
    let engine = engine();
    let rows = all_rows(
        &engine,
        "SELECT EXTRACT(YEAR FROM birth_date) FROM $astronauts \
         WHERE name = 'Neil A. Armstrong'",
    );
    assert_eq!(rows[0].get_i64(0), Some(1930));
}

#[test]
fn test_temporal_with_aggregation() {
    let engine = engine();
    let rows = all_rows(&engine, "SELECT COUNT(*) FROM $planets FOR '1846-01-01'");
    assert_eq!(rows[0].get_i64(0), Some(7));
}

#[test]
fn test_bad_temporal_clause_is_invalid_input() {
    let engine = engine();
    let err = engine
        .execute("SELECT name FROM $planets FOR '14-03-1930'")
        .unwrap_err();
    assert_eq!(err.kind(), meridian::ErrorKind::InvalidInput);

    let err = engine
        .execute("SELECT name FROM $planets FOR NEXT_TUESDAY")
        .unwrap_err();
    assert_eq!(err.kind(), meridian::ErrorKind::InvalidInput);
}
