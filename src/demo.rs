//! Built-in demo relations: `$planets`, `$satellites`, `$astronauts`.
//!
//! Three read-only in-memory tables used by tests and examples.
//! `$planets` carries a per-row "known from" date, so `FOR <date>`
//! queries return only the planets in the catalog as of that day.
//! `$astronauts` has a list-typed `missions` column for UNNEST.

use std::sync::Arc;

use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field};
use chrono::NaiveDate;

use crate::connector::MemoryConnector;
use crate::error::EngineResult;
use crate::morsel::{schema_from_fields, Morsel};
use crate::vector::{vector_from_scalars, ScalarValue, Vector};

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn days_since_epoch(d: NaiveDate) -> i32 {
    (d - date(1970, 1, 1)).num_days() as i32
}

/// Register all demo tables on `connector`.
pub fn register(connector: &MemoryConnector) -> EngineResult<()> {
    connector.register_temporal_table(
        "$planets",
        planets().to_record_batch()?,
        planet_visibility(),
    )?;
    connector.register_table("$satellites", satellites().to_record_batch()?)?;
    connector.register_table("$astronauts", astronauts().to_record_batch()?)?;
    Ok(())
}

/// The nine-planet catalog (Pluto included, grandfathered).
pub fn planets() -> Morsel {
    let schema = schema_from_fields(vec![
        ("id".to_string(), DataType::Int64, false),
        ("name".to_string(), DataType::Utf8, false),
        ("mass".to_string(), DataType::Float64, false),
        ("diameter".to_string(), DataType::Float64, false),
        ("density".to_string(), DataType::Float64, false),
        ("gravity".to_string(), DataType::Float64, false),
        ("orbitalPeriod".to_string(), DataType::Float64, false),
        ("meanTemperature".to_string(), DataType::Int64, false),
        ("numberOfMoons".to_string(), DataType::Int64, false),
        ("surfacePressure".to_string(), DataType::Float64, true),
    ]);

    // (name, mass 10^24 kg, diameter km, density kg/m3, gravity m/s2,
    //  orbital period days, mean temp C, moons, surface pressure bar)
    let rows: [(&str, f64, f64, f64, f64, f64, i64, i64, Option<f64>); 9] = [
        (
            "Mercury",
            0.33,
            4_879.0,
            5_427.0,
            3.7,
            88.0,
            167,
            0,
            Some(0.0),
        ),
        (
            "Venus",
            4.87,
            12_104.0,
            5_243.0,
            8.9,
            224.7,
            464,
            0,
            Some(92.0),
        ),
        (
            "Earth",
            5.97,
            12_756.0,
            5_514.0,
            9.8,
            365.2,
            15,
            1,
            Some(1.0),
        ),
        (
            "Mars",
            0.642,
            6_792.0,
            3_933.0,
            3.7,
            687.0,
            -65,
            2,
            Some(0.01),
        ),
        (
            "Jupiter", 1_898.0, 142_984.0, 1_326.0, 23.1, 4_331.0, -110, 79, None,
        ),
        (
            "Saturn", 568.0, 120_536.0, 687.0, 9.0, 10_747.0, -140, 62, None,
        ),
        (
            "Uranus", 86.8, 51_118.0, 1_271.0, 8.7, 30_589.0, -195, 27, None,
        ),
        (
            "Neptune", 102.0, 49_528.0, 1_638.0, 11.0, 59_800.0, -200, 14, None,
        ),
        (
            "Pluto",
            0.0146,
            2_370.0,
            2_095.0,
            0.7,
            90_560.0,
            -225,
            5,
            Some(0.00001),
        ),
    ];

    let ids: Int64Array = (1..=rows.len() as i64).collect::<Vec<_>>().into();
    let names: StringArray = rows.iter().map(|r| Some(r.0)).collect();
    let mass: Float64Array = rows.iter().map(|r| Some(r.1)).collect();
    let diameter: Float64Array = rows.iter().map(|r| Some(r.2)).collect();
    let density: Float64Array = rows.iter().map(|r| Some(r.3)).collect();
    let gravity: Float64Array = rows.iter().map(|r| Some(r.4)).collect();
    let orbital: Float64Array = rows.iter().map(|r| Some(r.5)).collect();
    let temperature: Int64Array = rows.iter().map(|r| Some(r.6)).collect();
    let moons: Int64Array = rows.iter().map(|r| Some(r.7)).collect();
    let pressure: Float64Array = rows.iter().map(|r| r.8).collect();

    let columns: Vec<Vector> = vec![
        Vector::new(Arc::new(ids) as ArrayRef),
        Vector::new(Arc::new(names) as ArrayRef),
        Vector::new(Arc::new(mass) as ArrayRef),
        Vector::new(Arc::new(diameter) as ArrayRef),
        Vector::new(Arc::new(density) as ArrayRef),
        Vector::new(Arc::new(gravity) as ArrayRef),
        Vector::new(Arc::new(orbital) as ArrayRef),
        Vector::new(Arc::new(temperature) as ArrayRef),
        Vector::new(Arc::new(moons) as ArrayRef),
        Vector::new(Arc::new(pressure) as ArrayRef),
    ];
    Morsel::try_new(schema, columns).unwrap_or_else(|_| unreachable!("static demo table"))
}

/// When each planet entered the catalog. The classical planets and
/// Neptune predate the catalog itself; Uranus and Pluto carry their
/// catalog admission dates, driving the as-of test fixtures.
pub fn planet_visibility() -> Vec<Option<NaiveDate>> {
    vec![
        None,                    // Mercury
        None,                    // Venus
        None,                    // Earth
        None,                    // Mars
        None,                    // Jupiter
        None,                    // Saturn
        Some(date(1850, 1, 1)),  // Uranus
        None,                    // Neptune
        Some(date(1930, 5, 24)), // Pluto
    ]
}

/// The 177-row satellite table.
pub fn satellites() -> Morsel {
    let schema = schema_from_fields(vec![
        ("id".to_string(), DataType::Int64, false),
        ("planetId".to_string(), DataType::Int64, false),
        ("name".to_string(), DataType::Utf8, false),
        ("radius".to_string(), DataType::Float64, false),
        ("gm".to_string(), DataType::Float64, false),
        ("magnitude".to_string(), DataType::Float64, true),
    ]);

    // (planetId, name, mean radius km, GM km3/s2, visual magnitude)
    #[allow(clippy::type_complexity)]
    let rows: Vec<(i64, &str, f64, f64, Option<f64>)> = vec![
        // Earth (1)
        (3, "Moon", 1737.4, 4902.801, Some(-12.74)),
        // Mars (2)
        (4, "Phobos", 11.1, 0.0007, Some(11.4)),
        (4, "Deimos", 6.2, 0.0001, Some(12.45)),
        // Jupiter (67)
        (5, "Metis", 21.5, 0.0025, Some(17.5)),
        (5, "Adrastea", 8.2, 0.0005, Some(18.7)),
        (5, "Amalthea", 83.5, 0.138, Some(14.1)),
        (5, "Thebe", 49.3, 0.03, Some(16.0)),
        (5, "Io", 1821.5, 5959.916, Some(5.02)),
        (5, "Europa", 1560.8, 3202.739, Some(5.29)),
        (5, "Ganymede", 2631.2, 9887.834, Some(4.61)),
        (5, "Callisto", 2410.3, 7179.289, Some(5.65)),
        (5, "Themisto", 4.0, 0.000045, Some(21.0)),
        (5, "Leda", 10.0, 0.00073, Some(20.2)),
        (5, "Himalia", 85.0, 0.15, Some(14.8)),
        (5, "Lysithea", 18.0, 0.0042, Some(18.2)),
        (5, "Elara", 43.0, 0.058, Some(16.6)),
        (5, "Dia", 2.0, 0.000006, Some(22.4)),
        (5, "Carpo", 1.5, 0.000003, Some(23.0)),
        (5, "Euporie", 1.0, 0.000001, Some(23.1)),
        (5, "Thelxinoe", 1.0, 0.000001, Some(23.5)),
        (5, "Euanthe", 1.5, 0.000003, Some(22.8)),
        (5, "Helike", 2.0, 0.000006, Some(22.6)),
        (5, "Orthosie", 1.0, 0.000001, Some(23.1)),
        (5, "Iocaste", 2.6, 0.000013, Some(21.8)),
        (5, "Ananke", 14.0, 0.002, Some(18.9)),
        (5, "Praxidike", 3.4, 0.000029, Some(21.2)),
        (5, "Harpalyke", 2.2, 0.000008, Some(22.2)),
        (5, "Hermippe", 2.0, 0.000006, Some(22.1)),
        (5, "Thyone", 2.0, 0.000006, Some(22.3)),
        (5, "Mneme", 1.0, 0.000001, Some(23.3)),
        (5, "Aitne", 1.5, 0.000003, Some(22.7)),
        (5, "Kale", 1.0, 0.000001, Some(23.0)),
        (5, "Taygete", 2.5, 0.000011, Some(21.9)),
        (5, "Chaldene", 1.9, 0.000005, Some(22.5)),
        (5, "Erinome", 1.6, 0.000003, Some(22.8)),
        (5, "Aoede", 2.0, 0.000006, Some(22.5)),
        (5, "Kallichore", 1.0, 0.000001, Some(23.7)),
        (5, "Kalyke", 2.6, 0.000013, Some(21.8)),
        (5, "Carme", 23.0, 0.0088, Some(17.9)),
        (5, "Callirrhoe", 4.3, 0.000058, Some(20.7)),
        (5, "Eurydome", 1.5, 0.000003, Some(22.7)),
        (5, "Pasithee", 1.0, 0.000001, Some(23.2)),
        (5, "Kore", 1.0, 0.000001, Some(23.6)),
        (5, "Cyllene", 1.0, 0.000001, Some(23.2)),
        (5, "Eukelade", 2.0, 0.000006, Some(22.6)),
        (5, "Pasiphae", 30.0, 0.02, Some(16.9)),
        (5, "Hegemone", 1.5, 0.000003, Some(22.8)),
        (5, "Arche", 1.5, 0.000003, Some(22.8)),
        (5, "Isonoe", 1.9, 0.000005, Some(22.5)),
        (5, "Sinope", 19.0, 0.005, Some(18.1)),
        (5, "Sponde", 1.0, 0.000001, Some(23.0)),
        (5, "Autonoe", 2.0, 0.000006, Some(22.0)),
        (5, "Megaclite", 2.7, 0.000014, Some(21.7)),
        (5, "Valetudo", 0.5, 0.0000003, Some(24.0)),
        (5, "S/2003 J2", 1.0, 0.000001, Some(23.2)),
        (5, "S/2003 J3", 1.0, 0.000001, Some(23.4)),
        (5, "S/2003 J4", 1.0, 0.000001, Some(23.0)),
        (5, "S/2003 J5", 2.0, 0.000006, Some(22.4)),
        (5, "S/2003 J9", 0.5, 0.0000003, Some(23.7)),
        (5, "S/2003 J10", 1.0, 0.000001, Some(23.6)),
        (5, "S/2003 J12", 0.5, 0.0000003, Some(23.9)),
        (5, "S/2003 J15", 1.0, 0.000001, Some(23.5)),
        (5, "S/2003 J16", 1.0, 0.000001, Some(23.3)),
        (5, "S/2003 J18", 1.0, 0.000001, Some(23.4)),
        (5, "S/2003 J19", 1.0, 0.000001, Some(23.7)),
        (5, "S/2003 J23", 1.0, 0.000001, Some(23.6)),
        (5, "S/2010 J1", 1.0, 0.000001, Some(23.2)),
        (5, "S/2010 J2", 0.5, 0.0000003, Some(24.0)),
        (5, "S/2011 J1", 0.5, 0.0000003, Some(23.7)),
        (5, "S/2011 J2", 0.5, 0.0000003, Some(23.8)),
        // Saturn (61)
        (6, "Pan", 14.1, 0.00033, Some(19.4)),
        (6, "Daphnis", 3.8, 0.000005, Some(22.0)),
        (6, "Atlas", 15.1, 0.00044, Some(19.0)),
        (6, "Prometheus", 43.1, 0.01074, Some(15.8)),
        (6, "Pandora", 40.7, 0.00924, Some(16.4)),
        (6, "Epimetheus", 58.1, 0.03513, Some(15.6)),
        (6, "Janus", 89.5, 0.1263, Some(14.4)),
        (6, "Aegaeon", 0.3, 0.0000001, Some(26.5)),
        (6, "Mimas", 198.2, 2.5026, Some(12.8)),
        (6, "Methone", 1.6, 0.000001, Some(23.0)),
        (6, "Anthe", 1.0, 0.0000005, Some(24.0)),
        (6, "Pallene", 2.5, 0.000002, Some(22.5)),
        (6, "Enceladus", 252.1, 7.2027, Some(11.8)),
        (6, "Telesto", 12.4, 0.00027, Some(18.5)),
        (6, "Tethys", 531.1, 41.2067, Some(10.2)),
        (6, "Calypso", 10.7, 0.00017, Some(18.7)),
        (6, "Dione", 561.4, 73.1146, Some(10.4)),
        (6, "Helene", 17.6, 0.00076, Some(18.4)),
        (6, "Polydeuces", 1.3, 0.0000008, Some(23.5)),
        (6, "Rhea", 763.8, 153.9426, Some(9.6)),
        (6, "Titan", 2574.7, 8978.1382, Some(8.4)),
        (6, "Hyperion", 135.0, 0.3727, Some(14.4)),
        (6, "Iapetus", 734.5, 120.5038, Some(11.0)),
        (6, "Kiviuq", 8.0, 0.000022, Some(22.0)),
        (6, "Ijiraq", 6.0, 0.000008, Some(22.6)),
        (6, "Phoebe", 106.5, 0.5532, Some(16.4)),
        (6, "Paaliaq", 11.0, 0.000055, Some(21.3)),
        (6, "Skathi", 4.0, 0.000002, Some(23.6)),
        (6, "Albiorix", 16.0, 0.00014, Some(20.5)),
        (6, "Bebhionn", 3.0, 0.000001, Some(24.1)),
        (6, "Erriapus", 5.0, 0.000005, Some(23.0)),
        (6, "Skoll", 3.0, 0.000001, Some(24.5)),
        (6, "Siarnaq", 20.0, 0.00026, Some(20.1)),
        (6, "Tarqeq", 3.5, 0.000002, Some(23.9)),
        (6, "Greip", 3.0, 0.000001, Some(24.4)),
        (6, "Hyrrokkin", 4.0, 0.000002, Some(23.5)),
        (6, "Jarnsaxa", 3.0, 0.000001, Some(24.7)),
        (6, "Tarvos", 7.5, 0.000018, Some(22.1)),
        (6, "Mundilfari", 3.5, 0.000002, Some(23.8)),
        (6, "Bergelmir", 3.0, 0.000001, Some(24.2)),
        (6, "Narvi", 3.5, 0.000002, Some(23.8)),
        (6, "Suttungr", 3.5, 0.000002, Some(23.9)),
        (6, "Hati", 3.0, 0.000001, Some(24.4)),
        (6, "Farbauti", 2.5, 0.0000008, Some(24.7)),
        (6, "Thrymr", 3.5, 0.000002, Some(23.9)),
        (6, "Aegir", 3.0, 0.000001, Some(24.4)),
        (6, "Bestla", 3.5, 0.000002, Some(23.8)),
        (6, "Fenrir", 2.0, 0.0000005, Some(25.0)),
        (6, "Surtur", 3.0, 0.000001, Some(24.8)),
        (6, "Kari", 3.5, 0.000002, Some(23.9)),
        (6, "Ymir", 9.0, 0.000033, Some(21.7)),
        (6, "Loge", 3.0, 0.000001, Some(24.6)),
        (6, "Fornjot", 3.0, 0.000001, Some(24.6)),
        (6, "S/2004 S7", 3.0, 0.000001, Some(24.5)),
        (6, "S/2004 S12", 2.5, 0.0000008, Some(24.8)),
        (6, "S/2004 S13", 3.0, 0.000001, Some(24.5)),
        (6, "S/2004 S17", 2.0, 0.0000005, Some(25.2)),
        (6, "S/2006 S1", 3.0, 0.000001, Some(24.6)),
        (6, "S/2006 S3", 3.0, 0.000001, Some(24.6)),
        (6, "S/2007 S2", 3.0, 0.000001, Some(24.4)),
        (6, "S/2007 S3", 2.5, 0.0000008, Some(24.9)),
        // Uranus (27)
        (7, "Cordelia", 20.1, 0.0000299, Some(23.6)),
        (7, "Ophelia", 21.4, 0.0000356, Some(23.3)),
        (7, "Bianca", 25.7, 0.0000617, Some(22.5)),
        (7, "Cressida", 39.8, 0.000229, Some(21.6)),
        (7, "Desdemona", 32.0, 0.000119, Some(22.0)),
        (7, "Juliet", 46.8, 0.000372, Some(21.1)),
        (7, "Portia", 67.6, 0.00112, Some(20.4)),
        (7, "Rosalind", 36.0, 0.000169, Some(21.8)),
        (7, "Cupid", 9.0, 0.0000025, Some(25.8)),
        (7, "Belinda", 40.3, 0.000238, Some(21.5)),
        (7, "Perdita", 13.0, 0.0000077, Some(25.0)),
        (7, "Puck", 81.0, 0.00193, Some(19.8)),
        (7, "Mab", 12.0, 0.0000061, Some(24.6)),
        (7, "Miranda", 235.8, 4.4, Some(15.8)),
        (7, "Ariel", 578.9, 86.4, Some(13.7)),
        (7, "Umbriel", 584.7, 81.5, Some(14.5)),
        (7, "Titania", 788.9, 228.2, Some(13.5)),
        (7, "Oberon", 761.4, 192.4, Some(13.7)),
        (7, "Francisco", 11.0, 0.0000047, Some(25.0)),
        (7, "Caliban", 36.0, 0.000169, Some(22.4)),
        (7, "Stephano", 16.0, 0.0000145, Some(24.1)),
        (7, "Trinculo", 9.0, 0.0000025, Some(25.4)),
        (7, "Sycorax", 75.0, 0.00154, Some(20.8)),
        (7, "Margaret", 10.0, 0.0000034, Some(25.2)),
        (7, "Prospero", 25.0, 0.0000568, Some(23.2)),
        (7, "Setebos", 24.0, 0.0000503, Some(23.3)),
        (7, "Ferdinand", 10.0, 0.0000034, Some(25.1)),
        // Neptune (14)
        (8, "Naiad", 33.0, 0.00013, Some(23.9)),
        (8, "Thalassa", 41.0, 0.00025, Some(23.3)),
        (8, "Despina", 75.0, 0.0014, Some(22.0)),
        (8, "Galatea", 88.0, 0.0025, Some(21.9)),
        (8, "Larissa", 97.0, 0.0033, Some(21.5)),
        (8, "Hippocamp", 17.4, 0.00002, Some(26.5)),
        (8, "Proteus", 210.0, 0.031, Some(19.7)),
        (8, "Triton", 1352.6, 1427.598, Some(13.5)),
        (8, "Nereid", 170.0, 2.06, Some(19.2)),
        (8, "Halimede", 31.0, 0.00012, Some(24.5)),
        (8, "Sao", 22.0, 0.000043, Some(25.5)),
        (8, "Laomedeia", 21.0, 0.000039, Some(25.5)),
        (8, "Psamathe", 20.0, 0.000033, Some(25.5)),
        (8, "Neso", 30.0, 0.00011, Some(24.6)),
        // Pluto (5)
        (9, "Charon", 603.6, 105.88, Some(16.8)),
        (9, "Styx", 5.2, 0.0000005, Some(27.0)),
        (9, "Nix", 23.0, 0.000003, Some(23.7)),
        (9, "Kerberos", 6.0, 0.0000011, Some(26.1)),
        (9, "Hydra", 30.5, 0.0000032, Some(23.3)),
    ];
    debug_assert_eq!(rows.len(), 177);

    let ids: Int64Array = (1..=rows.len() as i64).collect::<Vec<_>>().into();
    let planet_ids: Int64Array = rows.iter().map(|r| Some(r.0)).collect();
    let names: StringArray = rows.iter().map(|r| Some(r.1)).collect();
    let radius: Float64Array = rows.iter().map(|r| Some(r.2)).collect();
    let gm: Float64Array = rows.iter().map(|r| Some(r.3)).collect();
    let magnitude: Float64Array = rows.iter().map(|r| r.4).collect();

    let columns: Vec<Vector> = vec![
        Vector::new(Arc::new(ids) as ArrayRef),
        Vector::new(Arc::new(planet_ids) as ArrayRef),
        Vector::new(Arc::new(names) as ArrayRef),
        Vector::new(Arc::new(radius) as ArrayRef),
        Vector::new(Arc::new(gm) as ArrayRef),
        Vector::new(Arc::new(magnitude) as ArrayRef),
    ];
    Morsel::try_new(schema, columns).unwrap_or_else(|_| unreachable!("static demo table"))
}

/// A compact astronaut roster; `missions` is a list column.
pub fn astronauts() -> Morsel {
    let schema = schema_from_fields(vec![
        ("name".to_string(), DataType::Utf8, false),
        ("year".to_string(), DataType::Int64, true),
        ("group".to_string(), DataType::Int64, true),
        ("status".to_string(), DataType::Utf8, false),
        ("birth_date".to_string(), DataType::Date32, true),
        ("gender".to_string(), DataType::Utf8, false),
        ("space_flights".to_string(), DataType::Int64, false),
        ("space_flight_hours".to_string(), DataType::Int64, false),
        (
            "missions".to_string(),
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            true,
        ),
    ]);

    struct Astronaut {
        name: &'static str,
        year: Option<i64>,
        group: Option<i64>,
        status: &'static str,
        birth: Option<(i32, u32, u32)>,
        gender: &'static str,
        flights: i64,
        hours: i64,
        missions: Option<&'static [&'static str]>,
    }

    let rows = [
        Astronaut {
            name: "Neil A. Armstrong",
            year: Some(1962),
            group: Some(2),
            status: "Deceased",
            birth: Some((1930, 8, 5)),
            gender: "Male",
            flights: 2,
            hours: 205,
            missions: Some(&["Gemini 8", "Apollo 11"]),
        },
        Astronaut {
            name: "Buzz Aldrin",
            year: Some(1963),
            group: Some(3),
            status: "Retired",
            birth: Some((1930, 1, 20)),
            gender: "Male",
            flights: 2,
            hours: 289,
            missions: Some(&["Gemini 12", "Apollo 11"]),
        },
        Astronaut {
            name: "Michael Collins",
            year: Some(1963),
            group: Some(3),
            status: "Deceased",
            birth: Some((1930, 10, 31)),
            gender: "Male",
            flights: 2,
            hours: 266,
            missions: Some(&["Gemini 10", "Apollo 11"]),
        },
        Astronaut {
            name: "John H. Glenn Jr.",
            year: Some(1959),
            group: Some(1),
            status: "Deceased",
            birth: Some((1921, 7, 18)),
            gender: "Male",
            flights: 2,
            hours: 218,
            missions: Some(&["Mercury-Atlas 6", "STS-95"]),
        },
        Astronaut {
            name: "Alan B. Shepard Jr.",
            year: Some(1959),
            group: Some(1),
            status: "Deceased",
            birth: Some((1923, 11, 18)),
            gender: "Male",
            flights: 2,
            hours: 216,
            missions: Some(&["Mercury-Redstone 3", "Apollo 14"]),
        },
        Astronaut {
            name: "Virgil I. Grissom",
            year: Some(1959),
            group: Some(1),
            status: "Deceased",
            birth: Some((1926, 4, 3)),
            gender: "Male",
            flights: 2,
            hours: 5,
            missions: Some(&["Mercury-Redstone 4", "Gemini 3"]),
        },
        Astronaut {
            name: "John W. Young",
            year: Some(1962),
            group: Some(2),
            status: "Deceased",
            birth: Some((1930, 9, 24)),
            gender: "Male",
            flights: 6,
            hours: 835,
            missions: Some(&[
                "Gemini 3",
                "Gemini 10",
                "Apollo 10",
                "Apollo 16",
                "STS-1",
                "STS-9",
            ]),
        },
        Astronaut {
            name: "James A. Lovell Jr.",
            year: Some(1962),
            group: Some(2),
            status: "Retired",
            birth: Some((1928, 3, 25)),
            gender: "Male",
            flights: 4,
            hours: 715,
            missions: Some(&["Gemini 7", "Gemini 12", "Apollo 8", "Apollo 13"]),
        },
        Astronaut {
            name: "Eugene A. Cernan",
            year: Some(1963),
            group: Some(3),
            status: "Deceased",
            birth: Some((1934, 3, 14)),
            gender: "Male",
            flights: 3,
            hours: 566,
            missions: Some(&["Gemini 9A", "Apollo 10", "Apollo 17"]),
        },
        Astronaut {
            name: "Harrison H. Schmitt",
            year: Some(1965),
            group: Some(4),
            status: "Retired",
            birth: Some((1935, 7, 3)),
            gender: "Male",
            flights: 1,
            hours: 301,
            missions: Some(&["Apollo 17"]),
        },
        Astronaut {
            name: "Fred W. Haise Jr.",
            year: Some(1966),
            group: Some(5),
            status: "Retired",
            birth: Some((1933, 11, 14)),
            gender: "Male",
            flights: 1,
            hours: 142,
            missions: Some(&["Apollo 13"]),
        },
        Astronaut {
            name: "Thomas K. Mattingly II",
            year: Some(1966),
            group: Some(5),
            status: "Deceased",
            birth: Some((1936, 3, 17)),
            gender: "Male",
            flights: 3,
            hours: 508,
            missions: Some(&["Apollo 16", "STS-4", "STS-51-C"]),
        },
        Astronaut {
            name: "Sally K. Ride",
            year: Some(1978),
            group: Some(8),
            status: "Deceased",
            birth: Some((1951, 5, 26)),
            gender: "Female",
            flights: 2,
            hours: 343,
            missions: Some(&["STS-7", "STS-41-G"]),
        },
        Astronaut {
            name: "Judith A. Resnik",
            year: Some(1978),
            group: Some(8),
            status: "Deceased",
            birth: Some((1949, 4, 5)),
            gender: "Female",
            flights: 2,
            hours: 144,
            missions: Some(&["STS-41-D", "STS-51-L"]),
        },
        Astronaut {
            name: "Kathryn D. Sullivan",
            year: Some(1978),
            group: Some(8),
            status: "Retired",
            birth: Some((1951, 10, 3)),
            gender: "Female",
            flights: 3,
            hours: 532,
            missions: Some(&["STS-41-G", "STS-31", "STS-45"]),
        },
        Astronaut {
            name: "Guion S. Bluford Jr.",
            year: Some(1978),
            group: Some(8),
            status: "Retired",
            birth: Some((1942, 11, 22)),
            gender: "Male",
            flights: 4,
            hours: 688,
            missions: Some(&["STS-8", "STS-61-A", "STS-39", "STS-53"]),
        },
        Astronaut {
            name: "Shannon W. Lucid",
            year: Some(1978),
            group: Some(8),
            status: "Retired",
            birth: Some((1943, 1, 14)),
            gender: "Female",
            flights: 5,
            hours: 5354,
            missions: Some(&["STS-51-G", "STS-34", "STS-43", "STS-58", "STS-76"]),
        },
        Astronaut {
            name: "Story Musgrave",
            year: Some(1967),
            group: Some(6),
            status: "Retired",
            birth: Some((1935, 8, 19)),
            gender: "Male",
            flights: 6,
            hours: 1281,
            missions: Some(&["STS-6", "STS-51-F", "STS-33", "STS-44", "STS-61", "STS-80"]),
        },
        Astronaut {
            name: "Mae C. Jemison",
            year: Some(1987),
            group: Some(12),
            status: "Retired",
            birth: Some((1956, 10, 17)),
            gender: "Female",
            flights: 1,
            hours: 190,
            missions: Some(&["STS-47"]),
        },
        Astronaut {
            name: "Ellen Ochoa",
            year: Some(1990),
            group: Some(13),
            status: "Retired",
            birth: Some((1958, 5, 10)),
            gender: "Female",
            flights: 4,
            hours: 978,
            missions: Some(&["STS-56", "STS-66", "STS-96", "STS-110"]),
        },
        Astronaut {
            name: "Eileen M. Collins",
            year: Some(1990),
            group: Some(13),
            status: "Retired",
            birth: Some((1956, 11, 19)),
            gender: "Female",
            flights: 4,
            hours: 872,
            missions: Some(&["STS-63", "STS-84", "STS-93", "STS-114"]),
        },
        Astronaut {
            name: "Franklin R. Chang-Diaz",
            year: Some(1980),
            group: Some(9),
            status: "Retired",
            birth: Some((1950, 4, 5)),
            gender: "Male",
            flights: 7,
            hours: 1601,
            missions: Some(&[
                "STS-61-C", "STS-34", "STS-46", "STS-60", "STS-75", "STS-91", "STS-111",
            ]),
        },
        Astronaut {
            name: "Peggy A. Whitson",
            year: Some(1996),
            group: Some(16),
            status: "Active",
            birth: Some((1960, 2, 9)),
            gender: "Female",
            flights: 3,
            hours: 15982,
            missions: Some(&["Expedition 5", "Expedition 16", "Expedition 50"]),
        },
        Astronaut {
            name: "Scott J. Kelly",
            year: Some(1996),
            group: Some(16),
            status: "Retired",
            birth: Some((1964, 2, 21)),
            gender: "Male",
            flights: 4,
            hours: 12504,
            missions: Some(&["STS-103", "STS-118", "Expedition 26", "Expedition 45"]),
        },
        Astronaut {
            name: "Mark E. Kelly",
            year: Some(1996),
            group: Some(16),
            status: "Retired",
            birth: Some((1964, 2, 21)),
            gender: "Male",
            flights: 4,
            hours: 1286,
            missions: Some(&["STS-108", "STS-121", "STS-124", "STS-134"]),
        },
        Astronaut {
            name: "Joseph M. Acaba",
            year: Some(2004),
            group: Some(19),
            status: "Active",
            birth: Some((1967, 5, 17)),
            gender: "Male",
            flights: 3,
            hours: 7336,
            missions: None,
        },
    ];

    let names: StringArray = rows.iter().map(|r| Some(r.name)).collect();
    let years: Int64Array = rows.iter().map(|r| r.year).collect();
    let groups: Int64Array = rows.iter().map(|r| r.group).collect();
    let status: StringArray = rows.iter().map(|r| Some(r.status)).collect();
    let birth: Date32Array = rows
        .iter()
        .map(|r| r.birth.map(|(y, m, d)| days_since_epoch(date(y, m, d))))
        .collect();
    let gender: StringArray = rows.iter().map(|r| Some(r.gender)).collect();
    let flights: Int64Array = rows.iter().map(|r| Some(r.flights)).collect();
    let hours: Int64Array = rows.iter().map(|r| Some(r.hours)).collect();

    let mission_scalars: Vec<ScalarValue> = rows
        .iter()
        .map(|r| match r.missions {
            Some(list) => ScalarValue::List(
                list.iter()
                    .map(|m| ScalarValue::Utf8((*m).to_string()))
                    .collect(),
            ),
            None => ScalarValue::Null,
        })
        .collect();
    let missions = vector_from_scalars(
        &DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
        &mission_scalars,
    )
    .unwrap_or_else(|_| unreachable!("static demo table"));

    let columns: Vec<Vector> = vec![
        Vector::new(Arc::new(names) as ArrayRef),
        Vector::new(Arc::new(years) as ArrayRef),
        Vector::new(Arc::new(groups) as ArrayRef),
        Vector::new(Arc::new(status) as ArrayRef),
        Vector::new(Arc::new(birth) as ArrayRef),
        Vector::new(Arc::new(gender) as ArrayRef),
        Vector::new(Arc::new(flights) as ArrayRef),
        Vector::new(Arc::new(hours) as ArrayRef),
        Vector::new(missions),
    ];
    Morsel::try_new(schema, columns).unwrap_or_else(|_| unreachable!("static demo table"))
}
