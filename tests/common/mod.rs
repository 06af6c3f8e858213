// each test binary uses a different subset of these helpers
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use rusqlite::{params, Connection};

use percurso::TransitStore;

static NEXT_FIXTURE: AtomicU32 = AtomicU32::new(0);

const SCHEMA: &str = "
CREATE TABLE stops(
    stop_id TEXT PRIMARY KEY,
    stop_name TEXT,
    stop_lat REAL,
    stop_lon REAL
);
CREATE TABLE trips(
    trip_id TEXT PRIMARY KEY,
    route_id TEXT,
    service_id TEXT,
    agency_id TEXT,
    trip_headsign TEXT,
    direction_id TEXT
);
CREATE TABLE routes(
    route_id TEXT PRIMARY KEY,
    agency_id TEXT,
    route_short_name TEXT,
    route_long_name TEXT,
    route_type INTEGER,
    route_color TEXT
);
CREATE TABLE stop_times(
    trip_id TEXT,
    stop_id TEXT,
    arrival_time TEXT,
    departure_time TEXT,
    stop_sequence INTEGER
);
CREATE TABLE calendar(
    service_id TEXT PRIMARY KEY,
    monday INTEGER, tuesday INTEGER, wednesday INTEGER, thursday INTEGER,
    friday INTEGER, saturday INTEGER, sunday INTEGER,
    start_date TEXT,
    end_date TEXT
);
CREATE TABLE calendar_dates(
    service_id TEXT,
    date TEXT,
    exception_type INTEGER
);
CREATE INDEX idx_st_stop_depart ON stop_times(stop_id, departure_time);
CREATE INDEX idx_st_trip ON stop_times(trip_id);
CREATE INDEX idx_trips_service ON trips(service_id);
";

/// A throw-away merged store in the system temp dir, removed on drop.
pub struct FixtureStore {
    pub path: PathBuf,
}

/// opt in with RUST_LOG=percurso=debug when a scenario needs explaining
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

impl FixtureStore {
    pub fn create(build: impl FnOnce(&Connection)) -> FixtureStore {
        init_logging();
        let path = std::env::temp_dir().join(format!(
            "percurso-fixture-{}-{}.db",
            std::process::id(),
            NEXT_FIXTURE.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_file(&path);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        build(&conn);
        conn.close().unwrap();
        FixtureStore { path }
    }

    pub fn open(&self) -> TransitStore {
        TransitStore::open(&self.path).unwrap()
    }
}

impl Drop for FixtureStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = std::fs::remove_file(self.path.with_extension("db-wal"));
        let _ = std::fs::remove_file(self.path.with_extension("db-shm"));
    }
}

pub fn insert_stop(conn: &Connection, stop_id: &str, name: &str, lat: f64, lon: f64) {
    conn.execute(
        "INSERT INTO stops(stop_id, stop_name, stop_lat, stop_lon) VALUES (?1, ?2, ?3, ?4)",
        params![stop_id, name, lat, lon],
    )
    .unwrap();
}

pub fn insert_route(conn: &Connection, route_id: &str, agency_id: &str, route_type: i64) {
    conn.execute(
        "INSERT INTO routes(route_id, agency_id, route_short_name, route_long_name, route_type, route_color)
         VALUES (?1, ?2, ?1, ?1, ?3, '')",
        params![route_id, agency_id, route_type],
    )
    .unwrap();
}

pub fn insert_trip(
    conn: &Connection,
    trip_id: &str,
    route_id: &str,
    service_id: &str,
    agency_id: &str,
    headsign: &str,
) {
    conn.execute(
        "INSERT INTO trips(trip_id, route_id, service_id, agency_id, trip_headsign, direction_id)
         VALUES (?1, ?2, ?3, ?4, ?5, '0')",
        params![trip_id, route_id, service_id, agency_id, headsign],
    )
    .unwrap();
}

pub fn insert_stop_time(
    conn: &Connection,
    trip_id: &str,
    stop_id: &str,
    arrival: &str,
    departure: &str,
    stop_sequence: i64,
) {
    conn.execute(
        "INSERT INTO stop_times(trip_id, stop_id, arrival_time, departure_time, stop_sequence)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![trip_id, stop_id, arrival, departure, stop_sequence],
    )
    .unwrap();
}

/// weekdays as (mon..sun) flags
pub fn insert_calendar(
    conn: &Connection,
    service_id: &str,
    weekdays: [i64; 7],
    start_date: &str,
    end_date: &str,
) {
    conn.execute(
        "INSERT INTO calendar(service_id, monday, tuesday, wednesday, thursday, friday, saturday, sunday, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            service_id,
            weekdays[0],
            weekdays[1],
            weekdays[2],
            weekdays[3],
            weekdays[4],
            weekdays[5],
            weekdays[6],
            start_date,
            end_date
        ],
    )
    .unwrap();
}

pub fn insert_calendar_date(
    conn: &Connection,
    service_id: &str,
    date: &str,
    exception_type: i64,
) {
    conn.execute(
        "INSERT INTO calendar_dates(service_id, date, exception_type) VALUES (?1, ?2, ?3)",
        params![service_id, date, exception_type],
    )
    .unwrap();
}

pub const WEEKDAYS: [i64; 7] = [1, 1, 1, 1, 1, 0, 0];
pub const ALL_DAYS: [i64; 7] = [1, 1, 1, 1, 1, 1, 1];
