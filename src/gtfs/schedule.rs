use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use log::debug;

use crate::gtfs::gtfstime::{Duration, Time};
use crate::gtfs::store::{StoreError, TransitStore};
use crate::gtfs::{CalendarRow, ExceptionType};
use crate::model::{Departure, TripMeta, TripStopEntry};

/// how far ahead of the requested time a departure query looks
const DEPARTURE_WINDOW_MIN: i32 = 120;
/// date filtering discards rows after the SQL limit, so fetch extra
const OVERSAMPLE: usize = 5;
/// next-day departures before this time take part in overnight rollover
const EARLY_MORNING_END: Time = Time::from_hms(6, 0, 0);

/// Timetable queries against the merged store, with the caches the
/// search loop leans on: trip metadata, full per-trip stop sequences,
/// valid services per date and the once-computed uncalendared set.
/// Entries are only ever added; `clear_cache` drops the lot.
pub struct ScheduleService<'s> {
    store: &'s TransitStore,
    trip_meta: RwLock<HashMap<String, Arc<TripMeta>>>,
    trip_stops: RwLock<HashMap<String, Arc<Vec<TripStopEntry>>>>,
    services_by_date: RwLock<HashMap<NaiveDate, Arc<HashSet<String>>>>,
    uncalendared: RwLock<Option<Arc<HashSet<String>>>>,
}

impl<'s> ScheduleService<'s> {
    pub fn new(store: &'s TransitStore) -> ScheduleService<'s> {
        ScheduleService {
            store,
            trip_meta: RwLock::new(HashMap::new()),
            trip_stops: RwLock::new(HashMap::new()),
            services_by_date: RwLock::new(HashMap::new()),
            uncalendared: RwLock::new(None),
        }
    }

    /// Service ids running on the given date: the regular calendar
    /// filtered by weekday and window, overlaid with the exception
    /// table, plus every uncalendared service. Computed once per date.
    pub fn valid_services(&self, date: NaiveDate) -> Result<Arc<HashSet<String>>, StoreError> {
        if let Some(cached) = read_lock(&self.services_by_date).get(&date).cloned() {
            return Ok(cached);
        }

        let mut services: HashSet<String> = HashSet::new();
        let rows = tolerate_missing_schema(
            self.store.read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT service_id,
                            monday, tuesday, wednesday, thursday, friday, saturday, sunday,
                            start_date, end_date
                     FROM calendar",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(CalendarRow {
                        service_id: row.get(0)?,
                        weekdays: [
                            row.get::<_, i64>(1)? != 0,
                            row.get::<_, i64>(2)? != 0,
                            row.get::<_, i64>(3)? != 0,
                            row.get::<_, i64>(4)? != 0,
                            row.get::<_, i64>(5)? != 0,
                            row.get::<_, i64>(6)? != 0,
                            row.get::<_, i64>(7)? != 0,
                        ],
                        start_date: row.get(8)?,
                        end_date: row.get(9)?,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            }),
            "calendar",
        )?;
        for row in rows {
            if row.runs_on(date) {
                services.insert(row.service_id);
            }
        }

        let ymd = date.format("%Y%m%d").to_string();
        let exceptions = tolerate_missing_schema(
            self.store.read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT service_id, exception_type FROM calendar_dates WHERE date = ?1",
                )?;
                let rows = stmt.query_map([&ymd], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            }),
            "calendar_dates",
        )?;
        for (service_id, exception_type) in exceptions {
            match ExceptionType::from_gtfs(exception_type) {
                Some(ExceptionType::Added) => {
                    services.insert(service_id);
                }
                Some(ExceptionType::Removed) => {
                    services.remove(&service_id);
                }
                None => debug!(
                    "ignoring exception_type {} for service {}",
                    exception_type, service_id
                ),
            }
        }

        services.extend(self.uncalendared_services()?.iter().cloned());

        let services = Arc::new(services);
        write_lock(&self.services_by_date).insert(date, services.clone());
        Ok(services)
    }

    /// Services referenced by trips but present in neither calendar
    /// table. Some of the merged agency feeds ship trips without any
    /// calendar rows; those services are treated as always active.
    fn uncalendared_services(&self) -> Result<Arc<HashSet<String>>, StoreError> {
        if let Some(cached) = read_lock(&self.uncalendared).clone() {
            return Ok(cached);
        }

        let mut services = self.distinct_service_ids("SELECT DISTINCT service_id FROM trips", "trips")?;
        for id in self.distinct_service_ids("SELECT DISTINCT service_id FROM calendar", "calendar")? {
            services.remove(&id);
        }
        for id in
            self.distinct_service_ids("SELECT DISTINCT service_id FROM calendar_dates", "calendar_dates")?
        {
            services.remove(&id);
        }

        let services = Arc::new(services);
        *write_lock(&self.uncalendared) = Some(services.clone());
        Ok(services)
    }

    fn distinct_service_ids(&self, sql: &str, table: &str) -> Result<HashSet<String>, StoreError> {
        tolerate_missing_schema(
            self.store.read(|conn| {
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<HashSet<_>, _>>()
            }),
            table,
        )
    }

    /// Trip metadata joined from trips and routes, cached per trip.
    /// Missing trips come back defaulted rather than failing the search.
    pub fn trip_meta(&self, trip_id: &str) -> Result<Arc<TripMeta>, StoreError> {
        if let Some(cached) = read_lock(&self.trip_meta).get(trip_id).cloned() {
            return Ok(cached);
        }

        let meta = tolerate_missing_schema(
            self.store.read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT COALESCE(t.route_id, ''),
                            COALESCE(t.agency_id, ''),
                            COALESCE(t.trip_headsign, ''),
                            COALESCE(r.route_type, 3),
                            COALESCE(t.service_id, '')
                     FROM trips t
                     LEFT JOIN routes r ON t.route_id = r.route_id
                     WHERE t.trip_id = ?1",
                )?;
                let mut rows = stmt.query_map([trip_id], |row| {
                    Ok(TripMeta {
                        route_id: row.get(0)?,
                        agency_id: row.get(1)?,
                        headsign: row.get(2)?,
                        route_type: row.get(3)?,
                        service_id: row.get(4)?,
                    })
                })?;
                rows.next().transpose()
            }),
            "trips",
        )?
        .unwrap_or_else(|| {
            debug!("no trip metadata for {}", trip_id);
            TripMeta::unknown()
        });

        let meta = Arc::new(meta);
        write_lock(&self.trip_meta).insert(trip_id.to_owned(), meta.clone());
        Ok(meta)
    }

    /// Up to `limit` departures from the stop inside the two hour
    /// window starting at `after`, one per trip, sorted by departure,
    /// restricted to services valid on `date`. Not cached, the window
    /// moves with every search state.
    pub fn departures(
        &self,
        stop_id: &str,
        after: Time,
        limit: usize,
        date: NaiveDate,
    ) -> Result<Vec<Departure>, StoreError> {
        let valid = self.valid_services(date)?;
        let window_end = after + Duration::minutes(DEPARTURE_WINDOW_MIN);
        let rows = tolerate_missing_schema(
            self.store.read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT trip_id, stop_id, departure_time, stop_sequence
                     FROM stop_times
                     WHERE stop_id = ?1
                       AND departure_time >= ?2
                       AND departure_time <= ?3
                     ORDER BY departure_time
                     LIMIT ?4",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![
                        stop_id,
                        after.to_string(),
                        window_end.to_string(),
                        (limit * OVERSAMPLE) as i64
                    ],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )?;
                rows.collect::<Result<Vec<_>, _>>()
            }),
            "stop_times",
        )?;

        let mut seen_trips = HashSet::new();
        let mut departures = Vec::new();
        for (trip_id, stop_id, departure_time, stop_sequence) in rows {
            // one departure per trip per call
            if !seen_trips.insert(trip_id.clone()) {
                continue;
            }
            let departure: Time = match departure_time.parse() {
                Ok(time) => time,
                Err(err) => {
                    debug!(
                        "dropping departure of trip {} with bad time {:?}: {}",
                        trip_id, departure_time, err
                    );
                    continue;
                }
            };
            let meta = self.trip_meta(&trip_id)?;
            if !valid.contains(&meta.service_id) {
                continue;
            }
            departures.push(Departure {
                trip_id,
                stop_id,
                departure,
                stop_sequence: stop_sequence.max(0) as u32,
                day_offset: 0,
                route_id: meta.route_id.clone(),
                agency_id: meta.agency_id.clone(),
                headsign: meta.headsign.clone(),
                route_type: meta.route_type,
            });
            if departures.len() == limit {
                break;
            }
        }
        Ok(departures)
    }

    /// The overnight rollover transform: early-morning departures of
    /// the next service day, shifted 24h forward so they sort after the
    /// current day's schedule. Only departures before 06:00 qualify.
    pub fn early_departures_next_day(
        &self,
        stop_id: &str,
        limit: usize,
        date: NaiveDate,
    ) -> Result<Vec<Departure>, StoreError> {
        let next_day = match date.succ_opt() {
            Some(next_day) => next_day,
            None => return Ok(Vec::new()),
        };
        let mut departures = self.departures(stop_id, Time::from_hms(0, 0, 0), limit, next_day)?;
        departures.retain(|dep| dep.departure < EARLY_MORNING_END);
        for dep in &mut departures {
            dep.departure = dep.departure + Duration::minutes(1440);
            dep.day_offset = 1;
        }
        Ok(departures)
    }

    /// Stops of the trip strictly after `after_sequence`, in riding
    /// order. The full sequence is fetched once per trip and sliced
    /// from cache on every later call.
    pub fn trip_stops_after(
        &self,
        trip_id: &str,
        after_sequence: u32,
    ) -> Result<Vec<TripStopEntry>, StoreError> {
        let all = self.full_trip_stops(trip_id)?;
        Ok(all
            .iter()
            .filter(|entry| entry.stop_sequence > after_sequence)
            .cloned()
            .collect())
    }

    fn full_trip_stops(&self, trip_id: &str) -> Result<Arc<Vec<TripStopEntry>>, StoreError> {
        if let Some(cached) = read_lock(&self.trip_stops).get(trip_id).cloned() {
            return Ok(cached);
        }

        let rows = tolerate_missing_schema(
            self.store.read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT stop_id, arrival_time, stop_sequence
                     FROM stop_times
                     WHERE trip_id = ?1
                     ORDER BY stop_sequence",
                )?;
                let rows = stmt.query_map([trip_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?;
                rows.collect::<Result<Vec<_>, _>>()
            }),
            "stop_times",
        )?;
        let mut entries = Vec::with_capacity(rows.len());
        for (stop_id, arrival_time, stop_sequence) in rows {
            match arrival_time.parse::<Time>() {
                Ok(arrival) => entries.push(TripStopEntry {
                    stop_id,
                    arrival,
                    stop_sequence: stop_sequence.max(0) as u32,
                }),
                Err(err) => debug!(
                    "dropping stop {} of trip {} with bad arrival {:?}: {}",
                    stop_id, trip_id, arrival_time, err
                ),
            }
        }
        let entries = Arc::new(entries);
        write_lock(&self.trip_stops).insert(trip_id.to_owned(), entries.clone());
        Ok(entries)
    }

    /// Coverage window of the regular calendar, "unknown" when the
    /// store carries no calendar data at all.
    pub fn data_date_range(&self) -> Result<(String, String), StoreError> {
        let range = tolerate_missing_schema(
            self.store.read(|conn| {
                conn.query_row(
                    "SELECT MIN(start_date), MAX(end_date) FROM calendar",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                        ))
                    },
                )
            }),
            "calendar",
        )?;
        let (start, end) = range;
        Ok((
            start.unwrap_or_else(|| "unknown".to_owned()),
            end.unwrap_or_else(|| "unknown".to_owned()),
        ))
    }

    /// Drop every cache.
    pub fn clear_cache(&self) {
        write_lock(&self.trip_meta).clear();
        write_lock(&self.trip_stops).clear();
        write_lock(&self.services_by_date).clear();
        *write_lock(&self.uncalendared) = None;
    }
}

/// Missing tables or columns mean a partial feed, not a broken store;
/// those queries come back empty. Everything else propagates.
fn tolerate_missing_schema<T: Default>(
    result: Result<T, StoreError>,
    what: &str,
) -> Result<T, StoreError> {
    match result {
        Err(StoreError::Io(err)) if is_missing_schema(&err) => {
            debug!("{} not available in store: {}", what, err);
            Ok(T::default())
        }
        other => other,
    }
}

fn is_missing_schema(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            message.starts_with("no such table") || message.starts_with("no such column")
        }
        _ => false,
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
