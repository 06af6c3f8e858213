use std::collections::{HashMap, HashSet};

use log::info;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::gtfs::store::{StoreError, TransitStore};
use crate::model::Stop;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

// region boxes for agency-aware re-ranking: (lat_min, lat_max, lon_min, lon_max)
const LISBON_BOX: (f64, f64, f64, f64) = (38.65, 38.85, -9.25, -9.05);
const PORTO_BOX: (f64, f64, f64, f64) = (41.10, 41.20, -8.70, -8.55);
const LISBON_AGENCY: &str = "cmet_";
const PORTO_AGENCY: &str = "stcp_";

/// Great-circle distance between two WGS-84 points in metres.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let rlat1 = lat1.to_radians();
    let rlat2 = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + rlat1.cos() * rlat2.cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// (lat, lon) degrees onto the unit sphere. Euclidean distance between
/// two such points is the chord length, which orders the same as the
/// great-circle distance, so the tree can prune with it while the real
/// metric is re-measured by haversine on every candidate.
fn unit_sphere(lat: f64, lon: f64) -> [f64; 3] {
    let rlat = lat.to_radians();
    let rlon = lon.to_radians();
    [
        rlat.cos() * rlon.cos(),
        rlat.cos() * rlon.sin(),
        rlat.sin(),
    ]
}

/// chord length bounding a great-circle radius in metres
fn chord_for_radius(radius_m: f64) -> f64 {
    2.0 * (radius_m / (2.0 * EARTH_RADIUS_M)).sin()
}

/// An entry in the spatial tree: the unit-sphere position of a stop
/// plus its slot in the stop table.
struct StopPosition {
    pos: [f64; 3],
    slot: usize,
}

impl RTreeObject for StopPosition {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos)
    }
}

impl PointDistance for StopPosition {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.pos[0] - point[0];
        let dy = self.pos[1] - point[1];
        let dz = self.pos[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// In-memory spatial index over every stop of the merged store. Built
/// once at startup, read-only afterwards.
pub struct StopIndex {
    stops: Vec<Stop>,
    by_id: HashMap<String, usize>,
    tree: RTree<StopPosition>,
}

impl StopIndex {
    /// Load every stop from the store and build the index.
    pub fn load(store: &TransitStore) -> Result<StopIndex, StoreError> {
        let rows = store.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT stop_id, stop_name, stop_lat, stop_lon FROM stops")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        let stops = rows
            .into_iter()
            .map(|(id, name, lat, lon)| Stop::new(id, name, lat, lon))
            .collect();
        Ok(StopIndex::from_stops(stops))
    }

    /// Build the index over an already-loaded stop list.
    pub fn from_stops(stops: Vec<Stop>) -> StopIndex {
        let by_id = stops
            .iter()
            .enumerate()
            .map(|(slot, stop)| (stop.id.clone(), slot))
            .collect();
        let positions = stops
            .iter()
            .enumerate()
            .map(|(slot, stop)| StopPosition {
                pos: unit_sphere(stop.lat(), stop.lon()),
                slot,
            })
            .collect();
        let tree = RTree::bulk_load(positions);
        info!("spatial index built over {} stops", stops.len());
        StopIndex { stops, by_id, tree }
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn get_stop(&self, stop_id: &str) -> Option<&Stop> {
        self.by_id.get(stop_id).map(|&slot| &self.stops[slot])
    }

    /// Up to `k` stops within `max_distance_m` of the point, closest
    /// first. Inside the Lisbon box the Carris Metropolitana stops are
    /// ranked ahead of everything else, inside the Porto box the STCP
    /// stops, keeping the distance order within each partition.
    pub fn find_nearest(
        &self,
        lat: f64,
        lon: f64,
        k: usize,
        max_distance_m: f64,
    ) -> Vec<(&Stop, f64)> {
        if self.stops.is_empty() || k == 0 {
            return Vec::new();
        }
        let origin = unit_sphere(lat, lon);
        let max_chord = chord_for_radius(max_distance_m);
        let mut hits: Vec<(&Stop, f64)> = self
            .tree
            .nearest_neighbor_iter_with_distance_2(&origin)
            .take_while(|(_, chord_2)| *chord_2 <= max_chord * max_chord)
            .take(k * 3)
            .filter_map(|(position, _)| {
                let stop = &self.stops[position.slot];
                let distance = haversine_meters(lat, lon, stop.lat(), stop.lon());
                if distance <= max_distance_m {
                    Some((stop, distance))
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));

        if let Some(agency) = region_agency(lat, lon) {
            let (boosted, rest): (Vec<_>, Vec<_>) = hits
                .into_iter()
                .partition(|(stop, _)| stop.id.starts_with(agency));
            hits = boosted;
            hits.extend(rest);
        }

        hits.truncate(k);
        hits
    }

    /// Stops within walking range of another stop, closest first, the
    /// stop itself excluded.
    pub fn find_transfers(&self, stop_id: &str, radius_m: f64) -> Vec<(&Stop, f64)> {
        let from = match self.get_stop(stop_id) {
            Some(stop) => stop,
            None => return Vec::new(),
        };
        let center = unit_sphere(from.lat(), from.lon());
        let max_chord = chord_for_radius(radius_m);
        let mut hits: Vec<(&Stop, f64)> = self
            .tree
            .locate_within_distance(center, max_chord * max_chord)
            .filter_map(|position| {
                let stop = &self.stops[position.slot];
                if stop.id == stop_id {
                    return None;
                }
                let distance =
                    haversine_meters(from.lat(), from.lon(), stop.lat(), stop.lon());
                if distance <= radius_m {
                    Some((stop, distance))
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    /// `find_transfers` restricted to stops of a different agency.
    pub fn find_cross_agency_transfers(
        &self,
        stop_id: &str,
        radius_m: f64,
    ) -> Vec<(&Stop, f64)> {
        let prefix = match self.get_stop(stop_id) {
            Some(stop) => stop.agency_prefix().to_owned(),
            None => return Vec::new(),
        };
        self.find_transfers(stop_id, radius_m)
            .into_iter()
            .filter(|(stop, _)| stop.agency_prefix() != prefix)
            .collect()
    }

    /// Case-insensitive substring search over stop names, deduplicated
    /// by lowercased name, first occurrence wins.
    pub fn search_by_name(&self, query: &str, limit: usize) -> Vec<&Stop> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        for stop in &self.stops {
            let name = stop.name.to_lowercase();
            if name.contains(&query) && seen.insert(name) {
                results.push(stop);
                if results.len() >= limit {
                    break;
                }
            }
        }
        results
    }
}

fn region_agency(lat: f64, lon: f64) -> Option<&'static str> {
    if in_box(lat, lon, &LISBON_BOX) {
        Some(LISBON_AGENCY)
    } else if in_box(lat, lon, &PORTO_BOX) {
        Some(PORTO_AGENCY)
    } else {
        None
    }
}

fn in_box(lat: f64, lon: f64, bounds: &(f64, f64, f64, f64)) -> bool {
    let (lat_min, lat_max, lon_min, lon_max) = *bounds;
    lat >= lat_min && lat <= lat_max && lon >= lon_min && lon <= lon_max
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Stop;

    // a degree of latitude is ~111km, so 0.001 is ~111m
    fn index() -> StopIndex {
        StopIndex::from_stops(vec![
            Stop::new("cp_rossio", "Rossio", 38.7140, -9.1410),
            Stop::new("cmet_rossio", "Rossio (Carris)", 38.7142, -9.1408),
            Stop::new("cmet_chiado", "Chiado", 38.7105, -9.1420),
            Stop::new("stcp_aliados", "Aliados", 41.1470, -8.6110),
            Stop::new("cp_campanha", "Porto Campanha", 41.1486, -8.5856),
        ])
    }

    #[test]
    fn nearest_sorted_by_distance() {
        let index = index();
        let hits = index.find_nearest(38.7100, -9.1420, 5, 2000.0);
        assert!(!hits.is_empty());
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
        // far-away stops stay out
        assert!(hits.iter().all(|(stop, _)| !stop.id.starts_with("stcp_")));
    }

    #[test]
    fn nearest_respects_max_distance() {
        let index = index();
        let hits = index.find_nearest(38.7140, -9.1410, 5, 100.0);
        assert!(hits.iter().all(|(_, d)| *d <= 100.0));
    }

    #[test]
    fn lisbon_box_boosts_carris() {
        let index = index();
        // cp_rossio is nearer to this point than cmet_rossio, but the
        // query is inside the Lisbon box so cmet_ ranks first
        let hits = index.find_nearest(38.7139, -9.1411, 3, 2000.0);
        assert_eq!(hits[0].0.id, "cmet_rossio");
        let cp_pos = hits.iter().position(|(s, _)| s.id == "cp_rossio").unwrap();
        let cmet_chiado = hits
            .iter()
            .position(|(s, _)| s.id == "cmet_chiado")
            .unwrap();
        assert!(cmet_chiado < cp_pos);
    }

    #[test]
    fn porto_box_boosts_stcp() {
        let index = index();
        let hits = index.find_nearest(41.1485, -8.5860, 3, 5000.0);
        assert_eq!(hits[0].0.id, "stcp_aliados");
    }

    #[test]
    fn no_boost_outside_region_boxes() {
        let index = index();
        // Coimbra-ish, outside both boxes: pure distance order
        let hits = index.find_nearest(40.2, -8.4, 5, 2_000_000.0);
        assert_eq!(hits.len(), 5);
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn transfers_exclude_self_and_far_stops() {
        let index = index();
        let hits = index.find_transfers("cp_rossio", 300.0);
        assert!(hits.iter().all(|(stop, _)| stop.id != "cp_rossio"));
        assert!(hits.iter().all(|(_, d)| *d <= 300.0));
        assert!(hits.iter().any(|(stop, _)| stop.id == "cmet_rossio"));
    }

    #[test]
    fn cross_agency_transfers_change_prefix() {
        let index = index();
        let hits = index.find_cross_agency_transfers("cp_rossio", 1000.0);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|(stop, _)| !stop.id.starts_with("cp_")));
    }

    #[test]
    fn name_search_is_substring_and_deduplicated() {
        let index = StopIndex::from_stops(vec![
            Stop::new("cp_1", "Estação Oriente", 38.77, -9.10),
            Stop::new("cmet_1", "Estação Oriente", 38.77, -9.10),
            Stop::new("cmet_2", "Oriente Norte", 38.78, -9.10),
            Stop::new("stcp_9", "Casa da Música", 41.16, -8.63),
        ]);
        let hits = index.search_by_name("oriente", 10);
        // duplicate name collapsed, substring matched case-insensitively
        assert_eq!(hits.len(), 2);
        let hits = index.search_by_name("ORIENTE", 1);
        assert_eq!(hits.len(), 1);
        assert!(index.search_by_name("   ", 10).is_empty());
        assert!(index.search_by_name("xyz", 10).is_empty());
    }

    #[test]
    fn unknown_stop_yields_empty() {
        let index = index();
        assert!(index.find_transfers("nope_1", 300.0).is_empty());
        assert!(index.get_stop("nope_1").is_none());
        assert_eq!(index.len(), 5);
    }
}
