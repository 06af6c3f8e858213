use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::rc::Rc;

use chrono::{Days, NaiveDate};
use log::{info, warn};

use crate::gtfs::gtfstime::{Duration, Time};
use crate::gtfs::schedule::ScheduleService;
use crate::gtfs::store::StoreError;
use crate::model::{route_type_to_mode, Mode, RouteLeg, RouteResult, Stop};
use crate::spatial::{haversine_meters, StopIndex};

/// minutes added to the cost per change of vehicle
pub const TRANSFER_PENALTY_MIN: f64 = 20.0;
pub const WALK_SPEED_KMH: f64 = 4.5;
/// walking range for mid-journey transfers
const MAX_WALK_RADIUS_M: f64 = 300.0;
/// walking range to the first and from the last stop
const ENDPOINT_RADIUS_M: f64 = 1500.0;
/// stops seeded around each endpoint
const ENDPOINT_SEED_STOPS: usize = 8;
/// a state this far past the departure time is abandoned
const MAX_SEARCH_MINUTES: f64 = 480.0;
const MAX_DEPARTURES_PER_STOP: usize = 15;
const MAX_STATES_EXPLORED: usize = 50_000;
/// stops this close to a destination stop count as arrived
const DEST_CLUSTER_RADIUS_M: f64 = 400.0;
/// a goal stop further than this from the destination gets a final walk leg
const FINAL_WALK_THRESHOLD_M: f64 = 50.0;
const MAX_RETRIES: u32 = 4;
const RETRY_STEP_MIN: i32 = 120;
/// states at or past this time also look at next-day early departures
const OVERNIGHT_FROM: Time = Time::from_hms(22, 0, 0);
const DEFAULT_DEPARTURE: Time = Time::from_hms(8, 0, 0);
const END_OF_DAY: Time = Time::from_hms(24, 0, 0);

fn walk_minutes(distance_m: f64) -> f64 {
    (distance_m / 1000.0) / WALK_SPEED_KMH * 60.0
}

fn walk_duration(distance_m: f64) -> Duration {
    Duration::seconds((walk_minutes(distance_m) * 60.0).round() as i32)
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// the calendar day a state with the given midnight-crossing count is on
fn service_day(date: NaiveDate, day_offset: u32) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(u64::from(day_offset)))
}

/// A state in the search: where we are, when we got there, how many
/// vehicles it took, and the leg that brought us here. The parent
/// chain is the path back to the origin.
struct State {
    stop_id: String,
    arrival: Time,
    /// midnights crossed since the travel date; `arrival` carries 24h
    /// for each so the search timeline stays totally ordered
    day_offset: u32,
    transfers: u32,
    cost: f64,
    parent: Option<Rc<State>>,
    leg: Option<RouteLeg>,
}

impl State {
    /// clock time on the service day this state is on
    fn wall_clock(&self) -> Time {
        self.arrival - Duration::minutes(1440 * self.day_offset as i32)
    }
}

struct QueueEntry {
    cost: f64,
    seq: u64,
    state: Rc<State>,
}

/// The ordering puts the lowest cost as the greatest so it is popped
/// first from the `BinaryHeap`, with the insertion counter breaking
/// ties so equal-cost states come out in FIFO order.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

/// Multi-modal router over the spatial index and the schedule service.
///
/// Modified Dijkstra on (stop, arrival time, transfers) states with
/// cost `elapsed_minutes + transfers * TRANSFER_PENALTY_MIN`. States
/// expand by boarding departures and riding them forward, and by
/// walking to nearby stops.
pub struct Router<'r> {
    index: &'r StopIndex,
    schedule: &'r ScheduleService<'r>,
}

impl<'r> Router<'r> {
    pub fn new(index: &'r StopIndex, schedule: &'r ScheduleService<'r>) -> Router<'r> {
        Router { index, schedule }
    }

    /// Find the best itinerary between two points.
    ///
    /// `depart_after` is "HH:MM" or "HH:MM:SS", blank or unparseable
    /// input falls back to 08:00. `date` defaults to today. When an
    /// attempt finds nothing the search retries with the departure
    /// pushed back two hours, up to four times, never past midnight.
    /// An empty result means no coverage or no path; only store
    /// failures surface as errors.
    pub fn route(
        &self,
        origin_lat: f64,
        origin_lon: f64,
        dest_lat: f64,
        dest_lon: f64,
        depart_after: &str,
        date: Option<NaiveDate>,
    ) -> Result<RouteResult, StoreError> {
        let travel_date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
        let start = depart_after
            .trim()
            .parse::<Time>()
            .unwrap_or(DEFAULT_DEPARTURE);

        for attempt in 0..=MAX_RETRIES {
            let attempt_start = start + Duration::minutes(RETRY_STEP_MIN * attempt as i32);
            if attempt_start >= END_OF_DAY {
                break;
            }
            if attempt > 0 {
                info!(
                    "retry {}/{}: departure pushed back to {}",
                    attempt,
                    MAX_RETRIES,
                    attempt_start.hhmm()
                );
            }
            let result = self.search(
                origin_lat,
                origin_lon,
                dest_lat,
                dest_lon,
                attempt_start,
                travel_date,
            )?;
            if !result.is_empty() {
                return Ok(result);
            }
        }
        warn!("no route found after retries");
        Ok(RouteResult::default())
    }

    /// One Dijkstra attempt from a fixed start time.
    fn search(
        &self,
        origin_lat: f64,
        origin_lon: f64,
        dest_lat: f64,
        dest_lon: f64,
        start: Time,
        date: NaiveDate,
    ) -> Result<RouteResult, StoreError> {
        let origin_stops =
            self.index
                .find_nearest(origin_lat, origin_lon, ENDPOINT_SEED_STOPS, ENDPOINT_RADIUS_M);
        let dest_stops =
            self.index
                .find_nearest(dest_lat, dest_lon, ENDPOINT_SEED_STOPS, ENDPOINT_RADIUS_M);
        if origin_stops.is_empty() || dest_stops.is_empty() {
            warn!(
                "no stops within {}m of origin or destination",
                ENDPOINT_RADIUS_M
            );
            return Ok(RouteResult::default());
        }

        // the arrival zone: the destination stops and everything close to them
        let mut dest_cluster: HashSet<String> =
            dest_stops.iter().map(|(stop, _)| stop.id.clone()).collect();
        for (stop, _) in &dest_stops {
            for (nearby, _) in self.index.find_transfers(&stop.id, DEST_CLUSTER_RADIUS_M) {
                dest_cluster.insert(nearby.id.clone());
            }
        }

        let mut best_cost: HashMap<String, f64> = HashMap::new();
        let mut queue: BinaryHeap<QueueEntry> = BinaryHeap::new();
        let mut seq: u64 = 0;

        // seed with a walk from the origin to each nearby stop
        let origin_endpoint = Stop::endpoint("Your location", origin_lat, origin_lon);
        for (stop, distance_m) in &origin_stops {
            let walk_min = walk_minutes(*distance_m);
            let arrival = start + walk_duration(*distance_m);
            let leg = RouteLeg {
                mode: Mode::Walk,
                from_stop: origin_endpoint.clone(),
                to_stop: (*stop).clone(),
                departure_time: start.hhmm(),
                arrival_time: arrival.hhmm(),
                duration_minutes: round1(walk_min),
                agency: String::new(),
                trip_id: String::new(),
                headsign: String::new(),
                route_name: String::new(),
                instructions: format!(
                    "Walk {:.0}m to {} ({})",
                    distance_m,
                    stop.name,
                    stop.agency_label()
                ),
            };
            let state = Rc::new(State {
                stop_id: stop.id.clone(),
                arrival,
                day_offset: 0,
                transfers: 0,
                cost: walk_min,
                parent: None,
                leg: Some(leg),
            });
            queue.push(QueueEntry {
                cost: state.cost,
                seq,
                state,
            });
            seq += 1;
        }

        let mut goal: Option<Rc<State>> = None;
        let mut explored: usize = 0;

        while let Some(entry) = queue.pop() {
            if explored >= MAX_STATES_EXPLORED {
                break;
            }
            let state = entry.state;

            // skip if a cheaper path to this stop was already settled
            if let Some(&best) = best_cost.get(&state.stop_id) {
                if best <= state.cost {
                    continue;
                }
            }
            best_cost.insert(state.stop_id.clone(), state.cost);
            explored += 1;

            if dest_cluster.contains(&state.stop_id) {
                goal = Some(state);
                break;
            }

            if (state.arrival - start).mins_f64() > MAX_SEARCH_MINUTES {
                continue;
            }

            let from_stop = match self.index.get_stop(&state.stop_id) {
                Some(stop) => stop.clone(),
                None => continue,
            };

            // board a departure and ride it forward; a state that has
            // already crossed midnight queries its own service day by
            // wall clock (a 24h+ timestamp would never match the
            // stored HH:MM:SS strings), then the results move back
            // onto the search timeline
            let wall = state.wall_clock();
            let onto_timeline = Duration::minutes(1440 * state.day_offset as i32);
            let mut departures = match service_day(date, state.day_offset) {
                Some(service_date) => {
                    let mut departures = self.schedule.departures(
                        &state.stop_id,
                        wall,
                        MAX_DEPARTURES_PER_STOP,
                        service_date,
                    )?;
                    if wall >= OVERNIGHT_FROM {
                        departures.extend(self.schedule.early_departures_next_day(
                            &state.stop_id,
                            MAX_DEPARTURES_PER_STOP,
                            service_date,
                        )?);
                    }
                    departures
                }
                None => Vec::new(),
            };
            for dep in &mut departures {
                dep.departure = dep.departure + onto_timeline;
                dep.day_offset += state.day_offset;
            }

            for dep in departures {
                if dep.departure < state.arrival {
                    continue;
                }
                let mode = route_type_to_mode(dep.route_type);
                let day_shift = Duration::minutes(1440 * dep.day_offset as i32);
                // boarding another vehicle mid-journey is a transfer,
                // arriving on foot is not
                let is_new_transfer = state
                    .leg
                    .as_ref()
                    .map_or(false, |leg| leg.mode.is_transit() && leg.trip_id != dep.trip_id);
                let transfers = state.transfers + if is_new_transfer { 1 } else { 0 };

                for trip_stop in self
                    .schedule
                    .trip_stops_after(&dep.trip_id, dep.stop_sequence)?
                {
                    let to_stop = match self.index.get_stop(&trip_stop.stop_id) {
                        Some(stop) => stop,
                        None => continue,
                    };
                    let arrival = trip_stop.arrival + day_shift;
                    if arrival < dep.departure {
                        continue;
                    }
                    let ride_min = (arrival - dep.departure).mins_f64();
                    let cost = (arrival - start).mins_f64()
                        + f64::from(transfers) * TRANSFER_PENALTY_MIN;
                    if best_cost
                        .get(&trip_stop.stop_id)
                        .map_or(false, |&best| best <= cost)
                    {
                        continue;
                    }
                    let headsign = if dep.headsign.is_empty() {
                        "destination"
                    } else {
                        dep.headsign.as_str()
                    };
                    let leg = RouteLeg {
                        mode,
                        from_stop: from_stop.clone(),
                        to_stop: to_stop.clone(),
                        departure_time: dep.display_time().hhmm(),
                        arrival_time: trip_stop.arrival.hhmm(),
                        duration_minutes: round1(ride_min),
                        agency: dep.agency_id.clone(),
                        trip_id: dep.trip_id.clone(),
                        headsign: dep.headsign.clone(),
                        route_name: dep.route_id.clone(),
                        instructions: format!(
                            "Take {} ({}) towards {}, ride {:.0} min to {}",
                            mode.label(),
                            dep.agency_id,
                            headsign,
                            ride_min,
                            to_stop.name
                        ),
                    };
                    let child = Rc::new(State {
                        stop_id: trip_stop.stop_id.clone(),
                        arrival,
                        day_offset: dep.day_offset,
                        transfers,
                        cost,
                        parent: Some(state.clone()),
                        leg: Some(leg),
                    });
                    queue.push(QueueEntry {
                        cost,
                        seq,
                        state: child,
                    });
                    seq += 1;
                }
            }

            // walk to nearby stops
            for (nearby, distance_m) in self.index.find_transfers(&state.stop_id, MAX_WALK_RADIUS_M)
            {
                let walk_min = walk_minutes(distance_m);
                let arrival = state.arrival + walk_duration(distance_m);
                let cost = (arrival - start).mins_f64()
                    + f64::from(state.transfers) * TRANSFER_PENALTY_MIN;
                if best_cost.get(&nearby.id).map_or(false, |&best| best <= cost) {
                    continue;
                }
                let leg = RouteLeg {
                    mode: Mode::Walk,
                    from_stop: from_stop.clone(),
                    to_stop: nearby.clone(),
                    departure_time: wall.hhmm(),
                    arrival_time: (wall + walk_duration(distance_m)).hhmm(),
                    duration_minutes: round1(walk_min),
                    agency: String::new(),
                    trip_id: String::new(),
                    headsign: String::new(),
                    route_name: String::new(),
                    instructions: format!(
                        "Walk {:.0}m to {} ({})",
                        distance_m,
                        nearby.name,
                        nearby.agency_label()
                    ),
                };
                let child = Rc::new(State {
                    stop_id: nearby.id.clone(),
                    arrival,
                    day_offset: state.day_offset,
                    transfers: state.transfers,
                    cost,
                    parent: Some(state.clone()),
                    leg: Some(leg),
                });
                queue.push(QueueEntry {
                    cost,
                    seq,
                    state: child,
                });
                seq += 1;
            }
        }

        info!("search explored {} states", explored);

        let goal = match goal {
            Some(goal) => goal,
            None => {
                warn!("no route found from this departure");
                return Ok(RouteResult::default());
            }
        };

        // walk the last stretch when the goal stop is off the doorstep
        let goal = match self.index.get_stop(&goal.stop_id) {
            Some(last_stop) => {
                let distance_m =
                    haversine_meters(last_stop.lat(), last_stop.lon(), dest_lat, dest_lon);
                if distance_m > FINAL_WALK_THRESHOLD_M {
                    let wall = goal.wall_clock();
                    let arrival = goal.arrival + walk_duration(distance_m);
                    let dest_endpoint = Stop::endpoint("Destination", dest_lat, dest_lon);
                    let leg = RouteLeg {
                        mode: Mode::Walk,
                        from_stop: last_stop.clone(),
                        to_stop: dest_endpoint,
                        departure_time: wall.hhmm(),
                        arrival_time: (wall + walk_duration(distance_m)).hhmm(),
                        duration_minutes: round1(walk_minutes(distance_m)),
                        agency: String::new(),
                        trip_id: String::new(),
                        headsign: String::new(),
                        route_name: String::new(),
                        instructions: format!("Walk {:.0}m to your destination", distance_m),
                    };
                    Rc::new(State {
                        stop_id: String::new(),
                        arrival,
                        day_offset: goal.day_offset,
                        transfers: goal.transfers,
                        cost: goal.cost,
                        parent: Some(goal),
                        leg: Some(leg),
                    })
                } else {
                    goal
                }
            }
            None => goal,
        };

        Ok(reconstruct(&goal, start))
    }
}

/// Walk the parent chain back to the origin and assemble the result.
fn reconstruct(goal: &Rc<State>, start: Time) -> RouteResult {
    let mut legs = Vec::new();
    let mut cursor = Some(goal);
    while let Some(state) = cursor {
        if let Some(leg) = &state.leg {
            legs.push(leg.clone());
        }
        cursor = state.parent.as_ref();
    }
    legs.reverse();
    let legs = merge_walks(legs);

    let transit_legs = legs.iter().filter(|leg| leg.mode.is_transit()).count();
    RouteResult {
        total_duration_minutes: round1((goal.arrival - start).mins_f64()),
        total_transfers: transit_legs.saturating_sub(1) as u32,
        departure_time: legs
            .first()
            .map(|leg| leg.departure_time.clone())
            .unwrap_or_default(),
        arrival_time: legs
            .last()
            .map(|leg| leg.arrival_time.clone())
            .unwrap_or_default(),
        origin_name: legs
            .first()
            .map(|leg| leg.from_stop.name.clone())
            .unwrap_or_default(),
        destination_name: legs
            .last()
            .map(|leg| leg.to_stop.name.clone())
            .unwrap_or_default(),
        legs,
    }
}

/// Collapse runs of consecutive walking legs into one.
fn merge_walks(legs: Vec<RouteLeg>) -> Vec<RouteLeg> {
    let mut merged: Vec<RouteLeg> = Vec::with_capacity(legs.len());
    for leg in legs {
        if let Some(prev) = merged.last_mut() {
            if prev.mode == Mode::Walk && leg.mode == Mode::Walk {
                prev.to_stop = leg.to_stop;
                prev.arrival_time = leg.arrival_time;
                prev.duration_minutes = round1(prev.duration_minutes + leg.duration_minutes);
                prev.instructions = format!(
                    "Walk {:.0} min to {}",
                    prev.duration_minutes, prev.to_stop.name
                );
                continue;
            }
        }
        merged.push(leg);
    }
    merged
}

#[cfg(test)]
mod test {
    use super::{merge_walks, round1, walk_minutes};
    use crate::model::{Mode, RouteLeg, Stop};

    fn leg(mode: Mode, from: &str, to: &str, dep: &str, arr: &str, mins: f64) -> RouteLeg {
        RouteLeg {
            mode,
            from_stop: Stop::new(format!("cmet_{}", from), from, 38.7, -9.1),
            to_stop: Stop::new(format!("cmet_{}", to), to, 38.7, -9.1),
            departure_time: dep.to_owned(),
            arrival_time: arr.to_owned(),
            duration_minutes: mins,
            agency: String::new(),
            trip_id: String::new(),
            headsign: String::new(),
            route_name: String::new(),
            instructions: String::new(),
        }
    }

    #[test]
    fn consecutive_walks_merge() {
        let legs = vec![
            leg(Mode::Walk, "a", "b", "08:00", "08:05", 5.0),
            leg(Mode::Walk, "b", "c", "08:05", "08:09", 4.0),
            leg(Mode::Bus, "c", "d", "08:15", "08:30", 15.0),
            leg(Mode::Walk, "d", "e", "08:30", "08:33", 3.0),
        ];
        let merged = merge_walks(legs);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].mode, Mode::Walk);
        assert_eq!(merged[0].from_stop.name, "a");
        assert_eq!(merged[0].to_stop.name, "c");
        assert_eq!(merged[0].departure_time, "08:00");
        assert_eq!(merged[0].arrival_time, "08:09");
        assert_eq!(merged[0].duration_minutes, 9.0);
        assert_eq!(merged[2].mode, Mode::Walk);
    }

    #[test]
    fn transit_legs_do_not_merge() {
        let legs = vec![
            leg(Mode::Bus, "a", "b", "08:00", "08:10", 10.0),
            leg(Mode::Bus, "b", "c", "08:20", "08:35", 15.0),
        ];
        assert_eq!(merge_walks(legs).len(), 2);
    }

    #[test]
    fn walking_pace() {
        // 4.5 km/h, so 300m in 4 minutes
        assert_eq!(round1(walk_minutes(300.0)), 4.0);
        assert_eq!(round1(walk_minutes(1500.0)), 20.0);
    }
}
