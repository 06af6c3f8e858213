use std::fmt;

use serde::Serialize;

use crate::gtfs::gtfstime::{Duration, Time};

/// How the rider moves during one leg of the journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Walk,
    Bus,
    Train,
    Tram,
    Subway,
}

impl Mode {
    pub fn is_transit(self) -> bool {
        !matches!(self, Mode::Walk)
    }

    /// capitalised form used in leg instructions
    pub fn label(self) -> &'static str {
        match self {
            Mode::Walk => "Walk",
            Mode::Bus => "Bus",
            Mode::Train => "Train",
            Mode::Tram => "Tram",
            Mode::Subway => "Subway",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Walk => "WALK",
            Mode::Bus => "BUS",
            Mode::Train => "TRAIN",
            Mode::Tram => "TRAM",
            Mode::Subway => "SUBWAY",
        })
    }
}

/// GTFS route_type to leg mode, covering the extended taxonomy used by
/// the merged feed. 100-109 are the railway service variants (CP runs
/// 109 for Urbanos), 400 urban railway, 700/717 bus variants, 900 tram.
pub fn route_type_to_mode(route_type: i64) -> Mode {
    match route_type {
        0 | 7 | 900 => Mode::Tram,
        1 | 400 => Mode::Subway,
        2 | 100..=109 => Mode::Train,
        3 | 700 | 717 => Mode::Bus,
        _ => Mode::Bus,
    }
}

/// A physical boarding point, or one of the two synthetic journey
/// endpoints. Real stops carry an agency-prefixed id (`cp_`, `flix_`,
/// `cmet_`, `stcp_`); endpoints carry no id at all so they can never
/// collide with the stop table.
#[derive(Debug, Clone, Serialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
    pub location: geo::Point<f64>,
    pub synthetic: bool,
}

impl Stop {
    pub fn new(id: impl Into<String>, name: impl Into<String>, lat: f64, lon: f64) -> Stop {
        Stop {
            id: id.into(),
            name: name.into(),
            location: geo::Point::new(lon, lat),
            synthetic: false,
        }
    }

    /// a synthetic endpoint ("Your location" / "Destination")
    pub fn endpoint(name: impl Into<String>, lat: f64, lon: f64) -> Stop {
        Stop {
            id: String::new(),
            name: name.into(),
            location: geo::Point::new(lon, lat),
            synthetic: true,
        }
    }

    pub fn lat(&self) -> f64 {
        self.location.y()
    }

    pub fn lon(&self) -> f64 {
        self.location.x()
    }

    /// the agency tag including the underscore, eg. "cmet_"
    pub fn agency_prefix(&self) -> &str {
        match self.id.find('_') {
            Some(i) => &self.id[..=i],
            None => "",
        }
    }

    /// short agency label for instructions, eg. "CMET"
    pub fn agency_label(&self) -> String {
        self.agency_prefix().trim_end_matches('_').to_uppercase()
    }
}

/// Everything needed to score a departure, joined from trips and routes.
#[derive(Debug, Clone)]
pub struct TripMeta {
    pub route_id: String,
    pub agency_id: String,
    pub headsign: String,
    pub route_type: i64,
    pub service_id: String,
}

impl TripMeta {
    /// stand-in for a trip id the store does not know
    pub fn unknown() -> TripMeta {
        TripMeta {
            route_id: String::new(),
            agency_id: String::new(),
            headsign: String::new(),
            route_type: 3,
            service_id: String::new(),
        }
    }
}

/// "trip T leaves stop S at D from sequence N", with the trip metadata
/// flattened in. `day_offset` counts the midnights between the travel
/// date and this entry's service day; `departure` carries 24h for each
/// so it sorts correctly on the search timeline.
#[derive(Debug, Clone)]
pub struct Departure {
    pub trip_id: String,
    pub stop_id: String,
    pub departure: Time,
    pub stop_sequence: u32,
    pub day_offset: u32,
    pub route_id: String,
    pub agency_id: String,
    pub headsign: String,
    pub route_type: i64,
}

impl Departure {
    /// clock time as printed on a leg, with any day shift removed
    pub fn display_time(&self) -> Time {
        self.departure - Duration::minutes(1440 * self.day_offset as i32)
    }
}

/// One stop visit while riding a trip forward.
#[derive(Debug, Clone)]
pub struct TripStopEntry {
    pub stop_id: String,
    pub arrival: Time,
    pub stop_sequence: u32,
}

/// One segment of a produced itinerary.
#[derive(Debug, Clone, Serialize)]
pub struct RouteLeg {
    pub mode: Mode,
    pub from_stop: Stop,
    pub to_stop: Stop,
    /// "HH:MM"
    pub departure_time: String,
    /// "HH:MM"
    pub arrival_time: String,
    pub duration_minutes: f64,
    pub agency: String,
    /// empty for walking legs
    pub trip_id: String,
    pub headsign: String,
    pub route_name: String,
    pub instructions: String,
}

/// Ordered legs plus aggregates. An empty leg list means no route was
/// found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteResult {
    pub legs: Vec<RouteLeg>,
    pub total_duration_minutes: f64,
    pub total_transfers: u32,
    pub departure_time: String,
    pub arrival_time: String,
    pub origin_name: String,
    pub destination_name: String,
}

impl RouteResult {
    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn summary(&self) -> String {
        let modes = self
            .legs
            .iter()
            .map(|leg| leg.mode.to_string())
            .collect::<Vec<_>>()
            .join(" > ");
        format!(
            "{} > {} | {:.0} min | {} transfers | {}",
            self.origin_name,
            self.destination_name,
            self.total_duration_minutes,
            self.total_transfers,
            modes
        )
    }
}
