//! Multi-modal journey planning over a merged GTFS store covering the
//! Portuguese transit agencies: CP rail (`cp_`), FlixBus intercity
//! (`flix_`), Carris Metropolitana (`cmet_`) and STCP (`stcp_`).
//!
//! Three layers compose bottom-up: [`TransitStore`] holds the shared
//! read-only SQLite handle, [`ScheduleService`] answers date-filtered
//! timetable queries over it, and [`StopIndex`] answers spatial queries
//! over the loaded stops. [`Router`] runs a time-dependent Dijkstra on
//! top of both and produces [`RouteResult`] itineraries.
//!
//! ```no_run
//! use percurso::{Router, ScheduleService, StopIndex, TransitStore};
//!
//! # fn main() -> Result<(), percurso::StoreError> {
//! let store = TransitStore::open("transport.db")?;
//! let index = StopIndex::load(&store)?;
//! let schedule = ScheduleService::new(&store);
//! let router = Router::new(&index, &schedule);
//! let result = router.route(38.7223, -9.1393, 41.1496, -8.6110, "08:00", None)?;
//! println!("{}", result.summary());
//! # Ok(())
//! # }
//! ```

pub mod gtfs;
pub mod model;
pub mod router;
pub mod spatial;

pub use crate::gtfs::gtfstime::{Time, TimeParseError};
pub use crate::gtfs::schedule::ScheduleService;
pub use crate::gtfs::store::{StoreError, TransitStore};
pub use crate::model::{Mode, RouteLeg, RouteResult, Stop};
pub use crate::router::Router;
pub use crate::spatial::StopIndex;
