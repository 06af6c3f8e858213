use chrono::{Datelike, NaiveDate};

pub mod gtfstime;
pub mod schedule;
pub mod store;

/// One row of the regular `calendar` table: a weekday pattern valid
/// inside a `[start_date, end_date]` window, dates as `YYYYMMDD`.
#[derive(Debug, Clone)]
pub struct CalendarRow {
    pub service_id: String,
    pub weekdays: [bool; 7],
    pub start_date: String,
    pub end_date: String,
}

impl CalendarRow {
    /// whether the service pattern covers the given calendar date
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        let ymd = date.format("%Y%m%d").to_string();
        self.weekdays[date.weekday().num_days_from_monday() as usize]
            && self.start_date.as_str() <= ymd.as_str()
            && ymd.as_str() <= self.end_date.as_str()
    }
}

/// GTFS `calendar_dates.exception_type` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    Added,
    Removed,
}

impl ExceptionType {
    /// exception_type 1 adds the service on the date, 2 removes it,
    /// any other value is ignored by callers
    pub fn from_gtfs(value: i64) -> Option<ExceptionType> {
        match value {
            1 => Some(ExceptionType::Added),
            2 => Some(ExceptionType::Removed),
            _ => None,
        }
    }
}
