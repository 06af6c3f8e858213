use std::convert::TryInto;
use std::error::Error;
use std::fmt;
use std::ops::{Add, Sub};

/// Span between two times, may be negative
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Duration {
    seconds: i32,
}

impl Duration {
    pub fn seconds(seconds: i32) -> Duration {
        Duration { seconds }
    }

    pub fn minutes(minutes: i32) -> Duration {
        Duration {
            seconds: minutes * 60,
        }
    }

    pub fn mins(&self) -> i32 {
        self.seconds / 60
    }

    /// minutes with second precision, for cost arithmetic
    pub fn mins_f64(&self) -> f64 {
        f64::from(self.seconds) / 60.0
    }
}

/// Implementation of a local time within a day, no attempt to handle leaps, with the following focus:
/// * parsing of the formats contained in GTFS data
/// * time can go over 24 hours to enable the continuation of the day's schedule
/// * operations that are needed for this project
/// * second precision
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Time {
    seconds_since_midnight: u32,
}

impl Time {
    pub const fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Time {
        Time {
            seconds_since_midnight: (hours * 60 + minutes) * 60 + seconds,
        }
    }

    /// get the clock hour, it can be over 23
    fn hour(self) -> u32 {
        self.seconds_since_midnight / 60 / 60
    }

    /// get the minute of the hour
    fn minute(self) -> u32 {
        (self.seconds_since_midnight / 60) % 60
    }

    /// get the seconds within the minute
    fn second(self) -> u32 {
        self.seconds_since_midnight % 60
    }

    /// minutes since midnight with second precision
    pub fn minutes(self) -> f64 {
        f64::from(self.seconds_since_midnight) / 60.0
    }

    /// display form used on route legs, the hour is not wrapped at 24
    pub fn hhmm(self) -> String {
        format!("{:02}:{:02}", self.hour(), self.minute())
    }
}

/// "HH:MM" for a known time, "--:--" where no time could be parsed
pub fn hhmm_or_placeholder(time: Option<Time>) -> String {
    match time {
        Some(time) => time.hhmm(),
        None => "--:--".to_owned(),
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    /// Add a duration to a time, never rolls over
    /// # Panics
    /// if the duration is negative enough to roll over to yesterday
    #[inline(always)]
    fn add(self, rhs: Duration) -> Self::Output {
        let time: i64 = self.seconds_since_midnight.into();
        let duration: i64 = rhs.seconds.into();
        Time {
            seconds_since_midnight: (time + duration)
                .try_into()
                .expect("duration not to be negative enough to roll over to yesterday"),
        }
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    /// Subtract a duration from a time, never rolls over
    /// # Panics
    /// if the duration is large enough to roll over to yesterday
    #[inline(always)]
    fn sub(self, rhs: Duration) -> Self::Output {
        let time: i64 = self.seconds_since_midnight.into();
        let duration: i64 = rhs.seconds.into();
        Time {
            seconds_since_midnight: (time - duration)
                .try_into()
                .expect("duration not to be large enough to roll over to yesterday"),
        }
    }
}

impl Sub<Time> for Time {
    type Output = Duration;

    /// Subtract two `Time`s, returning the `Duration` between. This assumes
    /// both `Time`s are on the same service day.
    #[inline(always)]
    fn sub(self, rhs: Self) -> Self::Output {
        Duration::seconds(self.seconds_since_midnight as i32 - rhs.seconds_since_midnight as i32)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

/// # String representations
///
/// Accepts the forms found in GTFS data and in planner input: `H:MM`,
/// `HH:MM`, `H:MM:SS`, `HH:MM:SS`, with hours over 23 for overnight
/// services. Anything else is an error.
impl std::str::FromStr for Time {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() < 2 || fields.len() > 3 {
            return Err(TimeParseError::InvalidFormat);
        }
        let hh = fields[0];
        let mm = fields[1];
        let ss = fields.get(2).copied().unwrap_or("00");
        if hh.is_empty() || !hh.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeParseError::InvalidFormat);
        }
        if mm.len() != 2 || !mm.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeParseError::InvalidFormat);
        }
        if ss.len() != 2 || !ss.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeParseError::InvalidFormat);
        }
        let hours: u32 = hh.parse()?;
        let minutes: u32 = mm.parse()?;
        let seconds: u32 = ss.parse()?;
        if minutes > 59 || seconds > 59 {
            return Err(TimeParseError::TooManySecondsOrMinutes);
        }
        Ok(Time::from_hms(hours, minutes, seconds))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeParseError {
    InvalidFormat,
    TooManySecondsOrMinutes,
    ParseIntError(std::num::ParseIntError),
}

impl From<std::num::ParseIntError> for TimeParseError {
    fn from(err: std::num::ParseIntError) -> TimeParseError {
        TimeParseError::ParseIntError(err)
    }
}

impl fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeParseError::InvalidFormat => {
                write!(f, "Time should use format eg. 23:59 or 23:59:59")
            }
            TimeParseError::TooManySecondsOrMinutes => {
                write!(f, "Maximum minutes or seconds is 59")
            }
            TimeParseError::ParseIntError(err) => err.fmt(f),
        }
    }
}

impl Error for TimeParseError {}
