//! Simulated time as an absolute nanosecond count.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors from parsing a duration or wire time value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("empty duration string")]
    Empty,

    #[error("invalid count in duration '{0}'")]
    InvalidCount(String),

    #[error("missing or unknown unit in duration '{0}' (expected ns/us/ms/s/m/h)")]
    UnknownUnit(String),

    #[error("duration '{0}' overflows the nanosecond range")]
    Overflow(String),
}

/// A point in simulated time, in nanoseconds since simulation start.
///
/// Also used for durations (a simulator's `time_delta` is a `SimTime`);
/// both are plain nanosecond counts and the coordinator mixes them freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

impl SimTime {
    /// Simulation start.
    pub const ZERO: SimTime = SimTime(0);

    /// Sentinel for a simulator that will never request time again (sent BYE).
    pub const MAX: SimTime = SimTime(u64::MAX);

    /// One second, the default `time_delta` for a HELLO that omits one.
    pub const ONE_SECOND: SimTime = SimTime(1_000_000_000);

    pub const fn from_nanos(ns: u64) -> SimTime {
        SimTime(ns)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Advance to the largest multiple of `step` that does not exceed
    /// `target`, measured from this time's own base.
    ///
    /// `step` must be nonzero. Used when a simulator is skipped in a round:
    /// its clock base lands on its own delta grid even though it was not
    /// granted the new time.
    pub fn fast_forward_to(self, target: SimTime, step: SimTime) -> SimTime {
        debug_assert!(!step.is_zero());
        if target <= self {
            return self;
        }
        let jumps = (target.0 - self.0) / step.0;
        SimTime(self.0 + jumps * step.0)
    }
}

impl fmt::Display for SimTime {
    /// Plain decimal nanoseconds, the wire representation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SimTime {
    type Err = TimeParseError;

    /// Parses the wire form: decimal ASCII nanoseconds, no unit.
    fn from_str(s: &str) -> Result<SimTime, TimeParseError> {
        if s.is_empty() {
            return Err(TimeParseError::Empty);
        }
        s.parse::<u64>()
            .map(SimTime)
            .map_err(|_| TimeParseError::InvalidCount(s.to_string()))
    }
}

/// Parse a human duration with unit suffix into simulated nanoseconds.
///
/// Accepts `ns`, `us`, `ms`, `s`, `m` and `h`, with optional whitespace
/// between count and unit: `"1s"`, `"100 ms"`, `"250us"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<SimTime, TimeParseError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(TimeParseError::Empty);
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| TimeParseError::UnknownUnit(s.to_string()))?;
    let (count_str, unit_str) = trimmed.split_at(split);

    if count_str.is_empty() {
        return Err(TimeParseError::InvalidCount(s.to_string()));
    }
    let count: u64 = count_str
        .parse()
        .map_err(|_| TimeParseError::InvalidCount(s.to_string()))?;

    let scale: u64 = match unit_str.trim_start() {
        "ns" => 1,
        "us" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return Err(TimeParseError::UnknownUnit(s.to_string())),
    };

    count
        .checked_mul(scale)
        .map(SimTime::from_nanos)
        .ok_or_else(|| TimeParseError::Overflow(s.to_string()))
}
