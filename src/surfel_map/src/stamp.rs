//! Capture timestamps and millisecond rounding.
//!
//! Sensor clocks and the trajectory producer disagree in sub-millisecond
//! jitter, so every timestamp used for pose association is rounded to the
//! nearest millisecond first. Both the trace column and the query are rounded
//! with the same function.

use std::fmt;

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: u32 = 1_000_000_000;
const NANOS_PER_MILLI: u32 = 1_000_000;
const HALF_MILLI: u32 = 500_000;

/// Capture time as `(sec, nanosec)`, the layout used by the message headers.
///
/// `nanosec` is expected to be normalized to `[0, 1e9)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub sec: i32,
    pub nanosec: u32,
}

impl Stamp {
    pub const fn new(sec: i32, nanosec: u32) -> Self {
        Self { sec, nanosec }
    }

    /// Build a stamp from a nanosecond count, normalizing negative values.
    pub fn from_ns(ns: i64) -> Self {
        let per_sec = NANOS_PER_SEC as i64;
        Self {
            sec: ns.div_euclid(per_sec) as i32,
            nanosec: ns.rem_euclid(per_sec) as u32,
        }
    }

    pub fn from_millis(ms: i64) -> Self {
        Self::from_ns(ms * NANOS_PER_MILLI as i64)
    }

    pub fn to_ns(&self) -> i64 {
        self.sec as i64 * NANOS_PER_SEC as i64 + self.nanosec as i64
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.nanosec as f64 * 1e-9
    }

    /// Round to the nearest millisecond.
    ///
    /// The sub-millisecond remainder is truncated; a remainder of 500 000 ns
    /// or more adds one millisecond. Reaching a full second carries into
    /// `sec`, e.g. `100.999501341` becomes `101.000000000`. At `i32::MAX`
    /// seconds the carry saturates to `i32::MAX.999000000`.
    pub fn round_to_millis(&self) -> Self {
        let remainder = self.nanosec % NANOS_PER_MILLI;
        let mut sec = self.sec;
        let mut nanosec = self.nanosec - remainder;

        if remainder >= HALF_MILLI {
            nanosec += NANOS_PER_MILLI;
            if nanosec >= NANOS_PER_SEC {
                match sec.checked_add(1) {
                    Some(next) => {
                        sec = next;
                        nanosec -= NANOS_PER_SEC;
                    }
                    // Saturate at the last representable millisecond.
                    None => nanosec -= NANOS_PER_MILLI,
                }
            }
        }

        Self { sec, nanosec }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nanosec)
    }
}
