//! Data models for the ingestion and rollup pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One hour in epoch milliseconds.
pub const HOUR_MILLIS: i64 = 60 * 60 * 1000;

// ---

/// Fixed facing orientation of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    South,
    East,
    North,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::South,
        Direction::East,
        Direction::North,
        Direction::West,
    ];

    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            Direction::South => "SOUTH",
            Direction::East => "EAST",
            Direction::North => "NORTH",
            Direction::West => "WEST",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s {
            "SOUTH" => Ok(Direction::South),
            "EAST" => Ok(Direction::East),
            "NORTH" => Ok(Direction::North),
            "WEST" => Ok(Direction::West),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// A raw temperature reading, identified by `(sensor_id, timestamp)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub sensor_id: i64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub direction: Direction,
    pub temperature: f64,
}

/// One sensor's average over a window, as returned by the grouped window query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorAverage {
    // ---
    pub sensor_id: i64,
    pub direction: Direction,
    /// Latest reading timestamp seen for the sensor inside the window.
    pub last_seen: i64,
    pub temperature: f64,
}

/// Mean temperature of every sensor facing `direction` during the window
/// ending at `window_end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionBaseline {
    // ---
    pub window_end: i64,
    pub direction: Direction,
    pub average_temperature: f64,
}

/// A sensor whose hourly average fell outside its direction's deviation band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationRecord {
    // ---
    pub sensor_id: i64,
    pub window_end: i64,
    pub direction: Direction,
    /// The sensor's hourly average, not an instantaneous reading.
    pub temperature: f64,
}

/// Half-open time interval `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    /// The most recently completed hour relative to `now_millis`.
    ///
    /// `end` is `now_millis` rounded down to the hour, so the in-progress hour
    /// is never part of the window.
    pub fn closed_hour_before(now_millis: i64) -> Self {
        // ---
        let end = now_millis - now_millis.rem_euclid(HOUR_MILLIS);
        Self {
            start: end - HOUR_MILLIS,
            end,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", format_millis(self.start), format_millis(self.end))
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Render epoch milliseconds as an RFC 3339 UTC timestamp for log output.
pub fn format_millis(millis: i64) -> String {
    // ---
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| format!("{millis}ms"))
}
