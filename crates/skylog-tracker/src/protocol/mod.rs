// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Protocol layer for aircraft snapshot feeds.
//!
//! This module provides a trait-based abstraction so other feed formats can be
//! added next to the dump1090 `aircraft.json` document, which is the only
//! format implemented today. A parser turns one fetched body into a
//! [`Snapshot`]; structural problems fail the whole body, while per-record
//! shape problems only drop the offending record.

mod aircraft_json;

pub use aircraft_json::AircraftJsonParser;

use serde::Deserialize;
use thiserror::Error;

use crate::geo::Position;

/// Errors that fail a whole snapshot.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Altitude as reported by dump1090: feet, or the literal `"ground"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AltitudeField {
    Feet(f64),
    Label(String),
}

impl AltitudeField {
    /// Altitude in feet, with `"ground"` reported as zero.
    #[must_use]
    pub fn feet(&self) -> Option<f64> {
        match self {
            Self::Feet(feet) => Some(*feet),
            Self::Label(label) if label.eq_ignore_ascii_case("ground") => Some(0.0),
            Self::Label(_) => None,
        }
    }

    #[must_use]
    pub fn is_ground(&self) -> bool {
        matches!(self, Self::Label(label) if label.eq_ignore_ascii_case("ground"))
    }
}

/// One aircraft record exactly as the feed sent it.
///
/// Every field is optional here; required-field validation happens in the
/// reconciliation engine so that a bad record never fails its siblings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRecord {
    /// ICAO 24-bit address (hex string).
    pub hex: Option<String>,
    /// Flight code / callsign, usually space padded.
    pub flight: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Track angle in degrees (north = 0).
    pub track: Option<f64>,
    /// Barometric altitude in feet.
    pub alt_baro: Option<AltitudeField>,
    /// Geometric altitude in feet.
    pub alt_geom: Option<f64>,
    /// Ground speed in knots.
    pub gs: Option<f64>,
    /// Seconds since the aircraft last transmitted.
    pub seen: Option<f64>,
    pub squawk: Option<String>,
    pub category: Option<String>,
}

impl RawRecord {
    /// Trimmed identifier, or `None` when missing or blank.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.hex
            .as_deref()
            .map(str::trim)
            .filter(|hex| !hex.is_empty())
    }

    /// Reported position, if both coordinates are present.
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Position::new(lat, lon)),
            _ => None,
        }
    }

    /// Trimmed flight code, or `None` when missing or blank.
    #[must_use]
    pub fn callsign(&self) -> Option<&str> {
        self.flight
            .as_deref()
            .map(str::trim)
            .filter(|flight| !flight.is_empty())
    }
}

/// One poll cycle's full set of raw records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Feed-side timestamp (seconds since the epoch), when provided.
    pub now: Option<f64>,
    /// Total messages received by the decoder, when provided.
    pub messages: Option<u64>,
    /// Records in feed order.
    pub records: Vec<RawRecord>,
    /// Records discarded because their shape did not match.
    pub dropped: usize,
}

impl Snapshot {
    /// Build a snapshot directly from records (no feed metadata).
    #[must_use]
    pub fn from_records(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }
}

/// Trait for snapshot parsers.
///
/// Implement this trait to add support for new feed formats.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse one fetched body into a message.
    fn parse(&mut self, input: &[u8]) -> Result<Self::Message, Self::Error>;
}
