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

//! dump1090 `aircraft.json` parser.
//!
//! Document format:
//! ```text
//! { "now": 1700000000.1, "messages": 123, "aircraft": [ { "hex": "4ca7b5", ... }, ... ] }
//! ```

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use super::{ParseError, Protocol, RawRecord, Snapshot};

/// Parser for dump1090 / tar1090 `aircraft.json` documents.
#[derive(Debug, Default)]
pub struct AircraftJsonParser;

impl AircraftJsonParser {
    /// Create a new `aircraft.json` parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for AircraftJsonParser {
    type Message = Snapshot;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Snapshot, ParseError> {
        let document: Value = serde_json::from_slice(input)
            .map_err(|e| ParseError::InvalidFormat(e.to_string()))?;
        parse_document(document)
    }
}

fn parse_document(document: Value) -> Result<Snapshot, ParseError> {
    let Value::Object(mut fields) = document else {
        return Err(ParseError::InvalidFormat(
            "top-level value is not an object".to_string(),
        ));
    };

    let aircraft = match fields.remove("aircraft") {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ParseError::InvalidValue {
                field: "aircraft",
                value: type_name(&other).to_string(),
            })
        }
        None => return Err(ParseError::MissingField("aircraft")),
    };

    let now = fields.get("now").and_then(Value::as_f64);
    let messages = fields.get("messages").and_then(Value::as_u64);

    let mut records = Vec::with_capacity(aircraft.len());
    let mut dropped = 0;
    for (index, item) in aircraft.into_iter().enumerate() {
        match RawRecord::deserialize(item) {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!("Dropping aircraft record #{index}: {e}");
                dropped += 1;
            }
        }
    }

    Ok(Snapshot {
        now,
        messages,
        records,
        dropped,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AltitudeField;

    fn parse(input: &str) -> Result<Snapshot, ParseError> {
        AircraftJsonParser::new().parse(input.as_bytes())
    }

    #[test]
    fn test_parse_full_document() {
        let snapshot = parse(
            r#"{"now": 1700000000.5, "messages": 42, "aircraft": [
                {"hex": "4ca7b5", "flight": "RYR1AB  ", "lat": 39.5, "lon": -8.0,
                 "track": 182.3, "alt_baro": 36000, "alt_geom": 36500, "gs": 450.1,
                 "seen": 0.4, "squawk": "7000", "category": "A3"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(snapshot.now, Some(1_700_000_000.5));
        assert_eq!(snapshot.messages, Some(42));
        assert_eq!(snapshot.dropped, 0);
        let record = &snapshot.records[0];
        assert_eq!(record.id(), Some("4ca7b5"));
        assert_eq!(record.callsign(), Some("RYR1AB"));
        assert_eq!(record.alt_baro, Some(AltitudeField::Feet(36000.0)));
        assert_eq!(record.alt_geom, Some(36500.0));
        assert_eq!(record.category.as_deref(), Some("A3"));
    }

    #[test]
    fn test_parse_ground_altitude() {
        let snapshot = parse(r#"{"aircraft": [{"hex": "abc123", "alt_baro": "ground"}]}"#).unwrap();
        let alt = snapshot.records[0].alt_baro.as_ref().unwrap();
        assert!(alt.is_ground());
        assert_eq!(alt.feet(), Some(0.0));
    }

    #[test]
    fn test_bad_record_is_dropped_not_fatal() {
        let snapshot = parse(
            r#"{"aircraft": [
                {"hex": "aaa111", "lat": 39.5, "lon": -8.0},
                {"hex": "bbb222", "lat": "north", "lon": -8.0},
                42,
                {"hex": "ccc333", "lat": 40.0, "lon": -8.5}
            ]}"#,
        )
        .unwrap();

        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.dropped, 2);
        assert_eq!(snapshot.records[1].id(), Some("ccc333"));
    }

    #[test]
    fn test_empty_aircraft_array() {
        let snapshot = parse(r#"{"now": 1.0, "aircraft": []}"#).unwrap();
        assert!(snapshot.records.is_empty());
    }

    #[test]
    fn test_missing_aircraft_array_is_error() {
        assert!(matches!(
            parse(r#"{"now": 1.0}"#),
            Err(ParseError::MissingField("aircraft"))
        ));
    }

    #[test]
    fn test_aircraft_not_array_is_error() {
        assert!(matches!(
            parse(r#"{"aircraft": {"hex": "abc"}}"#),
            Err(ParseError::InvalidValue { field: "aircraft", .. })
        ));
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(parse("{\"aircraft\": ["), Err(ParseError::InvalidFormat(_))));
        assert!(matches!(parse("[]"), Err(ParseError::InvalidFormat(_))));
        assert!(matches!(parse(""), Err(ParseError::InvalidFormat(_))));
    }

    #[test]
    fn test_blank_identifiers() {
        let snapshot = parse(r#"{"aircraft": [{"hex": "   ", "flight": "   "}]}"#).unwrap();
        assert_eq!(snapshot.records[0].id(), None);
        assert_eq!(snapshot.records[0].callsign(), None);
    }
}
