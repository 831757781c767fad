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

//! Live aircraft tracking for polled ADS-B JSON feeds.
//!
//! This library turns periodic `aircraft.json` snapshots (as served by
//! dump1090, readsb and tar1090) into a stable set of tracked aircraft with
//! bounded trail history and nearest-aircraft change detection. It is split
//! into layers that can be used independently or composed together:
//!
//! - **Protocol layer**: Snapshot parsing into loosely typed records
//! - **Tracker layer**: Reconciliation, altitude classification, trails and proximity
//! - **Poll layer**: Fixed-interval HTTP polling with an overlap guard
//!
//! # Quick Start
//!
//! Use [`PollScheduler`] for full-stack operation:
//!
//! ```no_run
//! use skylog_tracker::{HttpFeed, PollConfig, PollScheduler, TrackerConfig, TrackerEvent};
//! use skylog_tracker::poll::DEFAULT_REQUEST_TIMEOUT;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let feed = HttpFeed::new("http://localhost:8080/data/aircraft.json", DEFAULT_REQUEST_TIMEOUT)
//!         .expect("http client");
//!     let scheduler = PollScheduler::new(feed, TrackerConfig::default(), PollConfig::default())
//!         .expect("valid config");
//!
//!     let handle = scheduler.start();
//!     let mut epochs = handle.subscribe();
//!     while let Ok(epoch) = epochs.recv().await {
//!         for event in &epoch.events {
//!             if let TrackerEvent::NearestChanged { id, distance_km, .. } = event {
//!                 println!("Nearest is now {id} at {distance_km:.1} km");
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Protocol Layer Only
//!
//! ```
//! use skylog_tracker::protocol::{AircraftJsonParser, Protocol};
//!
//! let mut parser = AircraftJsonParser::new();
//! let body = br#"{"now": 1700000000.0, "aircraft": [{"hex": "4ca7b5", "lat": 39.7, "lon": -8.9}]}"#;
//! let snapshot = parser.parse(body).unwrap();
//! assert_eq!(snapshot.records[0].id(), Some("4ca7b5"));
//! ```
//!
//! ## Tracker Layer Only
//!
//! ```
//! use chrono::Utc;
//! use skylog_tracker::protocol::{RawRecord, Snapshot};
//! use skylog_tracker::tracker::{ReconciliationEngine, TrackerConfig};
//!
//! let mut engine = ReconciliationEngine::new(TrackerConfig::default()).unwrap();
//! let mut tracked = engine.new_tracked_set();
//!
//! let snapshot = Snapshot::from_records(vec![RawRecord {
//!     hex: Some("4ca7b5".to_string()),
//!     lat: Some(39.7),
//!     lon: Some(-8.9),
//!     ..Default::default()
//! }]);
//! let epoch = engine.reconcile(&snapshot, &mut tracked, Utc::now());
//!
//! assert_eq!(epoch.created.len(), 1);
//! println!("Tracking {} aircraft", tracked.len());
//! ```

pub mod geo;
pub mod poll;
pub mod protocol;
pub mod tracker;

pub use geo::Position;
pub use poll::{
    FeedSource, FeedState, FetchError, HttpFeed, PollConfig, PollError, PollHandle, PollScheduler,
    PollStatus,
};
pub use protocol::{AircraftJsonParser, ParseError, Protocol, RawRecord, Snapshot};
pub use tracker::{
    AltitudeClassifier, Bucket, ConfigError, Entity, Epoch, IconClass, Nearest,
    ReconciliationEngine, TrackedSet, TrackerConfig, TrackerEvent,
};
