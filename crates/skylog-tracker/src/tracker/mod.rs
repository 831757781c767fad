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

//! Aircraft reconciliation and state management.
//!
//! The [`ReconciliationEngine`] consumes one [`Snapshot`] at a time and diffs
//! it against a caller-owned [`TrackedSet`]. Each call is one reconciliation
//! epoch: aircraft are created, updated in place or retired, their trails are
//! extended, and the nearest aircraft to the reference point is recomputed.
//! Every change is reported as a [`TrackerEvent`] in the returned [`Epoch`].

pub mod classifier;
pub mod proximity;
pub mod trail;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::{self, Position};
use crate::protocol::{Protocol, RawRecord, Snapshot};

pub use classifier::{AltitudeClassifier, Bucket, IconClass, Threshold};
pub use proximity::{Nearest, ProximityIndex};
pub use trail::TrailBuffer;

/// Default reference point: the SkyLog receiver station in Leiria, PT.
pub const DEFAULT_REFERENCE_POINT: Position = Position::new(39.747_592, -8.936_510);

/// Configuration errors. These are fatal: nothing starts with a bad config.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("altitude bucket table is empty")]
    EmptyBucketTable,

    #[error("altitude bucket bound {0} is not finite")]
    NonFiniteBound(f64),

    #[error("altitude bucket bounds must be strictly increasing ({previous} then {next})")]
    UnsortedBuckets { previous: f64, next: f64 },

    #[error("trail capacity must be at least 1")]
    ZeroTrailCapacity,

    #[error("staleness threshold must be a positive number of seconds, got {0}")]
    InvalidStalenessThreshold(f64),

    #[error("reference point ({lat}, {lon}) is not a valid coordinate")]
    InvalidReferencePoint { lat: f64, lon: f64 },

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("event channel capacity must be at least 1")]
    ZeroChannelCapacity,
}

/// Which feed field supplies an aircraft's altitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AltitudeSource {
    /// `alt_baro`, falling back to `alt_geom`.
    #[default]
    Barometric,
    /// `alt_geom`, falling back to `alt_baro`.
    Geometric,
}

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Records whose feed-reported age exceeds this are not live.
    pub staleness_threshold_secs: f64,
    /// Maximum positions kept per trail.
    pub trail_capacity: usize,
    /// Fixed point for distance and nearest queries.
    pub reference_point: Position,
    pub altitude_source: AltitudeSource,
    pub classifier: AltitudeClassifier,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 60.0,
            trail_capacity: 20,
            reference_point: DEFAULT_REFERENCE_POINT,
            altitude_source: AltitudeSource::default(),
            classifier: AltitudeClassifier::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trail_capacity == 0 {
            return Err(ConfigError::ZeroTrailCapacity);
        }
        if !self.staleness_threshold_secs.is_finite() || self.staleness_threshold_secs <= 0.0 {
            return Err(ConfigError::InvalidStalenessThreshold(
                self.staleness_threshold_secs,
            ));
        }
        if !self.reference_point.is_valid() {
            return Err(ConfigError::InvalidReferencePoint {
                lat: self.reference_point.lat,
                lon: self.reference_point.lon,
            });
        }
        Ok(())
    }
}

/// One live aircraft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// ICAO 24-bit address (hex string) as sent by the feed.
    pub id: String,
    /// Trimmed callsign, or the uppercased id when there is none.
    pub display_name: String,
    pub callsign: Option<String>,
    pub position: Position,
    /// Track angle in degrees [0, 360), north = 0.
    pub heading: f64,
    /// Altitude in feet.
    pub altitude: Option<f64>,
    pub on_ground: bool,
    /// Ground speed in knots.
    pub ground_speed: Option<f64>,
    pub squawk: Option<String>,
    pub category: Option<String>,
    pub bucket: Bucket,
    /// Feed-reported seconds since the aircraft last transmitted.
    pub staleness_secs: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
}

impl Entity {
    fn new(observation: Observation, bucket: Bucket, now: DateTime<Utc>) -> Self {
        Self {
            id: observation.id,
            display_name: observation.display_name,
            callsign: observation.callsign,
            position: observation.position,
            heading: observation.heading,
            altitude: observation.altitude,
            on_ground: observation.on_ground,
            ground_speed: observation.ground_speed,
            squawk: observation.squawk,
            category: observation.category,
            bucket,
            staleness_secs: observation.staleness_secs,
            first_seen_at: now,
            last_update_at: now,
        }
    }

    /// Overwrite every mutable field. The id and first sighting never change.
    fn apply(&mut self, observation: Observation, bucket: Bucket, now: DateTime<Utc>) {
        self.display_name = observation.display_name;
        self.callsign = observation.callsign;
        self.position = observation.position;
        self.heading = observation.heading;
        self.altitude = observation.altitude;
        self.on_ground = observation.on_ground;
        self.ground_speed = observation.ground_speed;
        self.squawk = observation.squawk;
        self.category = observation.category;
        self.bucket = bucket;
        self.staleness_secs = observation.staleness_secs;
        self.last_update_at = now;
    }

    #[must_use]
    pub fn altitude_m(&self) -> Option<f64> {
        self.altitude.map(geo::feet_to_metres)
    }

    #[must_use]
    pub fn speed_kmh(&self) -> Option<f64> {
        self.ground_speed.map(geo::knots_to_kmh)
    }

    #[must_use]
    pub fn icon_class(&self) -> IconClass {
        IconClass::from_category(self.category.as_deref())
    }

    /// Distance in kilometres from `from` to this aircraft.
    #[must_use]
    pub fn distance_from_km(&self, from: &Position) -> f64 {
        from.distance_km(&self.position)
    }
}

/// The live aircraft population and their trails.
///
/// Iteration order is first-sighting order and is stable across epochs.
#[derive(Debug, Clone)]
pub struct TrackedSet {
    entities: IndexMap<String, Entity>,
    trails: TrailBuffer,
}

impl TrackedSet {
    #[must_use]
    pub fn new(trail_capacity: usize) -> Self {
        Self {
            entities: IndexMap::new(),
            trails: TrailBuffer::new(trail_capacity),
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.entities.keys().map(String::as_str)
    }

    /// Trail for `id`, oldest first.
    #[must_use]
    pub fn trail(&self, id: &str) -> Vec<Position> {
        self.trails.snapshot(id)
    }

    #[must_use]
    pub fn trails(&self) -> &TrailBuffer {
        &self.trails
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Remove an aircraft together with its trail.
    fn retire(&mut self, id: &str) -> Option<Entity> {
        let entity = self.entities.shift_remove(id)?;
        self.trails.remove(id);
        Some(entity)
    }
}

/// Events emitted by the engine when aircraft state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackerEvent {
    /// A new aircraft was added to tracking.
    Created(Entity),
    /// A tracked aircraft appeared again; fields carry the latest values.
    Updated(Entity),
    /// An aircraft left the live population. Its trail is gone too.
    Retired(String),
    /// An aircraft's trail changed; carries the full sequence, oldest first.
    TrailChanged { id: String, positions: Vec<Position> },
    /// A different aircraft is now nearest to the reference point.
    NearestChanged {
        id: String,
        distance_km: f64,
        bearing_deg: f64,
    },
}

/// Why a record was left out of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingId,
    MissingPosition,
    InvalidPosition,
    Stale,
}

/// Per-reason rejection counters for one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rejections {
    pub missing_id: usize,
    pub missing_position: usize,
    pub invalid_position: usize,
    pub stale: usize,
}

impl Rejections {
    fn record(&mut self, reason: Rejection) {
        match reason {
            Rejection::MissingId => self.missing_id += 1,
            Rejection::MissingPosition => self.missing_position += 1,
            Rejection::InvalidPosition => self.invalid_position += 1,
            Rejection::Stale => self.stale += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.missing_id + self.missing_position + self.invalid_position + self.stale
    }
}

/// Outcome of one reconciliation epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Epoch {
    pub created: Vec<Entity>,
    pub updated: Vec<Entity>,
    pub retired: Vec<String>,
    /// All events in emission order: creates and updates (each followed by
    /// its trail change) in record order, then retirements, then nearest.
    pub events: Vec<TrackerEvent>,
    pub rejected: Rejections,
    /// Nearest aircraft after this epoch, whether or not it changed.
    pub nearest: Option<Nearest>,
}

/// Normalized, validated view of one raw record.
#[derive(Debug, Clone)]
struct Observation {
    id: String,
    display_name: String,
    callsign: Option<String>,
    position: Position,
    heading: f64,
    altitude: Option<f64>,
    on_ground: bool,
    ground_speed: Option<f64>,
    squawk: Option<String>,
    category: Option<String>,
    staleness_secs: f64,
}

/// Core state machine diffing snapshots against a [`TrackedSet`].
///
/// One engine should drive one tracked set, since it caches the nearest id
/// between epochs.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    config: TrackerConfig,
    proximity: ProximityIndex,
}

impl ReconciliationEngine {
    /// Create an engine, refusing invalid configuration.
    pub fn new(config: TrackerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let proximity = ProximityIndex::new(config.reference_point);
        Ok(Self { config, proximity })
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// An empty tracked set sized for this engine's trail capacity.
    #[must_use]
    pub fn new_tracked_set(&self) -> TrackedSet {
        TrackedSet::new(self.config.trail_capacity)
    }

    /// Process one snapshot against `tracked`.
    pub fn reconcile(
        &mut self,
        snapshot: &Snapshot,
        tracked: &mut TrackedSet,
        now: DateTime<Utc>,
    ) -> Epoch {
        let mut epoch = Epoch::default();
        let mut visited: HashSet<String> = HashSet::with_capacity(snapshot.records.len());

        for record in &snapshot.records {
            let observation = match self.observe(record) {
                Ok(observation) => observation,
                Err(reason) => {
                    debug!("Skipping record {:?}: {:?}", record.hex, reason);
                    epoch.rejected.record(reason);
                    continue;
                }
            };

            let id = observation.id.clone();
            let position = observation.position;
            let bucket = self.config.classifier.classify(observation.altitude).clone();
            visited.insert(id.clone());

            if let Some(entity) = tracked.entities.get_mut(&id) {
                entity.apply(observation, bucket, now);
                epoch.updated.push(entity.clone());
                epoch.events.push(TrackerEvent::Updated(entity.clone()));
            } else {
                let entity = Entity::new(observation, bucket, now);
                debug!("New aircraft {} ({})", entity.id, entity.display_name);
                tracked.entities.insert(id.clone(), entity.clone());
                epoch.created.push(entity.clone());
                epoch.events.push(TrackerEvent::Created(entity));
            }

            if tracked.trails.append(&id, position) {
                let positions = tracked.trails.snapshot(&id);
                epoch
                    .events
                    .push(TrackerEvent::TrailChanged { id, positions });
            }
        }

        let gone: Vec<String> = tracked
            .ids()
            .filter(|id| !visited.contains(*id))
            .map(str::to_string)
            .collect();
        for id in gone {
            if tracked.retire(&id).is_some() {
                debug!("Retired aircraft {id}");
                epoch.events.push(TrackerEvent::Retired(id.clone()));
                epoch.retired.push(id);
            }
        }

        epoch.nearest = self.proximity.nearest(tracked.iter());
        if let Some(changed) = self.proximity.update(tracked.iter()) {
            epoch.events.push(TrackerEvent::NearestChanged {
                id: changed.id,
                distance_km: changed.distance_km,
                bearing_deg: changed.bearing_deg,
            });
        }

        epoch
    }

    /// Parse `body` and reconcile it. A parse failure leaves `tracked` untouched.
    pub fn ingest<P>(
        &mut self,
        parser: &mut P,
        body: &[u8],
        tracked: &mut TrackedSet,
        now: DateTime<Utc>,
    ) -> Result<Epoch, P::Error>
    where
        P: Protocol<Message = Snapshot>,
    {
        let snapshot = parser.parse(body)?;
        Ok(self.reconcile(&snapshot, tracked, now))
    }

    fn observe(&self, record: &RawRecord) -> Result<Observation, Rejection> {
        let id = record.id().ok_or(Rejection::MissingId)?;
        let position = record.position().ok_or(Rejection::MissingPosition)?;
        if !position.is_valid() {
            return Err(Rejection::InvalidPosition);
        }

        // Absent means fresh
        let staleness_secs = record.seen.unwrap_or(0.0);
        if staleness_secs.is_nan() || staleness_secs > self.config.staleness_threshold_secs {
            return Err(Rejection::Stale);
        }

        let baro = record.alt_baro.as_ref().and_then(|alt| alt.feet());
        let altitude = match self.config.altitude_source {
            AltitudeSource::Barometric => baro.or(record.alt_geom),
            AltitudeSource::Geometric => record.alt_geom.or(baro),
        };
        let on_ground = record.alt_baro.as_ref().is_some_and(|alt| alt.is_ground());

        let callsign = record.callsign().map(str::to_string);
        let display_name = callsign.clone().unwrap_or_else(|| id.to_uppercase());

        Ok(Observation {
            id: id.to_string(),
            display_name,
            callsign,
            position,
            heading: geo::normalize_heading(record.track.unwrap_or(0.0)),
            altitude,
            on_ground,
            ground_speed: record.gs,
            squawk: record.squawk.clone(),
            category: record.category.clone(),
            staleness_secs,
        })
    }
}
