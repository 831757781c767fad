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

//! Nearest-aircraft tracking relative to a fixed reference point.
//!
//! The index only detects that the nearest aircraft changed. Whatever the
//! caller does about it (photo lookups, panel refreshes) happens outside.

use serde::{Deserialize, Serialize};

use super::Entity;
use crate::geo::Position;

/// Distances closer than this are treated as ties.
const TIE_TOLERANCE_KM: f64 = 1e-9;

/// Result of a nearest query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nearest {
    pub id: String,
    pub distance_km: f64,
    /// Initial bearing from the reference point to the aircraft.
    pub bearing_deg: f64,
}

/// Nearest-aircraft query with change detection across epochs.
#[derive(Debug, Clone)]
pub struct ProximityIndex {
    reference: Position,
    last_nearest_id: Option<String>,
}

impl ProximityIndex {
    #[must_use]
    pub fn new(reference: Position) -> Self {
        Self {
            reference,
            last_nearest_id: None,
        }
    }

    #[must_use]
    pub fn reference(&self) -> Position {
        self.reference
    }

    /// Id reported by the last [`update`](Self::update), if any.
    #[must_use]
    pub fn last_nearest_id(&self) -> Option<&str> {
        self.last_nearest_id.as_deref()
    }

    /// Nearest entity to the reference point.
    ///
    /// Ties go to whichever entity the iterator yields first.
    pub fn nearest<'a, I>(&self, entities: I) -> Option<Nearest>
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let mut best: Option<(&Entity, f64)> = None;

        for entity in entities {
            let distance = self.reference.distance_km(&entity.position);
            match best {
                Some((_, best_distance)) if distance >= best_distance - TIE_TOLERANCE_KM => {}
                _ => best = Some((entity, distance)),
            }
        }

        best.map(|(entity, distance_km)| Nearest {
            id: entity.id.clone(),
            distance_km,
            bearing_deg: self.reference.bearing_to(&entity.position),
        })
    }

    /// Recompute the nearest entity and report it only if its id changed.
    ///
    /// An empty population clears the cache without reporting, so the next
    /// aircraft to appear is reported again.
    pub fn update<'a, I>(&mut self, entities: I) -> Option<Nearest>
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let Some(nearest) = self.nearest(entities) else {
            self.last_nearest_id = None;
            return None;
        };

        if self.last_nearest_id.as_deref() == Some(nearest.id.as_str()) {
            return None;
        }

        self.last_nearest_id = Some(nearest.id.clone());
        Some(nearest)
    }
}
