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

//! Geographic helpers shared by the tracker and its consumers.
//!
//! Distances are great-circle (haversine) kilometres. Unit conversions cover
//! the feed-native units (feet, knots) that list and panel views show in
//! metric.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;
const FEET_TO_METRES: f64 = 0.3048;
const KNOTS_TO_KMH: f64 = 1.852;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True if both coordinates are finite and inside the WGS84 ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &Position) -> f64 {
        haversine_km(self.lat, self.lon, other.lat, other.lon)
    }

    /// Initial bearing from this point towards `other`, in degrees [0, 360).
    #[must_use]
    pub fn bearing_to(&self, other: &Position) -> f64 {
        initial_bearing(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Calculate distance between two lat/lon points using Haversine formula (in km).
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` just past 1 near the antipode
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Initial great-circle bearing from the first point to the second (degrees, north = 0).
#[must_use]
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();

    normalize_heading(y.atan2(x).to_degrees())
}

/// Fold any angle in degrees into [0, 360).
#[must_use]
pub fn normalize_heading(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let folded = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if folded >= 360.0 {
        0.0
    } else {
        folded
    }
}

#[must_use]
pub fn feet_to_metres(feet: f64) -> f64 {
    feet * FEET_TO_METRES
}

#[must_use]
pub fn knots_to_kmh(knots: f64) -> f64 {
    knots * KNOTS_TO_KMH
}
