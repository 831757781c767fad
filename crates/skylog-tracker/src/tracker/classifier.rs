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

//! Table-driven altitude classification and category icon classes.
//!
//! The altitude table is an ascending list of `(lower_bound, bucket)` pairs.
//! Lookup walks from the highest bound down and returns the first bucket whose
//! bound the altitude reaches. Altitudes under the lowest bound fall into the
//! lowest bucket; absent, zero and NaN altitudes get the explicit `unknown`
//! bucket.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Discrete classification output (drives marker and trail color).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    pub tag: String,
    pub color: String,
}

impl Bucket {
    #[must_use]
    pub fn new(tag: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            color: color.into(),
        }
    }
}

/// One row of the altitude table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Inclusive lower bound in feed units (feet).
    pub lower_bound: f64,
    pub bucket: Bucket,
}

/// Validated altitude classification table.
#[derive(Debug, Clone, PartialEq)]
pub struct AltitudeClassifier {
    thresholds: Vec<Threshold>,
    unknown: Bucket,
}

impl AltitudeClassifier {
    /// Build a classifier, rejecting empty, non-finite or unsorted tables.
    pub fn new(thresholds: Vec<Threshold>, unknown: Bucket) -> Result<Self, ConfigError> {
        if thresholds.is_empty() {
            return Err(ConfigError::EmptyBucketTable);
        }
        if let Some(bad) = thresholds.iter().find(|t| !t.lower_bound.is_finite()) {
            return Err(ConfigError::NonFiniteBound(bad.lower_bound));
        }
        if let Some(pair) = thresholds
            .windows(2)
            .find(|pair| pair[0].lower_bound >= pair[1].lower_bound)
        {
            return Err(ConfigError::UnsortedBuckets {
                previous: pair[0].lower_bound,
                next: pair[1].lower_bound,
            });
        }

        Ok(Self {
            thresholds,
            unknown,
        })
    }

    /// Convenience constructor from `(bound, tag, color)` triples.
    pub fn from_table(
        table: &[(f64, &str, &str)],
        unknown: Bucket,
    ) -> Result<Self, ConfigError> {
        let thresholds = table
            .iter()
            .map(|&(lower_bound, tag, color)| Threshold {
                lower_bound,
                bucket: Bucket::new(tag, color),
            })
            .collect();
        Self::new(thresholds, unknown)
    }

    /// Classify an altitude. Total over every input.
    #[must_use]
    pub fn classify(&self, altitude: Option<f64>) -> &Bucket {
        let Some(altitude) = altitude.filter(|a| !a.is_nan() && *a != 0.0) else {
            return &self.unknown;
        };

        self.thresholds
            .iter()
            .rev()
            .find(|t| altitude >= t.lower_bound)
            .map_or(&self.thresholds[0].bucket, |t| &t.bucket)
    }

    #[must_use]
    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    #[must_use]
    pub fn unknown(&self) -> &Bucket {
        &self.unknown
    }
}

impl Default for AltitudeClassifier {
    /// tar1090-style palette in feet.
    fn default() -> Self {
        let thresholds = [
            (0.0, "fl000", "#3f51b5"),
            (5_000.0, "fl050", "#2196f3"),
            (10_000.0, "fl100", "#00bcd4"),
            (15_000.0, "fl150", "#4caf50"),
            (20_000.0, "fl200", "#c0ca33"),
            (25_000.0, "fl250", "#ffc400"),
            (30_000.0, "fl300", "#ff9100"),
            (35_000.0, "fl350", "#ff1744"),
            (40_000.0, "fl400", "#d500f9"),
        ]
        .iter()
        .map(|&(lower_bound, tag, color)| Threshold {
            lower_bound,
            bucket: Bucket::new(tag, color),
        })
        .collect();

        Self {
            thresholds,
            unknown: Bucket::new("unknown", "#888888"),
        }
    }
}

/// Aircraft silhouette derived from the emitter category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IconClass {
    /// No category information or light aircraft default.
    A0,
    /// Light (< 15500 lbs).
    A1,
    /// Small (15500 to 75000 lbs).
    A2,
    /// Large (75000 to 300000 lbs).
    A3,
    /// Gliders, balloons, parachutists, UAVs (any `B` category).
    Bx,
    /// Surface vehicles and obstacles (any `C` category).
    Cx,
    /// Reserved `E0` set.
    E0,
}

impl IconClass {
    #[must_use]
    pub fn from_category(category: Option<&str>) -> Self {
        let Some(category) = category else {
            return Self::A0;
        };
        let category = category.trim().to_ascii_uppercase();
        match category.as_str() {
            "A1" => Self::A1,
            "A2" => Self::A2,
            "A3" => Self::A3,
            "E0" => Self::E0,
            c if c.starts_with('B') => Self::Bx,
            c if c.starts_with('C') => Self::Cx,
            _ => Self::A0,
        }
    }

    /// Lowercase asset stem (`a3`, `bx`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A0 => "a0",
            Self::A1 => "a1",
            Self::A2 => "a2",
            Self::A3 => "a3",
            Self::Bx => "bx",
            Self::Cx => "cx",
            Self::E0 => "e0",
        }
    }
}
