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

//! Bounded per-aircraft position history.

use std::collections::{HashMap, VecDeque};

use crate::geo::Position;

/// Per-aircraft FIFO of past positions, capped at `capacity` entries each.
///
/// A position equal to the newest stored one is ignored, so a stationary
/// aircraft does not fill its trail with duplicates.
#[derive(Debug, Clone)]
pub struct TrailBuffer {
    trails: HashMap<String, VecDeque<Position>>,
    capacity: usize,
}

impl TrailBuffer {
    /// Create an empty buffer. `capacity` must be at least 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "trail capacity must be at least 1");
        Self {
            trails: HashMap::new(),
            capacity,
        }
    }

    /// Append a position. Returns `true` if the trail changed.
    pub fn append(&mut self, id: &str, position: Position) -> bool {
        let capacity = self.capacity;
        let trail = self
            .trails
            .entry(id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if trail.back() == Some(&position) {
            return false;
        }

        if trail.len() == capacity {
            trail.pop_front();
        }
        trail.push_back(position);
        true
    }

    /// Positions for `id`, oldest first. Empty if the aircraft has no trail.
    pub fn get(&self, id: &str) -> impl Iterator<Item = &Position> + '_ {
        self.trails.get(id).into_iter().flatten()
    }

    /// Owned copy of the trail for event payloads.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Vec<Position> {
        self.get(id).copied().collect()
    }

    #[must_use]
    pub fn len_of(&self, id: &str) -> usize {
        self.trails.get(id).map_or(0, VecDeque::len)
    }

    /// Drop the trail for `id`, returning what it held.
    pub fn remove(&mut self, id: &str) -> Option<Vec<Position>> {
        self.trails.remove(id).map(Vec::from)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.trails.contains_key(id)
    }

    /// Number of aircraft with a trail.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trails.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trails.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(i: u32) -> Position {
        Position::new(39.0 + f64::from(i) * 0.01, -8.0)
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut trails = TrailBuffer::new(5);
        for i in 0..50 {
            trails.append("abc123", pos(i));
            assert!(trails.len_of("abc123") <= 5);
        }
        assert_eq!(trails.len_of("abc123"), 5);
    }

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let mut trails = TrailBuffer::new(3);
        for i in 0..5 {
            trails.append("abc123", pos(i));
        }
        assert_eq!(trails.snapshot("abc123"), vec![pos(2), pos(3), pos(4)]);
    }

    #[test]
    fn test_repeated_position_is_ignored() {
        let mut trails = TrailBuffer::new(10);
        assert!(trails.append("abc123", pos(1)));
        assert!(!trails.append("abc123", pos(1)));
        assert_eq!(trails.len_of("abc123"), 1);

        // Returning to an older position is still a change
        assert!(trails.append("abc123", pos(2)));
        assert!(trails.append("abc123", pos(1)));
        assert_eq!(trails.len_of("abc123"), 3);
    }

    #[test]
    fn test_capacity_one() {
        let mut trails = TrailBuffer::new(1);
        trails.append("abc123", pos(1));
        trails.append("abc123", pos(2));
        assert_eq!(trails.snapshot("abc123"), vec![pos(2)]);
    }

    #[test]
    fn test_remove() {
        let mut trails = TrailBuffer::new(4);
        trails.append("abc123", pos(1));
        trails.append("def456", pos(2));

        assert_eq!(trails.remove("abc123"), Some(vec![pos(1)]));
        assert_eq!(trails.remove("abc123"), None);
        assert!(!trails.contains("abc123"));
        assert_eq!(trails.get("abc123").count(), 0);
        assert_eq!(trails.len(), 1);
    }

    #[test]
    #[should_panic(expected = "trail capacity")]
    fn test_zero_capacity_panics() {
        let _ = TrailBuffer::new(0);
    }
}
