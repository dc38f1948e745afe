// ── Per-connection traffic ring buffer ──

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::EntityId;

/// Points kept per connection (five minutes at the default cadence).
pub const HISTORY_CAPACITY: usize = 30;

/// One rate sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrafficPoint {
    pub timestamp: DateTime<Utc>,
    pub in_bps: f64,
    pub out_bps: f64,
    pub utilization_pct: u8,
}

pub struct TrafficHistory {
    points: DashMap<EntityId, VecDeque<TrafficPoint>>,
    capacity: usize,
}

impl Default for TrafficHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl TrafficHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, connection: &EntityId, point: TrafficPoint) {
        let mut ring = self
            .points
            .entry(connection.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(point);
    }

    /// Points for one connection, oldest first.
    pub fn get(&self, connection: &EntityId) -> Vec<TrafficPoint> {
        self.points
            .get(connection)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop history for connections that are no longer monitored.
    pub fn retain(&self, live: &HashSet<EntityId>) {
        self.points.retain(|id, _| live.contains(id));
    }
}
