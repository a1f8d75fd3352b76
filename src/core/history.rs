//! Bounded per-node history.
//!
//! Each node gets its own FIFO behind its own mutex; the outer map is only
//! write-locked the first time a node appends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use hashbrown::HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::node::NodeId;
use crate::vector::Vec3;

/// What a tick hands to the log; the log assigns `idx`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub timestamp_ms: u64,
    pub position: Vec3,
    pub velocity: Vec3,
    pub gravity: f64,
    pub neighbors: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryEntry {
    /// Per-node sequence number, +1 per append, never reused after eviction.
    pub idx: u64,
    pub timestamp_ms: u64,
    pub position: Vec3,
    pub velocity: Vec3,
    pub gravity: f64,
    pub neighbors: Vec<NodeId>,
}

#[derive(Debug, Default)]
struct NodeHistory {
    next_idx: u64,
    entries: VecDeque<HistoryEntry>,
}

#[derive(Debug)]
pub struct HistoryLog {
    capacity: usize,
    logs: RwLock<HashMap<NodeId, Arc<Mutex<NodeHistory>>>>,
}

fn poisoned() -> SimError {
    SimError::InvariantViolation("history lock poisoned".to_string())
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, id: NodeId) -> Result<Arc<Mutex<NodeHistory>>> {
        if let Some(slot) = self.logs.read().map_err(|_| poisoned())?.get(&id) {
            return Ok(Arc::clone(slot));
        }
        let mut logs = self.logs.write().map_err(|_| poisoned())?;
        Ok(Arc::clone(logs.entry(id).or_default()))
    }

    pub fn append(&self, id: NodeId, record: HistoryRecord) -> Result<HistoryEntry> {
        let slot = self.slot(id)?;
        let mut log = slot.lock().map_err(|_| poisoned())?;

        let idx = log.next_idx;
        if let Some(last) = log.entries.back() {
            if last.idx >= idx {
                return Err(SimError::InvariantViolation(format!(
                    "history idx {idx} for node {id} does not follow {}",
                    last.idx
                )));
            }
        }

        let entry = HistoryEntry {
            idx,
            timestamp_ms: record.timestamp_ms,
            position: record.position,
            velocity: record.velocity,
            gravity: record.gravity,
            neighbors: record.neighbors,
        };
        log.next_idx += 1;
        log.entries.push_back(entry.clone());
        while log.entries.len() > self.capacity {
            log.entries.pop_front();
        }
        Ok(entry)
    }

    /// Oldest first; empty for a node that has never ticked.
    pub fn read(&self, id: NodeId) -> Result<Vec<HistoryEntry>> {
        let slot = match self.logs.read().map_err(|_| poisoned())?.get(&id) {
            Some(slot) => Arc::clone(slot),
            None => return Ok(Vec::new()),
        };
        let log = slot.lock().map_err(|_| poisoned())?;
        Ok(log.entries.iter().cloned().collect())
    }

    pub fn len(&self, id: NodeId) -> usize {
        self.read(id).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(t: u64) -> HistoryRecord {
        HistoryRecord {
            timestamp_ms: t,
            position: Vec3::new(t as f64, 0.0, 0.0),
            velocity: Vec3::ZERO,
            gravity: 0.0,
            neighbors: vec![],
        }
    }

    #[test]
    fn unknown_node_reads_empty() {
        let log = HistoryLog::new(4);
        assert!(log.read(7).unwrap().is_empty());
    }

    #[test]
    fn evicts_oldest_and_keeps_idx_contiguous() {
        let log = HistoryLog::new(3);
        for t in 0..5 {
            log.append(1, record(t)).unwrap();
        }
        let entries = log.read(1).unwrap();
        assert_eq!(entries.len(), 3);
        let idx: Vec<u64> = entries.iter().map(|e| e.idx).collect();
        assert_eq!(idx, vec![2, 3, 4]);
        assert_eq!(entries[0].timestamp_ms, 2);
    }

    #[test]
    fn nodes_have_independent_sequences() {
        let log = HistoryLog::new(8);
        log.append(1, record(0)).unwrap();
        log.append(1, record(1)).unwrap();
        let first = log.append(2, record(0)).unwrap();
        assert_eq!(first.idx, 0);
        assert_eq!(log.len(1), 2);
        assert_eq!(log.len(2), 1);
    }

    #[test]
    fn concurrent_appends_stay_ordered() {
        let log = Arc::new(HistoryLog::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for t in 0..50 {
                        log.append(1, record(t)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let entries = log.read(1).unwrap();
        assert_eq!(entries.len(), 200);
        assert!(entries.windows(2).all(|w| w[1].idx == w[0].idx + 1));
    }
}
