//! Event Log
//!
//! Bounded, append-only history of observed state changes. A FIFO ring:
//! once capacity is reached the oldest record is evicted on append.
//! Sequence numbers are assigned under the append lock and are strictly
//! increasing for the lifetime of the process, so `since_seq` cursors stay
//! valid across evictions.

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::types::EventRecord;

#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    next_seq: u64,
    records: VecDeque<EventRecord>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                next_seq: 1,
                records: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// Append a state-change delta for a device, evicting the oldest record
    /// if the log is full. Returns the stored record.
    pub fn append(&self, device: &str, delta: &Map<String, Value>) -> EventRecord {
        let record_state = delta
            .get("state")
            .and_then(Value::as_str)
            .map(|s| s.to_uppercase());

        let mut inner = self.inner.lock();
        let record = EventRecord {
            seq: inner.next_seq,
            device: device.to_string(),
            state: record_state,
            brightness: delta.get("brightness").and_then(Value::as_i64),
            color_temp: delta.get("color_temp").and_then(Value::as_i64),
            attributes: delta.clone(),
            timestamp: Utc::now(),
        };
        inner.next_seq += 1;

        if inner.records.len() >= self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record.clone());
        record
    }

    /// Query records newest-first ("the last N events"). `device` filters,
    /// `since_seq` keeps only records with a higher sequence number, `limit`
    /// caps the result size.
    pub fn query(
        &self,
        device: Option<&str>,
        limit: usize,
        since_seq: Option<u64>,
    ) -> Vec<EventRecord> {
        let inner = self.inner.lock();
        inner
            .records
            .iter()
            .rev()
            .filter(|r| device.is_none_or(|d| r.device == d))
            .filter(|r| since_seq.is_none_or(|s| r.seq > s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }
}
