use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sample::Sample;

/// Fixed-capacity rolling history of the numeric sample fields.
///
/// Five buffers advance in lock-step: index `i` in any buffer refers to the
/// same sampling instant. Missing readings are stored as `None`, never zero,
/// so consumers must skip them when averaging. Capacity is fixed at
/// construction and the store lives only as long as the process.
pub struct HistoryStore {
    capacity: usize,
    signal: VecDeque<Option<f64>>,
    gateway_latency: VecDeque<Option<f64>>,
    remote_latency: VecDeque<Option<f64>>,
    throughput: VecDeque<Option<f64>>,
    ts: VecDeque<DateTime<Utc>>,
}

/// Owned copy of all buffers, safe to hand to a concurrent consumer.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    pub signal: Vec<Option<f64>>,
    pub gateway_latency: Vec<Option<f64>>,
    pub remote_latency: Vec<Option<f64>>,
    pub throughput: Vec<Option<f64>>,
    pub ts: Vec<DateTime<Utc>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            signal: VecDeque::with_capacity(capacity),
            gateway_latency: VecDeque::with_capacity(capacity),
            remote_latency: VecDeque::with_capacity(capacity),
            throughput: VecDeque::with_capacity(capacity),
            ts: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts.is_empty()
    }

    pub fn record(&mut self, sample: &Sample) {
        if self.ts.len() == self.capacity {
            self.signal.pop_front();
            self.gateway_latency.pop_front();
            self.remote_latency.pop_front();
            self.throughput.pop_front();
            self.ts.pop_front();
        }
        self.signal.push_back(sample.signal_pct);
        self.gateway_latency.push_back(sample.gateway_ping.avg_ms);
        self.remote_latency.push_back(sample.remote_ping.avg_ms);
        self.throughput.push_back(sample.throughput_mbps);
        self.ts.push_back(sample.ts);
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            signal: self.signal.iter().copied().collect(),
            gateway_latency: self.gateway_latency.iter().copied().collect(),
            remote_latency: self.remote_latency.iter().copied().collect(),
            throughput: self.throughput.iter().copied().collect(),
            ts: self.ts.iter().copied().collect(),
        }
    }
}

/// Mean of the present values, `None` when every reading is missing.
pub fn mean_present(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}
