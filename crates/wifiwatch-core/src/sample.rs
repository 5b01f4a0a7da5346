use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::HistorySnapshot;
use crate::notify::Notification;
use crate::probe::{LinkState, LinkStatus, NeighborRecord, PingStats};

/// One periodic observation of link and ping state. Immutable once created;
/// appended to the durable logs and the in-memory history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub ts: DateTime<Utc>,
    pub state: LinkState,
    pub ssid: String,
    pub bssid: String,
    pub signal_pct: Option<f64>,
    pub channel: Option<u32>,
    pub radio_type: String,
    pub gateway_ping: PingStats,
    pub remote_ping: PingStats,
    pub throughput_mbps: Option<f64>,
}

impl Sample {
    pub fn from_link(
        ts: DateTime<Utc>,
        link: &LinkStatus,
        gateway_ping: PingStats,
        remote_ping: PingStats,
        throughput_mbps: Option<f64>,
    ) -> Self {
        Self {
            ts,
            state: link.state,
            ssid: link.ssid.clone(),
            bssid: link.bssid.clone(),
            signal_pct: link.signal_pct,
            channel: link.channel,
            radio_type: link.radio_type.clone(),
            gateway_ping,
            remote_ping,
            throughput_mbps,
        }
    }
}

/// Change of associated access point while the SSID was held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoamEvent {
    pub ts: DateTime<Utc>,
    pub ssid: String,
    pub old_bssid: String,
    pub new_bssid: String,
    pub old_signal: Option<f64>,
    pub new_signal: Option<f64>,
}

/// Per-cycle hand-off to whatever presents the data. Buffers are owned
/// copies; the consumer never sees live monitor state.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub sample: Sample,
    pub link: LinkStatus,
    pub history: HistorySnapshot,
    pub neighbors: Vec<NeighborRecord>,
    pub notifications: Vec<Notification>,
    pub roam_event: Option<RoamEvent>,
}
