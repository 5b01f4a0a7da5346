use chrono::{DateTime, Utc};

use crate::probe::LinkStatus;
use crate::sample::RoamEvent;

/// Detects access-point changes by comparing the current association against
/// the last one seen. A disconnect leaves the previous state untouched, so
/// reconnecting to the same BSSID is not reported as a roam.
#[derive(Debug, Default)]
pub struct RoamDetector {
    prev_bssid: Option<String>,
    prev_signal: Option<f64>,
}

impl RoamDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, ts: DateTime<Utc>, link: &LinkStatus) -> Option<RoamEvent> {
        if link.ssid.is_empty() || link.bssid.is_empty() {
            return None;
        }
        let event = match &self.prev_bssid {
            Some(prev) if *prev != link.bssid => Some(RoamEvent {
                ts,
                ssid: link.ssid.clone(),
                old_bssid: prev.clone(),
                new_bssid: link.bssid.clone(),
                old_signal: self.prev_signal,
                new_signal: link.signal_pct,
            }),
            _ => None,
        };
        self.prev_bssid = Some(link.bssid.clone());
        self.prev_signal = link.signal_pct;
        event
    }
}
