use serde::Serialize;

use crate::config::NotificationConfig;
use crate::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LowSignal,
    GatewayLoss,
    RemoteLoss,
    GatewayLatency,
    RemoteLatency,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

/// Level-triggered alerting over one sample. Each condition is independent
/// and may co-fire; there is no dedup or rate limiting, so a persistently bad
/// link notifies every cycle. Consumers wanting suppression add it in their
/// own channel.
pub fn check(sample: &Sample, cfg: &NotificationConfig) -> Vec<Notification> {
    if !cfg.enabled {
        return Vec::new();
    }
    let mut out = Vec::new();
    if let Some(sig) = sample.signal_pct {
        if sig < cfg.signal_threshold {
            out.push(Notification {
                kind: NotificationKind::LowSignal,
                message: format!("Signal strength low: {sig:.0}%"),
            });
        }
    }
    if let Some(loss) = sample.gateway_ping.loss_pct {
        if loss > cfg.loss_threshold {
            out.push(Notification {
                kind: NotificationKind::GatewayLoss,
                message: format!("Gateway packet loss high: {loss:.0}%"),
            });
        }
    }
    if let Some(loss) = sample.remote_ping.loss_pct {
        if loss > cfg.loss_threshold {
            out.push(Notification {
                kind: NotificationKind::RemoteLoss,
                message: format!("Internet packet loss high: {loss:.0}%"),
            });
        }
    }
    if let Some(lat) = sample.gateway_ping.avg_ms {
        if lat > cfg.latency_threshold {
            out.push(Notification {
                kind: NotificationKind::GatewayLatency,
                message: format!("Gateway latency high: {lat:.0} ms"),
            });
        }
    }
    if let Some(lat) = sample.remote_ping.avg_ms {
        if lat > cfg.latency_threshold {
            out.push(Notification {
                kind: NotificationKind::RemoteLatency,
                message: format!("Internet latency high: {lat:.0} ms"),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{LinkState, PingStats};
    use chrono::Utc;

    fn sample(signal: Option<f64>, gw: PingStats, rem: PingStats) -> Sample {
        Sample {
            ts: Utc::now(),
            state: LinkState::Connected,
            ssid: "Home".into(),
            bssid: "AA:BB".into(),
            signal_pct: signal,
            channel: Some(6),
            radio_type: "2.4".into(),
            gateway_ping: gw,
            remote_ping: rem,
            throughput_mbps: None,
        }
    }

    fn ping(avg: f64, loss: f64) -> PingStats {
        PingStats {
            avg_ms: Some(avg),
            loss_pct: Some(loss),
        }
    }

    #[test]
    fn all_five_conditions_can_co_fire() {
        let cfg = NotificationConfig::default();
        let events = check(
            &sample(Some(10.0), ping(500.0, 80.0), ping(600.0, 90.0)),
            &cfg,
        );
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn boundary_values_do_not_fire() {
        let cfg = NotificationConfig::default();
        // Exactly at the boundaries: signal uses strict less-than, loss and
        // latency strict greater-than.
        let events = check(
            &sample(
                Some(cfg.signal_threshold),
                ping(cfg.latency_threshold, cfg.loss_threshold),
                ping(cfg.latency_threshold, cfg.loss_threshold),
            ),
            &cfg,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn unknown_readings_never_fire() {
        let cfg = NotificationConfig::default();
        let events = check(&sample(None, PingStats::default(), PingStats::default()), &cfg);
        assert!(events.is_empty());
    }

    #[test]
    fn disabled_config_fires_nothing() {
        let cfg = NotificationConfig {
            enabled: false,
            ..NotificationConfig::default()
        };
        let events = check(&sample(Some(1.0), ping(999.0, 99.0), ping(999.0, 99.0)), &cfg);
        assert!(events.is_empty());
    }
}
