use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::Thresholds;
use crate::history::mean_present;
use crate::logfile::{LogRecord, LogWriter};
use crate::probe::{Band, LinkState, NeighborRecord, ServiceStatus};
use crate::sample::Sample;

/// Ordered health rank; later variants outrank earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Pass,
    Info,
    Warn,
    Fail,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Pass => "PASS",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Fail => "FAIL",
        }
    }
}

/// Closed set of conditions the rule engine can raise. The string key is the
/// stable external identifier used by the knowledge base file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    WlanServiceNotRunning,
    AdapterDisconnected,
    WeakSignal,
    ModerateSignal,
    GatewayPacketLoss,
    InternetPacketLoss,
    GatewayHighLatency,
    InternetHighLatency,
    ExcessiveRoaming,
    ModerateRoaming,
    BadChannelPlan,
    CrowdedChannel,
    FrequentDisconnections,
    LowAverageSignalLog,
    ModerateAverageSignalLog,
    ManyRoamEvents,
}

impl IssueKind {
    pub fn key(&self) -> &'static str {
        match self {
            IssueKind::WlanServiceNotRunning => "wlan_service_not_running",
            IssueKind::AdapterDisconnected => "adapter_disconnected",
            IssueKind::WeakSignal => "weak_signal",
            IssueKind::ModerateSignal => "moderate_signal",
            IssueKind::GatewayPacketLoss => "gateway_packet_loss",
            IssueKind::InternetPacketLoss => "internet_packet_loss",
            IssueKind::GatewayHighLatency => "gateway_high_latency",
            IssueKind::InternetHighLatency => "internet_high_latency",
            IssueKind::ExcessiveRoaming => "excessive_roaming",
            IssueKind::ModerateRoaming => "moderate_roaming",
            IssueKind::BadChannelPlan => "bad_channel_plan",
            IssueKind::CrowdedChannel => "crowded_channel",
            IssueKind::FrequentDisconnections => "frequent_disconnections",
            IssueKind::LowAverageSignalLog => "low_average_signal_log",
            IssueKind::ModerateAverageSignalLog => "moderate_average_signal_log",
            IssueKind::ManyRoamEvents => "many_roam_events",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
}

/// Aggregates over the durable logs, gathered once per evaluation. A missing
/// or unreadable log contributes an empty dataset, never an error.
#[derive(Debug, Clone, Default)]
pub struct LogAggregates {
    pub records: Vec<LogRecord>,
    pub roam_total: usize,
    pub roams_last_hour: usize,
}

impl LogAggregates {
    pub const RECORD_WINDOW: usize = 1000;

    pub fn collect(log: &LogWriter, now: DateTime<Utc>) -> Self {
        let records = log.read_recent(Self::RECORD_WINDOW);
        let (roam_total, roams_last_hour) = log.roam_counts(now - Duration::hours(1));
        Self {
            records,
            roam_total,
            roams_last_hour,
        }
    }
}

/// Everything one diagnostic run reads: the live readings, the mutable
/// thresholds read fresh for this run, the current scan and the historical
/// aggregates.
#[derive(Debug, Clone)]
pub struct DiagInputs {
    pub service: ServiceStatus,
    pub sample: Sample,
    pub thresholds: Thresholds,
    pub neighbors: Vec<NeighborRecord>,
    pub history: LogAggregates,
}

/// Run every rule and merge the results per issue kind, keeping the worst
/// severity when the same kind is raised more than once.
pub fn evaluate(inputs: &DiagInputs) -> Vec<Issue> {
    let mut raised: Vec<(Severity, IssueKind)> = Vec::new();
    check_service(inputs, &mut raised);
    check_signal(inputs, &mut raised);
    check_connectivity(inputs, &mut raised);
    check_roaming(inputs, &mut raised);
    check_channels(&inputs.neighbors, &mut raised);
    check_history(inputs, &mut raised);
    dedup_worst(raised)
}

/// Collapse duplicate kinds to their highest-ranked severity, then order by
/// severity (worst first) for presentation.
pub fn dedup_worst(raised: Vec<(Severity, IssueKind)>) -> Vec<Issue> {
    let mut worst: BTreeMap<IssueKind, Severity> = BTreeMap::new();
    for (severity, kind) in raised {
        worst
            .entry(kind)
            .and_modify(|cur| {
                if severity > *cur {
                    *cur = severity;
                }
            })
            .or_insert(severity);
    }
    let mut issues: Vec<Issue> = worst
        .into_iter()
        .map(|(kind, severity)| Issue { severity, kind })
        .collect();
    issues.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.kind.cmp(&b.kind)));
    issues
}

fn check_service(inputs: &DiagInputs, raised: &mut Vec<(Severity, IssueKind)>) {
    if inputs.service == ServiceStatus::NotRunning {
        raised.push((Severity::Fail, IssueKind::WlanServiceNotRunning));
    }
    if inputs.sample.state == LinkState::Disconnected || inputs.sample.ssid.is_empty() {
        raised.push((Severity::Fail, IssueKind::AdapterDisconnected));
    }
}

fn check_signal(inputs: &DiagInputs, raised: &mut Vec<(Severity, IssueKind)>) {
    let thr = &inputs.thresholds;
    if let Some(sig) = inputs.sample.signal_pct {
        if sig < thr.signal_fail {
            raised.push((Severity::Fail, IssueKind::WeakSignal));
        } else if sig < thr.signal_warn {
            raised.push((Severity::Warn, IssueKind::ModerateSignal));
        }
    }
}

fn check_connectivity(inputs: &DiagInputs, raised: &mut Vec<(Severity, IssueKind)>) {
    let thr = &inputs.thresholds;
    let graded = [
        (inputs.sample.gateway_ping.loss_pct, thr.loss_warn, thr.loss_fail, IssueKind::GatewayPacketLoss),
        (inputs.sample.remote_ping.loss_pct, thr.loss_warn, thr.loss_fail, IssueKind::InternetPacketLoss),
        (inputs.sample.gateway_ping.avg_ms, thr.latency_warn, thr.latency_fail, IssueKind::GatewayHighLatency),
        (inputs.sample.remote_ping.avg_ms, thr.latency_warn, thr.latency_fail, IssueKind::InternetHighLatency),
    ];
    for (value, warn, fail, kind) in graded {
        let Some(value) = value else { continue };
        if value > fail {
            raised.push((Severity::Fail, kind));
        } else if value > warn {
            raised.push((Severity::Warn, kind));
        }
    }
}

fn check_roaming(inputs: &DiagInputs, raised: &mut Vec<(Severity, IssueKind)>) {
    if inputs.history.roams_last_hour >= 6 {
        raised.push((Severity::Fail, IssueKind::ExcessiveRoaming));
    } else if inputs.history.roams_last_hour >= 3 {
        raised.push((Severity::Warn, IssueKind::ModerateRoaming));
    }
}

fn check_channels(neighbors: &[NeighborRecord], raised: &mut Vec<(Severity, IssueKind)>) {
    let mut occupancy: BTreeMap<u32, usize> = BTreeMap::new();
    for n in neighbors {
        if n.band == Band::Ghz24 {
            if let Some(ch) = n.channel {
                *occupancy.entry(ch).or_default() += 1;
            }
        }
    }
    if occupancy.keys().any(|ch| ![1, 6, 11].contains(ch)) {
        raised.push((Severity::Warn, IssueKind::BadChannelPlan));
    }
    for &ch in occupancy.keys() {
        let window: usize = (ch.saturating_sub(2)..=ch + 2)
            .map(|cc| occupancy.get(&cc).copied().unwrap_or(0))
            .sum();
        if window >= 8 {
            raised.push((Severity::Warn, IssueKind::CrowdedChannel));
            break;
        }
    }
}

fn check_history(inputs: &DiagInputs, raised: &mut Vec<(Severity, IssueKind)>) {
    let thr = &inputs.thresholds;
    let records = &inputs.history.records;
    let disconnected = records
        .iter()
        .filter(|r| r.state.eq_ignore_ascii_case("disconnected"))
        .count();
    if disconnected > 5 {
        raised.push((Severity::Warn, IssueKind::FrequentDisconnections));
    }
    let signals: Vec<Option<f64>> = records.iter().map(|r| r.signal_pct).collect();
    if let Some(avg) = mean_present(&signals) {
        if avg < thr.signal_fail {
            raised.push((Severity::Warn, IssueKind::LowAverageSignalLog));
        } else if avg < thr.signal_warn {
            raised.push((Severity::Info, IssueKind::ModerateAverageSignalLog));
        }
    }
    if inputs.history.roam_total > 20 {
        raised.push((Severity::Info, IssueKind::ManyRoamEvents));
    }
}
