use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connected,
    Disconnected,
    Unknown,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Unknown => "unknown",
        }
    }
}

/// Current association as reported by the OS wireless stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStatus {
    pub state: LinkState,
    pub ssid: String,
    pub bssid: String,
    pub signal_pct: Option<f64>,
    pub channel: Option<u32>,
    pub radio_type: String,
    pub rate_mbps: Option<f64>,
    pub auth: String,
}

impl LinkStatus {
    pub fn disconnected() -> Self {
        Self {
            state: LinkState::Disconnected,
            ssid: String::new(),
            bssid: String::new(),
            signal_pct: None,
            channel: None,
            radio_type: String::new(),
            rate_mbps: None,
            auth: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            state: LinkState::Unknown,
            ..Self::disconnected()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanBssid {
    pub bssid: String,
    pub signal_pct: Option<f64>,
    pub radio_type: String,
    pub channel: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanNetwork {
    pub ssid: String,
    pub bssids: Vec<ScanBssid>,
}

/// Ping outcome. Unreachable hosts yield `None` fields, never an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PingStats {
    pub avg_ms: Option<f64>,
    pub loss_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    NotRunning,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "2.4")]
    Ghz24,
    #[serde(rename = "5")]
    Ghz5,
    #[serde(rename = "6")]
    Ghz6,
    #[serde(rename = "?")]
    Unknown,
}

impl Band {
    pub fn from_channel(channel: Option<u32>) -> Self {
        match channel {
            Some(ch) if (1..=14).contains(&ch) => Band::Ghz24,
            Some(ch) if (32..=177).contains(&ch) => Band::Ghz5,
            Some(ch) if ch >= 180 => Band::Ghz6,
            _ => Band::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Band::Ghz24 => "2.4",
            Band::Ghz5 => "5",
            Band::Ghz6 => "6",
            Band::Unknown => "?",
        }
    }
}

/// One BSSID from a scan, flattened for sorting and channel analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborRecord {
    pub ssid: String,
    pub bssid: String,
    pub channel: Option<u32>,
    pub band: Band,
    pub signal_pct: Option<f64>,
}

/// Flatten a scan into one record per BSSID, sorted by descending signal.
/// Records without a signal reading sort last.
pub fn flatten_scan(scan: &[ScanNetwork]) -> Vec<NeighborRecord> {
    let mut flat: Vec<NeighborRecord> = Vec::new();
    for network in scan {
        for b in &network.bssids {
            flat.push(NeighborRecord {
                ssid: network.ssid.clone(),
                bssid: b.bssid.clone(),
                channel: b.channel,
                band: Band::from_channel(b.channel),
                signal_pct: b.signal_pct,
            });
        }
    }
    flat.sort_by(|a, b| {
        let ka = a.signal_pct.unwrap_or(0.0);
        let kb = b.signal_pct.unwrap_or(0.0);
        kb.partial_cmp(&ka).unwrap_or(std::cmp::Ordering::Equal)
    });
    flat
}

/// Raw OS-level capability the monitor consumes. All calls are bounded by the
/// implementation's timeout and fail soft: ordinary unavailability yields
/// unknown/empty values rather than an error.
#[async_trait]
pub trait LinkProbe: Send {
    async fn link_status(&mut self) -> Result<LinkStatus, ProbeError>;
    async fn scan_neighbors(&mut self) -> Result<Vec<ScanNetwork>, ProbeError>;
    async fn ping(&mut self, host: &str, count: u32) -> PingStats;
    async fn default_gateway(&mut self) -> Option<String>;
    async fn service_status(&mut self, name: &str) -> ServiceStatus;
}

/// Probe backed by standard Linux networking tools (`nmcli`, `ip`, `ping`,
/// `systemctl`). Each invocation is a short-lived child process with a
/// bounded timeout.
pub struct ShellProbe {
    command_timeout: Duration,
    ping_timeout: Duration,
}

impl ShellProbe {
    pub fn new(command_timeout: Duration, ping_timeout: Duration) -> Self {
        Self {
            command_timeout,
            ping_timeout,
        }
    }

    async fn run(&self, program: &str, args: &[&str], limit: Duration) -> Option<String> {
        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();
        match timeout(limit, child).await {
            Ok(Ok(out)) => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
            Ok(Err(err)) => {
                debug!(program, %err, "probe command failed");
                None
            }
            Err(_) => {
                debug!(program, "probe command timed out");
                None
            }
        }
    }

    async fn wifi_list(&self) -> Option<String> {
        self.run(
            "nmcli",
            &[
                "-t",
                "-f",
                "ACTIVE,SSID,BSSID,SIGNAL,CHAN,RATE,SECURITY",
                "dev",
                "wifi",
                "list",
            ],
            self.command_timeout,
        )
        .await
    }
}

impl Default for ShellProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(8), Duration::from_secs(10))
    }
}

#[async_trait]
impl LinkProbe for ShellProbe {
    async fn link_status(&mut self) -> Result<LinkStatus, ProbeError> {
        match self.wifi_list().await {
            Some(out) => Ok(parse_wifi_link(&out)),
            None => Ok(LinkStatus::unknown()),
        }
    }

    async fn scan_neighbors(&mut self) -> Result<Vec<ScanNetwork>, ProbeError> {
        match self.wifi_list().await {
            Some(out) => Ok(parse_wifi_scan(&out)),
            None => Ok(Vec::new()),
        }
    }

    async fn ping(&mut self, host: &str, count: u32) -> PingStats {
        if host.is_empty() {
            return PingStats::default();
        }
        let count_arg = count.to_string();
        let out = self
            .run("ping", &["-n", "-q", "-c", &count_arg, host], self.ping_timeout)
            .await;
        match out {
            Some(out) => parse_ping_output(&out),
            None => PingStats::default(),
        }
    }

    async fn default_gateway(&mut self) -> Option<String> {
        let out = self
            .run("ip", &["route", "show", "default"], self.command_timeout)
            .await?;
        parse_default_route(&out)
    }

    async fn service_status(&mut self, name: &str) -> ServiceStatus {
        match self
            .run("systemctl", &["is-active", name], self.command_timeout)
            .await
        {
            Some(out) => {
                if out.trim() == "active" {
                    ServiceStatus::Running
                } else {
                    ServiceStatus::NotRunning
                }
            }
            None => ServiceStatus::Unknown,
        }
    }
}

/// Split one line of `nmcli -t` output. Terse mode escapes `:` and `\` inside
/// fields with a backslash.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    for ch in line.chars() {
        if escaped {
            cur.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == ':' {
            fields.push(std::mem::take(&mut cur));
        } else {
            cur.push(ch);
        }
    }
    fields.push(cur);
    fields
}

fn parse_rate_mbps(raw: &str) -> Option<f64> {
    raw.split_whitespace().next()?.parse().ok()
}

fn row_to_bssid(fields: &[String]) -> ScanBssid {
    let channel = fields.get(4).and_then(|c| c.parse().ok());
    ScanBssid {
        bssid: fields.get(2).cloned().unwrap_or_default(),
        signal_pct: fields.get(3).and_then(|s| s.parse().ok()),
        radio_type: Band::from_channel(channel).label().to_string(),
        channel,
    }
}

pub fn parse_wifi_link(out: &str) -> LinkStatus {
    for line in out.lines() {
        let fields = split_terse(line.trim());
        if fields.first().map(String::as_str) != Some("yes") {
            continue;
        }
        let b = row_to_bssid(&fields);
        return LinkStatus {
            state: LinkState::Connected,
            ssid: fields.get(1).cloned().unwrap_or_default(),
            bssid: b.bssid,
            signal_pct: b.signal_pct,
            channel: b.channel,
            radio_type: b.radio_type,
            rate_mbps: fields.get(5).and_then(|r| parse_rate_mbps(r)),
            auth: fields.get(6).cloned().unwrap_or_default(),
        };
    }
    LinkStatus::disconnected()
}

pub fn parse_wifi_scan(out: &str) -> Vec<ScanNetwork> {
    let mut networks: Vec<ScanNetwork> = Vec::new();
    for line in out.lines() {
        let fields = split_terse(line.trim());
        if fields.len() < 5 {
            continue;
        }
        let ssid = fields.get(1).cloned().unwrap_or_default();
        let bssid = row_to_bssid(&fields);
        match networks.iter_mut().find(|n| n.ssid == ssid) {
            Some(network) => network.bssids.push(bssid),
            None => networks.push(ScanNetwork {
                ssid,
                bssids: vec![bssid],
            }),
        }
    }
    networks
}

pub fn parse_ping_output(out: &str) -> PingStats {
    let mut stats = PingStats::default();
    for line in out.lines() {
        if line.contains("packet loss") {
            stats.loss_pct = line
                .split(',')
                .find(|part| part.contains("packet loss"))
                .and_then(|part| part.split_whitespace().next())
                .and_then(|tok| tok.strip_suffix('%'))
                .and_then(|v| v.parse().ok());
        }
        if line.starts_with("rtt") || line.starts_with("round-trip") {
            stats.avg_ms = line
                .split('=')
                .nth(1)
                .and_then(|vals| vals.trim().split('/').nth(1))
                .and_then(|v| v.parse().ok());
        }
    }
    stats
}

pub fn parse_default_route(out: &str) -> Option<String> {
    for line in out.lines() {
        let mut toks = line.split_whitespace();
        while let Some(tok) = toks.next() {
            if tok == "via" {
                return toks.next().map(str::to_string);
            }
        }
    }
    None
}
