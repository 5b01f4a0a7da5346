use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Warn/fail comparison boundaries used by the rule engine. Percentages for
/// signal and loss, milliseconds for latency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub signal_warn: f64,
    pub signal_fail: f64,
    pub loss_warn: f64,
    pub loss_fail: f64,
    pub latency_warn: f64,
    pub latency_fail: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            signal_warn: 55.0,
            signal_fail: 35.0,
            loss_warn: 10.0,
            loss_fail: 20.0,
            latency_warn: 150.0,
            latency_fail: 300.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub signal_threshold: f64,
    pub loss_threshold: f64,
    pub latency_threshold: f64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            signal_threshold: 35.0,
            loss_threshold: 20.0,
            latency_threshold: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingTargets {
    /// `None` means autodetect the default gateway at session start.
    pub gateway: Option<String>,
    pub remote: String,
}

impl Default for PingTargets {
    fn default() -> Self {
        Self {
            gateway: None,
            remote: "8.8.8.8".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedTestConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://speedtest.tele2.net/1MB.zip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduledDiagnostics {
    pub enabled: bool,
    pub interval_hours: u64,
}

impl Default for ScheduledDiagnostics {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_dir: String,
    /// Sampling period in seconds, floor 1.
    pub scan_interval: u64,
    pub ping_count: u32,
    pub ping_targets: PingTargets,
    pub log_retention_days: u64,
    pub max_log_mb: u64,
    pub thresholds: Thresholds,
    pub notifications: NotificationConfig,
    pub speed_test: SpeedTestConfig,
    pub scheduled_diagnostics: ScheduledDiagnostics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            scan_interval: 10,
            ping_count: 4,
            ping_targets: PingTargets::default(),
            log_retention_days: 14,
            max_log_mb: 512,
            thresholds: Thresholds::default(),
            notifications: NotificationConfig::default(),
            speed_test: SpeedTestConfig::default(),
            scheduled_diagnostics: ScheduledDiagnostics::default(),
        }
    }
}

impl Config {
    /// Load from a YAML file. A missing file yields defaults; a present but
    /// malformed file is an error the caller surfaces.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval.max(1))
    }

    /// Ring buffer capacity: roughly ten minutes of history, floor 60 samples.
    pub fn history_capacity(&self) -> usize {
        (600 / self.scan_interval.max(1)).max(60) as usize
    }
}
