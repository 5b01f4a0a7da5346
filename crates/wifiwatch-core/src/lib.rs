pub mod config;
pub mod diag;
pub mod history;
pub mod kb;
pub mod logfile;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod roam;
pub mod sample;
pub mod speedtest;

pub use config::{Config, NotificationConfig, Thresholds};
pub use diag::{evaluate, DiagInputs, Issue, IssueKind, LogAggregates, Severity};
pub use history::{HistorySnapshot, HistoryStore};
pub use kb::{IssueDoc, KnowledgeBase};
pub use logfile::LogWriter;
pub use monitor::{collect_diag_inputs, probe_sample, spawn, MonitorHandle, WLAN_SERVICE};
pub use notify::Notification;
pub use probe::{
    flatten_scan, Band, LinkProbe, LinkState, LinkStatus, NeighborRecord, PingStats, ProbeError,
    ScanNetwork, ServiceStatus, ShellProbe,
};
pub use roam::RoamDetector;
pub use sample::{RoamEvent, Sample, Summary};
pub use speedtest::http_speed_test;
