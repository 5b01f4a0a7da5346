use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::diag::{self, DiagInputs, LogAggregates, Severity};
use crate::history::HistoryStore;
use crate::logfile::LogWriter;
use crate::notify;
use crate::probe::{flatten_scan, LinkProbe, LinkStatus, PingStats, ScanNetwork, ServiceStatus};
use crate::roam::RoamDetector;
use crate::sample::{Sample, Summary};
use crate::speedtest;

/// Service the health check expects to find running.
pub const WLAN_SERVICE: &str = "NetworkManager";

/// Upper bound on any single probe call; a probe that exceeds it degrades the
/// reading to unknown instead of stalling the cycle. Matches the longest
/// internal `ShellProbe` deadline so a hung implementation cannot hold a
/// cycle beyond what a slow ping already may.
const PROBE_DEADLINE: Duration = Duration::from_secs(10);

const SPEED_TEST_EVERY: Duration = Duration::from_secs(30 * 60);

/// Handle to a running monitor session. Stopping consumes the handle; a new
/// session starts from a clean state with `spawn`, stopped sessions are never
/// resumed.
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start the sampling loop on its own task. Every cycle emits a [`Summary`]
/// on the returned channel; a dropped receiver does not stop the session,
/// logging continues until `stop`.
pub fn spawn<P>(probe: P, config: Config, log: LogWriter) -> (MonitorHandle, mpsc::UnboundedReceiver<Summary>)
where
    P: LinkProbe + Send + 'static,
{
    let (summary_tx, summary_rx) = mpsc::unbounded_channel();
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut sampler = Sampler::new(probe, config, log);

        let mut ticker = tokio::time::interval(sampler.config.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut diag_ticker = sampler.config.scheduled_diagnostics.enabled.then(|| {
            let every =
                Duration::from_secs(sampler.config.scheduled_diagnostics.interval_hours.max(1) * 3600);
            deferred_interval(every)
        });
        let mut speed_ticker = sampler
            .config
            .speed_test
            .enabled
            .then(|| deferred_interval(SPEED_TEST_EVERY));

        info!(
            interval_s = sampler.config.scan_interval,
            log_dir = %sampler.log.dir().display(),
            "monitor session started"
        );

        let mut diag_task: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let summary = sampler.tick().await;
                    let _ = summary_tx.send(summary);
                }
                _ = maybe_tick(&mut diag_ticker) => {
                    if let Some(task) = sampler.spawn_diagnostics().await {
                        diag_task = Some(task);
                    }
                }
                _ = maybe_tick(&mut speed_ticker) => {
                    sampler.refresh_throughput().await;
                }
            }
        }

        if let Some(task) = diag_task {
            task.abort();
        }
        info!("monitor session stopped");
    });

    (MonitorHandle { stop: stop_tx, task }, summary_rx)
}

fn deferred_interval(every: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Ticks the interval when present, pends forever otherwise so the select arm
/// never fires for a disabled feature.
async fn maybe_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

struct Sampler<P> {
    probe: P,
    config: Config,
    log: LogWriter,
    history: HistoryStore,
    roam: RoamDetector,
    gateway: Option<String>,
    last_speed: Option<f64>,
    last_reading: Option<(Sample, Vec<ScanNetwork>)>,
    current_day: NaiveDate,
}

impl<P: LinkProbe> Sampler<P> {
    fn new(probe: P, config: Config, log: LogWriter) -> Self {
        let history = HistoryStore::new(config.history_capacity());
        let gateway = config.ping_targets.gateway.clone();
        Self {
            probe,
            config,
            log,
            history,
            roam: RoamDetector::new(),
            gateway,
            last_speed: None,
            last_reading: None,
            current_day: Local::now().date_naive(),
        }
    }

    async fn tick(&mut self) -> Summary {
        let ts = Utc::now();
        let (sample, link, networks) = probe_sample(
            &mut self.probe,
            &self.config,
            &mut self.gateway,
            self.last_speed,
        )
        .await;

        let roam_event = self.roam.observe(ts, &link);
        if let Some(ev) = &roam_event {
            info!(ssid = %ev.ssid, old = %ev.old_bssid, new = %ev.new_bssid, "roamed");
            if let Err(err) = self.log.append_roam(ev) {
                warn!(%err, "failed to append roam event");
            }
        }

        self.history.record(&sample);
        if let Err(err) = self.log.append(&sample, &link, &networks) {
            warn!(%err, "failed to append sample to logs");
        }
        self.rotate_if_day_changed();

        let notifications = notify::check(&sample, &self.config.notifications);
        for n in &notifications {
            warn!(kind = ?n.kind, "{}", n.message);
        }

        self.last_reading = Some((sample.clone(), networks.clone()));

        Summary {
            sample,
            link,
            history: self.history.snapshot(),
            neighbors: flatten_scan(&networks),
            notifications,
            roam_event,
        }
    }

    /// Archive and prune once per local calendar day.
    fn rotate_if_day_changed(&mut self) {
        let today = Local::now().date_naive();
        if today == self.current_day {
            return;
        }
        let archive_date = self.current_day;
        self.current_day = today;
        if let Err(err) = self.log.rotate(
            self.config.log_retention_days,
            self.config.max_log_mb,
            archive_date,
            today,
        ) {
            warn!(%err, "log rotation failed");
        }
    }

    /// Scheduled health check. The service probe happens here; the log reads
    /// and rule evaluation run on their own task so they never stall the
    /// sampling loop. The caller aborts the task on stop.
    async fn spawn_diagnostics(&mut self) -> Option<JoinHandle<()>> {
        let Some((sample, networks)) = self.last_reading.clone() else {
            debug!("no sample yet, skipping scheduled diagnostics");
            return None;
        };
        let service = match timeout(PROBE_DEADLINE, self.probe.service_status(WLAN_SERVICE)).await {
            Ok(status) => status,
            Err(_) => ServiceStatus::Unknown,
        };
        let thresholds = self.config.thresholds;
        let log = self.log.clone();
        Some(tokio::spawn(async move {
            let inputs = DiagInputs {
                service,
                sample,
                thresholds,
                neighbors: flatten_scan(&networks),
                history: LogAggregates::collect(&log, Utc::now()),
            };
            let issues = diag::evaluate(&inputs);
            if issues.is_empty() {
                info!("scheduled diagnostics: no issues");
                return;
            }
            for issue in issues {
                match issue.severity {
                    Severity::Fail | Severity::Warn => {
                        warn!(severity = issue.severity.as_str(), issue = %issue.kind, "diagnostic issue")
                    }
                    _ => info!(severity = issue.severity.as_str(), issue = %issue.kind, "diagnostic issue"),
                }
            }
        }))
    }

    async fn refresh_throughput(&mut self) {
        self.last_speed =
            speedtest::http_speed_test(&self.config.speed_test.url, speedtest::DEFAULT_TIMEOUT).await;
    }
}

/// One full sampling pass: link status, neighbor scan and both ping targets.
/// Probe failures degrade to unknown readings, never errors. The detected
/// gateway is cached in `gateway` across calls.
pub async fn probe_sample<P: LinkProbe + ?Sized>(
    probe: &mut P,
    config: &Config,
    gateway: &mut Option<String>,
    throughput: Option<f64>,
) -> (Sample, LinkStatus, Vec<ScanNetwork>) {
    let ts = Utc::now();

    let link = match timeout(PROBE_DEADLINE, probe.link_status()).await {
        Ok(Ok(link)) => link,
        Ok(Err(err)) => {
            warn!(%err, "link probe failed");
            LinkStatus::unknown()
        }
        Err(_) => {
            warn!("link probe timed out");
            LinkStatus::unknown()
        }
    };

    let networks = match timeout(PROBE_DEADLINE, probe.scan_neighbors()).await {
        Ok(Ok(networks)) => networks,
        Ok(Err(err)) => {
            warn!(%err, "neighbor scan failed");
            Vec::new()
        }
        Err(_) => {
            warn!("neighbor scan timed out");
            Vec::new()
        }
    };

    if gateway.is_none() {
        *gateway = match timeout(PROBE_DEADLINE, probe.default_gateway()).await {
            Ok(found) => found,
            Err(_) => None,
        };
        if let Some(gw) = gateway {
            debug!(gateway = %gw, "detected default gateway");
        }
    }

    let gateway_ping = match gateway.as_deref() {
        Some(gw) => ping_with_deadline(probe, gw, config.ping_count).await,
        None => PingStats::default(),
    };
    let remote_ping = ping_with_deadline(probe, &config.ping_targets.remote, config.ping_count).await;

    let sample = Sample::from_link(ts, &link, gateway_ping, remote_ping, throughput);
    (sample, link, networks)
}

async fn ping_with_deadline<P: LinkProbe + ?Sized>(probe: &mut P, host: &str, count: u32) -> PingStats {
    match timeout(PROBE_DEADLINE, probe.ping(host, count)).await {
        Ok(stats) => stats,
        Err(_) => PingStats::default(),
    }
}

/// Gather everything one diagnostic run needs using a fresh sampling pass.
pub async fn collect_diag_inputs<P: LinkProbe + ?Sized>(
    probe: &mut P,
    config: &Config,
    log: &LogWriter,
) -> DiagInputs {
    let mut gateway = config.ping_targets.gateway.clone();
    let (sample, _link, networks) = probe_sample(probe, config, &mut gateway, None).await;
    let service = match timeout(PROBE_DEADLINE, probe.service_status(WLAN_SERVICE)).await {
        Ok(status) => status,
        Err(_) => ServiceStatus::Unknown,
    };
    DiagInputs {
        service,
        sample,
        thresholds: config.thresholds,
        neighbors: flatten_scan(&networks),
        history: LogAggregates::collect(log, Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{LinkState, ProbeError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn make_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "wifiwatch-monitor-{tag}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct StubProbe {
        links: VecDeque<LinkStatus>,
        pinged: Arc<std::sync::Mutex<Vec<String>>>,
        scans: Vec<ScanNetwork>,
        gateway: Option<String>,
    }

    impl StubProbe {
        fn connected(bssid: &str, signal: f64) -> LinkStatus {
            LinkStatus {
                state: LinkState::Connected,
                ssid: "Home".into(),
                bssid: bssid.into(),
                signal_pct: Some(signal),
                channel: Some(6),
                radio_type: "2.4".into(),
                rate_mbps: Some(144.0),
                auth: "WPA2".into(),
            }
        }

        fn new(links: Vec<LinkStatus>) -> Self {
            Self {
                links: links.into(),
                pinged: Arc::new(std::sync::Mutex::new(Vec::new())),
                scans: Vec::new(),
                gateway: Some("192.168.1.1".into()),
            }
        }
    }

    #[async_trait]
    impl LinkProbe for StubProbe {
        async fn link_status(&mut self) -> Result<LinkStatus, ProbeError> {
            // Holds the last status once the script runs out.
            match self.links.len() {
                0 => Ok(LinkStatus::disconnected()),
                1 => Ok(self.links[0].clone()),
                _ => Ok(self.links.pop_front().unwrap()),
            }
        }

        async fn scan_neighbors(&mut self) -> Result<Vec<ScanNetwork>, ProbeError> {
            Ok(self.scans.clone())
        }

        async fn ping(&mut self, host: &str, _count: u32) -> PingStats {
            self.pinged.lock().unwrap().push(host.to_string());
            PingStats {
                avg_ms: Some(12.0),
                loss_pct: Some(0.0),
            }
        }

        async fn default_gateway(&mut self) -> Option<String> {
            self.gateway.clone()
        }

        async fn service_status(&mut self, _name: &str) -> ServiceStatus {
            ServiceStatus::Running
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl LinkProbe for HangingProbe {
        async fn link_status(&mut self) -> Result<LinkStatus, ProbeError> {
            std::future::pending().await
        }

        async fn scan_neighbors(&mut self) -> Result<Vec<ScanNetwork>, ProbeError> {
            std::future::pending().await
        }

        async fn ping(&mut self, _host: &str, _count: u32) -> PingStats {
            std::future::pending().await
        }

        async fn default_gateway(&mut self) -> Option<String> {
            std::future::pending().await
        }

        async fn service_status(&mut self, _name: &str) -> ServiceStatus {
            std::future::pending().await
        }
    }

    fn test_config(dir: &PathBuf) -> Config {
        let mut config = Config::default();
        config.log_dir = dir.to_string_lossy().into_owned();
        config.scan_interval = 1;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn session_emits_summaries_and_writes_logs() {
        // Arrange
        let dir = make_temp_dir("emit");
        let probe = StubProbe::new(vec![StubProbe::connected("AA:BB:CC:DD:EE:01", 72.0)]);
        let config = test_config(&dir);
        let log = LogWriter::new(dir.clone()).unwrap();

        // Act
        let (handle, mut rx) = spawn(probe, config, log);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        handle.stop().await;

        // Assert
        assert_eq!(first.sample.ssid, "Home");
        assert_eq!(first.sample.signal_pct, Some(72.0));
        assert_eq!(first.sample.gateway_ping.avg_ms, Some(12.0));
        assert!(first.roam_event.is_none());
        assert_eq!(second.history.signal.len(), 2);

        let csv = std::fs::read_to_string(dir.join("wifi_log.csv")).unwrap();
        assert!(csv.lines().count() >= 3); // header + two samples
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn bssid_change_is_reported_and_logged_as_roam() {
        // Arrange
        let dir = make_temp_dir("roam");
        let probe = StubProbe::new(vec![
            StubProbe::connected("AA:BB:CC:DD:EE:01", 40.0),
            StubProbe::connected("AA:BB:CC:DD:EE:02", 80.0),
        ]);
        let config = test_config(&dir);
        let log = LogWriter::new(dir.clone()).unwrap();

        // Act
        let (handle, mut rx) = spawn(probe, config, log);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        handle.stop().await;

        // Assert
        assert!(first.roam_event.is_none());
        let ev = second.roam_event.expect("second cycle roams");
        assert_eq!(ev.old_bssid, "AA:BB:CC:DD:EE:01");
        assert_eq!(ev.new_bssid, "AA:BB:CC:DD:EE:02");

        let roam_csv = std::fs::read_to_string(dir.join("roaming_events.csv")).unwrap();
        assert_eq!(roam_csv.lines().count(), 2); // header + one event
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_terminates_the_session_task() {
        let dir = make_temp_dir("stop");
        let probe = StubProbe::new(vec![StubProbe::connected("AA:BB:CC:DD:EE:01", 72.0)]);
        let config = test_config(&dir);
        let log = LogWriter::new(dir.clone()).unwrap();

        let (handle, mut rx) = spawn(probe, config, log);
        let _ = rx.recv().await.unwrap();
        handle.stop().await;

        // Channel closes once the task is gone.
        while rx.recv().await.is_some() {}
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn configured_gateway_wins_over_detection() {
        let dir = make_temp_dir("gw");
        let mut probe = StubProbe::new(vec![StubProbe::connected("AA:BB:CC:DD:EE:01", 72.0)]);
        let pinged = probe.pinged.clone();
        probe.gateway = Some("10.0.0.1".into());
        let mut config = test_config(&dir);
        config.ping_targets.gateway = Some("172.16.0.1".into());

        let mut gateway = config.ping_targets.gateway.clone();
        let (sample, _, _) = probe_sample(&mut probe, &config, &mut gateway, None).await;

        assert_eq!(gateway.as_deref(), Some("172.16.0.1"));
        let hosts = pinged.lock().unwrap().clone();
        assert_eq!(hosts, vec!["172.16.0.1".to_string(), "8.8.8.8".to_string()]);
        assert_eq!(sample.gateway_ping.loss_pct, Some(0.0));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_degrades_each_reading_within_the_deadline() {
        // Four calls hit the per-call deadline: link, scan, gateway detection
        // and the remote ping (no gateway ping without a gateway).
        let config = Config::default();
        let mut probe = HangingProbe;
        let mut gateway = None;

        let start = tokio::time::Instant::now();
        let (sample, link, networks) = probe_sample(&mut probe, &config, &mut gateway, None).await;

        assert!(start.elapsed() <= Duration::from_secs(4 * 10));
        assert_eq!(link.state, LinkState::Unknown);
        assert!(networks.is_empty());
        assert!(gateway.is_none());
        assert_eq!(sample.gateway_ping.avg_ms, None);
        assert_eq!(sample.remote_ping.avg_ms, None);
        assert_eq!(sample.remote_ping.loss_pct, None);
    }

    #[tokio::test(start_paused = true)]
    async fn diag_inputs_use_live_service_and_log_aggregates() {
        let dir = make_temp_dir("diag");
        let mut probe = StubProbe::new(vec![StubProbe::connected("AA:BB:CC:DD:EE:01", 72.0)]);
        let config = test_config(&dir);
        let log = LogWriter::new(dir.clone()).unwrap();

        let inputs = collect_diag_inputs(&mut probe, &config, &log).await;

        assert_eq!(inputs.service, ServiceStatus::Running);
        assert_eq!(inputs.sample.ssid, "Home");
        assert!(inputs.history.records.is_empty());
        assert!(diag::evaluate(&inputs).is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
