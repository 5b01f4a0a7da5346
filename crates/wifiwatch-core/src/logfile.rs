use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, warn};

use crate::probe::{LinkStatus, ScanNetwork};
use crate::sample::{RoamEvent, Sample};

const CSV_NAME: &str = "wifi_log.csv";
const JSONL_NAME: &str = "wifi_log.jsonl";
const ROAM_NAME: &str = "roaming_events.csv";

const CSV_HEADER: &str = "ts,state,ssid,bssid,signal_pct,channel,radio_type,\
ping_gateway_avg,ping_gateway_loss,ping_remote_avg,ping_remote_loss,download_mbps";
const ROAM_HEADER: &str = "ts,ssid,old_bssid,new_bssid,old_signal,new_signal";

/// Appends telemetry to the durable log files and enforces the retention
/// policy. Records are append-only; the rotation pass deletes whole files,
/// never partial content, and only files it recognizes as its own.
#[derive(Debug, Clone)]
pub struct LogWriter {
    dir: PathBuf,
}

/// One parsed row of the columnar log, reduced to the fields the rule engine
/// aggregates over.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub ts: DateTime<Utc>,
    pub state: String,
    pub signal_pct: Option<f64>,
}

impl LogWriter {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn open_appending(&self, name: &str, header: &str) -> io::Result<File> {
        let path = self.dir.join(name);
        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if fresh {
            writeln!(file, "{header}")?;
        }
        Ok(file)
    }

    /// One columnar record and one schemaless record per sample. Both writes
    /// must land; an error is returned for the caller to report, after which
    /// sampling continues.
    pub fn append(
        &self,
        sample: &Sample,
        link: &LinkStatus,
        scan: &[ScanNetwork],
    ) -> io::Result<()> {
        let mut csv = self.open_appending(CSV_NAME, CSV_HEADER)?;
        writeln!(
            csv,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            sample.ts.to_rfc3339(),
            csv_field(sample.state.as_str()),
            csv_field(&sample.ssid),
            csv_field(&sample.bssid),
            fmt_opt(sample.signal_pct),
            sample.channel.map(|c| c.to_string()).unwrap_or_default(),
            csv_field(&sample.radio_type),
            fmt_opt(sample.gateway_ping.avg_ms),
            fmt_opt(sample.gateway_ping.loss_pct),
            fmt_opt(sample.remote_ping.avg_ms),
            fmt_opt(sample.remote_ping.loss_pct),
            fmt_opt(sample.throughput_mbps),
        )?;

        let record = json!({
            "ts": sample.ts.to_rfc3339(),
            "interface": link,
            "scan": scan,
            "ping_gateway": {"avg": sample.gateway_ping.avg_ms, "loss": sample.gateway_ping.loss_pct},
            "ping_remote": {"avg": sample.remote_ping.avg_ms, "loss": sample.remote_ping.loss_pct},
            "throughput": sample.throughput_mbps,
        });
        let mut jsonl = self.open_appending(JSONL_NAME, "")?;
        serde_json::to_writer(&mut jsonl, &record)?;
        jsonl.write_all(b"\n")?;
        Ok(())
    }

    pub fn append_roam(&self, event: &RoamEvent) -> io::Result<()> {
        let mut file = self.open_appending(ROAM_NAME, ROAM_HEADER)?;
        writeln!(
            file,
            "{},{},{},{},{},{}",
            event.ts.to_rfc3339(),
            csv_field(&event.ssid),
            csv_field(&event.old_bssid),
            csv_field(&event.new_bssid),
            fmt_opt(event.old_signal),
            fmt_opt(event.new_signal),
        )?;
        Ok(())
    }

    /// Daily rotation: close out `archive_date` by renaming the active files
    /// to dated siblings, drop archives past `retention_days`, then evict the
    /// oldest archives (by mtime) while recognized log files exceed `max_mb`.
    /// Active files and unrelated files in the directory are never deleted.
    pub fn rotate(
        &self,
        retention_days: u64,
        max_mb: u64,
        archive_date: NaiveDate,
        today: NaiveDate,
    ) -> io::Result<()> {
        let stamp = archive_date.format("%Y%m%d").to_string();
        for (active, prefix, ext) in [
            (CSV_NAME, "wifi_log", "csv"),
            (JSONL_NAME, "wifi_log", "jsonl"),
            (ROAM_NAME, "roaming_events", "csv"),
        ] {
            let src = self.dir.join(active);
            let dst = self.dir.join(format!("{prefix}-{stamp}.{ext}"));
            if src.exists() && !dst.exists() {
                if let Err(err) = fs::rename(&src, &dst) {
                    warn!(file = active, %err, "archive rename failed");
                }
            }
        }

        let cutoff = today
            .checked_sub_days(Days::new(retention_days))
            .unwrap_or(today);
        for (path, date) in self.archived_files()? {
            if date < cutoff {
                debug!(path = %path.display(), "dropping expired archive");
                if let Err(err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), %err, "archive delete failed");
                }
            }
        }

        let budget = max_mb.saturating_mul(1024 * 1024);
        loop {
            if self.recognized_size()? <= budget {
                break;
            }
            let mut archives = self.archived_files()?;
            archives.sort_by_key(|(path, _)| {
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            });
            let Some((oldest, _)) = archives.into_iter().next() else {
                break;
            };
            debug!(path = %oldest.display(), "evicting oldest archive over size budget");
            if let Err(err) = fs::remove_file(&oldest) {
                warn!(path = %oldest.display(), %err, "archive delete failed");
                break;
            }
        }
        Ok(())
    }

    fn archived_files(&self) -> io::Result<Vec<(PathBuf, NaiveDate)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(date) = parse_archive_date(name) {
                out.push((path, date));
            }
        }
        Ok(out)
    }

    fn recognized_size(&self) -> io::Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let active = matches!(name.as_str(), CSV_NAME | JSONL_NAME | ROAM_NAME);
            if active || parse_archive_date(&name).is_some() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Tail of the active columnar log. Malformed lines are skipped; a
    /// missing or unreadable file yields an empty dataset.
    pub fn read_recent(&self, limit: usize) -> Vec<LogRecord> {
        let Ok(raw) = fs::read_to_string(self.dir.join(CSV_NAME)) else {
            return Vec::new();
        };
        let records: Vec<LogRecord> = raw
            .lines()
            .skip(1)
            .filter_map(parse_log_line)
            .collect();
        let skip = records.len().saturating_sub(limit);
        records.into_iter().skip(skip).collect()
    }

    /// Count of roam-log records, total and within the trailing window.
    pub fn roam_counts(&self, since: DateTime<Utc>) -> (usize, usize) {
        let Ok(raw) = fs::read_to_string(self.dir.join(ROAM_NAME)) else {
            return (0, 0);
        };
        let mut total = 0;
        let mut recent = 0;
        for line in raw.lines().skip(1) {
            let Some(ts_str) = line.split(',').next() else {
                continue;
            };
            let Ok(ts) = DateTime::parse_from_rfc3339(ts_str) else {
                continue;
            };
            total += 1;
            if ts.with_timezone(&Utc) >= since {
                recent += 1;
            }
        }
        (total, recent)
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut cur)),
            _ => cur.push(ch),
        }
    }
    fields.push(cur);
    fields
}

fn parse_log_line(line: &str) -> Option<LogRecord> {
    let fields = split_csv_line(line);
    if fields.len() < 12 {
        return None;
    }
    let ts = DateTime::parse_from_rfc3339(&fields[0])
        .ok()?
        .with_timezone(&Utc);
    Some(LogRecord {
        ts,
        state: fields[1].clone(),
        signal_pct: fields[4].parse().ok(),
    })
}

fn parse_archive_date(name: &str) -> Option<NaiveDate> {
    let stem = name
        .strip_suffix(".csv")
        .or_else(|| name.strip_suffix(".jsonl"))?;
    let stamp = stem
        .strip_prefix("wifi_log-")
        .or_else(|| stem.strip_prefix("roaming_events-"))?;
    NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{LinkState, PingStats};
    use chrono::TimeZone;
    use std::env;
    use std::time::SystemTime;

    fn make_temp_dir(name: &str) -> PathBuf {
        let mut path = env::temp_dir();
        let uniq = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("unix epoch")
            .as_nanos();
        path.push(format!("wifiwatch-tests-{name}-{uniq}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn sample_at(ts: DateTime<Utc>, state: LinkState, signal: Option<f64>) -> Sample {
        Sample {
            ts,
            state,
            ssid: "Home, sweet".into(),
            bssid: "AA:BB".into(),
            signal_pct: signal,
            channel: Some(6),
            radio_type: "2.4".into(),
            gateway_ping: PingStats {
                avg_ms: Some(12.0),
                loss_pct: Some(0.0),
            },
            remote_ping: PingStats {
                avg_ms: Some(25.5),
                loss_pct: Some(0.0),
            },
            throughput_mbps: None,
        }
    }

    fn link() -> LinkStatus {
        LinkStatus {
            state: LinkState::Connected,
            ssid: "Home, sweet".into(),
            bssid: "AA:BB".into(),
            signal_pct: Some(64.0),
            channel: Some(6),
            radio_type: "2.4".into(),
            rate_mbps: Some(130.0),
            auth: "WPA2".into(),
        }
    }

    #[test]
    fn append_then_read_recent_round_trips_fields() {
        // Arrange
        let dir = make_temp_dir("append-read");
        let writer = LogWriter::new(&dir).expect("writer");
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        // Act
        writer
            .append(&sample_at(ts, LinkState::Connected, Some(64.0)), &link(), &[])
            .expect("append");
        writer
            .append(&sample_at(ts, LinkState::Disconnected, None), &link(), &[])
            .expect("append");
        let records = writer.read_recent(1000);

        // Assert: commas in the ssid must not shift the columns.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state, "connected");
        assert_eq!(records[0].signal_pct, Some(64.0));
        assert_eq!(records[1].state, "disconnected");
        assert_eq!(records[1].signal_pct, None);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = make_temp_dir("malformed");
        let writer = LogWriter::new(&dir).expect("writer");
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        writer
            .append(&sample_at(ts, LinkState::Connected, Some(50.0)), &link(), &[])
            .expect("append");
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.join(CSV_NAME))
            .unwrap();
        writeln!(file, "not a timestamp,garbage").unwrap();

        assert_eq!(writer.read_recent(1000).len(), 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn read_recent_keeps_only_the_tail() {
        let dir = make_temp_dir("tail");
        let writer = LogWriter::new(&dir).expect("writer");
        for i in 0..10 {
            let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, i).unwrap();
            writer
                .append(&sample_at(ts, LinkState::Connected, Some(i as f64)), &link(), &[])
                .expect("append");
        }
        let records = writer.read_recent(3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].signal_pct, Some(7.0));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rotate_archives_actives_and_prunes_by_age() {
        // Arrange
        let dir = make_temp_dir("rotate-age");
        let writer = LogWriter::new(&dir).expect("writer");
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
        writer
            .append(&sample_at(ts, LinkState::Connected, Some(50.0)), &link(), &[])
            .expect("append");
        let expired = dir.join("wifi_log-20260101.csv");
        let unrelated = dir.join("notes.txt");
        fs::write(&expired, "old").unwrap();
        fs::write(&unrelated, "keep").unwrap();

        // Act
        let archive_date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        writer.rotate(14, 512, archive_date, today).expect("rotate");

        // Assert
        assert!(!dir.join(CSV_NAME).exists(), "active csv archived away");
        assert!(dir.join("wifi_log-20260301.csv").exists());
        assert!(dir.join("wifi_log-20260301.jsonl").exists());
        assert!(!expired.exists(), "expired archive pruned");
        assert!(unrelated.exists(), "unrelated file untouched");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rotate_twice_is_idempotent() {
        let dir = make_temp_dir("rotate-idem");
        let writer = LogWriter::new(&dir).expect("writer");
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        writer
            .append(&sample_at(ts, LinkState::Connected, Some(50.0)), &link(), &[])
            .expect("append");
        let archive_date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        writer.rotate(14, 512, archive_date, today).expect("rotate");
        let listing = |d: &Path| {
            let mut names: Vec<String> = fs::read_dir(d)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        };
        let before = listing(&dir);

        writer.rotate(14, 512, archive_date, today).expect("rotate again");

        assert_eq!(listing(&dir), before);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn size_eviction_only_touches_archives() {
        // Arrange: budget of 0 MB forces the sweep; only archives may go.
        let dir = make_temp_dir("rotate-size");
        let writer = LogWriter::new(&dir).expect("writer");
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        writer
            .append(&sample_at(ts, LinkState::Connected, Some(50.0)), &link(), &[])
            .expect("append");
        let archive = dir.join("wifi_log-20260228.csv");
        let unrelated = dir.join("notes.txt");
        fs::write(&archive, vec![b'x'; 4096]).unwrap();
        fs::write(&unrelated, "keep").unwrap();

        // Act
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        writer
            .rotate(14, 0, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), today)
            .expect("rotate");

        // Assert
        assert!(!archive.exists(), "archive evicted for size");
        assert!(unrelated.exists(), "unrelated file never evicted");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn roam_counts_split_total_and_recent() {
        let dir = make_temp_dir("roam-counts");
        let writer = LogWriter::new(&dir).expect("writer");
        let old = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let fresh = Utc.with_ymd_and_hms(2026, 3, 1, 11, 45, 0).unwrap();
        for (i, ts) in [(0, old), (1, fresh), (2, fresh)] {
            writer
                .append_roam(&RoamEvent {
                    ts,
                    ssid: "Home".into(),
                    old_bssid: format!("A{i}"),
                    new_bssid: format!("B{i}"),
                    old_signal: Some(40.0),
                    new_signal: Some(70.0),
                })
                .expect("append roam");
        }
        let since = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        assert_eq!(writer.roam_counts(since), (3, 2));
        let _ = fs::remove_dir_all(dir);
    }
}
