use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wifiwatch_core::{
    collect_diag_inputs, evaluate, flatten_scan, http_speed_test, probe_sample, Config,
    KnowledgeBase, LogWriter, Severity, ShellProbe, Summary,
};

#[derive(Debug, Parser)]
#[command(name = "wifiwatchd")]
#[command(about = "Wi-Fi link monitor and diagnostics (read-only)")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long, default_value = "troubleshooting_database.yaml")]
    kb: PathBuf,

    /// Override the configured log directory.
    #[arg(long)]
    log_dir: Option<String>,

    /// Override the configured sampling interval in seconds.
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Gateway address to ping; autodetected when absent.
    #[arg(long)]
    gateway: Option<String>,

    /// Remote host to ping.
    #[arg(long)]
    remote: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List visible networks, strongest first.
    Scan,
    /// Take one sample and exit.
    Once {
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Sample continuously until ctrl-c.
    Run {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Run the full health check against live readings and the logs.
    Diagnose {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Measure download throughput once.
    Speedtest,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(dir) = cli.log_dir {
        config.log_dir = dir;
    }
    if let Some(secs) = cli.interval_secs {
        config.scan_interval = secs;
    }
    if let Some(gateway) = cli.gateway {
        config.ping_targets.gateway = Some(gateway);
    }
    if let Some(remote) = cli.remote {
        config.ping_targets.remote = remote;
    }

    let mut probe = ShellProbe::default();

    match cli.command {
        Command::Scan => {
            let networks = wifiwatch_core::LinkProbe::scan_neighbors(&mut probe).await?;
            let neighbors = flatten_scan(&networks);
            println!("{}", serde_json::to_string_pretty(&neighbors)?);
        }
        Command::Once { format } => {
            let mut gateway = config.ping_targets.gateway.clone();
            let (sample, link, networks) =
                probe_sample(&mut probe, &config, &mut gateway, None).await;
            let summary = serde_json::json!({
                "sample": sample,
                "link": link,
                "neighbors": flatten_scan(&networks),
            });
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Ndjson => println!("{}", serde_json::to_string(&summary)?),
                OutputFormat::Human => print_sample_human(
                    &sample,
                    flatten_scan(&networks).len(),
                    gateway.as_deref(),
                    &config.ping_targets.remote,
                ),
            }
        }
        Command::Run { format } => {
            let log = LogWriter::new(config.log_dir.clone())?;
            run_loop(probe, config, log, format).await?;
        }
        Command::Diagnose { format } => {
            let log = LogWriter::new(config.log_dir.clone())?;
            let inputs = collect_diag_inputs(&mut probe, &config, &log).await;
            let issues = evaluate(&inputs);
            let kb = KnowledgeBase::load(&cli.kb);
            print_issues(&issues, &kb, format)?;
            if issues.iter().any(|i| i.severity == Severity::Fail) {
                std::process::exit(1);
            }
        }
        Command::Speedtest => {
            match http_speed_test(
                &config.speed_test.url,
                wifiwatch_core::speedtest::DEFAULT_TIMEOUT,
            )
            .await
            {
                Some(mbps) => println!("{mbps:.2} Mbps ({})", config.speed_test.url),
                None => {
                    anyhow::bail!("speed test failed for {}", config.speed_test.url);
                }
            }
        }
    }

    Ok(())
}

async fn run_loop(probe: ShellProbe, config: Config, log: LogWriter, format: OutputFormat) -> Result<()> {
    let gateway = config.ping_targets.gateway.clone();
    let remote = config.ping_targets.remote.clone();
    let (handle, mut summaries) = wifiwatch_core::spawn(probe, config, log);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            summary = summaries.recv() => {
                let Some(summary) = summary else { break };
                print_summary(&summary, format, gateway.as_deref(), &remote)?;
            }
        }
    }

    handle.stop().await;
    Ok(())
}

fn print_summary(
    summary: &Summary,
    format: OutputFormat,
    gateway: Option<&str>,
    remote: &str,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        OutputFormat::Ndjson => println!("{}", serde_json::to_string(summary)?),
        OutputFormat::Human => {
            print_sample_human(&summary.sample, summary.neighbors.len(), gateway, remote);
            if let Some(ev) = &summary.roam_event {
                println!(
                    "Roamed:    {} -> {} ({})",
                    ev.old_bssid, ev.new_bssid, ev.ssid
                );
            }
            for n in &summary.notifications {
                println!("Alert:     {}", n.message);
            }
        }
    }
    Ok(())
}

fn print_sample_human(
    sample: &wifiwatch_core::Sample,
    neighbor_count: usize,
    gateway: Option<&str>,
    remote: &str,
) {
    println!("=== Wi-Fi Sample ===");
    println!("Time:      {}", sample.ts.to_rfc3339());
    println!(
        "Link:      {} ssid={} bssid={} signal={} ch={} ({} GHz)",
        sample.state.as_str(),
        if sample.ssid.is_empty() { "-" } else { &sample.ssid },
        if sample.bssid.is_empty() { "-" } else { &sample.bssid },
        fmt_pct(sample.signal_pct),
        sample
            .channel
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string()),
        sample.radio_type,
    );
    println!(
        "Gateway:   {} avg={} loss={}",
        gateway.unwrap_or("(unknown)"),
        fmt_ms(sample.gateway_ping.avg_ms),
        fmt_pct(sample.gateway_ping.loss_pct),
    );
    println!(
        "Internet:  {} avg={} loss={}",
        remote,
        fmt_ms(sample.remote_ping.avg_ms),
        fmt_pct(sample.remote_ping.loss_pct),
    );
    if let Some(mbps) = sample.throughput_mbps {
        println!("Download:  {mbps:.2} Mbps");
    }
    println!("Neighbors: {neighbor_count}");
}

fn print_issues(
    issues: &[wifiwatch_core::Issue],
    kb: &KnowledgeBase,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Ndjson => {
            let report: Vec<serde_json::Value> = issues
                .iter()
                .map(|issue| {
                    let doc = kb.describe(issue.kind.key());
                    serde_json::json!({
                        "severity": issue.severity,
                        "issue": issue.kind,
                        "title": doc.title,
                        "category": doc.category,
                        "description": doc.description,
                        "resolutions": doc.resolutions,
                    })
                })
                .collect();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                _ => {
                    for entry in report {
                        println!("{}", serde_json::to_string(&entry)?);
                    }
                }
            }
        }
        OutputFormat::Human => {
            if issues.is_empty() {
                println!("No issues detected.");
                return Ok(());
            }
            for issue in issues {
                let doc = kb.describe(issue.kind.key());
                println!("[{}] {} ({})", issue.severity.as_str(), doc.title, doc.category);
                println!("    {}", doc.description);
                for step in &doc.resolutions {
                    println!("    - {step}");
                }
            }
        }
    }
    Ok(())
}

fn fmt_ms(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.1} ms"))
        .unwrap_or_else(|| "n/a".to_string())
}

fn fmt_pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.0}%"))
        .unwrap_or_else(|| "n/a".to_string())
}
