use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Download `url` once and return the observed throughput in Mbps.
///
/// Best-effort by design: any network or HTTP failure is reported as `None`
/// so the sampling loop keeps running without a throughput reading. The
/// measurement includes the full body transfer, not just the headers.
pub async fn http_speed_test(url: &str, timeout: Duration) -> Option<f64> {
    let client = match reqwest::Client::builder()
        .user_agent("wifiwatch")
        .timeout(timeout)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            warn!(%err, "could not build http client for speed test");
            return None;
        }
    };

    let start = Instant::now();
    let response = match client.get(url).send().await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(url, %err, "speed test request failed");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!(url, status = %response.status(), "speed test got a non-success response");
        return None;
    }
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => {
            warn!(url, %err, "speed test download failed");
            return None;
        }
    };

    let elapsed = start.elapsed().as_secs_f64();
    if elapsed <= 0.0 || body.is_empty() {
        return None;
    }
    let mbps = (body.len() as f64 * 8.0) / (elapsed * 1_000_000.0);
    debug!(url, bytes = body.len(), elapsed_s = elapsed, mbps, "speed test complete");
    Some(mbps)
}
