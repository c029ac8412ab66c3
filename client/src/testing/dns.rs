//! DNS resolution time

use anyhow::{Result, anyhow};
use std::time::Instant;
use tracing::debug;

pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Time one forward lookup of `host`, retrying up to `attempts` times
pub async fn resolution_time(host: &str, attempts: u32) -> Result<f64> {
    let mut last_error = anyhow!("no lookup attempted for {host}");

    for attempt in 1..=attempts.max(1) {
        let start = Instant::now();
        match tokio::net::lookup_host((host, 0)).await {
            Ok(mut addrs) => {
                let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                if addrs.next().is_some() {
                    debug!("Resolved {host} in {elapsed:.2}ms (attempt {attempt})");
                    return Ok(elapsed);
                }
                last_error = anyhow!("{host} resolved to no addresses");
            }
            Err(e) => {
                debug!("Lookup of {host} failed (attempt {attempt}): {e}");
                last_error = anyhow!("lookup of {host} failed: {e}");
            }
        }
    }

    Err(last_error)
}
