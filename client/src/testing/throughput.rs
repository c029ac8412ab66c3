//! HTTP upload/download throughput
//!
//! Both directions loop over requests for a fixed window and count only the
//! bytes of successful responses. A failed request is counted and the loop
//! goes on until the window closes.

use anyhow::{Result, bail};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

const PAYLOAD_SIZE: usize = 3 * 1024 * 1024;
const CHUNK_SIZE: usize = 512 * 1024;
const PAYLOAD_PATTERN: &[u8] = b"POLARIS_PATTERN_";

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Tally {
    bytes: u64,
    successes: u32,
    failures: u32,
}

impl Tally {
    fn into_mbps(self, elapsed: Duration, direction: &str) -> Result<f64> {
        debug!(
            "{direction}: {} bytes in {:?} ({} ok, {} failed)",
            self.bytes, elapsed, self.successes, self.failures
        );
        if self.successes == 0 {
            bail!("{direction} failed: no request succeeded ({} failures)", self.failures);
        }
        Ok(mbps(self.bytes, elapsed))
    }
}

pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0 / secs) / 1_000_000.0
}

/// Time left in the window; a request never outlives it
fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Upload buffer: the pattern repeated to fill 3 MiB
pub fn upload_payload() -> Bytes {
    let data: Vec<u8> = PAYLOAD_PATTERN
        .iter()
        .copied()
        .cycle()
        .take(PAYLOAD_SIZE)
        .collect();
    Bytes::from(data)
}

pub async fn measure_upload(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    window: Duration,
) -> Result<f64> {
    let payload = upload_payload();
    let mut offset = 0;
    let mut tally = Tally::default();

    let start = Instant::now();
    let deadline = start + window;

    while Instant::now() < deadline {
        let end = (offset + CHUNK_SIZE).min(payload.len());
        let chunk = payload.slice(offset..end);
        offset = if end >= payload.len() { 0 } else { end };

        let mut request = client
            .post(url)
            .timeout(remaining(deadline))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk.clone());
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                tally.bytes += chunk.len() as u64;
                tally.successes += 1;
            }
            Ok(resp) => {
                debug!("Upload chunk rejected: {}", resp.status());
                tally.failures += 1;
            }
            Err(e) => {
                debug!("Upload chunk failed: {e}");
                tally.failures += 1;
            }
        }
    }

    tally.into_mbps(start.elapsed(), "Upload")
}

pub async fn measure_download(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    window: Duration,
) -> Result<f64> {
    let mut tally = Tally::default();

    let start = Instant::now();
    let deadline = start + window;

    while Instant::now() < deadline {
        let mut request = client.get(url).timeout(remaining(deadline));
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token);
        }

        let body = match request.send().await {
            Ok(resp) if resp.status().is_success() => resp.bytes().await,
            Ok(resp) => {
                debug!("Download rejected: {}", resp.status());
                tally.failures += 1;
                continue;
            }
            Err(e) => Err(e),
        };

        match body {
            Ok(body) => {
                tally.bytes += body.len() as u64;
                tally.successes += 1;
            }
            Err(e) => {
                debug!("Download failed: {e}");
                tally.failures += 1;
            }
        }
    }

    tally.into_mbps(start.elapsed(), "Download")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_mbps_formula() {
        // 1 250 000 bytes in 2 s = 10 Mbit in 2 s
        assert!((mbps(1_250_000, Duration::from_secs(2)) - 5.0).abs() < 1e-9);
        assert_eq!(mbps(1000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_payload_layout() {
        let payload = upload_payload();
        assert_eq!(payload.len(), 3 * 1024 * 1024);
        assert_eq!(&payload[..16], b"POLARIS_PATTERN_");
        assert_eq!(&payload[CHUNK_SIZE..CHUNK_SIZE + 16], b"POLARIS_PATTERN_");
        assert_eq!(payload.len() % CHUNK_SIZE, 0);
    }

    #[tokio::test]
    async fn test_download_counts_successful_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64 * 1024]))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/dl", server.uri());
        let result = measure_download(&client, &url, None, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(result > 0.0);
    }

    #[tokio::test]
    async fn test_upload_sends_token_and_tolerates_failures() {
        let server = MockServer::start().await;
        // First two chunks are rejected, the rest accepted
        Mock::given(method("POST"))
            .and(path("/ul"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ul"))
            .and(header("authorization", "tok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/ul", server.uri());
        let result = measure_upload(&client, &url, Some("tok"), Duration::from_millis(300))
            .await
            .unwrap();
        assert!(result > 0.0);
    }

    #[tokio::test]
    async fn test_stalled_request_ends_with_the_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 32 * 1024]))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(60)))
            .mount(&server)
            .await;

        // The client-wide timeout is far longer than the window
        let client = crate::utils::http_client(Duration::from_secs(30)).unwrap();
        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            measure_download(&client, &server.uri(), None, Duration::from_millis(500)),
        )
        .await
        .expect("download must stop at the end of its window")
        .unwrap();

        assert!(result > 0.0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_all_failures_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let result =
            measure_download(&client, &server.uri(), None, Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
