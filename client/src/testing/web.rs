//! Web page response time

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::time::Instant;
use tracing::debug;

/// Keep an explicit http(s) scheme, otherwise assume https
pub fn normalize_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate).with_context(|| format!("Invalid web test URL: {raw}"))?;
    if url.host_str().is_none_or(str::is_empty) {
        bail!("Invalid web test URL: {raw}");
    }
    Ok(url)
}

/// Time a full GET including the body, bypassing caches
pub async fn response_time(client: &reqwest::Client, raw_url: &str) -> Result<f64> {
    let url = normalize_url(raw_url)?;

    let start = Instant::now();
    let resp = client
        .get(url.clone())
        .header(CACHE_CONTROL, "no-cache, no-store")
        .header(PRAGMA, "no-cache")
        .send()
        .await
        .with_context(|| format!("GET {url} failed"))?;

    let status = resp.status();
    let body = resp.bytes().await.context("Failed to read response body")?;
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;

    if !status.is_success() {
        bail!("GET {url} returned {status}");
    }

    debug!("GET {url}: {} bytes in {elapsed:.1}ms", body.len());
    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("www.google.com").unwrap().as_str(),
            "https://www.google.com/"
        );
        assert_eq!(
            normalize_url("http://example.org/a").unwrap().as_str(),
            "http://example.org/a"
        );
        assert_eq!(
            normalize_url(" HTTPS://Example.org ").unwrap().as_str(),
            "https://example.org/"
        );
        assert!(normalize_url("").is_err());
        assert!(normalize_url("http://").is_err());
    }

    #[tokio::test]
    async fn test_response_time_sends_no_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("pragma", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let ms = response_time(&client, &server.uri()).await.unwrap();
        assert!(ms >= 0.0);
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        assert!(response_time(&client, &server.uri()).await.is_err());
    }
}
