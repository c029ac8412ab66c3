//! Network testing implementation
//!
//! Every probe returns `anyhow::Result<f64>`; the assembler turns errors and
//! deadline overruns into the `-1.0` sentinel.

pub mod dns;
pub mod icmp;
mod measurement;
pub mod sms;
pub mod throughput;
pub mod web;

pub use measurement::{Measurement, StoredMeasurement, TestSelection};
#[cfg(test)]
pub(crate) use measurement::sample_measurement;

use crate::config::{Config, PingMethod};
use crate::credentials::CredentialProvider;
use anyhow::Result;
use async_trait::async_trait;
use sms::SmsGateway;
use std::sync::Arc;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkProbes: Send + Sync {
    /// Upload throughput in Mbps
    async fn http_upload(&self) -> Result<f64>;
    /// Download throughput in Mbps
    async fn http_download(&self) -> Result<f64>;
    /// Mean ping RTT in ms
    async fn ping(&self) -> Result<f64>;
    /// DNS resolution time in ms
    async fn dns(&self) -> Result<f64>;
    /// Web page response time in ms
    async fn web(&self) -> Result<f64>;
    /// SMS send-to-delivery time in ms
    async fn sms(&self) -> Result<f64>;
}

/// Wall-clock budget of each probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeDeadlines {
    pub http_upload: Duration,
    pub http_download: Duration,
    pub ping: Duration,
    pub dns: Duration,
    pub web: Duration,
    pub sms: Duration,
}

impl Default for ProbeDeadlines {
    fn default() -> Self {
        Self {
            http_upload: Duration::from_secs(20),
            http_download: Duration::from_secs(20),
            ping: Duration::from_secs(30),
            dns: Duration::from_secs(15),
            web: Duration::from_secs(20),
            sms: sms::DELIVERY_TIMEOUT + Duration::from_secs(5),
        }
    }
}

/// Resolved probe targets for one run
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTargets {
    pub upload_url: String,
    pub download_url: String,
    pub ping_host: String,
    pub ping_count: u32,
    pub ping_method: PingMethod,
    pub dns_host: String,
    pub web_url: String,
    pub sms_number: String,
    pub throughput_window: Duration,
}

impl ProbeTargets {
    pub fn from_config(config: &Config) -> Self {
        let targets = &config.targets;
        let base_url = &config.backend.base_url;
        Self {
            upload_url: targets.upload_url(base_url),
            download_url: targets.download_url(base_url),
            ping_host: targets.ping_host().to_string(),
            ping_count: targets.ping_count,
            ping_method: targets.ping_method,
            dns_host: targets.dns_host().to_string(),
            web_url: targets.web_url().to_string(),
            sms_number: sms::test_number(
                &targets.sms_number,
                &targets.sms_country_code,
                protocol::constants::DEFAULT_SMS_NUMBER,
            ),
            throughput_window: throughput::DEFAULT_WINDOW,
        }
    }
}

/// Probes against the real network
pub struct LiveProbes {
    http: reqwest::Client,
    targets: ProbeTargets,
    credentials: Arc<dyn CredentialProvider>,
    sms: Arc<dyn SmsGateway>,
}

impl LiveProbes {
    pub fn new(
        http: reqwest::Client,
        targets: ProbeTargets,
        credentials: Arc<dyn CredentialProvider>,
        sms: Arc<dyn SmsGateway>,
    ) -> Self {
        Self {
            http,
            targets,
            credentials,
            sms,
        }
    }
}

#[async_trait]
impl NetworkProbes for LiveProbes {
    async fn http_upload(&self) -> Result<f64> {
        let token = self.credentials.token();
        throughput::measure_upload(
            &self.http,
            &self.targets.upload_url,
            token.as_deref(),
            self.targets.throughput_window,
        )
        .await
    }

    async fn http_download(&self) -> Result<f64> {
        let token = self.credentials.token();
        throughput::measure_download(
            &self.http,
            &self.targets.download_url,
            token.as_deref(),
            self.targets.throughput_window,
        )
        .await
    }

    async fn ping(&self) -> Result<f64> {
        match self.targets.ping_method {
            PingMethod::System => {
                icmp::ping_system(&self.targets.ping_host, self.targets.ping_count).await
            }
            PingMethod::Icmp => {
                icmp::ping_icmp(&self.targets.ping_host, self.targets.ping_count).await
            }
        }
    }

    async fn dns(&self) -> Result<f64> {
        dns::resolution_time(&self.targets.dns_host, dns::DEFAULT_ATTEMPTS).await
    }

    async fn web(&self) -> Result<f64> {
        web::response_time(&self.http, &self.targets.web_url).await
    }

    async fn sms(&self) -> Result<f64> {
        sms::delivery_time(self.sms.as_ref(), &self.targets.sms_number, sms::DELIVERY_TIMEOUT).await
    }
}
