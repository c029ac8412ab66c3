//! Configuration management
//!
//! The TOML file doubles as the preference store: the daemon re-reads it at
//! the start of every pipeline run and the `config` subcommands rewrite it.

use crate::testing::TestSelection;
use anyhow::{Context, Result, bail};
use protocol::constants::{
    DEFAULT_API_BASE_URL, DEFAULT_DNS_HOST, DEFAULT_PING_HOST, DEFAULT_SMS_COUNTRY_CODE,
    DEFAULT_SMS_NUMBER, DEFAULT_WEB_URL, HTTP_TEST_DOWNLOAD_PATH, HTTP_TEST_UPLOAD_PATH,
    endpoint,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
    #[serde(default)]
    pub tests: TestSelection,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeneralConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,
}

/// Probe targets. Empty strings fall back to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetsConfig {
    #[serde(default)]
    pub upload_url: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default = "default_ping_host")]
    pub ping_host: String,
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,
    #[serde(default)]
    pub ping_method: PingMethod,
    #[serde(default = "default_dns_host")]
    pub dns_host: String,
    #[serde(default = "default_web_url")]
    pub web_url: String,
    #[serde(default = "default_sms_number")]
    pub sms_number: String,
    #[serde(default = "default_sms_country_code")]
    pub sms_country_code: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PingMethod {
    /// Run the system `ping` tool and parse its summary line
    #[default]
    System,
    /// In-process ICMP echo (needs CAP_NET_RAW)
    Icmp,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SimConfig {
    /// Slot index of the SIM whose serving cell is measured
    #[serde(default)]
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_measurement_interval_min")]
    pub measurement_interval_min: u64,
    #[serde(default = "default_sync_interval_min")]
    pub sync_interval_min: u64,
    #[serde(default)]
    pub trigger: TriggerStyle,
    #[serde(default = "default_true")]
    pub require_network: bool,
    #[serde(default)]
    pub sync_after_measurement: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStyle {
    #[default]
    Periodic,
    ExactAlarm,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub source: LocationSource,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_fix_timeout_s")]
    pub fix_timeout_s: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// Fixed coordinates from this file
    #[default]
    Static,
    /// GPS fix reported by ModemManager
    Modem,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_database_path() -> String {
    "polaris.db".to_string()
}

fn default_credentials_path() -> String {
    "polaris-credentials.json".to_string()
}

fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_s() -> u64 {
    30
}

fn default_ping_host() -> String {
    DEFAULT_PING_HOST.to_string()
}

fn default_ping_count() -> u32 {
    3
}

fn default_dns_host() -> String {
    DEFAULT_DNS_HOST.to_string()
}

fn default_web_url() -> String {
    DEFAULT_WEB_URL.to_string()
}

fn default_sms_number() -> String {
    DEFAULT_SMS_NUMBER.to_string()
}

fn default_sms_country_code() -> String {
    DEFAULT_SMS_COUNTRY_CODE.to_string()
}

fn default_measurement_interval_min() -> u64 {
    15
}

fn default_sync_interval_min() -> u64 {
    30
}

fn default_fix_timeout_s() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            credentials_path: default_credentials_path(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_s: default_request_timeout_s(),
        }
    }
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            download_url: String::new(),
            ping_host: default_ping_host(),
            ping_count: default_ping_count(),
            ping_method: PingMethod::default(),
            dns_host: default_dns_host(),
            web_url: default_web_url(),
            sms_number: default_sms_number(),
            sms_country_code: default_sms_country_code(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            measurement_interval_min: default_measurement_interval_min(),
            sync_interval_min: default_sync_interval_min(),
            trigger: TriggerStyle::default(),
            require_network: true,
            sync_after_measurement: false,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            source: LocationSource::default(),
            latitude: None,
            longitude: None,
            fix_timeout_s: default_fix_timeout_s(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        toml::from_str(&contents).with_context(|| "Failed to parse config file")
    }

    /// Load the file if it exists, otherwise start from defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))
    }
}

impl TargetsConfig {
    pub fn upload_url(&self, base_url: &str) -> String {
        non_blank(&self.upload_url)
            .map(str::to_string)
            .unwrap_or_else(|| endpoint(base_url, HTTP_TEST_UPLOAD_PATH))
    }

    pub fn download_url(&self, base_url: &str) -> String {
        non_blank(&self.download_url)
            .map(str::to_string)
            .unwrap_or_else(|| endpoint(base_url, HTTP_TEST_DOWNLOAD_PATH))
    }

    pub fn ping_host(&self) -> &str {
        non_blank(&self.ping_host).unwrap_or(DEFAULT_PING_HOST)
    }

    pub fn dns_host(&self) -> &str {
        non_blank(&self.dns_host).unwrap_or(DEFAULT_DNS_HOST)
    }

    pub fn web_url(&self) -> &str {
        non_blank(&self.web_url).unwrap_or(DEFAULT_WEB_URL)
    }

    /// Update one target by its key name
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let value = value.trim().to_string();
        match name {
            "upload_url" => self.upload_url = value,
            "download_url" => self.download_url = value,
            "ping_host" => self.ping_host = value,
            "ping_count" => {
                self.ping_count = value
                    .parse()
                    .with_context(|| format!("Invalid ping count: {value}"))?
            }
            "ping_method" => {
                self.ping_method = match value.as_str() {
                    "system" => PingMethod::System,
                    "icmp" => PingMethod::Icmp,
                    other => bail!("Unknown ping method: {other}"),
                }
            }
            "dns_host" => self.dns_host = value,
            "web_url" => self.web_url = value,
            "sms_number" => self.sms_number = value,
            "sms_country_code" => self.sms_country_code = value,
            other => bail!("Unknown target: {other}"),
        }
        Ok(())
    }
}

impl ScheduleConfig {
    pub fn measurement_interval(&self) -> Duration {
        Duration::from_secs(self.measurement_interval_min.max(1).saturating_mul(60))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_min.max(1).saturating_mul(60))
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
