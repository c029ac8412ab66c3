//! SMS round-trip delivery time
//!
//! The gateway sends a message and hands back a [`ReportSubscription`] that
//! yields the "sent" and "delivered" reports. Dropping the subscription
//! deregisters the listener, so cleanup happens on success, failure and
//! timeout alike.

use crate::utils::run_cmd;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

const TEST_MESSAGE: &str = "Polaris SMS delivery test";

#[derive(Debug, Clone, PartialEq)]
pub enum SmsReport {
    Sent,
    Delivered,
    Failed(String),
}

/// Live listener for the reports of one message
pub struct ReportSubscription {
    reports: mpsc::UnboundedReceiver<SmsReport>,
    deregister: Option<Box<dyn FnOnce() + Send>>,
}

impl ReportSubscription {
    pub fn new(
        reports: mpsc::UnboundedReceiver<SmsReport>,
        deregister: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            reports,
            deregister: Some(Box::new(deregister)),
        }
    }

    pub async fn next(&mut self) -> Option<SmsReport> {
        self.reports.recv().await
    }
}

impl Drop for ReportSubscription {
    fn drop(&mut self) {
        if let Some(deregister) = self.deregister.take() {
            deregister();
        }
    }
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, number: &str, text: &str) -> Result<ReportSubscription>;
}

/// Bring a test number into `+<country><national>` form
///
/// Accepts `+CC…`, `CC…`, `0…` and bare ten-digit national numbers.
pub fn normalize_number(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let cc = country_code.trim_start_matches('+');
    let international_len = cc.len() + 10;

    if raw.trim_start().starts_with('+') {
        return (digits.starts_with(cc) && digits.len() == international_len)
            .then(|| format!("+{digits}"));
    }
    if digits.starts_with(cc) && digits.len() == international_len {
        return Some(format!("+{digits}"));
    }
    if digits.starts_with('0') && digits.len() == 11 {
        return Some(format!("+{cc}{}", &digits[1..]));
    }
    if digits.len() == 10 {
        return Some(format!("+{cc}{digits}"));
    }
    None
}

/// Resolve the configured number, falling back to `default` when unusable
pub fn test_number(configured: &str, country_code: &str, default: &str) -> String {
    if configured.trim().is_empty() {
        return default.to_string();
    }
    normalize_number(configured, country_code).unwrap_or_else(|| {
        warn!("Invalid SMS test number {configured:?}, using default");
        default.to_string()
    })
}

/// Send one message and time it from send to the delivery report
pub async fn delivery_time(
    gateway: &dyn SmsGateway,
    number: &str,
    timeout: Duration,
) -> Result<f64> {
    let start = Instant::now();
    let mut subscription = gateway.send(number, TEST_MESSAGE).await?;

    let wait = async {
        let mut sent = false;
        while let Some(report) = subscription.next().await {
            match report {
                SmsReport::Sent => {
                    debug!("SMS to {number} sent after {:?}", start.elapsed());
                    sent = true;
                }
                SmsReport::Delivered => {
                    if !sent {
                        debug!("Delivery report arrived before the sent report");
                    }
                    return Ok(start.elapsed().as_secs_f64() * 1000.0);
                }
                SmsReport::Failed(reason) => bail!("SMS delivery failed: {reason}"),
            }
        }
        Err(anyhow!("SMS report channel closed before delivery"))
    };

    let outcome = tokio::time::timeout(timeout, wait).await;
    drop(subscription);

    match outcome {
        Ok(result) => result,
        Err(_) => bail!("SMS delivery not confirmed within {timeout:?}"),
    }
}

/// Sends through ModemManager and polls the message's delivery state
pub struct ModemManagerSms {
    pub poll_interval: Duration,
}

impl ModemManagerSms {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[async_trait]
impl SmsGateway for ModemManagerSms {
    async fn send(&self, number: &str, text: &str) -> Result<ReportSubscription> {
        let modem = crate::radio::mmcli::list_modems()
            .await?
            .into_iter()
            .next()
            .context("No modem available for SMS")?;

        let create = format!(
            "--messaging-create-sms=text='{}',number='{}',delivery-report-request=yes",
            text.replace('\'', ""),
            number
        );
        let output = run_cmd("mmcli", &["-m", &modem, &create]).await?;
        let sms_id = parse_created_sms(&output).context("mmcli did not report the new SMS")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let poll_interval = self.poll_interval;
        let id = sms_id.clone();
        let poller: JoinHandle<()> = tokio::spawn(async move {
            if let Err(e) = run_cmd("mmcli", &["-s", &id, "--send"]).await {
                let _ = tx.send(SmsReport::Failed(e.to_string()));
                return;
            }
            let _ = tx.send(SmsReport::Sent);

            loop {
                tokio::time::sleep(poll_interval).await;
                let Ok(output) = run_cmd("mmcli", &["-s", &id, "-J"]).await else {
                    continue;
                };
                match parse_delivery_state(&output).as_deref() {
                    Some("completed-received") => {
                        let _ = tx.send(SmsReport::Delivered);
                        return;
                    }
                    Some(state) if state.contains("error") || state.contains("rejected") => {
                        let _ = tx.send(SmsReport::Failed(state.to_string()));
                        return;
                    }
                    _ => {}
                }
            }
        });

        Ok(ReportSubscription::new(rx, move || {
            poller.abort();
            let delete = format!("--messaging-delete-sms={sms_id}");
            tokio::spawn(async move {
                if let Err(e) = run_cmd("mmcli", &["-m", &modem, &delete]).await {
                    debug!("Failed to delete test SMS: {e:#}");
                }
            });
        }))
    }
}

/// SMS id from `Successfully created new SMS: /org/freedesktop/ModemManager1/SMS/3`
fn parse_created_sms(output: &str) -> Option<String> {
    let path = output.lines().find(|l| l.contains("/SMS/"))?;
    let id = path.trim().rsplit('/').next()?;
    id.parse::<u32>().ok().map(|_| id.to_string())
}

fn parse_delivery_state(output: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(output).ok()?;
    json["sms"]["properties"]["delivery-state"]
        .as_str()
        .map(|s| s.trim().to_string())
}
