//! Device location
//!
//! Providers expose a cached last-known fix and a callback-style fresh fix
//! request. The request is bridged to async code through a [`Completion`],
//! which every callback path may try to complete but only the first succeeds.

use crate::completion::{Completion, completion};
use crate::config::{LocationConfig, LocationSource};
use crate::utils::run_cmd;
use async_trait::async_trait;
use protocol::constants::NO_COORDINATE;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

impl Fix {
    pub fn unavailable() -> Self {
        Self {
            latitude: NO_COORDINATE,
            longitude: NO_COORDINATE,
        }
    }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn last_known(&self) -> Option<Fix>;

    /// Ask for a fresh fix. The provider completes `done` exactly once, with
    /// `None` if the fix failed or the source became unavailable.
    fn request_fix(&self, done: Completion<Option<Fix>>);
}

/// Last-known fix, else one fresh fix bounded by `timeout`, else sentinels
pub async fn acquire(provider: &dyn LocationProvider, timeout: Duration) -> Fix {
    if provider.is_enabled() {
        if let Some(fix) = provider.last_known().await {
            debug!("Using last known location {:.5},{:.5}", fix.latitude, fix.longitude);
            return fix;
        }
    }

    let (done, rx) = completion();
    provider.request_fix(done.clone());

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Some(fix))) => fix,
        Ok(Ok(None)) | Ok(Err(_)) => {
            warn!("Fresh location fix failed");
            Fix::unavailable()
        }
        Err(_) => {
            // Late callbacks are rejected from here on
            done.complete(None);
            warn!("Location fix timed out after {:?}", timeout);
            Fix::unavailable()
        }
    }
}

/// Coordinates fixed in the config file
pub struct StaticLocation {
    fix: Option<Fix>,
}

impl StaticLocation {
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Self {
        let fix = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(Fix {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Self { fix }
    }
}

#[async_trait]
impl LocationProvider for StaticLocation {
    fn is_enabled(&self) -> bool {
        self.fix.is_some()
    }

    async fn last_known(&self) -> Option<Fix> {
        self.fix
    }

    fn request_fix(&self, done: Completion<Option<Fix>>) {
        done.complete(self.fix);
    }
}

/// GPS position reported by ModemManager's location interface
pub struct ModemLocation {
    poll_interval: Duration,
    attempts: u32,
}

impl ModemLocation {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            attempts: 5,
        }
    }
}

#[async_trait]
impl LocationProvider for ModemLocation {
    fn is_enabled(&self) -> bool {
        which_mmcli()
    }

    async fn last_known(&self) -> Option<Fix> {
        read_modem_fix().await
    }

    fn request_fix(&self, done: Completion<Option<Fix>>) {
        let poll_interval = self.poll_interval;
        let attempts = self.attempts;
        tokio::spawn(async move {
            for _ in 0..attempts {
                if done.is_completed() {
                    return;
                }
                if let Some(fix) = read_modem_fix().await {
                    done.complete(Some(fix));
                    return;
                }
                tokio::time::sleep(poll_interval).await;
            }
            done.complete(None);
        });
    }
}

fn which_mmcli() -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join("mmcli").is_file())
    })
}

async fn read_modem_fix() -> Option<Fix> {
    let modems = crate::radio::mmcli::list_modems().await.ok()?;
    for id in modems {
        let Ok(output) = run_cmd("mmcli", &["-m", &id, "--location-get", "-J"]).await else {
            continue;
        };
        if let Some(fix) = parse_location(&output) {
            return Some(fix);
        }
    }
    None
}

fn parse_location(output: &str) -> Option<Fix> {
    let json: serde_json::Value = serde_json::from_str(output).ok()?;
    let gps = &json["modem"]["location"]["gps"];
    let coordinate = |key: &str| gps[key].as_str()?.trim().parse::<f64>().ok();
    Some(Fix {
        latitude: coordinate("latitude")?,
        longitude: coordinate("longitude")?,
    })
}

pub fn provider_from_config(config: &LocationConfig) -> Box<dyn LocationProvider> {
    match config.source {
        LocationSource::Static => Box::new(StaticLocation::new(config.latitude, config.longitude)),
        LocationSource::Modem => Box::new(ModemLocation::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Provider whose fresh fix arrives from several racing callback paths
    struct CallbackProvider {
        last: Option<Fix>,
        fresh: Option<Fix>,
        delay: Duration,
        late_results: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl LocationProvider for CallbackProvider {
        fn is_enabled(&self) -> bool {
            true
        }

        async fn last_known(&self) -> Option<Fix> {
            self.last
        }

        fn request_fix(&self, done: Completion<Option<Fix>>) {
            let fresh = self.fresh;
            let delay = self.delay;
            let availability_lost = done.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                done.complete(fresh);
                availability_lost.complete(None);
            });
            self.late_results.lock().unwrap().push(true);
        }
    }

    fn provider(last: Option<Fix>, fresh: Option<Fix>, delay: Duration) -> CallbackProvider {
        CallbackProvider {
            last,
            fresh,
            delay,
            late_results: Mutex::new(Vec::new()),
        }
    }

    const TEHRAN: Fix = Fix {
        latitude: 35.7,
        longitude: 51.4,
    };

    #[tokio::test]
    async fn test_last_known_preferred() {
        let p = provider(Some(TEHRAN), None, Duration::ZERO);
        assert_eq!(acquire(&p, Duration::from_secs(1)).await, TEHRAN);
        assert!(p.late_results.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_fix_when_no_last_known() {
        let p = provider(None, Some(TEHRAN), Duration::from_millis(10));
        assert_eq!(acquire(&p, Duration::from_secs(1)).await, TEHRAN);
    }

    #[tokio::test]
    async fn test_timeout_yields_sentinels() {
        let p = provider(None, Some(TEHRAN), Duration::from_millis(500));
        let fix = acquire(&p, Duration::from_millis(20)).await;
        assert_eq!(fix, Fix::unavailable());
        assert_eq!(fix.latitude, -1.0);
    }

    #[tokio::test]
    async fn test_failed_fix_yields_sentinels() {
        let p = provider(None, None, Duration::ZERO);
        assert_eq!(acquire(&p, Duration::from_secs(1)).await, Fix::unavailable());
    }

    #[tokio::test]
    async fn test_static_location() {
        let configured = StaticLocation::new(Some(1.5), Some(2.5));
        assert!(configured.is_enabled());
        let fix = acquire(&configured, Duration::from_millis(50)).await;
        assert_eq!((fix.latitude, fix.longitude), (1.5, 2.5));

        let missing = StaticLocation::new(Some(1.5), None);
        assert!(!missing.is_enabled());
        assert_eq!(acquire(&missing, Duration::from_millis(50)).await, Fix::unavailable());
    }

    #[test]
    fn test_parse_modem_location() {
        let json = r#"{"modem": {"location": {"gps": {"latitude": "35.721900", "longitude": "51.334700", "altitude": "--"}}}}"#;
        let fix = parse_location(json).unwrap();
        assert!((fix.latitude - 35.7219).abs() < 1e-9);

        let no_fix = r#"{"modem": {"location": {"gps": {"latitude": "--", "longitude": "--"}}}}"#;
        assert!(parse_location(no_fix).is_none());
    }
}
