//! Network connectivity constraint for scheduled jobs

use crate::utils::run_cmd;
use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Detect the default gateway using `ip route`
pub async fn detect_default_gateway() -> Result<Option<IpAddr>> {
    let output = run_cmd("ip", &["route", "show", "default"]).await?;
    debug!("Default route output: {}", output);

    if !output.lines().any(|l| l.trim_start().starts_with("default")) {
        return Ok(None);
    }
    match parse_default_gateway(&output) {
        Some(gateway) => Ok(Some(gateway)),
        // Point-to-point links (wwan0, ppp0) have a default route without "via"
        None => Ok(Some(IpAddr::from([0, 0, 0, 0]))),
    }
}

/// Parse lines like `default via 192.168.1.1 dev eth0 proto dhcp metric 100`
pub fn parse_default_gateway(output: &str) -> Option<IpAddr> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("default"))
        .find_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let via = parts.iter().position(|&p| p == "via")?;
            IpAddr::from_str(parts.get(via + 1)?).ok()
        })
}

/// Connected while a default route exists; logs gateway changes
pub struct DefaultRouteCheck {
    current_gateway: Mutex<Option<IpAddr>>,
}

impl DefaultRouteCheck {
    pub fn new() -> Self {
        Self {
            current_gateway: Mutex::new(None),
        }
    }

    fn record(&self, gateway: Option<IpAddr>) {
        let mut current = match self.current_gateway.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *current != gateway {
            match (*current, gateway) {
                (Some(old), Some(new)) => info!("Gateway changed: {} -> {}", old, new),
                (None, Some(new)) => info!("Default route up via {}", new),
                (Some(old), None) => warn!("Default route via {} lost", old),
                (None, None) => {}
            }
            *current = gateway;
        }
    }
}

#[async_trait]
impl ConnectivityCheck for DefaultRouteCheck {
    async fn is_connected(&self) -> bool {
        match detect_default_gateway().await {
            Ok(gateway) => {
                self.record(gateway);
                gateway.is_some()
            }
            Err(e) => {
                warn!("Failed to check default route: {e:#}");
                false
            }
        }
    }
}

/// Always connected, for jobs without a network constraint
pub struct NoConstraint;

#[async_trait]
impl ConnectivityCheck for NoConstraint {
    async fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_gateway() {
        let output = "default via 192.168.1.1 dev eth0 proto dhcp metric 100\n\
                      default via 10.0.0.1 dev wlan0 metric 600";
        assert_eq!(
            parse_default_gateway(output),
            Some("192.168.1.1".parse().unwrap())
        );
        assert_eq!(parse_default_gateway("default dev wwan0 scope link"), None);
        assert_eq!(parse_default_gateway(""), None);
    }

    #[test]
    fn test_record_tracks_changes() {
        let check = DefaultRouteCheck::new();
        let gw: IpAddr = "10.0.0.1".parse().unwrap();
        check.record(Some(gw));
        assert_eq!(*check.current_gateway.lock().unwrap(), Some(gw));
        check.record(None);
        assert_eq!(*check.current_gateway.lock().unwrap(), None);
    }

    #[tokio::test]
    async fn test_detect_gateway() {
        // Only meaningful on systems with iproute2
        if let Ok(Some(gateway)) = detect_default_gateway().await {
            assert!(gateway.is_ipv4() || gateway.is_ipv6());
        }
    }
}
