//! Ping round-trip time

use crate::utils::run_cmd;
use anyhow::{Context, Result, anyhow, bail};
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config as PingConfig, ICMP, PingIdentifier, PingSequence};
use tracing::debug;

/// Run the system `ping` tool and return the mean RTT from its summary
pub async fn ping_system(host: &str, count: u32) -> Result<f64> {
    let count = count.max(1).to_string();
    let output = run_cmd("ping", &["-c", &count, "-W", "2", host]).await?;
    debug!("ping output: {output}");
    parse_ping_summary(&output)
        .ok_or_else(|| anyhow!("Could not parse ping summary for {host}"))
}

/// Mean RTT from `rtt min/avg/max/mdev = 9.8/10.2/10.9/0.4 ms` (iputils)
/// or `round-trip min/avg/max = 10.1/12.3/15.2 ms` (busybox)
pub fn parse_ping_summary(output: &str) -> Option<f64> {
    let line = output.lines().find(|l| l.contains("min/avg/max"))?;
    let (_, values) = line.split_once('=')?;
    values
        .trim()
        .split('/')
        .nth(1)?
        .trim()
        .parse::<f64>()
        .ok()
}

/// In-process ICMP echo; mean of the replies that came back
pub async fn ping_icmp(host: &str, count: u32) -> Result<f64> {
    let target = resolve_host(host).await?;

    let config = match target {
        IpAddr::V4(_) => PingConfig::default(),
        IpAddr::V6(_) => PingConfig::builder().kind(ICMP::V6).build(),
    };
    let client = Client::new(&config).context("Failed to create ICMP client (CAP_NET_RAW required)")?;

    let payload = [0u8; 56];
    let mut pinger = client.pinger(target, PingIdentifier(rand::random())).await;
    pinger.timeout(Duration::from_secs(2));

    let mut rtts = Vec::new();
    for seq in 0..count.max(1) {
        match pinger.ping(PingSequence(seq as u16), &payload).await {
            Ok((_packet, rtt)) => rtts.push(rtt.as_secs_f64() * 1000.0),
            Err(e) => debug!("ICMP {target} seq {seq}: {e}"),
        }
    }

    if rtts.is_empty() {
        bail!("No ICMP replies from {host}");
    }
    Ok(rtts.iter().sum::<f64>() / rtts.len() as f64)
}

async fn resolve_host(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .with_context(|| format!("Failed to resolve {host}"))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| anyhow!("No addresses found for {host}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iputils_summary() {
        let output = "PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.\n\
            64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=41.9 ms\n\
            \n\
            --- 8.8.8.8 ping statistics ---\n\
            3 packets transmitted, 3 received, 0% packet loss, time 2003ms\n\
            rtt min/avg/max/mdev = 40.112/42.500/44.871/1.942 ms";
        assert_eq!(parse_ping_summary(output), Some(42.5));
    }

    #[test]
    fn test_parse_busybox_summary() {
        let output = "3 packets transmitted, 3 packets received, 0% packet loss\n\
            round-trip min/avg/max = 10.1/12.3/15.2 ms";
        assert_eq!(parse_ping_summary(output), Some(12.3));
    }

    #[test]
    fn test_parse_failure() {
        assert_eq!(parse_ping_summary("3 packets transmitted, 0 received, 100% packet loss"), None);
        assert_eq!(parse_ping_summary("rtt min/avg/max/mdev = garbage"), None);
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        assert_eq!(
            resolve_host("127.0.0.1").await.unwrap(),
            "127.0.0.1".parse::<IpAddr>().unwrap()
        );
    }
}
