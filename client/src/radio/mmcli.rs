//! ModemManager backend driven through `mmcli`
//!
//! Each modem is one subscription. Its serving cells from
//! `--get-cell-info` are the registered cells; the rest are neighbours.

use super::{CellField, CellInfo, NetworkType, RadioGeneration, Subscription, TelephonyProvider};
use crate::utils::run_cmd;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

pub struct ModemManagerTelephony;

#[async_trait]
impl TelephonyProvider for ModemManagerTelephony {
    async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut subscriptions = Vec::new();
        for (position, id) in list_modems().await?.into_iter().enumerate() {
            let output = run_cmd("mmcli", &["-m", &id, "-J"]).await?;
            subscriptions.push(parse_subscription(&id, position as u32, &output)?);
        }
        Ok(subscriptions)
    }

    async fn cell_infos(&self) -> Result<Vec<CellInfo>> {
        let mut cells = Vec::new();
        for id in list_modems().await? {
            let output = run_cmd("mmcli", &["-m", &id, "--get-cell-info", "-J"]).await?;
            cells.extend(parse_cell_info(&output)?);
        }
        debug!("ModemManager reported {} cells", cells.len());
        Ok(cells)
    }

    async fn network_operator(&self, subscription: &Subscription) -> Result<Option<String>> {
        let json = modem_json(&subscription.id).await?;
        Ok(json["modem"]["3gpp"]["operator-code"]
            .as_str()
            .map(str::trim)
            .filter(|code| !code.is_empty() && *code != "--")
            .map(str::to_string))
    }

    async fn access_technology(&self, subscription: &Subscription) -> Result<NetworkType> {
        let json = modem_json(&subscription.id).await?;
        Ok(json["modem"]["generic"]["access-technologies"]
            .as_array()
            .and_then(|a| a.first()?.as_str())
            .map(parse_access_technology)
            .unwrap_or(NetworkType::Others))
    }
}

pub async fn list_modems() -> Result<Vec<String>> {
    let output = run_cmd("mmcli", &["-L"]).await?;
    Ok(parse_modem_list(&output))
}

async fn modem_json(id: &str) -> Result<serde_json::Value> {
    let output = run_cmd("mmcli", &["-m", id, "-J"]).await?;
    serde_json::from_str(&output).context("Malformed mmcli modem output")
}

/// Modem ids from lines like `/org/freedesktop/ModemManager1/Modem/0 [Quectel] EG25`
fn parse_modem_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("/org/freedesktop"))
        .filter_map(|line| {
            let path = line.split_whitespace().next()?;
            let id = path.rsplit('/').next()?;
            id.parse::<u32>().ok().map(|_| id.to_string())
        })
        .collect()
}

fn parse_subscription(id: &str, position: u32, output: &str) -> Result<Subscription> {
    let json: serde_json::Value =
        serde_json::from_str(output).context("Malformed mmcli modem output")?;
    let generic = &json["modem"]["generic"];

    // ModemManager numbers SIM slots from 1
    let slot_index = generic["primary-sim-slot"]
        .as_str()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .and_then(|s| s.checked_sub(1))
        .unwrap_or(position);

    let model = generic["model"].as_str().unwrap_or("modem").trim();
    let carrier = json["modem"]["3gpp"]["operator-name"]
        .as_str()
        .map(str::trim)
        .filter(|name| *name != "--")
        .unwrap_or("");

    Ok(Subscription {
        id: id.to_string(),
        slot_index,
        display_name: format!("{model} ({id})"),
        carrier_name: carrier.to_string(),
    })
}

pub fn parse_access_technology(value: &str) -> NetworkType {
    match value.trim().to_ascii_lowercase().as_str() {
        "gsm" | "gsm-compact" => NetworkType::Gsm,
        "gprs" => NetworkType::Gprs,
        "edge" => NetworkType::Edge,
        "umts" => NetworkType::Umts,
        "hsdpa" => NetworkType::Hsdpa,
        "hsupa" => NetworkType::Hsupa,
        "hspa" => NetworkType::Hspa,
        "hspa-plus" => NetworkType::HspaPlus,
        "lte" | "lte-cat-m" | "lte-nb-iot" => NetworkType::Lte,
        "5gnr" => NetworkType::Nr,
        "1xrtt" | "evdo0" | "evdoa" | "evdob" => NetworkType::Cdma,
        _ => NetworkType::Others,
    }
}

/// Parse `mmcli --get-cell-info -J`
///
/// Every entry is a flat `key: value, key: value` string. Identity fields
/// (lac, tac, ci) are hexadecimal, channels are decimal and signal levels are
/// decimal floats.
fn parse_cell_info(output: &str) -> Result<Vec<CellInfo>> {
    let json: serde_json::Value =
        serde_json::from_str(output).context("Malformed mmcli cell info output")?;

    let entries = match &json["modem"]["cell-info"] {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => map
            .values()
            .find_map(|v| v.as_array().cloned())
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    Ok(entries
        .iter()
        .filter_map(|entry| entry.as_str())
        .filter_map(parse_cell_entry)
        .collect())
}

fn parse_cell_entry(entry: &str) -> Option<CellInfo> {
    let pairs: Vec<(String, &str)> = entry
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once(':')?;
            let key = key.trim().to_ascii_lowercase().replace(['-', '_'], " ");
            let value = value.trim().trim_matches('\'');
            Some((key, value))
        })
        .collect();

    let get = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
            .filter(|v| !v.is_empty() && *v != "--")
    };

    let generation = match get("cell type")?.to_ascii_lowercase().as_str() {
        "gsm" => RadioGeneration::Gsm,
        "umts" | "tdscdma" => RadioGeneration::Wcdma,
        "lte" => RadioGeneration::Lte,
        "5gnr" | "nr5g" => RadioGeneration::Nr,
        "cdma" => RadioGeneration::Cdma,
        _ => RadioGeneration::Unknown,
    };
    let registered = get("serving").is_some_and(|v| v.eq_ignore_ascii_case("yes"));

    let mut cell = CellInfo::new(generation, registered);
    let hex = |v: &str| i64::from_str_radix(v, 16).ok();
    let dec = |v: &str| v.parse::<i64>().ok();
    let level = |v: &str| v.parse::<f64>().ok().map(|f| f.round() as i64);

    let mut put = |field: CellField, raw: Option<&str>, parse: &dyn Fn(&str) -> Option<i64>| {
        if let Some(value) = raw.and_then(parse) {
            cell.insert(field, value);
        }
    };

    put(CellField::Lac, get("lac"), &hex);
    put(CellField::Tac, get("tac"), &hex);

    let ci_field = if generation == RadioGeneration::Nr {
        CellField::Nci
    } else {
        CellField::Ci
    };
    put(ci_field, get("ci"), &hex);

    match generation {
        RadioGeneration::Gsm => {
            put(CellField::Arfcn, get("arfcn"), &dec);
            put(CellField::RxLev, get("rx level").or(get("rxlev")), &dec);
        }
        RadioGeneration::Wcdma => {
            put(CellField::Uarfcn, get("uarfcn"), &dec);
            put(CellField::Rscp, get("rscp"), &level);
            put(CellField::EcIo, get("ecio"), &level);
        }
        RadioGeneration::Lte => {
            put(CellField::Earfcn, get("earfcn"), &dec);
            put(CellField::Rsrp, get("rsrp"), &level);
            put(CellField::Rsrq, get("rsrq"), &level);
        }
        RadioGeneration::Nr => {
            put(CellField::Nrarfcn, get("nrarfcn"), &dec);
            put(CellField::SsRsrp, get("rsrp"), &level);
        }
        RadioGeneration::Cdma | RadioGeneration::Unknown => {}
    }

    Some(cell)
}
