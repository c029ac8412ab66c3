//! JSON bodies exchanged with the Polaris backend

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// One measurement as accepted by the bulk ingestion endpoint
///
/// Field names follow the backend's schema, which mixes snake_case with a
/// few camelCase signal fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMeasurement {
    pub latitude: f64,
    pub longitude: f64,
    /// ISO-8601 UTC with trailing `Z`
    pub timestamp: String,
    pub network_type: String,
    pub tac: Option<String>,
    pub lac: Option<String>,
    pub rac: Option<String>,
    pub cell_id: Option<String>,
    pub plmn_id: Option<String>,
    pub arfcn: Option<i32>,
    pub frequency: Option<f64>,
    pub frequency_band: Option<String>,
    pub rsrp: Option<i32>,
    pub rsrq: Option<i32>,
    pub rscp: Option<i32>,
    #[serde(rename = "ecIo")]
    pub ec_io: Option<i32>,
    #[serde(rename = "rxLev")]
    pub rx_lev: Option<i32>,
    #[serde(rename = "ssRsrp")]
    pub ss_rsrp: Option<i32>,
    /// Mbps, -1.0 when not measured
    pub http_upload: f64,
    /// Mbps, -1.0 when not measured
    pub http_download: f64,
    /// Milliseconds, -1.0 when not measured
    pub ping_time: f64,
    pub dns_response: f64,
    pub web_response: f64,
    pub sms_delivery_time: f64,
}

/// Serialize a batch as the single JSON array posted to the ingestion endpoint
pub fn encode_batch(batch: &[WireMeasurement]) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(batch)?)
}

pub fn decode_batch(body: &[u8]) -> Result<Vec<WireMeasurement>, ProtocolError> {
    Ok(serde_json::from_slice(body)?)
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response; the backend nests the bearer token under `token` or `access`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "access")]
    pub token: String,
    #[serde(default)]
    pub email: Option<String>,
}
