//! Upload of unsynced measurements to the backend
//!
//! All unsynced rows of the current account go out as one JSON array. Only
//! a 2xx response marks them synced, and then exactly the uploaded ids.

use crate::credentials::CredentialProvider;
use crate::storage::MeasurementStore;
use crate::testing::Measurement;
use anyhow::Context;
use chrono::{Local, TimeZone};
use protocol::constants::{BULK_UPLOAD_PATH, LOGIN_PATH, endpoint};
use protocol::timestamp::local_to_wire;
use protocol::wire::{LoginRequest, LoginResponse, encode_batch};
use protocol::{ProtocolError, WireMeasurement};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Backend rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP client setup failed: {0:#}")]
    Client(anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Logged out; nothing can be attributed or authorized
    NoCredential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced(usize),
    NothingToSync,
    Skipped(SkipReason),
}

/// Map a stored row to the ingestion schema, converting its timestamp to UTC
pub fn to_wire<Tz: TimeZone>(m: &Measurement, tz: &Tz) -> Result<WireMeasurement, ProtocolError> {
    Ok(WireMeasurement {
        latitude: m.latitude,
        longitude: m.longitude,
        timestamp: local_to_wire(&m.timestamp, tz)?,
        network_type: m.network_type.clone(),
        tac: m.tac.clone(),
        lac: m.lac.clone(),
        rac: m.rac.clone(),
        cell_id: m.cell_id.clone(),
        plmn_id: m.plmn_id.clone(),
        arfcn: m.arfcn,
        frequency: m.frequency,
        frequency_band: m.frequency_band.clone(),
        rsrp: m.rsrp,
        rsrq: m.rsrq,
        rscp: m.rscp,
        ec_io: m.ec_io,
        rx_lev: m.rx_lev,
        ss_rsrp: m.ss_rsrp,
        http_upload: m.http_upload,
        http_download: m.http_download,
        ping_time: m.ping_time,
        dns_response: m.dns_response,
        web_response: m.web_response,
        sms_delivery_time: m.sms_delivery_time,
    })
}

pub struct SyncDispatcher {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn MeasurementStore>,
    credentials: Arc<dyn CredentialProvider>,
}

impl SyncDispatcher {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        store: Arc<dyn MeasurementStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            store,
            credentials,
        }
    }

    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let Some(token) = self.credentials.token() else {
            warn!("No auth token; skipping sync");
            return Ok(SyncOutcome::Skipped(SkipReason::NoCredential));
        };
        let owner = self.credentials.email().unwrap_or_default();

        let rows = self.store.unsynced(&owner).map_err(SyncError::Storage)?;
        if rows.is_empty() {
            debug!("Nothing to sync for {owner:?}");
            return Ok(SyncOutcome::NothingToSync);
        }

        let mut ids = Vec::with_capacity(rows.len());
        let mut batch = Vec::with_capacity(rows.len());
        for row in &rows {
            match to_wire(&row.measurement, &Local) {
                Ok(wire) => {
                    ids.push(row.id);
                    batch.push(wire);
                }
                Err(e) => warn!("Leaving measurement {} out of the batch: {e}", row.id),
            }
        }
        if batch.is_empty() {
            return Ok(SyncOutcome::NothingToSync);
        }

        let body = encode_batch(&batch)?;
        let url = endpoint(&self.base_url, BULK_UPLOAD_PATH);
        info!("Uploading {} measurements to {url}", batch.len());

        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, token)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        self.store.mark_synced(&ids).map_err(SyncError::Storage)?;
        info!("Synced {} measurements", ids.len());

        Ok(SyncOutcome::Synced(ids.len()))
    }
}

/// Exchange account credentials for a bearer token
pub async fn login(
    http: &reqwest::Client,
    base_url: &str,
    email: &str,
    password: &str,
) -> anyhow::Result<LoginResponse> {
    let url = endpoint(base_url, LOGIN_PATH);
    let resp = http
        .post(&url)
        .json(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })
        .send()
        .await
        .with_context(|| format!("Login request to {url} failed"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Login rejected with status {status}: {body}");
    }

    resp.json::<LoginResponse>()
        .await
        .context("Malformed login response")
}
