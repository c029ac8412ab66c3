//! One pipeline run: location, serving cell, probes, persist
//!
//! The run never fails. No registered cell yields [`Measurement::empty`];
//! an error or panic anywhere yields [`Measurement::failed`]. Only valid
//! records are stored, but every record is returned for display.

use crate::credentials::CredentialProvider;
use crate::location::{self, LocationProvider};
use crate::radio::RadioReader;
use crate::storage::MeasurementStore;
use crate::testing::{Measurement, NetworkProbes, ProbeDeadlines, TestSelection};
use anyhow::Result;
use futures::FutureExt;
use protocol::constants::SENTINEL;
use protocol::timestamp::now_local;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct Assembler {
    radio: RadioReader,
    location: Arc<dyn LocationProvider>,
    probes: Arc<dyn NetworkProbes>,
    store: Arc<dyn MeasurementStore>,
    credentials: Arc<dyn CredentialProvider>,
    deadlines: ProbeDeadlines,
    fix_timeout: Duration,
}

impl Assembler {
    pub fn new(
        radio: RadioReader,
        location: Arc<dyn LocationProvider>,
        probes: Arc<dyn NetworkProbes>,
        store: Arc<dyn MeasurementStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            radio,
            location,
            probes,
            store,
            credentials,
            deadlines: ProbeDeadlines::default(),
            fix_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_deadlines(mut self, deadlines: ProbeDeadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn with_fix_timeout(mut self, fix_timeout: Duration) -> Self {
        self.fix_timeout = fix_timeout;
        self
    }

    pub async fn run(&self, selection: TestSelection, slot: u32) -> Measurement {
        match AssertUnwindSafe(self.assemble(selection, slot))
            .catch_unwind()
            .await
        {
            Ok(Ok(measurement)) => measurement,
            Ok(Err(e)) => {
                error!("Measurement run failed: {e:#}");
                Measurement::failed()
            }
            Err(_) => {
                error!("Measurement run panicked");
                Measurement::failed()
            }
        }
    }

    async fn assemble(&self, selection: TestSelection, slot: u32) -> Result<Measurement> {
        let fix = location::acquire(self.location.as_ref(), self.fix_timeout).await;

        let Some(radio) = self.radio.read(slot).await else {
            info!("No registered cell; skipping probes");
            return Ok(Measurement::empty());
        };

        let d = &self.deadlines;
        let p = &self.probes;
        let http_upload = probe("upload", selection.http_upload, d.http_upload, || p.http_upload()).await;
        let http_download = probe("download", selection.http_download, d.http_download, || p.http_download()).await;
        let ping_time = probe("ping", selection.ping, d.ping, || p.ping()).await;
        let dns_response = probe("dns", selection.dns, d.dns, || p.dns()).await;
        let web_response = probe("web", selection.web, d.web, || p.web()).await;
        let sms_delivery_time = probe("sms", selection.sms, d.sms, || p.sms()).await;

        let measurement = Measurement {
            owner: self.credentials.email().unwrap_or_default(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: now_local(),
            network_type: radio.network_type.as_str().to_string(),
            tac: radio.tac,
            lac: radio.lac,
            cell_id: radio.cell_id,
            rac: radio.rac,
            plmn_id: radio.plmn_id,
            arfcn: radio.arfcn,
            frequency: radio.frequency,
            frequency_band: radio.frequency_band,
            rsrp: radio.rsrp,
            rsrq: radio.rsrq,
            rscp: radio.rscp,
            ec_io: radio.ec_io,
            rx_lev: radio.rx_lev,
            ss_rsrp: radio.ss_rsrp,
            http_upload,
            http_download,
            ping_time,
            dns_response,
            web_response,
            sms_delivery_time,
        };

        if measurement.is_valid() {
            let id = self.store.insert(&measurement)?;
            info!("Stored measurement {id} ({})", measurement.network_type);
        } else {
            warn!(
                "Discarding invalid measurement (lat={}, lon={}, type={})",
                measurement.latitude, measurement.longitude, measurement.network_type
            );
        }

        Ok(measurement)
    }
}

/// Run one probe under its deadline; disabled, failed or late gives the sentinel
async fn probe<F, Fut>(name: &str, enabled: bool, deadline: Duration, start: F) -> f64
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<f64>>,
{
    if !enabled {
        debug!("{name} probe disabled");
        return SENTINEL;
    }

    match tokio::time::timeout(deadline, start()).await {
        Ok(Ok(value)) => {
            debug!("{name} probe: {value:.2}");
            value
        }
        Ok(Err(e)) => {
            warn!("{name} probe failed: {e:#}");
            SENTINEL
        }
        Err(_) => {
            warn!("{name} probe exceeded {deadline:?}");
            SENTINEL
        }
    }
}
