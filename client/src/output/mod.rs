//! Console display of pipeline results

use crate::radio::Subscription;
use crate::testing::{Measurement, StoredMeasurement};
use protocol::constants::SENTINEL;
use std::fmt::Write;

/// What the display shows for the latest pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum UiState {
    Loading,
    /// No registered cell was found
    Empty,
    Success(Measurement),
    Error(String),
}

impl UiState {
    pub fn from_measurement(measurement: Measurement) -> Self {
        if measurement.is_failed() {
            UiState::Error("Measurement failed".to_string())
        } else if measurement.is_empty() {
            UiState::Empty
        } else {
            UiState::Success(measurement)
        }
    }
}

fn probe_value(value: f64, unit: &str) -> String {
    if value == SENTINEL {
        "n/a".to_string()
    } else {
        format!("{value:.2} {unit}")
    }
}

fn opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub struct OutputManager {
    prefix_time: bool,
}

impl OutputManager {
    pub fn new() -> Self {
        Self { prefix_time: true }
    }

    fn prefix(&self) -> String {
        if self.prefix_time {
            format!("[{}] ", chrono::Local::now().format("%H:%M:%S"))
        } else {
            String::new()
        }
    }

    pub fn render(&self, state: &UiState) -> String {
        let prefix = self.prefix();
        match state {
            UiState::Loading => format!("{prefix}Measuring..."),
            UiState::Empty => format!("{prefix}No registered cell; nothing measured"),
            UiState::Error(message) => format!("{prefix}ERROR: {message}"),
            UiState::Success(m) => {
                let mut out = format!(
                    "{prefix}{} cell {} (PLMN {}) at {}, {}\n",
                    m.network_type,
                    opt(&m.cell_id),
                    opt(&m.plmn_id),
                    m.latitude,
                    m.longitude
                );
                let _ = writeln!(
                    out,
                    "  ARFCN {}  {} MHz  band {}",
                    opt(&m.arfcn),
                    m.frequency.map(|f| format!("{f:.1}")).unwrap_or_else(|| "-".to_string()),
                    opt(&m.frequency_band)
                );
                let _ = writeln!(
                    out,
                    "  RSRP {}  RSRQ {}  RSCP {}  Ec/Io {}  RxLev {}  SS-RSRP {}",
                    opt(&m.rsrp),
                    opt(&m.rsrq),
                    opt(&m.rscp),
                    opt(&m.ec_io),
                    opt(&m.rx_lev),
                    opt(&m.ss_rsrp)
                );
                let _ = write!(
                    out,
                    "  up {}  down {}  ping {}  dns {}  web {}  sms {}",
                    probe_value(m.http_upload, "Mbps"),
                    probe_value(m.http_download, "Mbps"),
                    probe_value(m.ping_time, "ms"),
                    probe_value(m.dns_response, "ms"),
                    probe_value(m.web_response, "ms"),
                    probe_value(m.sms_delivery_time, "ms")
                );
                out
            }
        }
    }

    pub fn show(&self, state: &UiState) {
        println!("{}", self.render(state));
    }

    pub fn render_status(
        &self,
        owner: &str,
        total: u64,
        unsynced: u64,
        recent: &[StoredMeasurement],
    ) -> String {
        let owner = if owner.is_empty() { "(logged out)" } else { owner };
        let mut out = format!("Account: {owner}\nMeasurements: {total} total, {unsynced} unsynced\n");
        for row in recent {
            let m = &row.measurement;
            let _ = writeln!(
                out,
                "  #{:<5} {}  {:<6} ping {:<12} {}",
                row.id,
                m.timestamp,
                m.network_type,
                probe_value(m.ping_time, "ms"),
                if row.is_synced { "synced" } else { "pending" }
            );
        }
        out
    }

    pub fn render_subscriptions(&self, subscriptions: &[Subscription]) -> String {
        if subscriptions.is_empty() {
            return "No active SIM found".to_string();
        }
        let mut out = String::new();
        for sub in subscriptions {
            let _ = writeln!(
                out,
                "slot {}: {} ({}) id {}",
                sub.slot_index, sub.display_name, sub.carrier_name, sub.id
            );
        }
        out
    }
}
