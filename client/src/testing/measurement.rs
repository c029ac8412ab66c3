//! Measurement data structures

use protocol::constants::{
    EMPTY_TIMESTAMP_MARKER, FAILED_TIMESTAMP_MARKER, NETWORK_TYPE_OTHERS, NO_COORDINATE,
    SENTINEL,
};
use serde::{Deserialize, Serialize};

/// One pipeline run: location, serving cell and probe results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Account email of the user the row belongs to
    pub owner: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Local wall-clock time, `HH:mm:ss dd-MM-yyyy`
    pub timestamp: String,

    /// GSM, EDGE, UMTS, HSPA+, LTE, 5G, ... or OTHERS
    pub network_type: String,

    pub tac: Option<String>,
    pub lac: Option<String>,
    pub cell_id: Option<String>,
    pub rac: Option<String>,
    pub plmn_id: Option<String>,
    pub arfcn: Option<i32>,
    /// MHz, derived from the channel number
    pub frequency: Option<f64>,
    pub frequency_band: Option<String>,

    pub rsrp: Option<i32>,
    pub rsrq: Option<i32>,
    pub rscp: Option<i32>,
    pub ec_io: Option<i32>,
    pub rx_lev: Option<i32>,
    pub ss_rsrp: Option<i32>,

    /// Mbps
    pub http_upload: f64,
    /// Mbps
    pub http_download: f64,
    /// Milliseconds
    pub ping_time: f64,
    pub dns_response: f64,
    pub web_response: f64,
    pub sms_delivery_time: f64,
}

/// A persisted row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMeasurement {
    pub id: i64,
    pub is_synced: bool,
    pub measurement: Measurement,
}

/// Which probes run in a pipeline pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSelection {
    #[serde(default = "enabled")]
    pub http_upload: bool,
    #[serde(default = "enabled")]
    pub http_download: bool,
    #[serde(default = "enabled")]
    pub ping: bool,
    #[serde(default = "enabled")]
    pub dns: bool,
    #[serde(default = "enabled")]
    pub web: bool,
    #[serde(default = "enabled")]
    pub sms: bool,
}

fn enabled() -> bool {
    true
}

impl Default for TestSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl TestSelection {
    pub fn all() -> Self {
        Self {
            http_upload: true,
            http_download: true,
            ping: true,
            dns: true,
            web: true,
            sms: true,
        }
    }

    pub fn none() -> Self {
        Self {
            http_upload: false,
            http_download: false,
            ping: false,
            dns: false,
            web: false,
            sms: false,
        }
    }

    /// Toggle a probe by its config name
    pub fn set(&mut self, name: &str, value: bool) -> bool {
        let slot = match name {
            "http_upload" | "upload" => &mut self.http_upload,
            "http_download" | "download" => &mut self.http_download,
            "ping" => &mut self.ping,
            "dns" => &mut self.dns,
            "web" => &mut self.web,
            "sms" => &mut self.sms,
            _ => return false,
        };
        *slot = value;
        true
    }
}

impl Measurement {
    /// Record with every field unset, stamped with `marker`
    fn sentinel(marker: &str) -> Self {
        Self {
            owner: String::new(),
            latitude: NO_COORDINATE,
            longitude: NO_COORDINATE,
            timestamp: marker.to_string(),
            network_type: NETWORK_TYPE_OTHERS.to_string(),
            tac: None,
            lac: None,
            cell_id: None,
            rac: None,
            plmn_id: None,
            arfcn: None,
            frequency: None,
            frequency_band: None,
            rsrp: None,
            rsrq: None,
            rscp: None,
            ec_io: None,
            rx_lev: None,
            ss_rsrp: None,
            http_upload: SENTINEL,
            http_download: SENTINEL,
            ping_time: SENTINEL,
            dns_response: SENTINEL,
            web_response: SENTINEL,
            sms_delivery_time: SENTINEL,
        }
    }

    /// Returned when no registered cell was found
    pub fn empty() -> Self {
        Self::sentinel(EMPTY_TIMESTAMP_MARKER)
    }

    /// Returned when a pipeline run failed unexpectedly
    pub fn failed() -> Self {
        Self::sentinel(FAILED_TIMESTAMP_MARKER)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude != NO_COORDINATE
            && self.longitude != NO_COORDINATE
            && self.network_type != NETWORK_TYPE_OTHERS
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp == EMPTY_TIMESTAMP_MARKER
    }

    pub fn is_failed(&self) -> bool {
        self.timestamp == FAILED_TIMESTAMP_MARKER
    }
}

#[cfg(test)]
pub(crate) fn sample_measurement(owner: &str) -> Measurement {
    Measurement {
        owner: owner.to_string(),
        latitude: 35.7219,
        longitude: 51.3347,
        timestamp: "14:05:09 03-02-2025".to_string(),
        network_type: "LTE".to_string(),
        tac: Some("12345".to_string()),
        cell_id: Some("26726156".to_string()),
        plmn_id: Some("43235".to_string()),
        arfcn: Some(300),
        frequency: Some(2140.0),
        frequency_band: Some("LTE Band".to_string()),
        rsrp: Some(-95),
        rsrq: Some(-11),
        http_upload: 4.2,
        http_download: 12.5,
        ping_time: 42.5,
        dns_response: 18.0,
        web_response: 230.0,
        ..Measurement::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_predicate() {
        let valid = sample_measurement("a@b.c");
        assert!(valid.is_valid());

        let cases = [
            Measurement { latitude: -1.0, ..valid.clone() },
            Measurement { longitude: -1.0, ..valid.clone() },
            Measurement { network_type: "OTHERS".to_string(), ..valid.clone() },
        ];
        for m in cases {
            assert_eq!(
                m.is_valid(),
                m.latitude != -1.0 && m.longitude != -1.0 && m.network_type != "OTHERS"
            );
            assert!(!m.is_valid());
        }

        // A zero reading is a real value, not the sentinel
        assert!(Measurement { latitude: 0.0, longitude: 0.0, ..valid }.is_valid());
    }

    #[test]
    fn test_sentinel_records() {
        let empty = Measurement::empty();
        assert_eq!(empty.network_type, "OTHERS");
        assert_eq!(empty.timestamp, "INVALID");
        assert!(empty.is_empty());
        assert!(!empty.is_valid());
        assert_eq!(empty.sms_delivery_time, -1.0);

        let failed = Measurement::failed();
        assert_eq!(failed.timestamp, "ERROR");
        assert!(failed.is_failed());
        assert!(!failed.is_valid());
    }

    #[test]
    fn test_selection_toggle() {
        let mut selection = TestSelection::default();
        assert_eq!(selection, TestSelection::all());

        assert!(selection.set("dns", false));
        assert!(selection.set("upload", false));
        assert!(!selection.set("carrier_pigeon", false));
        assert!(!selection.dns);
        assert!(!selection.http_upload);
        assert!(selection.sms);
    }
}
