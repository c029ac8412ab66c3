//! Radio telemetry: serving cell identity, signal quality and carrier
//!
//! Platform backends report cells as a generation plus a table of optional
//! fields. Which fields exist depends on the modem, firmware and radio
//! generation, so each one is looked up as a [`Capability`] and resolved once
//! into a [`RadioSnapshot`]. A missing field becomes `None`; it never fails
//! the read.

pub mod frequency;
pub mod mmcli;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a per-field capability lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability<T> {
    Available(T),
    Unavailable,
}

impl<T> Capability<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Capability::Available(value) => Some(value),
            Capability::Unavailable => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Capability<U> {
        match self {
            Capability::Available(value) => Capability::Available(f(value)),
            Capability::Unavailable => Capability::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RadioGeneration {
    Gsm,
    Wcdma,
    Lte,
    Nr,
    Cdma,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellField {
    Tac,
    Lac,
    Rac,
    Ci,
    Nci,
    Arfcn,
    Earfcn,
    Uarfcn,
    Nrarfcn,
    Rsrp,
    Rsrq,
    Rscp,
    EcIo,
    RxLev,
    SsRsrp,
}

/// One cell as reported by the platform
#[derive(Debug, Clone, PartialEq)]
pub struct CellInfo {
    pub generation: RadioGeneration,
    /// Serving cell of a subscription, as opposed to a neighbour
    pub registered: bool,
    fields: BTreeMap<CellField, i64>,
}

/// Value platforms report for an integer field they do not know
const REPORTED_UNAVAILABLE: i64 = i32::MAX as i64;

impl CellInfo {
    pub fn new(generation: RadioGeneration, registered: bool) -> Self {
        Self {
            generation,
            registered,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: CellField, value: i64) -> Self {
        self.fields.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: CellField, value: i64) {
        self.fields.insert(field, value);
    }

    pub fn lookup(&self, field: CellField) -> Capability<i64> {
        match self.fields.get(&field) {
            Some(&v) if v != REPORTED_UNAVAILABLE && v != i64::MAX => Capability::Available(v),
            _ => Capability::Unavailable,
        }
    }

    fn lookup_i32(&self, field: CellField) -> Option<i32> {
        self.lookup(field)
            .into_option()
            .and_then(|v| i32::try_from(v).ok())
    }

    fn lookup_string(&self, field: CellField) -> Option<String> {
        self.lookup(field).map(|v| v.to_string()).into_option()
    }
}

/// Network type label recorded with a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkType {
    Gsm,
    Gprs,
    Edge,
    Umts,
    Hsdpa,
    Hsupa,
    Hspa,
    HspaPlus,
    Lte,
    Nr,
    Cdma,
    Others,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Gsm => "GSM",
            NetworkType::Gprs => "GPRS",
            NetworkType::Edge => "EDGE",
            NetworkType::Umts => "UMTS",
            NetworkType::Hsdpa => "HSDPA",
            NetworkType::Hsupa => "HSUPA",
            NetworkType::Hspa => "HSPA",
            NetworkType::HspaPlus => "HSPA+",
            NetworkType::Lte => "LTE",
            NetworkType::Nr => "5G",
            NetworkType::Cdma => "CDMA",
            NetworkType::Others => "OTHERS",
        }
    }

    pub fn generation(&self) -> RadioGeneration {
        match self {
            NetworkType::Gsm | NetworkType::Gprs | NetworkType::Edge => RadioGeneration::Gsm,
            NetworkType::Umts
            | NetworkType::Hsdpa
            | NetworkType::Hsupa
            | NetworkType::Hspa
            | NetworkType::HspaPlus => RadioGeneration::Wcdma,
            NetworkType::Lte => RadioGeneration::Lte,
            NetworkType::Nr => RadioGeneration::Nr,
            NetworkType::Cdma => RadioGeneration::Cdma,
            NetworkType::Others => RadioGeneration::Unknown,
        }
    }

    fn default_for(generation: RadioGeneration) -> Self {
        match generation {
            RadioGeneration::Gsm => NetworkType::Gsm,
            RadioGeneration::Wcdma => NetworkType::Umts,
            RadioGeneration::Lte => NetworkType::Lte,
            RadioGeneration::Nr => NetworkType::Nr,
            RadioGeneration::Cdma => NetworkType::Cdma,
            RadioGeneration::Unknown => NetworkType::Others,
        }
    }

    /// Prefer the finer access technology when it matches the cell's generation
    pub fn resolve(access: NetworkType, cell: RadioGeneration) -> Self {
        if access != NetworkType::Others && access.generation() == cell {
            access
        } else {
            Self::default_for(cell)
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An active SIM
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub slot_index: u32,
    pub display_name: String,
    pub carrier_name: String,
}

#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Active subscriptions, ordered as their cells are reported
    async fn subscriptions(&self) -> Result<Vec<Subscription>>;

    /// Every visible cell across all subscriptions
    async fn cell_infos(&self) -> Result<Vec<CellInfo>>;

    /// MCC+MNC of the network the subscription is registered on
    async fn network_operator(&self, subscription: &Subscription) -> Result<Option<String>>;

    async fn access_technology(&self, subscription: &Subscription) -> Result<NetworkType>;
}

/// Resolved radio fields of the selected serving cell
#[derive(Debug, Clone, PartialEq)]
pub struct RadioSnapshot {
    pub network_type: NetworkType,
    pub tac: Option<String>,
    pub lac: Option<String>,
    pub cell_id: Option<String>,
    pub rac: Option<String>,
    pub plmn_id: Option<String>,
    pub arfcn: Option<i32>,
    pub frequency: Option<f64>,
    pub frequency_band: Option<String>,
    pub rsrp: Option<i32>,
    pub rsrq: Option<i32>,
    pub rscp: Option<i32>,
    pub ec_io: Option<i32>,
    pub rx_lev: Option<i32>,
    pub ss_rsrp: Option<i32>,
}

impl RadioSnapshot {
    fn blank(network_type: NetworkType, plmn_id: Option<String>) -> Self {
        Self {
            network_type,
            tac: None,
            lac: None,
            cell_id: None,
            rac: None,
            plmn_id,
            arfcn: None,
            frequency: None,
            frequency_band: None,
            rsrp: None,
            rsrq: None,
            rscp: None,
            ec_io: None,
            rx_lev: None,
            ss_rsrp: None,
        }
    }

    pub fn from_cell(cell: &CellInfo, access: NetworkType, plmn_id: Option<String>) -> Self {
        use CellField::*;

        let mut snap = Self::blank(NetworkType::resolve(access, cell.generation), plmn_id);
        snap.rac = cell.lookup_string(Rac);

        match cell.generation {
            RadioGeneration::Lte => {
                snap.tac = cell.lookup_string(Tac);
                snap.cell_id = cell.lookup_string(Ci);
                snap.arfcn = cell.lookup_i32(Earfcn);
                snap.rsrp = cell.lookup_i32(Rsrp);
                snap.rsrq = cell.lookup_i32(Rsrq);
            }
            RadioGeneration::Gsm => {
                snap.lac = cell.lookup_string(Lac);
                snap.cell_id = cell.lookup_string(Ci);
                snap.arfcn = cell.lookup_i32(Arfcn);
                snap.rx_lev = cell.lookup_i32(RxLev);
            }
            RadioGeneration::Wcdma => {
                snap.lac = cell.lookup_string(Lac);
                snap.cell_id = cell.lookup_string(Ci);
                snap.arfcn = cell.lookup_i32(Uarfcn);
                snap.rscp = cell.lookup_i32(Rscp);
                snap.ec_io = cell.lookup_i32(EcIo);
            }
            RadioGeneration::Nr => {
                snap.tac = cell.lookup_string(Tac);
                snap.cell_id = cell.lookup_string(Nci);
                snap.arfcn = cell.lookup_i32(Nrarfcn);
                snap.ss_rsrp = cell.lookup_i32(SsRsrp);
            }
            RadioGeneration::Cdma | RadioGeneration::Unknown => {}
        }

        if let Some(channel) = snap.arfcn {
            let carrier = frequency::derive(cell.generation, channel);
            snap.frequency = carrier.frequency;
            snap.frequency_band = carrier.band;
        }

        snap
    }
}

/// Pick the serving cell of the SIM in `slot`
///
/// With a single subscription the first registered cell is taken. With
/// several, registered cells are matched to subscriptions positionally.
pub fn select_cell<'a>(
    cells: &'a [CellInfo],
    subscriptions: &[Subscription],
    slot: u32,
) -> Option<&'a CellInfo> {
    let registered: Vec<&CellInfo> = cells.iter().filter(|c| c.registered).collect();

    if subscriptions.len() <= 1 {
        return registered.first().copied();
    }

    let position = subscriptions.iter().position(|s| s.slot_index == slot)?;
    registered.get(position).copied()
}

pub struct RadioReader {
    telephony: Arc<dyn TelephonyProvider>,
}

impl RadioReader {
    pub fn new(telephony: Arc<dyn TelephonyProvider>) -> Self {
        Self { telephony }
    }

    pub async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        self.telephony.subscriptions().await
    }

    /// Read the serving cell for `slot`. `None` means no registered cell.
    pub async fn read(&self, slot: u32) -> Option<RadioSnapshot> {
        let subscriptions = self.telephony.subscriptions().await.unwrap_or_else(|e| {
            warn!("Failed to list subscriptions: {e:#}");
            Vec::new()
        });

        let cells = match self.telephony.cell_infos().await {
            Ok(cells) => cells,
            Err(e) => {
                warn!("Failed to read cell info: {e:#}");
                return None;
            }
        };

        let cell = select_cell(&cells, &subscriptions, slot)?;

        let subscription = subscriptions
            .iter()
            .find(|s| s.slot_index == slot)
            .or(subscriptions.first());

        let (plmn_id, access) = match subscription {
            Some(sub) => {
                let plmn = self
                    .telephony
                    .network_operator(sub)
                    .await
                    .unwrap_or_else(|e| {
                        debug!("Network operator unavailable: {e:#}");
                        None
                    })
                    .filter(|p| !p.is_empty());
                let access = self
                    .telephony
                    .access_technology(sub)
                    .await
                    .unwrap_or(NetworkType::Others);
                (plmn, access)
            }
            None => (None, NetworkType::Others),
        };

        let snapshot = RadioSnapshot::from_cell(cell, access, plmn_id);
        debug!(
            "Serving cell: {} cell_id={:?} arfcn={:?}",
            snapshot.network_type, snapshot.cell_id, snapshot.arfcn
        );
        Some(snapshot)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;

    #[test]
    fn test_lookup_treats_max_as_unavailable() {
        let cell = CellInfo::new(RadioGeneration::Lte, true)
            .with(CellField::Rsrp, i32::MAX as i64)
            .with(CellField::Rsrq, -10);

        assert_eq!(cell.lookup(CellField::Rsrp), Capability::Unavailable);
        assert_eq!(cell.lookup(CellField::Rsrq), Capability::Available(-10));
        assert_eq!(cell.lookup(CellField::Tac), Capability::Unavailable);
    }

    #[test]
    fn test_lte_fields_only() {
        let snap = RadioSnapshot::from_cell(&lte_cell(26726156), NetworkType::Lte, Some("43235".into()));

        assert_eq!(snap.network_type, NetworkType::Lte);
        assert_eq!(snap.tac.as_deref(), Some("12345"));
        assert_eq!(snap.cell_id.as_deref(), Some("26726156"));
        assert_eq!(snap.plmn_id.as_deref(), Some("43235"));
        assert_eq!(snap.arfcn, Some(300));
        assert_eq!(snap.frequency, Some(2110.0 + 0.1 * 300.0));
        assert_eq!(snap.frequency_band.as_deref(), Some("LTE Band"));
        assert_eq!((snap.rsrp, snap.rsrq), (Some(-95), Some(-11)));
        assert!(snap.lac.is_none());
        assert!(snap.rscp.is_none() && snap.ec_io.is_none());
        assert!(snap.rx_lev.is_none() && snap.ss_rsrp.is_none());
    }

    #[test]
    fn test_gsm_and_wcdma_fields() {
        let gsm = CellInfo::new(RadioGeneration::Gsm, true)
            .with(CellField::Lac, 501)
            .with(CellField::Ci, 4021)
            .with(CellField::Arfcn, 100)
            .with(CellField::RxLev, 31)
            .with(CellField::Rsrp, -80);
        let snap = RadioSnapshot::from_cell(&gsm, NetworkType::Edge, None);

        assert_eq!(snap.network_type, NetworkType::Edge);
        assert_eq!(snap.lac.as_deref(), Some("501"));
        assert_eq!(snap.rx_lev, Some(31));
        // Quality fields of other generations are never copied
        assert!(snap.rsrp.is_none());
        assert_eq!(snap.frequency_band.as_deref(), Some("GSM 900"));

        let wcdma = CellInfo::new(RadioGeneration::Wcdma, true)
            .with(CellField::Lac, 77)
            .with(CellField::Ci, 1_000_001)
            .with(CellField::Uarfcn, 10700)
            .with(CellField::Rscp, -90)
            .with(CellField::EcIo, -7);
        let snap = RadioSnapshot::from_cell(&wcdma, NetworkType::Others, None);

        assert_eq!(snap.network_type, NetworkType::Umts);
        assert_eq!((snap.rscp, snap.ec_io), (Some(-90), Some(-7)));
        assert_eq!(snap.frequency_band.as_deref(), Some("WCDMA Band"));
    }

    #[test]
    fn test_nr_degrades_field_by_field() {
        let nr = CellInfo::new(RadioGeneration::Nr, true)
            .with(CellField::Nci, i64::MAX)
            .with(CellField::Nrarfcn, 632628)
            .with(CellField::Tac, i32::MAX as i64);
        let snap = RadioSnapshot::from_cell(&nr, NetworkType::Nr, None);

        assert_eq!(snap.network_type, NetworkType::Nr);
        assert_eq!(snap.network_type.as_str(), "5G");
        assert!(snap.cell_id.is_none());
        assert!(snap.tac.is_none());
        assert!(snap.ss_rsrp.is_none());
        assert_eq!(snap.arfcn, Some(632628));
        assert!(snap.frequency.is_some());
    }

    #[test]
    fn test_access_technology_must_match_generation() {
        assert_eq!(
            NetworkType::resolve(NetworkType::HspaPlus, RadioGeneration::Wcdma),
            NetworkType::HspaPlus
        );
        assert_eq!(
            NetworkType::resolve(NetworkType::Nr, RadioGeneration::Lte),
            NetworkType::Lte
        );
        assert_eq!(
            NetworkType::resolve(NetworkType::Lte, RadioGeneration::Unknown),
            NetworkType::Others
        );
    }

    #[test]
    fn test_select_cell_single_and_multi_sim() {
        let neighbour = CellInfo::new(RadioGeneration::Lte, false).with(CellField::Ci, 1);
        let cells = vec![neighbour, lte_cell(10), lte_cell(20)];

        let one = [subscription(0)];
        let picked = select_cell(&cells, &one, 5).unwrap();
        assert_eq!(picked.lookup(CellField::Ci), Capability::Available(10));

        let two = [subscription(0), subscription(1)];
        let picked = select_cell(&cells, &two, 1).unwrap();
        assert_eq!(picked.lookup(CellField::Ci), Capability::Available(20));

        assert!(select_cell(&cells, &two, 3).is_none());
        assert!(select_cell(&cells[..1], &one, 0).is_none());
        assert!(select_cell(&[], &[], 0).is_none());
    }

    #[tokio::test]
    async fn test_reader_resolves_operator_and_type() {
        let telephony = FakeTelephony {
            subscriptions: vec![subscription(0)],
            cells: vec![lte_cell(99)],
            operator: Some("43211".to_string()),
            access: Some(NetworkType::Lte),
            ..Default::default()
        };
        let reader = RadioReader::new(Arc::new(telephony));

        let snap = reader.read(0).await.unwrap();
        assert_eq!(snap.plmn_id.as_deref(), Some("43211"));
        assert_eq!(snap.network_type, NetworkType::Lte);
    }

    #[tokio::test]
    async fn test_reader_never_fails() {
        let broken = RadioReader::new(Arc::new(FakeTelephony {
            fail_cells: true,
            ..Default::default()
        }));
        assert!(broken.read(0).await.is_none());

        // Access technology errors fall back to the cell generation
        let partial = RadioReader::new(Arc::new(FakeTelephony {
            subscriptions: vec![subscription(0)],
            cells: vec![lte_cell(5)],
            ..Default::default()
        }));
        let snap = partial.read(0).await.unwrap();
        assert_eq!(snap.network_type, NetworkType::Lte);
        assert!(snap.plmn_id.is_none());
    }
}
