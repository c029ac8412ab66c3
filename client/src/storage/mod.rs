//! SQLite database storage
//!
//! Append-only `measurements` table. Rows are never updated except for the
//! `is_synced` flag, and never deleted by the client.

use crate::testing::{Measurement, StoredMeasurement};
use anyhow::{Context, Result};
use rusqlite::{Connection, Row, params, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[cfg_attr(test, mockall::automock)]
pub trait MeasurementStore: Send + Sync {
    /// Append a row and return its id. A key collision is an error.
    fn insert(&self, measurement: &Measurement) -> Result<i64>;

    /// Unsynced rows of `owner`, oldest first
    fn unsynced(&self, owner: &str) -> Result<Vec<StoredMeasurement>>;

    /// Flag `ids` as synced in one statement; returns the rows touched
    fn mark_synced(&self, ids: &[i64]) -> Result<usize>;
}

/// Ids bound per UPDATE, below SQLite's default variable limit of 999
const MARK_SYNCED_CHUNK: usize = 500;

pub struct Database {
    conn: Mutex<Connection>,
}

const COLUMNS: &str = "id, is_synced, owner, latitude, longitude, timestamp, network_type,
    tac, lac, cell_id, rac, plmn_id, arfcn, frequency, frequency_band,
    rsrp, rsrq, rscp, ec_io, rx_lev, ss_rsrp,
    http_upload, http_download, ping_time, dns_response, web_response, sms_delivery_time";

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .context("Failed to open database")?;

        // WAL lets the sync job read while a measurement is being written
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;

        conn.pragma_update(None, "busy_timeout", "5000")
            .context("Failed to set busy timeout")?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn initialize(&self) -> Result<()> {
        info!("Initializing database schema");
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS measurements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL DEFAULT '',
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                timestamp TEXT NOT NULL,
                network_type TEXT NOT NULL,
                tac TEXT,
                lac TEXT,
                cell_id TEXT,
                rac TEXT,
                plmn_id TEXT,
                arfcn INTEGER,
                frequency REAL,
                frequency_band TEXT,
                rsrp INTEGER,
                rsrq INTEGER,
                rscp INTEGER,
                ec_io INTEGER,
                rx_lev INTEGER,
                ss_rsrp INTEGER,
                http_upload REAL NOT NULL,
                http_download REAL NOT NULL,
                ping_time REAL NOT NULL,
                dns_response REAL NOT NULL,
                web_response REAL NOT NULL,
                sms_delivery_time REAL NOT NULL,
                is_synced INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        // Tables created before sync existed lack these columns
        for (column, definition) in [
            ("is_synced", "INTEGER NOT NULL DEFAULT 0"),
            ("owner", "TEXT NOT NULL DEFAULT ''"),
        ] {
            if !has_column(&conn, "measurements", column)? {
                info!("Migrating measurements: adding column {column}");
                conn.execute(
                    &format!("ALTER TABLE measurements ADD COLUMN {column} {definition}"),
                    [],
                )?;
            }
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_owner_synced ON measurements(owner, is_synced)",
            [],
        )?;

        info!("Database schema initialized");

        Ok(())
    }

    /// Total and unsynced row counts for `owner`
    pub fn counts(&self, owner: &str) -> Result<(u64, u64)> {
        let conn = self.conn();
        let (total, unsynced): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_synced = 0 THEN 1 ELSE 0 END), 0)
             FROM measurements WHERE owner = ?1",
            params![owner],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as u64, unsynced as u64))
    }

    /// Most recent rows of `owner`, newest first
    pub fn recent(&self, owner: &str, limit: usize) -> Result<Vec<StoredMeasurement>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM measurements WHERE owner = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;

        let rows = stmt
            .query_map(params![owner, limit as i64], row_to_stored)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

impl MeasurementStore for Database {
    fn insert(&self, m: &Measurement) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR ABORT INTO measurements (
                owner, latitude, longitude, timestamp, network_type,
                tac, lac, cell_id, rac, plmn_id, arfcn, frequency, frequency_band,
                rsrp, rsrq, rscp, ec_io, rx_lev, ss_rsrp,
                http_upload, http_download, ping_time, dns_response, web_response,
                sms_delivery_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            params![
                &m.owner,
                m.latitude,
                m.longitude,
                &m.timestamp,
                &m.network_type,
                &m.tac,
                &m.lac,
                &m.cell_id,
                &m.rac,
                &m.plmn_id,
                m.arfcn,
                m.frequency,
                &m.frequency_band,
                m.rsrp,
                m.rsrq,
                m.rscp,
                m.ec_io,
                m.rx_lev,
                m.ss_rsrp,
                m.http_upload,
                m.http_download,
                m.ping_time,
                m.dns_response,
                m.web_response,
                m.sms_delivery_time,
            ],
        )
        .context("Failed to insert measurement")?;

        let id = conn.last_insert_rowid();
        debug!("Stored measurement {id}");
        Ok(id)
    }

    fn unsynced(&self, owner: &str) -> Result<Vec<StoredMeasurement>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM measurements
             WHERE owner = ?1 AND is_synced = 0
             ORDER BY id ASC"
        ))?;

        let rows = stmt
            .query_map(params![owner], row_to_stored)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut updated = 0;
        for chunk in ids.chunks(MARK_SYNCED_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql =
                format!("UPDATE measurements SET is_synced = 1 WHERE id IN ({placeholders})");
            updated += tx
                .execute(&sql, params_from_iter(chunk.iter()))
                .context("Failed to mark measurements synced")?;
        }
        tx.commit().context("Failed to commit synced flags")?;

        Ok(updated)
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredMeasurement> {
    Ok(StoredMeasurement {
        id: row.get(0)?,
        is_synced: row.get::<_, i64>(1)? != 0,
        measurement: Measurement {
            owner: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            timestamp: row.get(5)?,
            network_type: row.get(6)?,
            tac: row.get(7)?,
            lac: row.get(8)?,
            cell_id: row.get(9)?,
            rac: row.get(10)?,
            plmn_id: row.get(11)?,
            arfcn: row.get(12)?,
            frequency: row.get(13)?,
            frequency_band: row.get(14)?,
            rsrp: row.get(15)?,
            rsrq: row.get(16)?,
            rscp: row.get(17)?,
            ec_io: row.get(18)?,
            rx_lev: row.get(19)?,
            ss_rsrp: row.get(20)?,
            http_upload: row.get(21)?,
            http_download: row.get(22)?,
            ping_time: row.get(23)?,
            dns_response: row.get(24)?,
            web_response: row.get(25)?,
            sms_delivery_time: row.get(26)?,
        },
    })
}
