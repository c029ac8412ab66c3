//! Conversion between the stored local timestamp and the ISO-8601 wire form
//!
//! Measurements are stamped on the device as local wall-clock time in the
//! `HH:mm:ss dd-MM-yyyy` pattern. The ingestion endpoint expects UTC in
//! ISO-8601 with a trailing `Z`.

use crate::constants::{LOCAL_TIMESTAMP_FORMAT, WIRE_TIMESTAMP_FORMAT};
use crate::error::ProtocolError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::fmt::Display;

/// Format an instant in the stored local pattern
pub fn format_local<Tz: TimeZone>(instant: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    instant.format(LOCAL_TIMESTAMP_FORMAT).to_string()
}

/// Current wall-clock time in the stored local pattern
pub fn now_local() -> String {
    format_local(&Local::now())
}

/// Convert a stored local timestamp, interpreted in `tz`, to the wire form
pub fn local_to_wire<Tz: TimeZone>(timestamp: &str, tz: &Tz) -> Result<String, ProtocolError> {
    let naive = NaiveDateTime::parse_from_str(timestamp, LOCAL_TIMESTAMP_FORMAT)
        .map_err(|_| ProtocolError::InvalidLocalTimestamp(timestamp.to_string()))?;

    // During a DST fold the earlier instant is taken
    let local = tz
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ProtocolError::NonexistentLocalTime(timestamp.to_string()))?;

    Ok(format!(
        "{}Z",
        local.with_timezone(&Utc).format(WIRE_TIMESTAMP_FORMAT)
    ))
}

/// Convert a stored local timestamp using the system time zone
pub fn local_to_wire_system(timestamp: &str) -> Result<String, ProtocolError> {
    local_to_wire(timestamp, &Local)
}

/// Convert a wire timestamp back to the stored local pattern in `tz`
pub fn wire_to_local<Tz: TimeZone>(wire: &str, tz: &Tz) -> Result<String, ProtocolError>
where
    Tz::Offset: Display,
{
    let trimmed = wire
        .strip_suffix('Z')
        .ok_or_else(|| ProtocolError::InvalidWireTimestamp(wire.to_string()))?;

    let naive = NaiveDateTime::parse_from_str(trimmed, WIRE_TIMESTAMP_FORMAT)
        .map_err(|_| ProtocolError::InvalidWireTimestamp(wire.to_string()))?;

    Ok(format_local(&Utc.from_utc_datetime(&naive).with_timezone(tz)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_local_to_wire_utc() {
        let wire = local_to_wire("14:05:09 03-02-2025", &Utc).unwrap();
        assert_eq!(wire, "2025-02-03T14:05:09Z");
    }

    #[test]
    fn test_local_to_wire_applies_offset() {
        // Tehran, +03:30
        let tz = FixedOffset::east_opt(3 * 3600 + 1800).unwrap();
        let wire = local_to_wire("02:00:00 01-06-2025", &tz).unwrap();
        assert_eq!(wire, "2025-05-31T22:30:00Z");
    }

    #[test]
    fn test_wire_to_local_inverts_conversion() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let original = "23:59:59 31-12-2024";
        let wire = local_to_wire(original, &tz).unwrap();
        assert_eq!(wire, "2025-01-01T04:59:59Z");
        assert_eq!(wire_to_local(&wire, &tz).unwrap(), original);
    }

    #[test]
    fn test_rejects_malformed_timestamps() {
        assert!(matches!(
            local_to_wire("INVALID", &Utc),
            Err(ProtocolError::InvalidLocalTimestamp(_))
        ));
        assert!(matches!(
            local_to_wire("2025-01-01 10:00:00", &Utc),
            Err(ProtocolError::InvalidLocalTimestamp(_))
        ));
        assert!(matches!(
            wire_to_local("2025-01-01T10:00:00", &Utc),
            Err(ProtocolError::InvalidWireTimestamp(_))
        ));
    }

    #[test]
    fn test_format_local_pattern() {
        let instant = Utc.with_ymd_and_hms(2025, 7, 4, 9, 8, 7).unwrap();
        assert_eq!(format_local(&instant), "09:08:07 04-07-2025");
    }
}
