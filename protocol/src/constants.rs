//! Shared constants for the Polaris client and its backend

/// Value stored for a probe that was disabled or failed
pub const SENTINEL: f64 = -1.0;

/// Coordinate stored when no location fix was available
pub const NO_COORDINATE: f64 = -1.0;

/// Network type recorded when the radio generation is unknown
pub const NETWORK_TYPE_OTHERS: &str = "OTHERS";

/// Timestamp marker of the measurement returned when no cell is registered
pub const EMPTY_TIMESTAMP_MARKER: &str = "INVALID";

/// Timestamp marker of the measurement returned when a pipeline run failed
pub const FAILED_TIMESTAMP_MARKER: &str = "ERROR";

/// Local timestamp pattern used for stored measurements (`HH:mm:ss dd-MM-yyyy`)
pub const LOCAL_TIMESTAMP_FORMAT: &str = "%H:%M:%S %d-%m-%Y";

/// ISO-8601 pattern used on the wire, always followed by `Z`
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Bulk ingestion endpoint, relative to the API base URL
pub const BULK_UPLOAD_PATH: &str = "/mobile/bulk_upload/measurement/";

/// Login endpoint, relative to the API base URL
pub const LOGIN_PATH: &str = "/users/login/";

/// Upload throughput endpoint, relative to the API base URL
pub const HTTP_TEST_UPLOAD_PATH: &str = "/mobile/HTTPTest/upload/";

/// Download throughput endpoint, relative to the API base URL
pub const HTTP_TEST_DOWNLOAD_PATH: &str = "/mobile/HTTPTest/download/";

pub const DEFAULT_API_BASE_URL: &str = "https://polaris.work.gd/api";
pub const DEFAULT_PING_HOST: &str = "8.8.8.8";
pub const DEFAULT_DNS_HOST: &str = "google.com";
pub const DEFAULT_WEB_URL: &str = "https://www.google.com";
pub const DEFAULT_SMS_NUMBER: &str = "+989303009264";
pub const DEFAULT_SMS_COUNTRY_CODE: &str = "98";

/// Join an API base URL and an endpoint path without doubling the slash
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
