//! Polaris Protocol Library
//!
//! Shared definitions for the Polaris measurement client and its backend:
//! the bulk ingestion schema, auth bodies, timestamp conversion and the
//! sentinel values used for missing data.

pub mod constants;
pub mod error;
pub mod timestamp;
pub mod wire;

pub use constants::*;
pub use error::ProtocolError;
pub use wire::WireMeasurement;
