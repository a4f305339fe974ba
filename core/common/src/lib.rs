//! Common utilities and types shared across HealthSync modules.
//!
//! Holds the error taxonomy every layer reports through and the health
//! metric model the exporters read from.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{date_key, parse_date_key, DataTag, HealthData};
