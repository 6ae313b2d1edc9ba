//! Shared value objects used across multiple bounded contexts

use super::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SIM card identifier, the de-duplication key for modems
///
/// Stored upper-cased with the trailing `F` padding some modems report removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iccid(String);

impl Iccid {
    pub fn parse(raw: &str) -> super::Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let normalized = normalized.trim_end_matches('F');
        if normalized.is_empty() {
            return Err(DomainError::InvalidIdentity(raw.to_string()));
        }
        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::ValidationError(format!(
                "ICCID must be alphanumeric: {:?}",
                raw
            )));
        }
        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Iccid {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Iccid> for String {
    fn from(value: Iccid) -> Self {
        value.0
    }
}

impl fmt::Display for Iccid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a modem lives: its serial port plus whatever USB identity is known
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemTarget {
    pub port_name: String,
    pub vid: String,
    pub pid: String,
    pub serial: String,
}

impl ModemTarget {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    pub fn with_usb_ids(mut self, vid: &str, pid: &str) -> Self {
        self.vid = vid.to_string();
        self.pid = pid.to_string();
        self
    }
}

/// USB descriptor identity resolved for a serial port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbIdentity {
    pub vid: String,
    pub pid: String,
    pub serial: String,
    pub bus: Option<u8>,
    pub address: Option<u8>,
}

/// Normalize a USB vendor/product id (`0x2c7c`, `2C7C`, `125`) to four
/// upper-case hex digits
pub fn normalize_usb_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('"');
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let value = u16::from_str_radix(digits, 16).ok()?;
    Some(format!("{:04X}", value))
}
