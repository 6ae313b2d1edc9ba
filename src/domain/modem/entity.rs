//! Modem entity

use crate::domain::shared::value_objects::Iccid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModemStatus {
    Online,
    Offline,
}

/// A modem identified by the SIM it carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modem {
    pub iccid: Iccid,
    pub imei: String,
    pub port_name: String,
    pub operator: String,
    /// Signal strength in percent (0-100)
    pub signal_strength: u8,
    pub registration: String,
    pub status: ModemStatus,
    pub last_seen: DateTime<Utc>,
}

impl Modem {
    pub fn new(iccid: Iccid, port_name: impl Into<String>) -> Self {
        Self {
            iccid,
            imei: String::new(),
            port_name: port_name.into(),
            operator: String::new(),
            signal_strength: 0,
            registration: String::new(),
            status: ModemStatus::Online,
            last_seen: Utc::now(),
        }
    }

    /// Record a successful poll
    pub fn touch(&mut self) {
        self.status = ModemStatus::Online;
        self.last_seen = Utc::now();
    }

    pub fn is_online(&self) -> bool {
        self.status == ModemStatus::Online
    }
}
