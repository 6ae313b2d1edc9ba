//! Ports the protocol engines publish through

use super::entity::Modem;
use crate::domain::shared::value_objects::Iccid;
use chrono::{DateTime, Utc};

/// Modem persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModemRepository: Send + Sync {
    /// Insert or replace the record keyed by ICCID
    async fn upsert(&self, modem: &Modem) -> Result<(), String>;

    /// Flag a modem offline without deleting it
    async fn mark_offline(&self, iccid: &Iccid, at: DateTime<Utc>) -> Result<(), String>;

    async fn find(&self, iccid: &Iccid) -> Result<Option<Modem>, String>;

    async fn list(&self) -> Result<Vec<Modem>, String>;
}

/// Receives raw SMS PDUs read off a modem
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SmsSink: Send + Sync {
    async fn deliver(&self, iccid: &Iccid, raw_pdu: &str) -> Result<(), String>;
}

/// Arbitrates which port owns an ICCID
#[cfg_attr(test, mockall::automock)]
pub trait IdentityRegistry: Send + Sync {
    /// Claim `iccid` for `port_name`. Returns false when another port holds it.
    fn register_iccid(&self, port_name: &str, iccid: &Iccid) -> bool;
}
