//! In-memory collaborators

use crate::domain::modem::{IdentityRegistry, Modem, ModemRepository, ModemStatus, SmsSink};
use crate::domain::shared::value_objects::Iccid;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Modem records kept in a map keyed by ICCID
#[derive(Default)]
pub struct InMemoryModemRepository {
    modems: RwLock<HashMap<Iccid, Modem>>,
}

impl InMemoryModemRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModemRepository for InMemoryModemRepository {
    async fn upsert(&self, modem: &Modem) -> Result<(), String> {
        self.modems
            .write()
            .await
            .insert(modem.iccid.clone(), modem.clone());
        Ok(())
    }

    async fn mark_offline(&self, iccid: &Iccid, at: DateTime<Utc>) -> Result<(), String> {
        let mut modems = self.modems.write().await;
        let modem = modems
            .get_mut(iccid)
            .ok_or_else(|| format!("modem {} not found", iccid))?;
        modem.status = ModemStatus::Offline;
        modem.last_seen = at;
        Ok(())
    }

    async fn find(&self, iccid: &Iccid) -> Result<Option<Modem>, String> {
        Ok(self.modems.read().await.get(iccid).cloned())
    }

    async fn list(&self) -> Result<Vec<Modem>, String> {
        let mut modems: Vec<Modem> = self.modems.read().await.values().cloned().collect();
        modems.sort_by(|a, b| a.iccid.cmp(&b.iccid));
        Ok(modems)
    }
}

/// Logs every received PDU; decoding happens downstream
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSmsSink;

#[async_trait]
impl SmsSink for LoggingSmsSink {
    async fn deliver(&self, iccid: &Iccid, raw_pdu: &str) -> Result<(), String> {
        info!("[{}] SMS PDU received ({} bytes)", iccid, raw_pdu.len() / 2);
        Ok(())
    }
}

/// First-claim-wins ICCID table for engines running without a port manager
#[derive(Default)]
pub struct InMemoryIdentityRegistry {
    owners: Mutex<HashMap<Iccid, String>>,
}

impl InMemoryIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityRegistry for InMemoryIdentityRegistry {
    fn register_iccid(&self, port_name: &str, iccid: &Iccid) -> bool {
        let mut owners = self.owners.lock();
        let owner = owners
            .entry(iccid.clone())
            .or_insert_with(|| port_name.to_string());
        owner == port_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_and_mark_offline() {
        let repo = InMemoryModemRepository::new();
        let iccid = Iccid::parse("8986001").unwrap();
        repo.upsert(&Modem::new(iccid.clone(), "/dev/ttyUSB2"))
            .await
            .unwrap();

        let at = Utc::now();
        repo.mark_offline(&iccid, at).await.unwrap();

        let modem = repo.find(&iccid).await.unwrap().unwrap();
        assert_eq!(modem.status, ModemStatus::Offline);
        assert_eq!(modem.last_seen, at);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_offline_unknown_modem() {
        let repo = InMemoryModemRepository::new();
        let iccid = Iccid::parse("8986002").unwrap();
        assert!(repo.mark_offline(&iccid, Utc::now()).await.is_err());
    }

    #[test]
    fn test_identity_registry_first_claim_wins() {
        let registry = InMemoryIdentityRegistry::new();
        let iccid = Iccid::parse("8986003").unwrap();
        assert!(registry.register_iccid("a", &iccid));
        assert!(registry.register_iccid("a", &iccid));
        assert!(!registry.register_iccid("b", &iccid));
    }
}
