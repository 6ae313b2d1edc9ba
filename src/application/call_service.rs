//! Call use cases
//!
//! Dialing needs three things in order: a UAC-capable modem, a connected
//! WebRTC session for it, and a running audio bridge. Anything that fails
//! after the session exists tears the session down again.

use crate::domain::call::{CallEvent, CallSnapshot, CallState};
use crate::domain::modem::Modem;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{Iccid, ModemTarget};
use crate::infrastructure::protocols::webrtc::{SessionError, SessionManager};
use crate::infrastructure::serial::{is_valid_dial_number, EngineError, ModemEngine, PortManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CallServiceError {
    #[error(transparent)]
    InvalidIccid(#[from] DomainError),

    #[error("modem {0} not active")]
    ModemNotFound(String),

    #[error("UAC is not enabled on modem (USBCFG check failed)")]
    UacNotReady,

    #[error("WebRTC session init failed: {0}")]
    SessionInit(SessionError),

    #[error("WebRTC not ready, complete signaling first")]
    NotConnected,

    #[error("audio init failed: {0}")]
    AudioInit(SessionError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Call state plus the UAC identity used to find audio devices
#[derive(Debug, Clone, Serialize)]
pub struct CallStatus {
    pub state: CallState,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
    pub uac_ready: bool,
    pub uac_vid: String,
    pub uac_pid: String,
}

#[derive(Clone)]
pub struct CallService {
    ports: PortManager,
    sessions: SessionManager,
}

impl CallService {
    pub fn new(ports: PortManager, sessions: SessionManager) -> Self {
        Self { ports, sessions }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Identities of every modem that finished identification
    pub fn modems(&self) -> Vec<Modem> {
        self.ports
            .engines()
            .iter()
            .filter(|e| !e.is_stopped())
            .filter_map(ModemEngine::modem)
            .collect()
    }

    /// Live engine for `iccid`
    pub fn engine(&self, iccid: &str) -> Result<(Iccid, ModemEngine), CallServiceError> {
        let iccid = Iccid::parse(iccid)?;
        let engine = self
            .ports
            .engine_by_iccid(&iccid)
            .ok_or_else(|| CallServiceError::ModemNotFound(iccid.to_string()))?;
        Ok((iccid, engine))
    }

    /// Session key and audio target for signaling with `iccid`
    pub fn signaling_target(&self, iccid: &str) -> Result<(Iccid, ModemTarget), CallServiceError> {
        let (iccid, engine) = self.engine(iccid)?;
        Ok((iccid, engine.modem_target()))
    }

    pub fn call_status(&self, iccid: &str) -> Result<CallStatus, CallServiceError> {
        let (_, engine) = self.engine(iccid)?;
        let snapshot = engine.call_state();
        let uac = engine.uac_identity();
        Ok(CallStatus {
            state: snapshot.state,
            reason: snapshot.reason,
            updated_at: snapshot.updated_at,
            uac_ready: uac.ready,
            uac_vid: uac.vid,
            uac_pid: uac.pid,
        })
    }

    /// Place a call whose audio goes to the browser session for `iccid`
    pub async fn dial(&self, iccid: &str, number: &str) -> Result<CallSnapshot, CallServiceError> {
        if !is_valid_dial_number(number.trim()) {
            return Err(EngineError::InvalidDialNumber(number.to_string()).into());
        }
        let (iccid, engine) = self.engine(iccid)?;
        if !engine.is_uac_ready() {
            return Err(CallServiceError::UacNotReady);
        }
        let key = iccid.as_str();

        self.sessions
            .ensure_session(key, engine.modem_target())
            .await
            .map_err(CallServiceError::SessionInit)?;
        if self.sessions.require_connected(key).await.is_err() {
            return Err(CallServiceError::NotConnected);
        }
        if let Err(e) = self.sessions.ensure_audio(key).await {
            self.close_quietly(key).await;
            return Err(CallServiceError::AudioInit(e));
        }

        // Subscribe before dialing so a fast hangup is not missed
        let events = engine.subscribe_calls();
        match engine.dial(number).await {
            Ok(snapshot) => {
                self.watch_call_end(key.to_string(), events);
                Ok(snapshot)
            }
            Err(e) => {
                self.close_quietly(key).await;
                Err(e.into())
            }
        }
    }

    /// Hang up and drop the call session
    pub async fn hangup(&self, iccid: &str) -> Result<CallSnapshot, CallServiceError> {
        let (iccid, engine) = self.engine(iccid)?;
        let result = engine.hangup().await;
        self.close_quietly(iccid.as_str()).await;
        Ok(result?)
    }

    fn watch_call_end(&self, key: String, mut events: broadcast::Receiver<CallEvent>) {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_call_ended() => {
                        info!("[{}] Call ended ({}), closing session", key, event.reason);
                        if let Err(e) = sessions.close_session(&key).await {
                            warn!("[{}] Failed to close session: {}", key, e);
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn close_quietly(&self, key: &str) {
        if let Err(e) = self.sessions.close_session(key).await {
            warn!("[{}] Failed to close session: {}", key, e);
        }
    }
}
