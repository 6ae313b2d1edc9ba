/// Call Session Manager
///
/// Owns one WebRTC peer (and, once a call starts, one audio bridge) per
/// modem, keyed by ICCID. A watcher per session closes it when the peer
/// connection fails or closes.

use super::error::SessionError;
use super::peer::{build_api, rtc_configuration, PeerEvent, RtpClock, WebRtcPeer};
use crate::config::{AudioConfig, CallingConfig};
use crate::domain::shared::value_objects::ModemTarget;
use crate::infrastructure::media::{default_host, AudioBridge, AudioError, AudioHost};
use crate::infrastructure::usb::{platform_resolver, UsbResolver};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::API;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

struct SessionAudio {
    bridge: Arc<AudioBridge>,
    uplink: JoinHandle<()>,
}

/// Call session
pub struct CallSession {
    pub session_id: Uuid,
    pub key: String,
    pub peer: Arc<WebRtcPeer>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    target: parking_lot::Mutex<ModemTarget>,
    audio: Mutex<Option<SessionAudio>>,
}

impl CallSession {
    pub fn target(&self) -> ModemTarget {
        self.target.lock().clone()
    }

    pub async fn has_audio(&self) -> bool {
        self.audio.lock().await.is_some()
    }
}

struct ManagerInner {
    api: API,
    rtc_config: RTCConfiguration,
    audio_config: AudioConfig,
    host: Arc<dyn AudioHost>,
    resolver: Arc<dyn UsbResolver>,
    sessions: RwLock<HashMap<String, Arc<CallSession>>>,
}

/// Session Manager
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Manager using this build's audio backend and platform USB resolver
    pub fn new(config: &CallingConfig) -> Result<Self, SessionError> {
        Self::with_backends(config, default_host(), platform_resolver())
    }

    pub fn with_backends(
        config: &CallingConfig,
        host: Arc<dyn AudioHost>,
        resolver: Arc<dyn UsbResolver>,
    ) -> Result<Self, SessionError> {
        AudioBridge::validate(&config.audio)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                api: build_api(config)?,
                rtc_config: rtc_configuration(config),
                audio_config: config.audio.clone(),
                host,
                resolver,
                sessions: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Existing session for `key` (with its target refreshed) or a new one
    pub async fn ensure_session(
        &self,
        key: &str,
        target: ModemTarget,
    ) -> Result<Arc<CallSession>, SessionError> {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(session) = sessions.get(key) {
            *session.target.lock() = target;
            return Ok(Arc::clone(session));
        }

        let peer = WebRtcPeer::new(key, &self.inner.api, self.inner.rtc_config.clone()).await?;
        let session = Arc::new(CallSession {
            session_id: Uuid::new_v4(),
            key: key.to_string(),
            peer,
            created_at: chrono::Utc::now(),
            target: parking_lot::Mutex::new(target),
            audio: Mutex::new(None),
        });
        self.spawn_watcher(&session);
        sessions.insert(key.to_string(), Arc::clone(&session));

        counter!("webrtc_sessions_opened_total").increment(1);
        info!("[{}] Created call session {}", key, session.session_id);
        Ok(session)
    }

    fn spawn_watcher(&self, session: &CallSession) {
        let manager = self.clone();
        let key = session.key.clone();
        let session_id = session.session_id;
        let mut events = session.peer.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(PeerEvent::StateChanged(
                        state @ (RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed),
                    )) => {
                        debug!("[{}] Peer {}, closing session", key, state);
                        if let Err(e) = manager.close_matching(&key, Some(session_id)).await {
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

    /// Start the audio bridge for an existing session; no-op when running
    pub async fn ensure_audio(&self, key: &str) -> Result<(), SessionError> {
        let session = self
            .get_session(key)
            .await
            .ok_or_else(|| SessionError::NotInitialized(key.to_string()))?;

        let mut audio = session.audio.lock().await;
        if audio.is_some() {
            return Ok(());
        }

        let config = self.inner.audio_config.clone();
        let target = session.target();
        let host = Arc::clone(&self.inner.host);
        let resolver = Arc::clone(&self.inner.resolver);
        let bridge = tokio::task::spawn_blocking(move || {
            let bridge = AudioBridge::open(&config, &target, host.as_ref(), resolver.as_ref())?;
            bridge.start()?;
            Ok::<_, AudioError>(bridge)
        })
        .await
        .map_err(|e| AudioError::Backend(e.to_string()))??;

        let bridge = Arc::new(bridge);
        session.peer.set_audio_sink(Some(bridge.sink()));
        let frames = bridge
            .take_capture_frames()
            .ok_or(AudioError::Closed)?;
        let uplink = tokio::spawn(uplink(Arc::clone(&session.peer), frames));

        *audio = Some(SessionAudio { bridge, uplink });
        info!("[{}] Audio bridge attached", key);
        Ok(())
    }

    pub async fn is_connected(&self, key: &str) -> bool {
        match self.get_session(key).await {
            Some(session) => session.peer.is_connected(),
            None => false,
        }
    }

    pub async fn require_connected(&self, key: &str) -> Result<(), SessionError> {
        if self.is_connected(key).await {
            Ok(())
        } else {
            Err(SessionError::NotConnected(key.to_string()))
        }
    }

    pub async fn get_session(&self, key: &str) -> Option<Arc<CallSession>> {
        self.inner.sessions.read().await.get(key).cloned()
    }

    /// Close and forget the session for `key`; absent sessions are fine
    pub async fn close_session(&self, key: &str) -> Result<(), SessionError> {
        self.close_matching(key, None).await
    }

    /// Close only if the stored session is still `session_id`
    async fn close_matching(&self, key: &str, session_id: Option<Uuid>) -> Result<(), SessionError> {
        let session = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get(key) {
                Some(s) if session_id.map_or(true, |id| id == s.session_id) => sessions.remove(key),
                _ => None,
            }
        };
        let Some(session) = session else {
            return Ok(());
        };

        let peer_result = session.peer.close().await;

        if let Some(audio) = session.audio.lock().await.take() {
            audio.uplink.abort();
            let bridge = audio.bridge;
            if let Err(e) = tokio::task::spawn_blocking(move || bridge.close()).await {
                warn!("[{}] Audio bridge close task failed: {}", key, e);
            }
        }

        counter!("webrtc_sessions_closed_total").increment(1);
        info!("[{}] Closed call session {}", key, session.session_id);
        peer_result
    }

    /// Close every session, returning the first error
    pub async fn close_all(&self) -> Result<(), SessionError> {
        let keys: Vec<String> = self.inner.sessions.read().await.keys().cloned().collect();
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.close_session(&key).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn active_session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }
}

async fn uplink(peer: Arc<WebRtcPeer>, mut frames: mpsc::Receiver<Vec<i16>>) {
    let mut clock = RtpClock::default();
    while let Some(frame) = frames.recv().await {
        if !peer.is_connected() {
            continue;
        }
        if let Err(e) = peer.send_pcm(&frame, &mut clock).await {
            debug!("[{}] Send PCM to browser failed: {}", peer.label(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::{
        AudioDeviceInfo, AudioHost, AudioInput, AudioOutput, StreamParams, UnavailableHost,
    };
    use crate::infrastructure::usb::{TargetHintResolver, UsbError};

    fn manager() -> SessionManager {
        manager_with_host(Arc::new(UnavailableHost))
    }

    fn manager_with_host(host: Arc<dyn AudioHost>) -> SessionManager {
        let config = CallingConfig {
            stun_servers: Vec::new(),
            ..CallingConfig::default()
        };
        SessionManager::with_backends(&config, host, Arc::new(TargetHintResolver)).unwrap()
    }

    /// Lists a host default device but refuses to open anything
    struct DefaultOnlyHost;

    impl AudioHost for DefaultOnlyHost {
        fn devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
            Ok(vec![AudioDeviceInfo {
                name: "default".into(),
                max_input_channels: 2,
                max_output_channels: 2,
            }])
        }

        fn open_input(
            &self,
            _device: &AudioDeviceInfo,
            _params: StreamParams,
        ) -> Result<Box<dyn AudioInput>, AudioError> {
            Err(AudioError::Backend("unexpected open".into()))
        }

        fn open_output(
            &self,
            _device: &AudioDeviceInfo,
            _params: StreamParams,
        ) -> Result<Box<dyn AudioOutput>, AudioError> {
            Err(AudioError::Backend("unexpected open".into()))
        }
    }

    #[tokio::test]
    async fn test_ensure_session_is_idempotent() {
        let manager = manager();

        let first = manager
            .ensure_session("8986001", ModemTarget::new("/dev/ttyUSB2"))
            .await
            .unwrap();
        let second = manager
            .ensure_session("8986001", ModemTarget::new("/dev/ttyUSB6"))
            .await
            .unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.target().port_name, "/dev/ttyUSB6");
        assert_eq!(manager.active_session_count().await, 1);

        manager.close_all().await.unwrap();
        assert_eq!(manager.active_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_require_connected_fails_before_negotiation() {
        let manager = manager();
        assert!(matches!(
            manager.require_connected("8986001").await,
            Err(SessionError::NotConnected(_))
        ));

        manager
            .ensure_session("8986001", ModemTarget::new("/dev/ttyUSB2"))
            .await
            .unwrap();
        assert!(!manager.is_connected("8986001").await);
        assert!(manager.require_connected("8986001").await.is_err());
        manager.close_session("8986001").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_audio_requires_session() {
        let manager = manager();
        assert!(matches!(
            manager.ensure_audio("missing").await,
            Err(SessionError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_audio_failure_leaves_session_without_bridge() {
        let manager = manager();
        let session = manager
            .ensure_session("8986001", ModemTarget::new("/dev/ttyUSB2"))
            .await
            .unwrap();

        let result = manager.ensure_audio("8986001").await;
        assert!(matches!(
            result,
            Err(SessionError::Audio(AudioError::Unavailable))
        ));
        assert!(!session.has_audio().await);

        manager.close_session("8986001").await.unwrap();
        manager.close_session("8986001").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_audio_fails_without_usb_identity() {
        let manager = manager_with_host(Arc::new(DefaultOnlyHost));
        // No VID/PID on the target, so the modem's USB device is unknown
        let session = manager
            .ensure_session("8986001", ModemTarget::new("/dev/ttyUSB2"))
            .await
            .unwrap();

        assert!(matches!(
            manager.ensure_audio("8986001").await,
            Err(SessionError::Usb(UsbError::Unsupported(_)))
        ));
        assert!(!session.has_audio().await);

        manager.close_session("8986001").await.unwrap();
    }

    #[test]
    fn test_rejects_stereo_audio_config() {
        let mut config = CallingConfig::default();
        config.audio.channels = 2;
        assert!(matches!(
            SessionManager::with_backends(
                &config,
                Arc::new(UnavailableHost),
                Arc::new(TargetHintResolver)
            ),
            Err(SessionError::Audio(AudioError::InvalidConfig(_)))
        ));
    }
}
