//! WebRTC peer for one browser leg
//!
//! Sends µ-law RTP on a local PCMU track and decodes the remote G.711 track
//! into whatever audio sink is installed.

use super::error::SessionError;
use crate::config::CallingConfig;
use crate::infrastructure::media::{AudioSink, G711Type, PcmuCodec};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMA, MIME_TYPE_PCMU};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

/// Upper bound on waiting for ICE gathering before answering
pub const GATHER_TIMEOUT: Duration = Duration::from_secs(10);

const G711_CLOCK_RATE: u32 = 8000;

fn g711_capability(mime_type: &str) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: mime_type.to_owned(),
        clock_rate: G711_CLOCK_RATE,
        channels: 1,
        ..Default::default()
    }
}

/// WebRTC API with only PCMU (PT 0) and PCMA (PT 8) registered
pub fn build_api(config: &CallingConfig) -> Result<API, SessionError> {
    let mut media = MediaEngine::default();
    for codec in [G711Type::PCMU, G711Type::PCMA] {
        let mime_type = match codec {
            G711Type::PCMU => MIME_TYPE_PCMU,
            G711Type::PCMA => MIME_TYPE_PCMA,
        };
        media.register_codec(
            RTCRtpCodecParameters {
                capability: g711_capability(mime_type),
                payload_type: codec.payload_type(),
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;
    }

    let registry = register_default_interceptors(Registry::new(), &mut media)?;

    let mut setting = SettingEngine::default();
    if config.udp_port_min > 0 || config.udp_port_max > 0 {
        let ephemeral = EphemeralUDP::new(config.udp_port_min, config.udp_port_max)
            .map_err(|e| SessionError::Config(e.to_string()))?;
        setting.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
    }

    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting)
        .build())
}

/// Peer connection configuration with the configured STUN servers
pub fn rtc_configuration(config: &CallingConfig) -> RTCConfiguration {
    let mut ice_servers = Vec::new();
    if !config.stun_servers.is_empty() {
        ice_servers.push(RTCIceServer {
            urls: config.stun_servers.clone(),
            ..Default::default()
        });
    }
    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

/// Sequence number and timestamp for the outgoing stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpClock {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl Default for RtpClock {
    fn default() -> Self {
        Self {
            ssrc: rand::random(),
            sequence: 1,
            timestamp: 0,
        }
    }
}

impl RtpClock {
    pub fn header(&self, payload_type: u8) -> Header {
        Header {
            version: 2,
            payload_type,
            sequence_number: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            ..Default::default()
        }
    }

    /// Step past a packet carrying `samples` samples
    pub fn advance(&mut self, samples: usize) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples as u32);
    }
}

/// Notifications raised by the webrtc stack
#[derive(Debug, Clone)]
pub enum PeerEvent {
    StateChanged(RTCPeerConnectionState),
    LocalCandidate(RTCIceCandidateInit),
}

pub struct WebRtcPeer {
    label: String,
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticRTP>,
    sink: Arc<RwLock<Option<AudioSink>>>,
    events: broadcast::Sender<PeerEvent>,
}

impl WebRtcPeer {
    pub async fn new(
        label: impl Into<String>,
        api: &API,
        config: RTCConfiguration,
    ) -> Result<Arc<Self>, SessionError> {
        let label = label.into();
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let track = Arc::new(TrackLocalStaticRTP::new(
            g711_capability(MIME_TYPE_PCMU),
            "audio".to_owned(),
            "modemhub".to_owned(),
        ));
        let sender = match pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                let _ = pc.close().await;
                return Err(e.into());
            }
        };

        // Drain RTCP so the interceptors keep running
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let (events, _) = broadcast::channel(32);
        let peer = Arc::new(Self {
            label,
            pc,
            track,
            sink: Arc::new(RwLock::new(None)),
            events,
        });
        peer.register_handlers();
        Ok(peer)
    }

    fn register_handlers(&self) {
        let sink = Arc::clone(&self.sink);
        let label = self.label.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = Arc::clone(&sink);
                let label = label.clone();
                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        return;
                    }
                    tokio::spawn(read_remote_audio(label, track, sink));
                })
            },
        ));

        let events = self.events.clone();
        let label = self.label.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                info!("[{}] Peer connection state: {}", label, state);
                let _ = events.send(PeerEvent::StateChanged(state));
                Box::pin(async {})
            }));

        let events = self.events.clone();
        let label = self.label.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(PeerEvent::LocalCandidate(init));
                        }
                        Err(e) => warn!("[{}] Failed to serialize ICE candidate: {}", label, e),
                    }
                }
                Box::pin(async {})
            }));
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Install (or remove) the destination for decoded remote audio
    pub fn set_audio_sink(&self, sink: Option<AudioSink>) {
        *self.sink.write() = sink;
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == RTCPeerConnectionState::Connected
    }

    /// Apply a remote offer and return the answer once gathering is done
    pub async fn answer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, SessionError> {
        self.pc.set_remote_description(offer).await?;
        let answer = self.pc.create_answer(None).await?;

        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        if tokio::time::timeout(GATHER_TIMEOUT, gathered.recv())
            .await
            .is_err()
        {
            warn!("[{}] ICE gathering did not finish in time", self.label);
        }

        self.pc
            .local_description()
            .await
            .ok_or_else(|| SessionError::Signaling("local description unavailable".into()))
    }

    pub async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<(), SessionError> {
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Encode `samples` as µ-law and send one RTP packet
    pub async fn send_pcm(&self, samples: &[i16], clock: &mut RtpClock) -> Result<(), SessionError> {
        if samples.is_empty() {
            return Ok(());
        }
        let packet = Packet {
            header: clock.header(G711Type::PCMU.payload_type()),
            payload: PcmuCodec::encode(samples),
        };
        self.track.write_rtp(&packet).await?;
        clock.advance(samples.len());
        Ok(())
    }

    pub async fn close(&self) -> Result<(), SessionError> {
        self.set_audio_sink(None);
        self.pc.close().await?;
        Ok(())
    }
}

async fn read_remote_audio(
    label: String,
    track: Arc<TrackRemote>,
    sink: Arc<RwLock<Option<AudioSink>>>,
) {
    let mime_type = track.codec().capability.mime_type;
    let negotiated = G711Type::from_mime_type(&mime_type);
    info!("[{}] Remote audio track codec={}", label, mime_type);

    while let Ok((packet, _)) = track.read_rtp().await {
        let Some(codec) =
            negotiated.or_else(|| G711Type::from_payload_type(packet.header.payload_type))
        else {
            debug!(
                "[{}] Unsupported incoming payload type {}",
                label, packet.header.payload_type
            );
            continue;
        };
        let samples = codec.decode(&packet.payload);
        let current = sink.read().clone();
        if let Some(sink) = current {
            sink(&samples);
        }
    }
    debug!("[{}] Remote audio track ended", label);
}
