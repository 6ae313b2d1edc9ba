//! Browser signaling over JSON text frames
//!
//! The loop only sees a stream of inbound frames and a channel for outbound
//! messages, so any transport (WebSocket, tests) can drive it.

use super::peer::PeerEvent;
use super::session_manager::SessionManager;
use crate::domain::shared::value_objects::ModemTarget;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// One signaling message, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    Ready {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offer: Option<RTCSessionDescription>,
    },
    Answer {
        answer: RTCSessionDescription,
    },
    Candidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate: Option<RTCIceCandidateInit>,
    },
    Error {
        text: String,
    },
}

const KNOWN_TYPES: [&str; 5] = ["ready", "offer", "answer", "candidate", "error"];

#[derive(Error, Debug)]
pub enum SignalParseError {
    #[error("invalid signal message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing signal type")]
    MissingType,

    #[error("unsupported signal type")]
    Unsupported(String),
}

impl SignalMessage {
    pub fn error(text: impl Into<String>) -> Self {
        SignalMessage::Error { text: text.into() }
    }

    pub fn parse(raw: &str) -> Result<Self, SignalParseError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let kind = match value.get("type").and_then(|t| t.as_str()) {
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => return Err(SignalParseError::MissingType),
        };
        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(SignalParseError::Unsupported(kind));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> String {
        // Every variant serializes to a plain JSON object
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string())
    }
}

/// Drive signaling for the session `key` until `incoming` ends
///
/// Outbound messages go to `outgoing`; when the receiver is gone the loop
/// stops at the next inbound frame.
pub async fn run_signaling<S>(
    sessions: &SessionManager,
    key: &str,
    target: ModemTarget,
    mut incoming: S,
    outgoing: mpsc::Sender<SignalMessage>,
) where
    S: Stream<Item = String> + Unpin,
{
    let session = match sessions.ensure_session(key, target).await {
        Ok(session) => session,
        Err(e) => {
            let _ = outgoing.send(SignalMessage::error(e.to_string())).await;
            return;
        }
    };
    let peer = session.peer.clone();

    let forwarder = {
        let mut events = peer.subscribe();
        let outgoing = outgoing.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(PeerEvent::LocalCandidate(candidate)) => {
                        let message = SignalMessage::Candidate {
                            candidate: Some(candidate),
                        };
                        if outgoing.send(message).await.is_err() {
                            warn!("[{}] Write candidate failed: signaling closed", key);
                            break;
                        }
                    }
                    Ok(PeerEvent::StateChanged(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[{}] Dropped {} peer events", key, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let _ = outgoing
        .send(SignalMessage::Ready {
            text: Some("server ready".to_string()),
        })
        .await;
    info!("[{}] Signaling started", key);

    while let Some(raw) = incoming.next().await {
        let reply = match SignalMessage::parse(&raw) {
            Err(e) => Some(SignalMessage::error(e.to_string())),
            Ok(SignalMessage::Offer { offer: None }) => {
                Some(SignalMessage::error("offer is required"))
            }
            Ok(SignalMessage::Offer { offer: Some(offer) }) => match peer.answer(offer).await {
                Ok(answer) => Some(SignalMessage::Answer { answer }),
                Err(e) => Some(SignalMessage::error(e.to_string())),
            },
            Ok(SignalMessage::Candidate { candidate: None }) => None,
            Ok(SignalMessage::Candidate {
                candidate: Some(candidate),
            }) => match peer.add_ice_candidate(candidate).await {
                Ok(()) => None,
                Err(e) => Some(SignalMessage::error(e.to_string())),
            },
            Ok(_) => Some(SignalMessage::error("unsupported signal type")),
        };

        if let Some(reply) = reply {
            if outgoing.send(reply).await.is_err() {
                break;
            }
        }
    }

    forwarder.abort();
    debug!("[{}] Signaling ended", key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallingConfig;
    use crate::infrastructure::media::UnavailableHost;
    use crate::infrastructure::usb::TargetHintResolver;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            SignalMessage::parse("not json"),
            Err(SignalParseError::Malformed(_))
        ));
        assert!(matches!(
            SignalMessage::parse(r#"{"offer":null}"#),
            Err(SignalParseError::MissingType)
        ));
        assert!(matches!(
            SignalMessage::parse(r#"{"type":"bye"}"#),
            Err(SignalParseError::Unsupported(_))
        ));
    }

    #[test]
    fn test_parse_candidate_without_body() {
        let message = SignalMessage::parse(r#"{"type":"candidate"}"#).unwrap();
        assert!(matches!(message, SignalMessage::Candidate { candidate: None }));
    }

    #[test]
    fn test_ready_wire_format() {
        let ready = SignalMessage::Ready {
            text: Some("server ready".into()),
        };
        let value: serde_json::Value = serde_json::from_str(&ready.to_json()).unwrap();
        assert_eq!(value["type"], "ready");
        assert_eq!(value["text"], "server ready");

        let value: serde_json::Value =
            serde_json::from_str(&SignalMessage::error("boom").to_json()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["text"], "boom");
    }

    async fn next(rx: &mut mpsc::Receiver<SignalMessage>) -> SignalMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no signaling message")
            .expect("signaling channel closed")
    }

    #[tokio::test]
    async fn test_signaling_replies_to_bad_input_without_closing() {
        let config = CallingConfig {
            stun_servers: Vec::new(),
            ..CallingConfig::default()
        };
        let sessions = SessionManager::with_backends(
            &config,
            Arc::new(UnavailableHost),
            Arc::new(TargetHintResolver),
        )
        .unwrap();

        let frames = vec![
            "{oops".to_string(),
            r#"{"type":"candidate"}"#.to_string(),
            r#"{"type":"hello"}"#.to_string(),
            r#"{"type":"offer"}"#.to_string(),
        ];
        let (tx, mut rx) = mpsc::channel(16);
        run_signaling(
            &sessions,
            "8986001",
            ModemTarget::new("/dev/ttyUSB2"),
            futures::stream::iter(frames),
            tx,
        )
        .await;

        assert!(matches!(next(&mut rx).await, SignalMessage::Ready { .. }));
        assert!(matches!(next(&mut rx).await, SignalMessage::Error { .. }));
        match next(&mut rx).await {
            SignalMessage::Error { text } => assert_eq!(text, "unsupported signal type"),
            other => panic!("unexpected {:?}", other),
        }
        match next(&mut rx).await {
            SignalMessage::Error { text } => assert_eq!(text, "offer is required"),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(sessions.active_session_count().await, 1);
        sessions.close_all().await.unwrap();
    }
}
