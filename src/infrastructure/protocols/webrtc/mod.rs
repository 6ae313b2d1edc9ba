//! WebRTC protocol implementation
pub mod error;
pub mod peer;
pub mod session_manager;
pub mod signaling;

pub use error::SessionError;
pub use peer::{build_api, rtc_configuration, PeerEvent, RtpClock, WebRtcPeer, GATHER_TIMEOUT};
pub use session_manager::{CallSession, SessionManager};
pub use signaling::{run_signaling, SignalMessage, SignalParseError};
