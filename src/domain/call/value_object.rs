//! Call value objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Voice call state of a single modem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call, also the terminal state
    #[default]
    Idle,
    /// Outgoing call placed or incoming call alerting
    Dialing,
    /// Call connected (active or held)
    InCall,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Dialing => "dialing",
            CallState::InCall => "in_call",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a modem's call state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub state: CallState,
    /// Short machine-readable cause of the last transition
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            reason: String::new(),
            updated_at: Utc::now(),
        }
    }
}
