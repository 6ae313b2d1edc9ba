//! Call line aggregate
//!
//! Tracks the voice call state of one modem. All mutation goes through
//! [`CallLine::transition_to`], which is a no-op for same-state requests.

use crate::domain::call::event::CallEvent;
use crate::domain::call::notification::CallNotification;
use crate::domain::call::value_object::{CallSnapshot, CallState};
use crate::domain::shared::events::EventMetadata;
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct CallLine {
    port_name: String,
    snapshot: CallSnapshot,
}

impl CallLine {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            snapshot: CallSnapshot::default(),
        }
    }

    pub fn state(&self) -> CallState {
        self.snapshot.state
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.clone()
    }

    /// Move to `state`, returning the event when the state actually changed
    pub fn transition_to(&mut self, state: CallState, reason: &str) -> Option<CallEvent> {
        if self.snapshot.state == state {
            return None;
        }

        let from = self.snapshot.state;
        let metadata = EventMetadata::now();
        self.snapshot = CallSnapshot {
            state,
            reason: reason.to_string(),
            updated_at: Utc::now(),
        };

        Some(CallEvent {
            metadata,
            port_name: self.port_name.clone(),
            from,
            to: state,
            reason: reason.to_string(),
        })
    }

    /// Apply an unsolicited call notification
    pub fn apply(&mut self, notification: CallNotification) -> Option<CallEvent> {
        match notification {
            CallNotification::Ring if self.snapshot.state == CallState::Idle => {
                self.transition_to(CallState::Dialing, "ring")
            }
            CallNotification::Ring => None,
            CallNotification::CallListEntry(stat) => match stat {
                0 | 1 => self.transition_to(CallState::InCall, "clcc_active"),
                2..=5 => self.transition_to(CallState::Dialing, "clcc_dialing"),
                _ => None,
            },
            CallNotification::Terminated(reason) => self.transition_to(CallState::Idle, reason),
        }
    }
}
