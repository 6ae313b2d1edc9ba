//! Call domain events

use crate::domain::call::value_object::CallState;
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted once per real state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEvent {
    pub metadata: EventMetadata,
    pub port_name: String,
    pub from: CallState,
    pub to: CallState,
    pub reason: String,
}

impl CallEvent {
    pub fn is_call_ended(&self) -> bool {
        self.to == CallState::Idle && self.from != CallState::Idle
    }
}

impl DomainEvent for CallEvent {
    fn event_type(&self) -> &'static str {
        "call.state_changed"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}
