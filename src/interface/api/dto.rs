//! Response envelopes shared by the REST handlers

use crate::domain::call::CallSnapshot;
use serde::{Deserialize, Serialize};

/// Generic API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DialRequest {
    pub number: String,
}

#[derive(Debug, Serialize)]
pub struct CallControlResponse {
    pub status: &'static str,
    pub call_state: CallSnapshot,
}

impl CallControlResponse {
    pub fn ok(call_state: CallSnapshot) -> Self {
        Self {
            status: "ok",
            call_state,
        }
    }
}
