//! API interface implementations

pub mod calls_handler;
pub mod dto;
pub mod metrics_handler;
pub mod router;
pub mod ws_handler;

use crate::application::CallService;

pub use dto::ApiResponse;
pub use metrics_handler::init_metrics;
pub use router::build_router;

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub calls: CallService,
}

impl AppState {
    pub fn new(calls: CallService) -> Self {
        Self { calls }
    }
}
