//! Interface layer - External interfaces (API, WebSocket, etc.)
//!
//! This layer handles:
//! - REST endpoints for modem call control
//! - The browser signaling WebSocket
//! - Prometheus metrics
//! - Request/response formatting

pub mod api;
