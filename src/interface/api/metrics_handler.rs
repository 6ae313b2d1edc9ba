//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe the crate's counters
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!("modem_commands_total", "AT commands executed");
    describe_counter!("modem_commands_failed_total", "AT commands that returned an error");
    describe_counter!("modem_commands_timeout_total", "AT commands that timed out");
    describe_counter!("modem_urc_total", "Unsolicited result codes dispatched");
    describe_counter!(
        "audio_capture_frames_dropped_total",
        "Capture frames dropped because the uplink fell behind"
    );
    describe_counter!("webrtc_sessions_opened_total", "Call sessions created");
    describe_counter!("webrtc_sessions_closed_total", "Call sessions closed");

    Ok(handle)
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    (StatusCode::OK, prometheus_handle.render()).into_response()
}
