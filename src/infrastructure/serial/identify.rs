//! Identification sequence run once per engine

use super::engine::ModemEngine;
use super::parse;
use crate::domain::modem::Modem;
use crate::domain::shared::value_objects::Iccid;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) async fn run(engine: ModemEngine) {
    let delay = engine.context().config.startup_delay;
    tokio::select! {
        _ = engine.stopped() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    if let Err(e) = identify(&engine).await {
        if !engine.is_stopped() {
            warn!("[{}] Identification failed: {}", engine.port_name(), e);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum IdentifyError {
    #[error("no answer to AT: {0}")]
    NotAModem(super::EngineError),

    #[error("no ICCID reported")]
    NoIccid,

    #[error("ICCID {0} owned by another port")]
    Duplicate(Iccid),
}

async fn identify(engine: &ModemEngine) -> Result<(), IdentifyError> {
    let port = engine.port_name().to_string();
    let context = engine.context().clone();

    if let Err(e) = engine.execute_silent("AT", PROBE_TIMEOUT).await {
        debug!("[{}] Not a modem", port);
        engine.stop();
        return Err(IdentifyError::NotAModem(e));
    }
    info!("[{}] Modem answered, identifying", port);

    for command in &context.config.init_commands {
        if let Err(e) = engine.execute(command, INIT_TIMEOUT).await {
            warn!("[{}] Init command {} failed: {}", port, command, e);
        }
    }

    probe_uac(engine).await;
    resolve_usb(engine).await;

    let ati = engine.execute("ATI", QUERY_TIMEOUT).await.unwrap_or_default();
    let (query, prefix) = parse::iccid_query(&ati);
    let iccid = match engine.execute(query, QUERY_TIMEOUT).await {
        Ok(resp) => parse::field_after(&resp, prefix).and_then(|raw| Iccid::parse(raw).ok()),
        Err(e) => {
            error!("[{}] {} failed: {}", port, query, e);
            None
        }
    };
    let Some(iccid) = iccid else {
        return Err(IdentifyError::NoIccid);
    };

    if !context.registry.register_iccid(&port, &iccid) {
        warn!("[{}] ICCID {} already active on another port, stopping", port, iccid);
        engine.stop();
        return Err(IdentifyError::Duplicate(iccid));
    }

    let mut modem = Modem::new(iccid.clone(), port.as_str());
    if let Ok(resp) = engine.execute("AT+CGSN", QUERY_TIMEOUT).await {
        modem.imei = parse::imei(&resp).unwrap_or_default();
    }
    if let Ok(resp) = engine.execute("AT+CSQ", QUERY_TIMEOUT).await {
        modem.signal_strength = parse::signal_percent(&resp).unwrap_or(0);
    }
    if let Ok(resp) = engine.execute("AT+COPS?", QUERY_TIMEOUT).await {
        modem.operator = parse::operator_name(&resp, &context.operators).unwrap_or_default();
    }
    if let Ok(resp) = engine.execute("AT+CREG?", QUERY_TIMEOUT).await {
        modem.registration = parse::registration_text(&resp).unwrap_or_default().to_string();
    }

    if let Err(e) = context.repository.upsert(&modem).await {
        error!("[{}] Failed to save modem {}: {}", port, iccid, e);
    }
    info!(
        "[{}] Modem registered: {} Op: {} Sig: {}%",
        port, iccid, modem.operator, modem.signal_strength
    );
    engine.publish_modem(modem);
    Ok(())
}

async fn resolve_usb(engine: &ModemEngine) {
    let resolver = engine.context().usb.clone();
    let target = engine.modem_target();
    let resolved =
        tokio::task::spawn_blocking(move || resolver.resolve_usb_identity(&target)).await;
    match resolved {
        Ok(Ok(identity)) => {
            debug!(
                "[{}] USB device {}:{} serial {:?}",
                engine.port_name(),
                identity.vid,
                identity.pid,
                identity.serial
            );
            engine.set_usb_identity(identity);
        }
        Ok(Err(e)) => debug!("[{}] USB identity unavailable: {}", engine.port_name(), e),
        Err(e) => warn!("[{}] USB lookup task failed: {}", engine.port_name(), e),
    }
}

async fn probe_uac(engine: &ModemEngine) {
    match engine.execute("AT+QCFG=\"USBCFG\"", QUERY_TIMEOUT).await {
        Ok(resp) => {
            let status = parse::uac_status(&resp).unwrap_or_default();
            info!(
                "[{}] UAC ready: {} (VID {} PID {})",
                engine.port_name(),
                status.ready,
                status.vid,
                status.pid
            );
            engine.set_uac_status(status);
        }
        Err(e) => debug!("[{}] USBCFG query unsupported: {}", engine.port_name(), e),
    }
}
