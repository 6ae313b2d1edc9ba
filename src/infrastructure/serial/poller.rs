//! Periodic status refresh and stored message collection

use super::engine::ModemEngine;
use super::error::EngineError;
use super::parse;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const DELETE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn run(engine: ModemEngine, mut trigger: mpsc::Receiver<()>) {
    let config = engine.context().config.clone();
    tokio::select! {
        _ = engine.stopped() => return,
        _ = tokio::time::sleep(config.startup_delay) => {}
    }

    let mut ticker = tokio::time::interval(config.poll_interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = engine.stopped() => break,
            _ = ticker.tick() => {}
            Some(()) = trigger.recv() => {
                debug!("[{}] Poll triggered by new message", engine.port_name());
            }
        }
        if let Err(e) = poll_once(&engine).await {
            debug!("[{}] Poll skipped: {}", engine.port_name(), e);
        }
    }
}

/// One status refresh plus message sweep
///
/// Does nothing until the modem is identified and returns
/// [`EngineError::Busy`] while another operation holds the modem.
pub(crate) async fn poll_once(engine: &ModemEngine) -> Result<(), EngineError> {
    let Some(mut modem) = engine.modem() else {
        return Ok(());
    };
    if engine.is_busy() {
        return Err(EngineError::Busy);
    }
    let context = engine.context().clone();
    let port = engine.port_name();

    match engine.execute("AT+COPS?", STATUS_TIMEOUT).await {
        Ok(resp) => {
            if let Some(operator) = parse::operator_name(&resp, &context.operators) {
                modem.operator = operator;
            }
        }
        Err(e) => error!("[{}] Failed COPS: {}", port, e),
    }
    match engine.execute("AT+CSQ", STATUS_TIMEOUT).await {
        Ok(resp) => {
            if let Some(signal) = parse::signal_percent(&resp) {
                modem.signal_strength = signal;
            }
        }
        Err(e) => error!("[{}] Failed CSQ: {}", port, e),
    }

    modem.touch();
    if let Err(e) = context.repository.upsert(&modem).await {
        error!("[{}] Failed to update modem {}: {}", port, modem.iccid, e);
    }
    engine.publish_modem(modem.clone());

    let listing = match engine.execute("AT+CMGL=4", LIST_TIMEOUT).await {
        Ok(resp) => resp,
        Err(e) => {
            error!("[{}] Failed to list messages: {}", port, e);
            return Ok(());
        }
    };
    let pdus = parse::stored_pdus(&listing);
    if pdus.is_empty() {
        return Ok(());
    }

    info!("[{}] Collected {} stored message(s)", port, pdus.len());
    for pdu in &pdus {
        if let Err(e) = context.sms_sink.deliver(&modem.iccid, pdu).await {
            error!("[{}] Message delivery failed: {}", port, e);
        }
    }
    if let Err(e) = engine.execute("AT+CMGD=1,4", DELETE_TIMEOUT).await {
        error!("[{}] Failed to delete stored messages: {}", port, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::modem::repository::{MockModemRepository, MockSmsSink};
    use crate::domain::modem::{Modem, OperatorDirectory};
    use crate::domain::shared::value_objects::Iccid;
    use crate::infrastructure::persistence::InMemoryIdentityRegistry;
    use crate::infrastructure::serial::engine::EngineContext;
    use crate::infrastructure::serial::testing::scripted_modem;
    use crate::infrastructure::usb::TargetHintResolver;
    use std::sync::Arc;

    const PDU: &str = "07911326040000F0040B911346610089F60000208062917314080CC8F71D14969741F977FD07";

    fn respond(command: &str) -> String {
        match command {
            "AT+COPS?" => "+COPS: 0,2,\"46000\",7\nOK".into(),
            "AT+CSQ" => "+CSQ: 99,99\nOK".into(),
            "AT+CMGL=4" => format!("+CMGL: 0,1,,24\n{}\nOK", PDU),
            "AT+CMGD=1,4" => "OK".into(),
            _ => "ERROR".into(),
        }
    }

    fn engine(
        repository: MockModemRepository,
        sms_sink: MockSmsSink,
    ) -> (ModemEngine, tokio::task::JoinHandle<Vec<String>>) {
        let context = EngineContext {
            config: Arc::new(EngineConfig::default()),
            registry: Arc::new(InMemoryIdentityRegistry::new()),
            repository: Arc::new(repository),
            sms_sink: Arc::new(sms_sink),
            operators: Arc::new(
                OperatorDirectory::from_json(r#"[{"mcc":"460","mnc":"00","name":"China Mobile"}]"#)
                    .unwrap(),
            ),
            usb: Arc::new(TargetHintResolver),
        };
        let (port, modem_side) = tokio::io::duplex(4096);
        let script = scripted_modem(modem_side, respond);
        (ModemEngine::attach("poll0", port, context), script)
    }

    #[tokio::test]
    async fn test_poll_refreshes_status_and_delivers_messages() {
        let mut repository = MockModemRepository::new();
        repository
            .expect_upsert()
            .withf(|modem| modem.operator == "China Mobile" && modem.signal_strength == 0)
            .times(1)
            .returning(|_| Ok(()));
        let mut sink = MockSmsSink::new();
        sink.expect_deliver()
            .withf(|_, pdu| pdu.to_string() == PDU)
            .times(1)
            .returning(|_, _| Ok(()));

        let (engine, script) = engine(repository, sink);
        engine.publish_modem(Modem::new(Iccid::parse("8986001").unwrap(), "poll0"));

        poll_once(&engine).await.unwrap();

        assert_eq!(engine.modem().unwrap().operator, "China Mobile");
        engine.stop();
        let seen = script.await.unwrap();
        assert_eq!(seen, ["AT+COPS?", "AT+CSQ", "AT+CMGL=4", "AT+CMGD=1,4"]);
    }

    #[tokio::test]
    async fn test_poll_skips_busy_and_unidentified_modems() {
        let mut repository = MockModemRepository::new();
        repository.expect_upsert().never();
        let mut sink = MockSmsSink::new();
        sink.expect_deliver().never();

        let (engine, _script) = engine(repository, sink);
        assert!(poll_once(&engine).await.is_ok());

        engine.publish_modem(Modem::new(Iccid::parse("8986001").unwrap(), "poll0"));
        engine.set_occupied(true);
        assert!(matches!(poll_once(&engine).await, Err(EngineError::Busy)));
        assert!(engine.is_busy());
    }
}
