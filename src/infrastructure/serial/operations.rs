//! High-level modem operations built on `execute`

use super::command::CTRL_Z;
use super::engine::ModemEngine;
use super::error::EngineError;
use super::parse;
use crate::domain::call::{CallSnapshot, CallState};
use std::time::Duration;
use tracing::{info, warn};

const VOICE_AUDIO_ON: &str = "AT+QPCMV=1,2";
const VOICE_AUDIO_OFF: &str = "AT+QPCMV=0";
const VOICE_TIMEOUT: Duration = Duration::from_secs(5);
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const HANGUP_TIMEOUT: Duration = Duration::from_secs(5);
const SCAN_TIMEOUT: Duration = Duration::from_secs(120);
const SELECT_TIMEOUT: Duration = Duration::from_secs(60);
const REBOOT_TIMEOUT: Duration = Duration::from_secs(5);
const PROMPT_TIMEOUT: Duration = Duration::from_secs(5);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Digits plus `*`, `#` and `+`
pub fn is_valid_dial_number(number: &str) -> bool {
    !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '#' | '+'))
}

impl ModemEngine {
    /// Place a voice call
    pub async fn dial(&self, number: &str) -> Result<CallSnapshot, EngineError> {
        let number = number.trim();
        if !is_valid_dial_number(number) {
            return Err(EngineError::InvalidDialNumber(number.to_string()));
        }

        let _ops = self.lock_call_ops().await;
        if self.call_state().state != CallState::Idle {
            return Err(EngineError::CallInProgress);
        }

        self.execute(VOICE_AUDIO_ON, VOICE_TIMEOUT).await?;
        self.transition(CallState::Dialing, "dialing");
        info!("[{}] Dialing {}", self.port_name(), number);

        if let Err(e) = self.execute(&format!("ATD{};", number), DIAL_TIMEOUT).await {
            warn!("[{}] Dial failed: {}", self.port_name(), e);
            if let Err(off) = self.execute(VOICE_AUDIO_OFF, VOICE_TIMEOUT).await {
                warn!("[{}] Failed to disable voice audio: {}", self.port_name(), off);
            }
            self.transition(CallState::Idle, "dial_failed");
            return Err(e);
        }

        self.transition(CallState::InCall, "dialed");
        Ok(self.call_state())
    }

    /// End the current call; state returns to idle even if `ATH` fails
    pub async fn hangup(&self) -> Result<CallSnapshot, EngineError> {
        let _ops = self.lock_call_ops().await;

        let result = self.execute("ATH", HANGUP_TIMEOUT).await;
        if let Err(e) = self.execute(VOICE_AUDIO_OFF, VOICE_TIMEOUT).await {
            warn!("[{}] Failed to disable voice audio: {}", self.port_name(), e);
        }
        self.transition(CallState::Idle, "hangup");

        result.map(|_| self.call_state())
    }

    /// Scan for visible networks as `Name (MCCMNC) [Status]`
    pub async fn scan_networks(&self) -> Result<Vec<String>, EngineError> {
        let _busy = self.occupy();
        let resp = self.execute("AT+COPS=?", SCAN_TIMEOUT).await?;
        let networks = parse::network_list(&resp, &self.context().operators);
        if networks.is_empty() {
            return Ok(vec![resp]);
        }
        Ok(networks)
    }

    /// Select an operator by name; empty or `AUTO` returns to automatic selection
    pub async fn set_operator(&self, operator: &str) -> Result<(), EngineError> {
        let _busy = self.occupy();
        let operator = operator.trim();
        let command = if operator.is_empty() || operator.eq_ignore_ascii_case("AUTO") {
            "AT+COPS=0".to_string()
        } else {
            format!("AT+COPS=1,0,\"{}\"", operator)
        };
        self.execute(&command, SELECT_TIMEOUT).await.map(|_| ())
    }

    pub async fn reboot(&self) -> Result<(), EngineError> {
        info!("[{}] Rebooting modem", self.port_name());
        self.execute("AT+CFUN=1,1", REBOOT_TIMEOUT).await.map(|_| ())
    }

    /// Submit a pre-encoded PDU; `tpdu_len` excludes the SMSC header
    pub async fn send_pdu(&self, pdu_hex: &str, tpdu_len: usize) -> Result<String, EngineError> {
        let pdu = pdu_hex.trim();
        if pdu.is_empty() || pdu.len() % 2 != 0 || !pdu.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::InvalidPdu(pdu.to_string()));
        }

        let _busy = self.occupy();
        self.execute(&format!("AT+CMGS={}", tpdu_len), PROMPT_TIMEOUT)
            .await?;
        self.execute(&format!("{}{}", pdu, CTRL_Z), SUBMIT_TIMEOUT)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::infrastructure::serial::engine::EngineContext;
    use crate::infrastructure::serial::testing::scripted_modem;
    use tokio::task::JoinHandle;

    fn engine<F>(respond: F) -> (ModemEngine, JoinHandle<Vec<String>>)
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let (port, modem) = tokio::io::duplex(1024);
        let engine = ModemEngine::attach(
            "ops0",
            port,
            EngineContext::detached(EngineConfig::default()),
        );
        (engine, scripted_modem(modem, respond))
    }

    async fn commands(engine: ModemEngine, script: JoinHandle<Vec<String>>) -> Vec<String> {
        engine.stop();
        script.await.unwrap()
    }

    #[test]
    fn test_dial_number_validation() {
        assert!(is_valid_dial_number("10086"));
        assert!(is_valid_dial_number("+886912345678"));
        assert!(is_valid_dial_number("*#06#"));
        assert!(!is_valid_dial_number(""));
        assert!(!is_valid_dial_number("123 456"));
        assert!(!is_valid_dial_number("12a"));
    }

    #[tokio::test]
    async fn test_dial_rejects_invalid_number_without_io() {
        let (engine, script) = engine(|_| "OK".into());

        assert!(matches!(
            engine.dial("12a3").await,
            Err(EngineError::InvalidDialNumber(n)) if n == "12a3"
        ));
        assert_eq!(engine.call_state().state, CallState::Idle);
        assert!(commands(engine, script).await.is_empty());
    }

    #[tokio::test]
    async fn test_dial_rejected_while_call_active() {
        let (engine, script) = engine(|_| "OK".into());

        engine.transition(CallState::Dialing, "ring");
        assert!(matches!(
            engine.dial("10086").await,
            Err(EngineError::CallInProgress)
        ));
        engine.transition(CallState::InCall, "answered");
        assert!(matches!(
            engine.dial("10086").await,
            Err(EngineError::CallInProgress)
        ));

        assert_eq!(engine.call_state().state, CallState::InCall);
        assert!(commands(engine, script).await.is_empty());
    }

    #[tokio::test]
    async fn test_dial_success_reaches_in_call() {
        let (engine, script) = engine(|_| "OK".into());
        let mut calls = engine.subscribe_calls();

        let snapshot = engine.dial(" 10086 ").await.unwrap();
        assert_eq!(snapshot.state, CallState::InCall);
        assert_eq!(calls.recv().await.unwrap().to, CallState::Dialing);
        assert_eq!(calls.recv().await.unwrap().to, CallState::InCall);

        assert_eq!(
            commands(engine, script).await,
            ["AT+QPCMV=1,2", "ATD10086;"]
        );
    }

    #[tokio::test]
    async fn test_dial_error_disables_voice_and_returns_idle() {
        let (engine, script) = engine(|command| match command {
            "ATD10086;" => "ERROR".into(),
            _ => "OK".into(),
        });
        let mut calls = engine.subscribe_calls();

        assert!(matches!(
            engine.dial("10086").await,
            Err(EngineError::ModemError(_))
        ));
        assert_eq!(calls.recv().await.unwrap().to, CallState::Dialing);
        let event = calls.recv().await.unwrap();
        assert_eq!(event.to, CallState::Idle);

        let snapshot = engine.call_state();
        assert_eq!(snapshot.state, CallState::Idle);
        assert_eq!(snapshot.reason, "dial_failed");
        assert_eq!(
            commands(engine, script).await,
            ["AT+QPCMV=1,2", "ATD10086;", "AT+QPCMV=0"]
        );
    }

    #[tokio::test]
    async fn test_voice_setup_failure_leaves_state_untouched() {
        let (engine, script) = engine(|command| match command {
            "AT+QPCMV=1,2" => "ERROR".into(),
            _ => "OK".into(),
        });
        let before = engine.call_state();

        assert!(matches!(
            engine.dial("10086").await,
            Err(EngineError::ModemError(_))
        ));
        assert_eq!(engine.call_state(), before);
        assert_eq!(commands(engine, script).await, ["AT+QPCMV=1,2"]);
    }

    #[tokio::test]
    async fn test_hangup_returns_idle_when_ath_fails() {
        let (engine, script) = engine(|command| match command {
            "ATH" => "ERROR".into(),
            _ => "OK".into(),
        });
        engine.transition(CallState::InCall, "answered");

        assert!(matches!(
            engine.hangup().await,
            Err(EngineError::ModemError(_))
        ));
        let snapshot = engine.call_state();
        assert_eq!(snapshot.state, CallState::Idle);
        assert_eq!(snapshot.reason, "hangup");
        assert_eq!(commands(engine, script).await, ["ATH", "AT+QPCMV=0"]);
    }
}
