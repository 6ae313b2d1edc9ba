//! Fake serial modems shared by the integration tests

#![allow(dead_code)]

use modemhub::config::{CallingConfig, SerialConfig};
use modemhub::domain::modem::{ModemRepository, OperatorDirectory};
use modemhub::infrastructure::media::UnavailableHost;
use modemhub::infrastructure::persistence::{
    InMemoryIdentityRegistry, InMemoryModemRepository, LoggingSmsSink,
};
use modemhub::infrastructure::protocols::webrtc::SessionManager;
use modemhub::infrastructure::serial::{EngineContext, PortLister, PortOpener, PortManager, Transport};
use modemhub::infrastructure::usb::TargetHintResolver;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

pub const ICCID: &str = "89860012345678901234";

/// What a fake modem reports about itself
#[derive(Debug, Clone)]
pub struct FakeModem {
    pub iccid: String,
    pub uac_ready: bool,
}

impl FakeModem {
    pub fn new(iccid: &str) -> Self {
        Self {
            iccid: iccid.to_string(),
            uac_ready: true,
        }
    }

    fn respond(&self, command: &str) -> String {
        match command {
            "AT" | "ATH" | "AT+QPCMV=1,2" | "AT+QPCMV=0" | "AT+CMGD=1,4" => "OK".to_string(),
            "AT+QCFG=\"USBCFG\"" => format!(
                "+QCFG: \"usbcfg\",0x2C7C,0x0125,1,1,1,1,1,0,{}\nOK",
                u8::from(self.uac_ready)
            ),
            "ATI" => "Quectel\nEC25\nOK".to_string(),
            "AT+QCCID" => format!("+QCCID: {}\nOK", self.iccid),
            "AT+CGSN" => "867223051234567\nOK".to_string(),
            "AT+CSQ" => "+CSQ: 20,99\nOK".to_string(),
            "AT+COPS?" => "+COPS: 0,0,\"CMCC\",7\nOK".to_string(),
            "AT+CREG?" => "+CREG: 0,1\nOK".to_string(),
            "AT+CMGL=4" => "OK".to_string(),
            c if c.starts_with("ATD") => "OK".to_string(),
            _ => "ERROR".to_string(),
        }
    }

    async fn serve(self, stream: DuplexStream, log: Arc<Mutex<Vec<String>>>) {
        let (rx, mut tx) = tokio::io::split(stream);
        let mut lines = BufReader::new(rx).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let command = line.trim().to_string();
            if command.is_empty() {
                continue;
            }
            let reply = self.respond(&command);
            log.lock().push(command);
            let wire = format!("{}\r\n", reply.replace('\n', "\r\n"));
            if tx.write_all(wire.as_bytes()).await.is_err() {
                break;
            }
        }
    }
}

/// Port table backed by in-process fake modems
#[derive(Default)]
pub struct FakePorts {
    ports: Mutex<BTreeMap<String, FakeModem>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakePorts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn plug(&self, port: &str, modem: FakeModem) {
        self.ports.lock().insert(port.to_string(), modem);
    }

    pub fn unplug(&self, port: &str) {
        self.ports.lock().remove(port);
    }

    /// Every command any fake modem has received
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

impl PortLister for FakePorts {
    fn list_ports(&self) -> io::Result<Vec<String>> {
        Ok(self.ports.lock().keys().cloned().collect())
    }
}

impl PortOpener for FakePorts {
    fn open(&self, port_name: &str) -> io::Result<Box<dyn Transport>> {
        let modem = self
            .ports
            .lock()
            .get(port_name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, port_name.to_string()))?;
        let (port, modem_side) = tokio::io::duplex(4096);
        tokio::spawn(modem.serve(modem_side, self.commands.clone()));
        Ok(Box::new(port))
    }
}

pub fn serial_config() -> SerialConfig {
    SerialConfig {
        scan_interval_secs: 3600,
        poll_interval_secs: 3600,
        startup_delay_ms: 0,
        init_commands: Vec::new(),
        operator_file: None,
        ..SerialConfig::default()
    }
}

pub fn port_manager(ports: Arc<FakePorts>, repository: Arc<InMemoryModemRepository>) -> PortManager {
    let config = serial_config();
    let context = EngineContext {
        config: Arc::new(config.engine_config()),
        registry: Arc::new(InMemoryIdentityRegistry::new()),
        repository: repository as Arc<dyn ModemRepository>,
        sms_sink: Arc::new(LoggingSmsSink),
        operators: Arc::new(OperatorDirectory::empty()),
        usb: Arc::new(TargetHintResolver),
    };
    PortManager::new(config, context, ports.clone(), ports)
}

/// Sessions that never find an audio device
pub fn session_manager() -> SessionManager {
    let calling = CallingConfig {
        stun_servers: Vec::new(),
        ..CallingConfig::default()
    };
    SessionManager::with_backends(
        &calling,
        Arc::new(UnavailableHost),
        Arc::new(TargetHintResolver),
    )
    .unwrap()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
