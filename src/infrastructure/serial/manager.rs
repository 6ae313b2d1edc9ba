//! Port discovery and engine lifecycle
//!
//! The manager scans for serial ports, starts one engine per new port,
//! retires engines whose port vanished or that stopped on their own, and
//! owns the ICCID to port table that keeps one engine per SIM.

use super::engine::{EngineContext, ModemEngine, Transport};
use crate::config::SerialConfig;
use crate::domain::modem::IdentityRegistry;
use crate::domain::shared::value_objects::Iccid;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lists candidate port names
pub trait PortLister: Send + Sync {
    fn list_ports(&self) -> io::Result<Vec<String>>;
}

/// Opens a port for exclusive use by one engine
pub trait PortOpener: Send + Sync {
    fn open(&self, port_name: &str) -> io::Result<Box<dyn Transport>>;
}

/// System serial ports via `tokio-serial`
#[derive(Debug, Clone)]
pub struct SerialPorts {
    baud_rate: u32,
}

impl SerialPorts {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl PortLister for SerialPorts {
    fn list_ports(&self) -> io::Result<Vec<String>> {
        let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

impl PortOpener for SerialPorts {
    fn open(&self, port_name: &str) -> io::Result<Box<dyn Transport>> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(port_name, self.baud_rate)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(Box::new(stream))
    }
}

#[derive(Default)]
struct ManagerState {
    engines: HashMap<String, ModemEngine>,
    active_iccids: HashMap<Iccid, String>,
    probed: HashSet<String>,
}

struct ManagerShared {
    config: SerialConfig,
    context: EngineContext,
    lister: Arc<dyn PortLister>,
    opener: Arc<dyn PortOpener>,
    state: Mutex<ManagerState>,
}

/// Registry handle given to engines; weak so engines do not keep the manager alive
struct RegistryHandle(Weak<ManagerShared>);

impl IdentityRegistry for RegistryHandle {
    fn register_iccid(&self, port_name: &str, iccid: &Iccid) -> bool {
        match self.0.upgrade() {
            Some(shared) => shared.register_iccid(port_name, iccid),
            None => false,
        }
    }
}

impl ManagerShared {
    fn register_iccid(&self, port_name: &str, iccid: &Iccid) -> bool {
        let mut state = self.state.lock();
        match state.active_iccids.get(iccid) {
            Some(owner) if owner != port_name => false,
            Some(_) => true,
            None => {
                state
                    .active_iccids
                    .insert(iccid.clone(), port_name.to_string());
                true
            }
        }
    }
}

#[derive(Clone)]
pub struct PortManager {
    shared: Arc<ManagerShared>,
    cancel: CancellationToken,
}

impl PortManager {
    /// `context.registry` is replaced by the manager's own table
    pub fn new(
        config: SerialConfig,
        context: EngineContext,
        lister: Arc<dyn PortLister>,
        opener: Arc<dyn PortOpener>,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<ManagerShared>| ManagerShared {
            config,
            context: EngineContext {
                registry: Arc::new(RegistryHandle(weak.clone())),
                ..context
            },
            lister,
            opener,
            state: Mutex::new(ManagerState::default()),
        });

        Self {
            shared,
            cancel: CancellationToken::new(),
        }
    }

    /// Manager over the system's serial ports
    pub fn with_serial_ports(config: SerialConfig, context: EngineContext) -> Self {
        let ports = Arc::new(SerialPorts::new(config.baud_rate));
        Self::new(config, context, ports.clone(), ports)
    }

    /// Scan now and then on every interval until [`stop`](Self::stop)
    pub async fn start(&self) {
        info!("Starting port manager");
        self.scan_and_manage().await;

        let manager = self.clone();
        let interval = self.shared.config.scan_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => manager.scan_and_manage().await,
                }
            }
        });
    }

    /// Stop scanning and every engine
    pub fn stop(&self) {
        self.cancel.cancel();
        let engines: Vec<ModemEngine> = {
            let state = self.shared.state.lock();
            state.engines.values().cloned().collect()
        };
        for engine in engines {
            engine.stop();
        }
        info!("Port manager stopped");
    }

    /// One discovery pass
    pub async fn scan_and_manage(&self) {
        let ports = match self.shared.lister.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                error!("Error listing ports: {}", e);
                return;
            }
        };
        let present: HashSet<String> = ports
            .into_iter()
            .filter(|p| !self.shared.config.exclude_ports.contains(p))
            .collect();

        let offline = {
            let mut state = self.shared.state.lock();
            let mut offline = Vec::new();

            let retired: Vec<String> = state
                .engines
                .iter()
                .filter(|(port, engine)| !present.contains(*port) || engine.is_stopped())
                .map(|(port, _)| port.clone())
                .collect();
            for port in retired {
                if !present.contains(&port) {
                    info!("Port {} removed", port);
                }
                if let Some(iccid) = Self::retire_locked(&mut state, &port) {
                    offline.push(iccid);
                }
            }
            state.probed.retain(|port| present.contains(port));

            let mut fresh: Vec<&String> = present
                .iter()
                .filter(|p| !state.probed.contains(*p))
                .collect();
            fresh.sort();
            let fresh: Vec<String> = fresh.into_iter().cloned().collect();

            for port in fresh {
                state.probed.insert(port.clone());
                match self.shared.opener.open(&port) {
                    Ok(transport) => {
                        debug!("Probing port {}", port);
                        let engine =
                            ModemEngine::spawn(port.clone(), transport, self.shared.context.clone());
                        state.engines.insert(port, engine);
                    }
                    Err(e) => warn!("Failed to open port {}: {}", port, e),
                }
            }
            offline
        };

        for iccid in offline {
            if let Err(e) = self
                .shared
                .context
                .repository
                .mark_offline(&iccid, Utc::now())
                .await
            {
                error!("Failed to mark {} offline: {}", iccid, e);
            }
        }
    }

    /// Remove the engine on `port`; returns the ICCID it owned, if any
    fn retire_locked(state: &mut ManagerState, port: &str) -> Option<Iccid> {
        let engine = state.engines.remove(port)?;
        engine.stop();
        let iccid = engine.iccid()?;
        if state.active_iccids.get(&iccid).map(String::as_str) == Some(port) {
            state.active_iccids.remove(&iccid);
            info!("Modem {} on {} offline", iccid, port);
            return Some(iccid);
        }
        None
    }

    /// Claim `iccid` for `port_name`
    pub fn register_iccid(&self, port_name: &str, iccid: &Iccid) -> bool {
        self.shared.register_iccid(port_name, iccid)
    }

    /// Release `iccid` if `port_name` holds it
    pub fn unregister_iccid(&self, port_name: &str, iccid: &Iccid) {
        let mut state = self.shared.state.lock();
        if state.active_iccids.get(iccid).map(String::as_str) == Some(port_name) {
            state.active_iccids.remove(iccid);
        }
    }

    /// Live engine whose published modem carries `iccid`
    pub fn engine_by_iccid(&self, iccid: &Iccid) -> Option<ModemEngine> {
        let state = self.shared.state.lock();
        let port = state.active_iccids.get(iccid)?;
        state
            .engines
            .get(port)
            .filter(|e| !e.is_stopped() && e.iccid().as_ref() == Some(iccid))
            .cloned()
    }

    pub fn engines(&self) -> Vec<ModemEngine> {
        let state = self.shared.state.lock();
        let mut engines: Vec<ModemEngine> = state.engines.values().cloned().collect();
        engines.sort_by(|a, b| a.port_name().cmp(b.port_name()));
        engines
    }
}
