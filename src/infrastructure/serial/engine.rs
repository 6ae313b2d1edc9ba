//! Per-port protocol engine
//!
//! One task owns the port writer and serializes every command: it writes the
//! command, then consumes framed lines until `OK`, a line containing `ERROR`,
//! the prompt (for `AT+CMGS` only) or the timeout. Unsolicited result codes
//! are dispatched whether or not a command is in flight.

use super::command::{
    classify, encode_command, expects_prompt, is_urc, CommandRequest, LineKind, CTRL_Z,
};
use super::error::EngineError;
use super::framer::{self, Frame, ReadEvent, PROMPT};
use super::{identify, poller};
use crate::config::EngineConfig;
use crate::domain::call::{CallEvent, CallLine, CallNotification, CallSnapshot, CallState};
use crate::domain::modem::{IdentityRegistry, Modem, ModemRepository, OperatorDirectory, SmsSink};
use crate::domain::shared::value_objects::{Iccid, ModemTarget, UsbIdentity};
use crate::infrastructure::persistence::{
    InMemoryIdentityRegistry, InMemoryModemRepository, LoggingSmsSink,
};
use crate::infrastructure::usb::{TargetHintResolver, UsbResolver};
use metrics::counter;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 10;
const READ_QUEUE_DEPTH: usize = 100;
const CALL_EVENT_CAPACITY: usize = 32;

/// Added to a command's timeout to bound the caller's total wait
pub const ENQUEUE_MARGIN: Duration = Duration::from_secs(1);

/// Anything a modem can be driven over
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Collaborators and settings shared by every engine
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub registry: Arc<dyn IdentityRegistry>,
    pub repository: Arc<dyn ModemRepository>,
    pub sms_sink: Arc<dyn SmsSink>,
    pub operators: Arc<OperatorDirectory>,
    pub usb: Arc<dyn UsbResolver>,
}

impl EngineContext {
    /// Context backed by in-memory collaborators, for single-port use
    pub fn detached(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(InMemoryIdentityRegistry::new()),
            repository: Arc::new(InMemoryModemRepository::new()),
            sms_sink: Arc::new(LoggingSmsSink),
            operators: Arc::new(OperatorDirectory::empty()),
            usb: Arc::new(TargetHintResolver),
        }
    }
}

/// USB audio readiness as reported by the modem
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UacStatus {
    pub ready: bool,
    pub vid: String,
    pub pid: String,
}

struct EngineState {
    call: CallLine,
    busy: bool,
    uac: UacStatus,
    /// Resolved once during identification
    usb: Option<UsbIdentity>,
    modem: Option<Modem>,
}

struct EngineInner {
    port_name: String,
    context: EngineContext,
    commands: mpsc::Sender<CommandRequest>,
    cancel: CancellationToken,
    state: Mutex<EngineState>,
    call_events: broadcast::Sender<CallEvent>,
    poll_trigger: mpsc::Sender<()>,
    /// Serializes dial/hangup sequences
    call_ops: tokio::sync::Mutex<()>,
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct ModemEngine {
    inner: Arc<EngineInner>,
}

impl ModemEngine {
    /// Start the engine with identification and status polling
    pub fn spawn<T: Transport>(port_name: impl Into<String>, transport: T, context: EngineContext) -> Self {
        let (engine, poll_rx) = Self::start(port_name.into(), transport, context);
        tokio::spawn(identify::run(engine.clone()));
        tokio::spawn(poller::run(engine.clone(), poll_rx));
        engine
    }

    /// Start only the reader and the command loop
    pub fn attach<T: Transport>(port_name: impl Into<String>, transport: T, context: EngineContext) -> Self {
        Self::start(port_name.into(), transport, context).0
    }

    fn start<T: Transport>(
        port_name: String,
        transport: T,
        context: EngineContext,
    ) -> (Self, mpsc::Receiver<()>) {
        let (reader, writer) = tokio::io::split(transport);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (line_tx, line_rx) = mpsc::channel(READ_QUEUE_DEPTH);
        let (poll_tx, poll_rx) = mpsc::channel(1);
        let (call_events, _) = broadcast::channel(CALL_EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let inner = Arc::new(EngineInner {
            port_name: port_name.clone(),
            context,
            commands: cmd_tx,
            cancel: cancel.clone(),
            state: Mutex::new(EngineState {
                call: CallLine::new(port_name.clone()),
                busy: false,
                uac: UacStatus::default(),
                usb: None,
                modem: None,
            }),
            call_events,
            poll_trigger: poll_tx,
            call_ops: tokio::sync::Mutex::new(()),
        });

        tokio::spawn(framer::run_reader(
            port_name.clone(),
            reader,
            line_tx,
            cancel,
        ));
        tokio::spawn(
            CommandLoop {
                inner: Arc::clone(&inner),
                writer,
                commands: cmd_rx,
                lines: line_rx,
            }
            .run(),
        );

        info!("[{}] Engine started", port_name);
        (Self { inner }, poll_rx)
    }

    pub fn port_name(&self) -> &str {
        &self.inner.port_name
    }

    pub(crate) fn context(&self) -> &EngineContext {
        &self.inner.context
    }

    /// Run a command and return the accumulated response lines joined by `\n`
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<String, EngineError> {
        self.submit(command, timeout, false).await
    }

    /// Like [`execute`](Self::execute) without TX/RX tracing
    pub async fn execute_silent(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, EngineError> {
        self.submit(command, timeout, true).await
    }

    async fn submit(
        &self,
        command: &str,
        timeout: Duration,
        silent: bool,
    ) -> Result<String, EngineError> {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }

        let (reply, response) = oneshot::channel();
        let request = CommandRequest {
            command: command.to_string(),
            timeout,
            silent,
            reply,
        };

        let exchange = async {
            self.inner
                .commands
                .send(request)
                .await
                .map_err(|_| EngineError::Stopped)?;
            response.await.map_err(|_| EngineError::Stopped)?
        };

        match tokio::time::timeout(timeout + ENQUEUE_MARGIN, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!("[{}] No answer for {} within enqueue window", self.port_name(), command);
                Err(EngineError::EnqueueTimeout)
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().busy
    }

    /// Mark the modem occupied so the poller leaves it alone
    pub fn set_occupied(&self, busy: bool) {
        self.inner.state.lock().busy = busy;
    }

    /// Hold the busy flag until the guard is dropped
    pub(crate) fn occupy(&self) -> OccupiedGuard<'_> {
        self.set_occupied(true);
        OccupiedGuard { engine: self }
    }

    pub fn call_state(&self) -> CallSnapshot {
        self.inner.state.lock().call.snapshot()
    }

    pub fn subscribe_calls(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.call_events.subscribe()
    }

    pub(crate) fn transition(&self, state: CallState, reason: &str) {
        let event = self.inner.state.lock().call.transition_to(state, reason);
        if let Some(event) = event {
            self.inner.publish_call_event(event);
        }
    }

    pub(crate) async fn lock_call_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.call_ops.lock().await
    }

    pub fn is_uac_ready(&self) -> bool {
        self.inner.state.lock().uac.ready
    }

    pub fn uac_identity(&self) -> UacStatus {
        self.inner.state.lock().uac.clone()
    }

    pub(crate) fn set_uac_status(&self, status: UacStatus) {
        self.inner.state.lock().uac = status;
    }

    pub fn usb_identity(&self) -> Option<UsbIdentity> {
        self.inner.state.lock().usb.clone()
    }

    pub(crate) fn set_usb_identity(&self, identity: UsbIdentity) {
        self.inner.state.lock().usb = Some(identity);
    }

    /// Target handed to the call session manager; the resolved USB identity
    /// wins over the ids the modem reports
    pub fn modem_target(&self) -> ModemTarget {
        let state = self.inner.state.lock();
        let target = ModemTarget::new(self.port_name());
        match &state.usb {
            Some(usb) => ModemTarget {
                serial: usb.serial.clone(),
                ..target.with_usb_ids(&usb.vid, &usb.pid)
            },
            None => target.with_usb_ids(&state.uac.vid, &state.uac.pid),
        }
    }

    /// Latest published identity
    pub fn modem(&self) -> Option<Modem> {
        self.inner.state.lock().modem.clone()
    }

    pub fn iccid(&self) -> Option<Iccid> {
        self.inner.state.lock().modem.as_ref().map(|m| m.iccid.clone())
    }

    pub(crate) fn publish_modem(&self, modem: Modem) {
        self.inner.state.lock().modem = Some(modem);
    }

    pub(crate) fn trigger_poll(&self) {
        let _ = self.inner.poll_trigger.try_send(());
    }

    /// Stop the engine; idempotent
    pub fn stop(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!("[{}] Stopping engine", self.port_name());
        }
        self.inner.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the engine has stopped
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }
}

impl std::fmt::Debug for ModemEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemEngine")
            .field("port_name", &self.inner.port_name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

pub(crate) struct OccupiedGuard<'a> {
    engine: &'a ModemEngine,
}

impl Drop for OccupiedGuard<'_> {
    fn drop(&mut self) {
        self.engine.set_occupied(false);
    }
}

impl EngineInner {
    fn dispatch_urc(&self, line: &str) {
        info!("[{}] URC: {}", self.port_name, line);
        counter!("modem_urc_total").increment(1);

        if line.starts_with("+CMTI:") {
            let _ = self.poll_trigger.try_send(());
        }

        if let Some(notification) = CallNotification::parse(line) {
            let event = self.state.lock().call.apply(notification);
            if let Some(event) = event {
                self.publish_call_event(event);
            }
        }
    }

    fn publish_call_event(&self, event: CallEvent) {
        info!(
            "[{}] Call state {} -> {} ({})",
            self.port_name, event.from, event.to, event.reason
        );
        // No subscribers is fine
        let _ = self.call_events.send(event);
    }
}

enum Flow {
    Continue,
    Stop,
}

struct CommandLoop<T> {
    inner: Arc<EngineInner>,
    writer: WriteHalf<T>,
    commands: mpsc::Receiver<CommandRequest>,
    lines: mpsc::Receiver<ReadEvent>,
}

impl<T: Transport> CommandLoop<T> {
    async fn run(mut self) {
        let inner = Arc::clone(&self.inner);

        loop {
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => break,
                request = self.commands.recv() => {
                    let Some(request) = request else { break };
                    if let Flow::Stop = self.execute(request).await {
                        break;
                    }
                }
                event = self.lines.recv() => match event {
                    Some(Ok(Frame::Line(line))) => {
                        if is_urc(&line) {
                            inner.dispatch_urc(&line);
                        } else {
                            debug!("[{}] Discarding idle line: {}", inner.port_name, line);
                        }
                    }
                    Some(Ok(Frame::Prompt)) => {}
                    Some(Err(e)) => {
                        error!("[{}] Port read failed: {}", inner.port_name, e);
                        break;
                    }
                    None => break,
                },
            }
        }

        inner.cancel.cancel();
        self.commands.close();
        while let Ok(request) = self.commands.try_recv() {
            let _ = request.reply.send(Err(EngineError::Stopped));
        }
        let _ = self.writer.shutdown().await;
        info!("[{}] Engine stopped", inner.port_name);
    }

    async fn execute(&mut self, request: CommandRequest) -> Flow {
        let CommandRequest {
            command,
            timeout,
            silent,
            reply,
        } = request;
        let port = self.inner.port_name.clone();

        if reply.is_closed() {
            debug!("[{}] Skipping abandoned command {}", port, command);
            return Flow::Continue;
        }

        if !silent {
            debug!("[{}] TX: {}", port, command.trim_end_matches(CTRL_Z));
        }
        counter!("modem_commands_total").increment(1);

        if let Err(e) = self.write(&command).await {
            warn!("[{}] Write of {} failed: {}", port, command, e);
            counter!("modem_commands_failed_total").increment(1);
            let _ = reply.send(Err(EngineError::Io(e)));
            return Flow::Continue;
        }

        let result = self.await_response(&command, timeout, silent).await;
        let flow = match &result {
            Ok(_) => Flow::Continue,
            Err(EngineError::Timeout { .. }) => {
                counter!("modem_commands_timeout_total").increment(1);
                Flow::Continue
            }
            Err(e) if e.is_fatal() => {
                counter!("modem_commands_failed_total").increment(1);
                Flow::Stop
            }
            Err(_) => {
                counter!("modem_commands_failed_total").increment(1);
                Flow::Continue
            }
        };
        let _ = reply.send(result);
        flow
    }

    async fn write(&mut self, command: &str) -> io::Result<()> {
        self.writer.write_all(&encode_command(command)).await?;
        self.writer.flush().await
    }

    async fn await_response(
        &mut self,
        command: &str,
        timeout: Duration,
        silent: bool,
    ) -> Result<String, EngineError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let wants_prompt = expects_prompt(command);
        let mut lines: Vec<String> = Vec::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return Err(EngineError::Stopped),
                _ = &mut deadline => {
                    warn!("[{}] Timeout waiting for {}", self.inner.port_name, command);
                    return Err(EngineError::Timeout {
                        command: command.to_string(),
                        timeout,
                    });
                }
                event = self.lines.recv() => event,
            };

            match event {
                Some(Ok(Frame::Prompt)) => {
                    if wants_prompt {
                        lines.push(PROMPT.to_string());
                        return Ok(lines.join("\n"));
                    }
                    debug!("[{}] Ignoring prompt during {}", self.inner.port_name, command);
                }
                Some(Ok(Frame::Line(line))) => {
                    if !silent {
                        debug!("[{}] RX: {}", self.inner.port_name, line);
                    }
                    let kind = classify(&line);
                    if kind == LineKind::Other && is_urc(&line) {
                        self.inner.dispatch_urc(&line);
                    }
                    lines.push(line);
                    match kind {
                        LineKind::Ok => return Ok(lines.join("\n")),
                        LineKind::Error => return Err(EngineError::ModemError(lines.join("\n"))),
                        LineKind::Other => {}
                    }
                }
                Some(Err(e)) => {
                    error!(
                        "[{}] Port read failed during {}: {}",
                        self.inner.port_name, command, e
                    );
                    return Err(EngineError::Io(e));
                }
                None => return Err(EngineError::Stopped),
            }
        }
    }
}
