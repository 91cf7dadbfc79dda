//! Router controllers.
//!
//! One [Controller] per physical router: a persistent TCP connection
//! behind a protocol driver, a live state mirror, a FIFO write queue
//! with a single in-flight request, and a reconnect loop.

mod gvnative;
mod swp08;
#[cfg(test)]
pub(crate) mod testsupport;
mod videohub;

use crate::matrix::{Level, LockAction, LockState, Port, RouterState};
use crate::tieline::PhysicalRouter;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Per-request and connect timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ControllerError {
    #[error("host unreachable: {0}")]
    UnreachableHost(String),
    #[error("request timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("not connected")]
    NotConnected,
    #[error("request rejected by router")]
    Rejected,
    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),
}

/// The wire protocol a controller speaks. Each connection speaks exactly
/// one; there is no translation between them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Videohub,
    Swp08,
    GvNative,
}

impl Protocol {
    pub fn from_name(name: &str) -> Result<Protocol, ControllerError> {
        match name.to_ascii_lowercase().as_str() {
            "videohub" => Ok(Protocol::Videohub),
            "swp08" | "sw-p-08" => Ok(Protocol::Swp08),
            "gvnative" | "gv-native" => Ok(Protocol::GvNative),
            other => Err(ControllerError::UnsupportedProtocol(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Videohub => "videohub",
            Protocol::Swp08 => "swp08",
            Protocol::GvNative => "gvnative",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Videohub => 9990,
            Protocol::Swp08 => 8910,
            Protocol::GvNative => 12345,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection parameters for one router.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Breakaway level count, passed through to protocols that care.
    #[serde(default = "default_levels")]
    pub levels: u8,
}

fn default_levels() -> u8 {
    1
}

impl RouterConfig {
    pub fn addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

/// Events emitted by a controller. Consumed by the orchestrator and
/// forwarded upstream; any number of subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControllerEvent {
    Connected,
    Disconnected,
    Reconnecting(u32),
    RoutingChanged(Vec<(Port, Port)>),
    InputLabelsChanged,
    OutputLabelsChanged,
    LocksChanged,
    StateUpdated,
    Error(String),
}

/// A state-mirror mutation request, protocol-agnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireCommand {
    SetRoute {
        output: Port,
        input: Port,
        level: Level,
    },
    SetInputLabel {
        index: Port,
        text: String,
    },
    SetOutputLabel {
        index: Port,
        text: String,
    },
    SetLock {
        output: Port,
        action: LockAction,
    },
}

/// What a driver decoded from the wire, normalized across protocols.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum StateEvent {
    Routing(Vec<(Port, Port)>),
    InputLabels(Vec<(Port, String)>),
    OutputLabels(Vec<(Port, String)>),
    Locks(Vec<(Port, LockState)>),
    /// The pending request (if any) completed successfully.
    Ack,
    /// The pending request (if any) was rejected.
    Nak,
}

/// Whether a sent command will be confirmed by the peer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum AckMode {
    /// Resolve the request when the protocol's confirmation arrives.
    Awaited,
    /// Best-effort on this protocol; resolve immediately.
    Immediate,
}

/// Protocol dispatch. Every driver owns a framed TCP stream and maps
/// between [WireCommand]/[StateEvent] and its own message set.
pub(crate) enum Driver {
    Videohub(videohub::VideohubDriver),
    Swp08(swp08::Swp08Driver),
    GvNative(gvnative::GvNativeDriver),
}

impl Driver {
    /// Dial and perform the protocol handshake, returning the fully
    /// populated initial state mirror.
    pub(crate) async fn connect(cfg: &RouterConfig) -> Result<(Driver, RouterState), ControllerError> {
        match cfg.protocol {
            Protocol::Videohub => {
                let (d, st) = videohub::VideohubDriver::connect(cfg).await?;
                Ok((Driver::Videohub(d), st))
            }
            Protocol::Swp08 => {
                let (d, st) = swp08::Swp08Driver::connect(cfg).await?;
                Ok((Driver::Swp08(d), st))
            }
            Protocol::GvNative => {
                let (d, st) = gvnative::GvNativeDriver::connect(cfg).await?;
                Ok((Driver::GvNative(d), st))
            }
        }
    }

    pub(crate) async fn send(&mut self, cmd: &WireCommand) -> Result<AckMode, ControllerError> {
        match self {
            Driver::Videohub(d) => d.send(cmd).await,
            Driver::Swp08(d) => d.send(cmd).await,
            Driver::GvNative(d) => d.send(cmd).await,
        }
    }

    /// Next batch of decoded events. `None` means the peer closed.
    pub(crate) async fn recv(&mut self) -> Option<Result<Vec<StateEvent>, ControllerError>> {
        match self {
            Driver::Videohub(d) => d.recv().await,
            Driver::Swp08(d) => d.recv().await,
            Driver::GvNative(d) => d.recv().await,
        }
    }
}

enum LoopCmd {
    Request {
        cmd: WireCommand,
        resp: oneshot::Sender<Result<(), ControllerError>>,
    },
    Shutdown,
}

type PendingResp = oneshot::Sender<Result<(), ControllerError>>;

struct Pending {
    resp: PendingResp,
    deadline: Instant,
}

/// Handle to one router's connection. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Controller {
    cmd_tx: mpsc::UnboundedSender<LoopCmd>,
    state: Arc<RwLock<RouterState>>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<ControllerEvent>,
}

impl Controller {
    /// Dial, handshake, populate the mirror and spawn the session loop.
    /// The initial `connected` notification is left to the caller; the
    /// loop itself only announces re-connects.
    #[tracing::instrument(skip(config), fields(protocol = %config.protocol, host = %config.host))]
    pub async fn connect(
        config: RouterConfig,
        auto_reconnect: bool,
    ) -> Result<Controller, ControllerError> {
        info!("connecting to router");
        let (driver, initial) = timeout(REQUEST_TIMEOUT, Driver::connect(&config))
            .await
            .map_err(|_| ControllerError::Timeout)??;
        info!(
            inputs = initial.inputs,
            outputs = initial.outputs,
            "router state mirrored"
        );

        let state = Arc::new(RwLock::new(initial));
        let connected = Arc::new(AtomicBool::new(true));
        let (events, _) = broadcast::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_loop(
            driver,
            config,
            auto_reconnect,
            Arc::clone(&state),
            Arc::clone(&connected),
            events.clone(),
            cmd_rx,
        ));

        Ok(Controller {
            cmd_tx,
            state,
            connected,
            events,
        })
    }

    /// Socket up *and* the initial dump has been mirrored.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of the state mirror.
    pub async fn state(&self) -> RouterState {
        self.state.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Graceful close. The loop stops; queued requests fail.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(LoopCmd::Shutdown);
    }

    pub async fn set_route(
        &self,
        output: Port,
        input: Port,
        level: Level,
    ) -> Result<(), ControllerError> {
        self.request(WireCommand::SetRoute {
            output,
            input,
            level,
        })
        .await
    }

    pub async fn set_input_label(&self, index: Port, text: &str) -> Result<(), ControllerError> {
        self.request(WireCommand::SetInputLabel {
            index,
            text: text.to_string(),
        })
        .await
    }

    pub async fn set_output_label(&self, index: Port, text: &str) -> Result<(), ControllerError> {
        self.request(WireCommand::SetOutputLabel {
            index,
            text: text.to_string(),
        })
        .await
    }

    pub async fn set_lock(&self, output: Port, action: LockAction) -> Result<(), ControllerError> {
        self.request(WireCommand::SetLock { output, action }).await
    }

    async fn request(&self, cmd: WireCommand) -> Result<(), ControllerError> {
        if !self.is_connected() {
            return Err(ControllerError::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(LoopCmd::Request { cmd, resp: tx })
            .map_err(|_| ControllerError::NotConnected)?;
        rx.await.map_err(|_| ControllerError::NotConnected)?
    }
}

impl PhysicalRouter for Controller {
    fn is_connected(&self) -> bool {
        Controller::is_connected(self)
    }

    async fn set_route(
        &self,
        output: Port,
        input: Port,
        level: Level,
    ) -> Result<(), ControllerError> {
        Controller::set_route(self, output, input, level).await
    }
}

fn reconnect_backoff() -> ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(1))
        .with_randomization_factor(0.2)
        .with_multiplier(2.0)
        .with_max_interval(Duration::from_secs(30))
        .with_max_elapsed_time(None)
        .build()
}

async fn run_loop(
    mut driver: Driver,
    config: RouterConfig,
    auto_reconnect: bool,
    state: Arc<RwLock<RouterState>>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<ControllerEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<LoopCmd>,
) {
    let mut first_session = true;
    'sessions: loop {
        if !first_session {
            let _ = events.send(ControllerEvent::Connected);
        }
        first_session = false;

        let shutdown = session(&mut driver, &state, &events, &mut cmd_rx).await;

        connected.store(false, Ordering::SeqCst);
        state.write().await.connected = false;
        let _ = events.send(ControllerEvent::Disconnected);

        if shutdown || !auto_reconnect {
            info!("controller loop stopping");
            break;
        }

        // Reconnect with exponential backoff. Queued writes were already
        // failed; nothing is replayed. A fresh handshake re-mirrors the
        // full state.
        let mut backoff = reconnect_backoff();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let _ = events.send(ControllerEvent::Reconnecting(attempt));
            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| Duration::from_secs(30));
            debug!(attempt, ?delay, "scheduling reconnect");
            if wait_rejecting_requests(delay, &mut cmd_rx).await {
                break 'sessions;
            }
            match timeout(REQUEST_TIMEOUT, Driver::connect(&config)).await {
                Ok(Ok((d, initial))) => {
                    info!(attempt, "reconnected");
                    driver = d;
                    *state.write().await = initial;
                    connected.store(true, Ordering::SeqCst);
                    continue 'sessions;
                }
                Ok(Err(e)) => {
                    debug!(attempt, error = %e, "reconnect attempt failed");
                }
                Err(_) => {
                    debug!(attempt, "reconnect attempt timed out");
                }
            }
        }
    }
}

/// One connected session. Returns true when shutdown was requested,
/// false when the socket went away.
async fn session(
    driver: &mut Driver,
    state: &Arc<RwLock<RouterState>>,
    events: &broadcast::Sender<ControllerEvent>,
    cmd_rx: &mut mpsc::UnboundedReceiver<LoopCmd>,
) -> bool {
    let mut queue: VecDeque<(WireCommand, PendingResp)> = VecDeque::new();
    let mut in_flight: Option<Pending> = None;

    let shutdown = loop {
        let deadline = in_flight
            .as_ref()
            .map(|p| p.deadline)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(LoopCmd::Request { cmd, resp }) => {
                    queue.push_back((cmd, resp));
                    if !pump(driver, &mut queue, &mut in_flight).await {
                        break false;
                    }
                }
                Some(LoopCmd::Shutdown) | None => break true,
            },

            incoming = driver.recv() => match incoming {
                Some(Ok(evs)) => {
                    apply_events(evs, state, events, &mut in_flight).await;
                    if !pump(driver, &mut queue, &mut in_flight).await {
                        break false;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "dropping connection");
                    let _ = events.send(ControllerEvent::Error(e.to_string()));
                    break false;
                }
                None => {
                    info!("peer closed connection");
                    break false;
                }
            },

            // The single in-flight request timed out; the connection
            // itself stays up.
            _ = sleep_until(deadline), if in_flight.is_some() => {
                if let Some(p) = in_flight.take() {
                    let _ = p.resp.send(Err(ControllerError::Timeout));
                }
                let _ = events.send(ControllerEvent::Error("request timed out".into()));
                if !pump(driver, &mut queue, &mut in_flight).await {
                    break false;
                }
            }
        }
    };

    // Whatever is still queued or in flight dies with the session.
    if let Some(p) = in_flight.take() {
        let _ = p.resp.send(Err(ControllerError::Timeout));
    }
    for (_, resp) in queue.drain(..) {
        let _ = resp.send(Err(ControllerError::Timeout));
    }
    shutdown
}

/// Keep at most one request in flight; start the next queued write when
/// the slot is free. Returns false when the socket broke mid-send.
async fn pump(
    driver: &mut Driver,
    queue: &mut VecDeque<(WireCommand, PendingResp)>,
    in_flight: &mut Option<Pending>,
) -> bool {
    while in_flight.is_none() {
        let Some((cmd, resp)) = queue.pop_front() else {
            return true;
        };
        match driver.send(&cmd).await {
            Ok(AckMode::Awaited) => {
                *in_flight = Some(Pending {
                    resp,
                    deadline: Instant::now() + REQUEST_TIMEOUT,
                });
            }
            Ok(AckMode::Immediate) => {
                let _ = resp.send(Ok(()));
            }
            Err(e) => {
                let _ = resp.send(Err(e));
                return false;
            }
        }
    }
    true
}

async fn apply_events(
    evs: Vec<StateEvent>,
    state: &Arc<RwLock<RouterState>>,
    events: &broadcast::Sender<ControllerEvent>,
    in_flight: &mut Option<Pending>,
) {
    for ev in evs {
        match ev {
            StateEvent::Ack => {
                if let Some(p) = in_flight.take() {
                    let _ = p.resp.send(Ok(()));
                }
            }
            StateEvent::Nak => {
                if let Some(p) = in_flight.take() {
                    let _ = p.resp.send(Err(ControllerError::Rejected));
                }
            }
            StateEvent::Routing(routes) => {
                let mut st = state.write().await;
                for (output, input) in &routes {
                    st.routing.insert(*output, *input);
                }
                drop(st);
                let _ = events.send(ControllerEvent::RoutingChanged(routes));
                let _ = events.send(ControllerEvent::StateUpdated);
            }
            StateEvent::InputLabels(labels) => {
                let mut st = state.write().await;
                for (port, text) in labels {
                    st.input_labels.insert(port, text);
                }
                drop(st);
                let _ = events.send(ControllerEvent::InputLabelsChanged);
                let _ = events.send(ControllerEvent::StateUpdated);
            }
            StateEvent::OutputLabels(labels) => {
                let mut st = state.write().await;
                for (port, text) in labels {
                    st.output_labels.insert(port, text);
                }
                drop(st);
                let _ = events.send(ControllerEvent::OutputLabelsChanged);
                let _ = events.send(ControllerEvent::StateUpdated);
            }
            StateEvent::Locks(locks) => {
                let mut st = state.write().await;
                for (port, lock) in locks {
                    st.output_locks.insert(port, lock);
                }
                drop(st);
                let _ = events.send(ControllerEvent::LocksChanged);
                let _ = events.send(ControllerEvent::StateUpdated);
            }
        }
    }
}

/// Sleep for `delay`, failing any request that arrives meanwhile.
/// Returns true when shutdown was requested.
async fn wait_rejecting_requests(
    delay: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<LoopCmd>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = cmd_rx.recv() => match cmd {
                Some(LoopCmd::Request { resp, .. }) => {
                    let _ = resp.send(Err(ControllerError::NotConnected));
                }
                Some(LoopCmd::Shutdown) | None => return true,
            },
        }
    }
}
