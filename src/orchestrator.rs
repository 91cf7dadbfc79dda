//! Single-writer coordinator.
//!
//! Owns the two controller slots, the tie-line engine, the virtual
//! projection and the northbound bridge. All state mutation funnels
//! through one task; controller events arriving in a burst are coalesced
//! into a single rebuild.

use crate::backend::{Controller, ControllerError, ControllerEvent, RouterConfig};
use crate::frontend::{BridgeStatus, VideohubBridge};
use crate::matrix::{Level, LockAction, RouterId, RouterState, VirtualMatrix, VirtualState};
use crate::settings::SalvoRoute;
use crate::tieline::{
    ConfigError, Direction, RouteError, RouteSuccess, TieLine, TieLineConfig, TieLineEngine,
    TieLineState,
};
use futures_core::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("virtual index out of range")]
    InvalidIndex,
    #[error("router {0} is not connected")]
    RouterNotConnected(RouterId),
    #[error("bridge error: {0}")]
    Bridge(String),
    #[error("orchestrator is gone")]
    Closed,
}

/// Events pushed to the UI collaborator.
#[derive(Clone, Debug)]
pub enum AppEvent {
    Router {
        id: RouterId,
        event: ControllerEvent,
    },
    VirtualStateUpdated(Arc<VirtualState>),
    TieLineStateUpdated(Arc<TieLineState>),
}

pub struct Options {
    pub auto_reconnect: bool,
    pub rollback_on_partial_failure: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            auto_reconnect: true,
            rollback_on_partial_failure: false,
        }
    }
}

enum Command {
    ConnectRouter {
        id: RouterId,
        config: RouterConfig,
        resp: oneshot::Sender<Result<(), ApiError>>,
    },
    DisconnectRouter {
        id: RouterId,
        resp: oneshot::Sender<()>,
    },
    GetRouterState {
        id: RouterId,
        resp: oneshot::Sender<Option<RouterState>>,
    },
    GetVirtualState {
        resp: oneshot::Sender<Arc<VirtualState>>,
    },
    SetVirtualRoute {
        output: u32,
        input: u32,
        level: Level,
        resp: oneshot::Sender<Result<RouteSuccess, RouteError>>,
    },
    SetVirtualLock {
        output: u32,
        action: LockAction,
        resp: oneshot::Sender<Result<(), ApiError>>,
    },
    SetInputLabel {
        index: u32,
        text: String,
        resp: oneshot::Sender<Result<(), ApiError>>,
    },
    SetOutputLabel {
        index: u32,
        text: String,
        resp: oneshot::Sender<Result<(), ApiError>>,
    },
    GetTieLineConfig {
        resp: oneshot::Sender<TieLineConfig>,
    },
    SetTieLineConfig {
        config: TieLineConfig,
        resp: oneshot::Sender<Result<(), ApiError>>,
    },
    AddTieLine {
        dir: Direction,
        line: TieLine,
        resp: oneshot::Sender<Result<(), ApiError>>,
    },
    RemoveTieLine {
        dir: Direction,
        index: usize,
        resp: oneshot::Sender<Result<(), ApiError>>,
    },
    GetTieLineState {
        resp: oneshot::Sender<TieLineState>,
    },
    ExecuteSalvo {
        routes: Vec<SalvoRoute>,
        resp: oneshot::Sender<Vec<Result<RouteSuccess, RouteError>>>,
    },
    StartBridge {
        port: u16,
        resp: oneshot::Sender<Result<u16, ApiError>>,
    },
    StopBridge {
        resp: oneshot::Sender<()>,
    },
    GetBridgeStatus {
        resp: oneshot::Sender<BridgeStatus>,
    },
}

/// Cloneable API surface handed to the UI collaborator and the bridge.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<AppEvent>,
    vstate: watch::Receiver<Arc<VirtualState>>,
}

macro_rules! call {
    ($self:expr, $variant:ident { $($field:ident : $value:expr),* $(,)? }) => {{
        let (tx, rx) = oneshot::channel();
        $self
            .tx
            .send(Command::$variant { $($field: $value,)* resp: tx })
            .map_err(|_| ApiError::Closed)?;
        rx.await.map_err(|_| ApiError::Closed)
    }};
}

impl OrchestratorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    /// The upstream events as a [futures_core::Stream]; lagged slots are
    /// silently skipped.
    pub fn event_stream(&self) -> BoxStream<'static, AppEvent> {
        let bs = BroadcastStream::new(self.events.subscribe());
        let simple = bs.filter_map(|r| r.ok());
        futures_util::StreamExt::boxed(simple)
    }

    /// Watch channel carrying the latest virtual snapshot; what the
    /// bridge diffs against.
    pub fn watch_virtual_state(&self) -> watch::Receiver<Arc<VirtualState>> {
        self.vstate.clone()
    }

    pub async fn connect_router(
        &self,
        id: RouterId,
        config: RouterConfig,
    ) -> Result<(), ApiError> {
        call!(self, ConnectRouter { id: id, config: config })?
    }

    pub async fn disconnect_router(&self, id: RouterId) -> Result<(), ApiError> {
        call!(self, DisconnectRouter { id: id })
    }

    pub async fn router_state(&self, id: RouterId) -> Result<Option<RouterState>, ApiError> {
        call!(self, GetRouterState { id: id })
    }

    pub async fn virtual_state(&self) -> Result<Arc<VirtualState>, ApiError> {
        call!(self, GetVirtualState {})
    }

    pub async fn set_virtual_route(
        &self,
        output: u32,
        input: u32,
        level: Level,
    ) -> Result<Result<RouteSuccess, RouteError>, ApiError> {
        call!(
            self,
            SetVirtualRoute {
                output: output,
                input: input,
                level: level,
            }
        )
    }

    pub async fn set_virtual_lock(&self, output: u32, action: LockAction) -> Result<(), ApiError> {
        call!(self, SetVirtualLock { output: output, action: action })?
    }

    pub async fn set_input_label(&self, index: u32, text: String) -> Result<(), ApiError> {
        call!(self, SetInputLabel { index: index, text: text })?
    }

    pub async fn set_output_label(&self, index: u32, text: String) -> Result<(), ApiError> {
        call!(self, SetOutputLabel { index: index, text: text })?
    }

    pub async fn tie_line_config(&self) -> Result<TieLineConfig, ApiError> {
        call!(self, GetTieLineConfig {})
    }

    pub async fn set_tie_line_config(&self, config: TieLineConfig) -> Result<(), ApiError> {
        call!(self, SetTieLineConfig { config: config })?
    }

    pub async fn add_tie_line(&self, dir: Direction, line: TieLine) -> Result<(), ApiError> {
        call!(self, AddTieLine { dir: dir, line: line })?
    }

    pub async fn remove_tie_line(&self, dir: Direction, index: usize) -> Result<(), ApiError> {
        call!(self, RemoveTieLine { dir: dir, index: index })?
    }

    pub async fn tie_line_state(&self) -> Result<TieLineState, ApiError> {
        call!(self, GetTieLineState {})
    }

    pub async fn execute_salvo(
        &self,
        routes: Vec<SalvoRoute>,
    ) -> Result<Vec<Result<RouteSuccess, RouteError>>, ApiError> {
        call!(self, ExecuteSalvo { routes: routes })
    }

    /// Start the northbound bridge; returns the bound port.
    pub async fn start_bridge(&self, port: u16) -> Result<u16, ApiError> {
        call!(self, StartBridge { port: port })?
    }

    pub async fn stop_bridge(&self) -> Result<(), ApiError> {
        call!(self, StopBridge {})
    }

    pub async fn bridge_status(&self) -> Result<BridgeStatus, ApiError> {
        call!(self, GetBridgeStatus {})
    }
}

pub struct Orchestrator;

impl Orchestrator {
    pub fn spawn(options: Options) -> OrchestratorHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let (vstate_tx, vstate_rx) = watch::channel(Arc::new(VirtualState::default()));

        let handle = OrchestratorHandle {
            tx: cmd_tx,
            events: events.clone(),
            vstate: vstate_rx,
        };

        let mut engine =
            TieLineEngine::new(TieLineConfig::default()).expect("empty config is valid");
        engine.rollback_on_partial_failure = options.rollback_on_partial_failure;

        let core = Core {
            slot_a: None,
            slot_b: None,
            engine,
            matrix: VirtualMatrix::default(),
            vstate_tx,
            events,
            ctrl_tx,
            bridge: None,
            auto_reconnect: options.auto_reconnect,
            // Weak: a self-referencing strong sender would keep the core
            // alive after every real handle is gone.
            cmd_tx: handle.tx.downgrade(),
            last_tie: Arc::new(TieLineState::default()),
            need_reconstruct: false,
        };
        tokio::spawn(core.run(cmd_rx, ctrl_rx));

        handle
    }
}

struct Core {
    slot_a: Option<Controller>,
    slot_b: Option<Controller>,
    engine: TieLineEngine,
    matrix: VirtualMatrix,
    vstate_tx: watch::Sender<Arc<VirtualState>>,
    events: broadcast::Sender<AppEvent>,
    ctrl_tx: mpsc::UnboundedSender<(RouterId, ControllerEvent)>,
    bridge: Option<VideohubBridge>,
    auto_reconnect: bool,
    cmd_tx: mpsc::WeakUnboundedSender<Command>,
    last_tie: Arc<TieLineState>,
    need_reconstruct: bool,
}

impl Core {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut ctrl_rx: mpsc::UnboundedReceiver<(RouterId, ControllerEvent)>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // All handles gone; nothing can reach us anymore.
                    None => break,
                },
                Some((id, ev)) = ctrl_rx.recv() => {
                    // Coalesce whatever else is already queued into one
                    // rebuild.
                    self.note_router_event(id, ev);
                    while let Ok((id, ev)) = ctrl_rx.try_recv() {
                        self.note_router_event(id, ev);
                    }
                    self.rebuild().await;
                }
            }
        }
        if let Some(bridge) = self.bridge.take() {
            bridge.stop();
        }
        info!("orchestrator stopped");
    }

    fn slot(&self, id: RouterId) -> &Option<Controller> {
        match id {
            RouterId::A => &self.slot_a,
            RouterId::B => &self.slot_b,
        }
    }

    fn slot_mut(&mut self, id: RouterId) -> &mut Option<Controller> {
        match id {
            RouterId::A => &mut self.slot_a,
            RouterId::B => &mut self.slot_b,
        }
    }

    fn note_router_event(&mut self, id: RouterId, event: ControllerEvent) {
        if matches!(event, ControllerEvent::Connected) {
            // A fresh full dump is in the mirror; engine state must be
            // rebuilt from what the routers actually show.
            self.need_reconstruct = true;
        }
        let _ = self.events.send(AppEvent::Router { id, event });
    }

    async fn states(&self) -> (RouterState, RouterState) {
        let a = match &self.slot_a {
            Some(c) => c.state().await,
            None => RouterState::default(),
        };
        let b = match &self.slot_b {
            Some(c) => c.state().await,
            None => RouterState::default(),
        };
        (a, b)
    }

    /// Re-derive everything downstream of the mirrors: reconstruction if
    /// pending, projection tables, published snapshot.
    async fn rebuild(&mut self) {
        let (sa, sb) = self.states().await;

        if self.need_reconstruct && sa.connected && sb.connected {
            self.engine.reconstruct(&sa.routing, &sb.routing);
            self.need_reconstruct = false;
            self.publish_tie_state();
        }

        self.matrix = VirtualMatrix::build(&sa, &sb, self.engine.config());
        let vs = Arc::new(self.matrix.project(&sa, &sb, self.engine.state()));
        let changed = *self.vstate_tx.borrow() != vs;
        if changed {
            self.vstate_tx.send_replace(Arc::clone(&vs));
            let _ = self.events.send(AppEvent::VirtualStateUpdated(vs));
        }
    }

    fn publish_tie_state(&mut self) {
        if self.last_tie.as_ref() != self.engine.state() {
            self.last_tie = Arc::new(self.engine.state().clone());
            let _ = self
                .events
                .send(AppEvent::TieLineStateUpdated(Arc::clone(&self.last_tie)));
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::ConnectRouter { id, config, resp } => {
                let _ = resp.send(self.connect_router(id, config).await);
            }
            Command::DisconnectRouter { id, resp } => {
                if let Some(ctrl) = self.slot_mut(id).take() {
                    ctrl.disconnect();
                    info!(router = %id, "controller removed");
                }
                self.rebuild().await;
                let _ = resp.send(());
            }
            Command::GetRouterState { id, resp } => {
                let st = match self.slot(id) {
                    Some(c) => Some(c.state().await),
                    None => None,
                };
                let _ = resp.send(st);
            }
            Command::GetVirtualState { resp } => {
                let _ = resp.send(self.vstate_tx.borrow().clone());
            }
            Command::SetVirtualRoute {
                output,
                input,
                level,
                resp,
            } => {
                let result = self
                    .engine
                    .execute_virtual_route(
                        &self.matrix,
                        self.slot_a.as_ref(),
                        self.slot_b.as_ref(),
                        output,
                        input,
                        level,
                    )
                    .await;
                self.publish_tie_state();
                self.rebuild().await;
                let _ = resp.send(result);
            }
            Command::SetVirtualLock {
                output,
                action,
                resp,
            } => {
                let _ = resp.send(self.forward_lock(output, action).await);
            }
            Command::SetInputLabel { index, text, resp } => {
                let result = match self.matrix.resolve_input(index) {
                    Some((id, port)) => match self.slot(id) {
                        Some(ctrl) => ctrl
                            .set_input_label(port, &text)
                            .await
                            .map_err(ApiError::from),
                        None => Err(ApiError::RouterNotConnected(id)),
                    },
                    None => Err(ApiError::InvalidIndex),
                };
                let _ = resp.send(result);
            }
            Command::SetOutputLabel { index, text, resp } => {
                let result = match self.matrix.resolve_output(index) {
                    Some((id, port)) => match self.slot(id) {
                        Some(ctrl) => ctrl
                            .set_output_label(port, &text)
                            .await
                            .map_err(ApiError::from),
                        None => Err(ApiError::RouterNotConnected(id)),
                    },
                    None => Err(ApiError::InvalidIndex),
                };
                let _ = resp.send(result);
            }
            Command::GetTieLineConfig { resp } => {
                let _ = resp.send(self.engine.config().clone());
            }
            Command::SetTieLineConfig { config, resp } => {
                let _ = resp.send(self.apply_tie_config(config).await);
            }
            Command::AddTieLine { dir, line, resp } => {
                let mut config = self.engine.config().clone();
                match dir {
                    Direction::AToB => config.a_to_b.push(line),
                    Direction::BToA => config.b_to_a.push(line),
                }
                let _ = resp.send(self.apply_tie_config(config).await);
            }
            Command::RemoveTieLine { dir, index, resp } => {
                let mut config = self.engine.config().clone();
                let lines = match dir {
                    Direction::AToB => &mut config.a_to_b,
                    Direction::BToA => &mut config.b_to_a,
                };
                let result = if index < lines.len() {
                    lines.remove(index);
                    self.apply_tie_config(config).await
                } else {
                    Err(ApiError::InvalidIndex)
                };
                let _ = resp.send(result);
            }
            Command::GetTieLineState { resp } => {
                let _ = resp.send(self.engine.state().clone());
            }
            Command::ExecuteSalvo { routes, resp } => {
                let mut results = Vec::with_capacity(routes.len());
                for r in routes {
                    let result = self
                        .engine
                        .execute_virtual_route(
                            &self.matrix,
                            self.slot_a.as_ref(),
                            self.slot_b.as_ref(),
                            r.output,
                            r.input,
                            r.level,
                        )
                        .await;
                    results.push(result);
                }
                self.publish_tie_state();
                self.rebuild().await;
                let _ = resp.send(results);
            }
            Command::StartBridge { port, resp } => {
                if let Some(old) = self.bridge.take() {
                    old.stop();
                }
                let Some(tx) = self.cmd_tx.upgrade() else {
                    let _ = resp.send(Err(ApiError::Closed));
                    return;
                };
                let handle = OrchestratorHandle {
                    tx,
                    events: self.events.clone(),
                    vstate: self.vstate_tx.subscribe(),
                };
                let result = VideohubBridge::start(handle, port)
                    .await
                    .map_err(|e| ApiError::Bridge(e.to_string()));
                let _ = resp.send(result.map(|bridge| {
                    let port = bridge.port();
                    info!(port, "bridge started");
                    self.bridge = Some(bridge);
                    port
                }));
            }
            Command::StopBridge { resp } => {
                if let Some(bridge) = self.bridge.take() {
                    bridge.stop();
                    info!("bridge stopped");
                }
                let _ = resp.send(());
            }
            Command::GetBridgeStatus { resp } => {
                let status = match &self.bridge {
                    Some(b) => b.status(),
                    None => BridgeStatus::default(),
                };
                let _ = resp.send(status);
            }
        }
    }

    async fn connect_router(&mut self, id: RouterId, config: RouterConfig) -> Result<(), ApiError> {
        if let Some(old) = self.slot_mut(id).take() {
            old.disconnect();
        }
        let ctrl = Controller::connect(config, self.auto_reconnect).await?;

        // Forward controller events into the coalescing loop.
        let mut rx = ctrl.subscribe();
        let tx = self.ctrl_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        if tx.send((id, ev)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(router = %id, missed, "event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *self.slot_mut(id) = Some(ctrl);
        self.note_router_event(id, ControllerEvent::Connected);
        self.rebuild().await;
        Ok(())
    }

    async fn forward_lock(&mut self, output: u32, action: LockAction) -> Result<(), ApiError> {
        let (id, port) = self
            .matrix
            .resolve_output(output)
            .ok_or(ApiError::InvalidIndex)?;
        match self.slot(id) {
            Some(ctrl) => ctrl.set_lock(port, action).await.map_err(ApiError::from),
            None => Err(ApiError::RouterNotConnected(id)),
        }
    }

    async fn apply_tie_config(&mut self, config: TieLineConfig) -> Result<(), ApiError> {
        self.engine.update_config(config)?;
        let (sa, sb) = self.states().await;
        if sa.connected && sb.connected {
            self.engine.reconstruct(&sa.routing, &sb.routing);
        }
        self.publish_tie_state();
        self.rebuild().await;
        Ok(())
    }
}
