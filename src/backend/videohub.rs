//! Videohub controller driver.
//!
//! Speaks to a peer implementing the Videohub Ethernet Protocol. The hub
//! pushes its full state on connect, terminated by `END PRELUDE:`, and
//! confirms every write with `ACK`/`NAK` before echoing the change.

use super::{AckMode, ControllerError, RouterConfig, StateEvent, WireCommand};
use crate::matrix::{LockAction, LockState, RouterState};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;
use videohub::{Label, Lock, Route, VideohubCodec, VideohubMessage};

pub(crate) struct VideohubDriver {
    framed: Framed<TcpStream, VideohubCodec>,
}

fn protocol_err(e: impl ToString) -> ControllerError {
    ControllerError::ProtocolError(e.to_string())
}

fn mirror_lock(state: videohub::LockState) -> LockState {
    match state {
        videohub::LockState::Owned => LockState::Owned,
        videohub::LockState::Locked => LockState::Locked,
        videohub::LockState::Unlocked | videohub::LockState::Force => LockState::Unlocked,
    }
}

fn wire_lock(action: LockAction) -> videohub::LockState {
    match action {
        LockAction::Lock => videohub::LockState::Owned,
        LockAction::Unlock => videohub::LockState::Unlocked,
        LockAction::Force => videohub::LockState::Force,
    }
}

impl VideohubDriver {
    pub(crate) async fn connect(
        cfg: &RouterConfig,
    ) -> Result<(Self, RouterState), ControllerError> {
        let socket = TcpStream::connect(cfg.addr())
            .await
            .map_err(|e| ControllerError::UnreachableHost(e.to_string()))?;
        let mut framed = Framed::new(socket, VideohubCodec);

        let mut st = RouterState::default();
        let mut seen_device = false;
        loop {
            let msg = framed
                .next()
                .await
                .ok_or_else(|| protocol_err("connection closed during prelude"))?
                .map_err(protocol_err)?;
            match msg {
                VideohubMessage::Preamble(p) => {
                    debug!(version = %p.version, "hub preamble");
                }
                VideohubMessage::DeviceInfo(di) => {
                    st.inputs = di
                        .video_inputs
                        .ok_or_else(|| protocol_err("device info without video input count"))?;
                    st.outputs = di
                        .video_outputs
                        .ok_or_else(|| protocol_err("device info without video output count"))?;
                    seen_device = true;
                }
                VideohubMessage::InputLabels(labels) => {
                    for l in labels {
                        st.input_labels.insert(l.id, l.name);
                    }
                }
                VideohubMessage::OutputLabels(labels) => {
                    for l in labels {
                        st.output_labels.insert(l.id, l.name);
                    }
                }
                VideohubMessage::VideoOutputRouting(routes) => {
                    for r in routes {
                        st.routing.insert(r.to_output, r.from_input);
                    }
                }
                VideohubMessage::VideoOutputLocks(locks) => {
                    for l in locks {
                        st.output_locks.insert(l.id, mirror_lock(l.state));
                    }
                }
                VideohubMessage::EndPrelude => break,
                _ => {}
            }
        }
        if !seen_device {
            return Err(protocol_err("prelude ended without device info"));
        }
        st.connected = true;
        Ok((VideohubDriver { framed }, st))
    }

    pub(crate) async fn send(&mut self, cmd: &WireCommand) -> Result<AckMode, ControllerError> {
        let msg = match cmd {
            // The hub knows a single level; the level index is dropped.
            WireCommand::SetRoute { output, input, .. } => {
                VideohubMessage::VideoOutputRouting(vec![Route {
                    to_output: *output,
                    from_input: *input,
                }])
            }
            WireCommand::SetInputLabel { index, text } => {
                VideohubMessage::InputLabels(vec![Label {
                    id: *index,
                    name: text.clone(),
                }])
            }
            WireCommand::SetOutputLabel { index, text } => {
                VideohubMessage::OutputLabels(vec![Label {
                    id: *index,
                    name: text.clone(),
                }])
            }
            WireCommand::SetLock { output, action } => {
                VideohubMessage::VideoOutputLocks(vec![Lock {
                    id: *output,
                    state: wire_lock(*action),
                }])
            }
        };
        self.framed.send(msg).await.map_err(protocol_err)?;
        Ok(AckMode::Awaited)
    }

    pub(crate) async fn recv(&mut self) -> Option<Result<Vec<StateEvent>, ControllerError>> {
        let msg = match self.framed.next().await? {
            Ok(m) => m,
            Err(e) => return Some(Err(protocol_err(e))),
        };
        let evs = match msg {
            VideohubMessage::ACK => vec![StateEvent::Ack],
            VideohubMessage::NAK => vec![StateEvent::Nak],
            VideohubMessage::VideoOutputRouting(routes) => vec![StateEvent::Routing(
                routes.iter().map(|r| (r.to_output, r.from_input)).collect(),
            )],
            VideohubMessage::InputLabels(labels) => vec![StateEvent::InputLabels(
                labels.into_iter().map(|l| (l.id, l.name)).collect(),
            )],
            VideohubMessage::OutputLabels(labels) => vec![StateEvent::OutputLabels(
                labels.into_iter().map(|l| (l.id, l.name)).collect(),
            )],
            VideohubMessage::VideoOutputLocks(locks) => vec![StateEvent::Locks(
                locks.iter().map(|l| (l.id, mirror_lock(l.state))).collect(),
            )],
            _ => vec![],
        };
        Some(Ok(evs))
    }
}
