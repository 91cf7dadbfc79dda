//! SW-P-08 controller driver.
//!
//! The router speaks framed binary; there is no device-info handshake.
//! On connect we request a full tally dump plus both name tables and
//! treat a quiet line after the first dump chunk as end of dump. Matrix
//! dimensions are inferred from what the dump and name tables cover.
//!
//! A crosspoint connect is confirmed by the interlock reply (crosspoint
//! connected) for the same destination; a bare DLE-ACK only confirms
//! receipt and resolves nothing.

use super::{AckMode, ControllerError, RouterConfig, StateEvent, WireCommand};
use crate::matrix::{Port, RouterState};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use swp08::{Swp08Codec, Swp08Message};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

/// Quiet time after the first dump chunk that ends the initial dump.
const DUMP_IDLE: Duration = Duration::from_millis(300);

pub(crate) struct Swp08Driver {
    framed: Framed<TcpStream, Swp08Codec>,
    /// Matrix selector for every message; multi-matrix frames are out of
    /// scope for this controller.
    matrix: u8,
    /// Destination and source of the connect awaiting its interlock reply.
    expect: Option<(u16, u16)>,
}

fn protocol_err(e: impl ToString) -> ControllerError {
    ControllerError::ProtocolError(e.to_string())
}

impl Swp08Driver {
    pub(crate) async fn connect(
        cfg: &RouterConfig,
    ) -> Result<(Self, RouterState), ControllerError> {
        let socket = TcpStream::connect(cfg.addr())
            .await
            .map_err(|e| ControllerError::UnreachableHost(e.to_string()))?;
        let mut framed = Framed::new(socket, Swp08Codec);

        framed
            .send(Swp08Message::TallyDumpRequest {
                matrix: 0,
                level: 0,
            })
            .await
            .map_err(protocol_err)?;
        framed
            .send(Swp08Message::SourceNamesRequest { matrix: 0 })
            .await
            .map_err(protocol_err)?;
        framed
            .send(Swp08Message::DestNamesRequest { matrix: 0 })
            .await
            .map_err(protocol_err)?;

        let mut st = RouterState::default();
        let mut got_dump = false;
        loop {
            match timeout(DUMP_IDLE, framed.next()).await {
                Ok(Some(Ok(msg))) => {
                    if matches!(msg, Swp08Message::TallyDump { .. }) {
                        got_dump = true;
                    }
                    absorb(&mut st, msg);
                }
                Ok(Some(Err(e))) => return Err(protocol_err(e)),
                Ok(None) => return Err(protocol_err("connection closed during dump")),
                // The dump has no terminator; a quiet line means done.
                // Before the first chunk we keep waiting (the outer
                // connect timeout bounds this).
                Err(_) if got_dump => break,
                Err(_) => continue,
            }
        }
        st.connected = true;
        debug!(inputs = st.inputs, outputs = st.outputs, "dump complete");

        Ok((
            Swp08Driver {
                framed,
                matrix: 0,
                expect: None,
            },
            st,
        ))
    }

    pub(crate) async fn send(&mut self, cmd: &WireCommand) -> Result<AckMode, ControllerError> {
        match cmd {
            WireCommand::SetRoute {
                output,
                input,
                level,
            } => {
                let (dest, source) = (*output as u16, *input as u16);
                self.expect = Some((dest, source));
                self.framed
                    .send(Swp08Message::CrosspointConnect {
                        matrix: self.matrix,
                        level: *level,
                        dest,
                        source,
                    })
                    .await
                    .map_err(protocol_err)?;
                Ok(AckMode::Awaited)
            }
            // The protocol subset spoken by our routers has no label
            // writes and no locks; both are best-effort no-ops.
            WireCommand::SetInputLabel { .. }
            | WireCommand::SetOutputLabel { .. }
            | WireCommand::SetLock { .. } => {
                debug!(?cmd, "unsupported on SW-P-08, ignored");
                Ok(AckMode::Immediate)
            }
        }
    }

    pub(crate) async fn recv(&mut self) -> Option<Result<Vec<StateEvent>, ControllerError>> {
        let msg = match self.framed.next().await? {
            Ok(m) => m,
            Err(e) => return Some(Err(protocol_err(e))),
        };
        let mut evs = Vec::new();
        match msg {
            Swp08Message::CrosspointConnected {
                dest, source, ..
            }
            | Swp08Message::CrosspointTally { dest, source, .. } => {
                evs.push(StateEvent::Routing(vec![(dest as Port, source as Port)]));
                if let Some((want_dest, want_source)) = self.expect {
                    if dest == want_dest {
                        self.expect = None;
                        evs.push(if source == want_source {
                            StateEvent::Ack
                        } else {
                            StateEvent::Nak
                        });
                    }
                }
            }
            Swp08Message::TallyDump {
                first_dest,
                sources,
                ..
            } => {
                evs.push(StateEvent::Routing(
                    sources
                        .iter()
                        .enumerate()
                        .map(|(k, s)| (first_dest as Port + k as Port, *s as Port))
                        .collect(),
                ));
            }
            Swp08Message::SourceNames { first, names, .. } => {
                evs.push(StateEvent::InputLabels(indexed_names(first, names)));
            }
            Swp08Message::DestNames { first, names, .. } => {
                evs.push(StateEvent::OutputLabels(indexed_names(first, names)));
            }
            Swp08Message::Nak => {
                // Rejected outright; fail the pending connect if any.
                if self.expect.take().is_some() {
                    evs.push(StateEvent::Nak);
                }
            }
            // Receipt only; completion is the interlock reply.
            Swp08Message::Ack => {}
            _ => {}
        }
        Some(Ok(evs))
    }
}

fn indexed_names(first: u16, names: Vec<String>) -> Vec<(Port, String)> {
    names
        .into_iter()
        .enumerate()
        .map(|(k, n)| (first as Port + k as Port, n))
        .collect()
}

/// Fold a dump-phase message into the nascent mirror, growing the
/// dimensions to cover everything the router mentions.
fn absorb(st: &mut RouterState, msg: Swp08Message) {
    match msg {
        Swp08Message::TallyDump {
            first_dest,
            sources,
            ..
        } => {
            for (k, s) in sources.iter().enumerate() {
                let dest = first_dest as Port + k as Port;
                st.routing.insert(dest, *s as Port);
                st.outputs = st.outputs.max(dest + 1);
                st.inputs = st.inputs.max(*s as Port + 1);
            }
        }
        Swp08Message::CrosspointTally { dest, source, .. } => {
            st.routing.insert(dest as Port, source as Port);
            st.outputs = st.outputs.max(dest as Port + 1);
            st.inputs = st.inputs.max(source as Port + 1);
        }
        Swp08Message::SourceNames { first, names, .. } => {
            st.inputs = st.inputs.max(first as Port + names.len() as Port);
            for (p, n) in indexed_names(first, names) {
                st.input_labels.insert(p, n);
            }
        }
        Swp08Message::DestNames { first, names, .. } => {
            st.outputs = st.outputs.max(first as Port + names.len() as Port);
            for (p, n) in indexed_names(first, names) {
                st.output_labels.insert(p, n);
            }
        }
        _ => {}
    }
}
