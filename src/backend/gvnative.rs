//! GV Native controller driver.
//!
//! Session-oriented JSON protocol: hello exchange for identity and
//! dimensions, full-status request for the initial mirror, mutations
//! confirmed by echoed tallies.

use super::{AckMode, ControllerError, RouterConfig, StateEvent, WireCommand};
use crate::matrix::{Port, RouterState};
use futures_util::{SinkExt, StreamExt};
use gvnative::{GvMessage, GvNativeCodec, NameTarget};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

pub(crate) struct GvNativeDriver {
    framed: Framed<TcpStream, GvNativeCodec>,
    /// Output and input of the route awaiting its echoed tally.
    expect_route: Option<(u32, u32)>,
    /// Target and index of the name write awaiting its echo.
    expect_name: Option<(NameTarget, u32)>,
}

fn protocol_err(e: impl ToString) -> ControllerError {
    ControllerError::ProtocolError(e.to_string())
}

impl GvNativeDriver {
    pub(crate) async fn connect(
        cfg: &RouterConfig,
    ) -> Result<(Self, RouterState), ControllerError> {
        let socket = TcpStream::connect(cfg.addr())
            .await
            .map_err(|e| ControllerError::UnreachableHost(e.to_string()))?;
        let mut framed = Framed::new(socket, GvNativeCodec);

        framed.send(GvMessage::Hello).await.map_err(protocol_err)?;
        let mut st = RouterState::default();
        loop {
            let msg = next_msg(&mut framed).await?;
            if let GvMessage::HelloReply {
                name,
                inputs,
                outputs,
            } = msg
            {
                debug!(%name, inputs, outputs, "device identified");
                st.inputs = inputs;
                st.outputs = outputs;
                break;
            }
        }

        framed
            .send(GvMessage::FullStatusRequest)
            .await
            .map_err(protocol_err)?;
        let mut have_routing = false;
        let mut have_names = (false, false);
        while !(have_routing && have_names.0 && have_names.1) {
            match next_msg(&mut framed).await? {
                GvMessage::RoutingSnapshot { routes } => {
                    for r in routes {
                        st.routing.insert(r.output, r.input);
                    }
                    have_routing = true;
                }
                GvMessage::NamesSnapshot { target, names } => {
                    let (map, flag) = match target {
                        NameTarget::Source => (&mut st.input_labels, &mut have_names.0),
                        NameTarget::Destination => (&mut st.output_labels, &mut have_names.1),
                    };
                    for n in names {
                        map.insert(n.index, n.name);
                    }
                    *flag = true;
                }
                GvMessage::Error { message } => return Err(protocol_err(message)),
                _ => {}
            }
        }
        st.connected = true;

        Ok((
            GvNativeDriver {
                framed,
                expect_route: None,
                expect_name: None,
            },
            st,
        ))
    }

    pub(crate) async fn send(&mut self, cmd: &WireCommand) -> Result<AckMode, ControllerError> {
        let msg = match cmd {
            WireCommand::SetRoute {
                output,
                input,
                level,
            } => {
                self.expect_route = Some((*output, *input));
                GvMessage::RouteRequest {
                    output: *output,
                    input: *input,
                    level: *level,
                }
            }
            WireCommand::SetInputLabel { index, text } => {
                self.expect_name = Some((NameTarget::Source, *index));
                GvMessage::SetName {
                    target: NameTarget::Source,
                    index: *index,
                    name: text.clone(),
                }
            }
            WireCommand::SetOutputLabel { index, text } => {
                self.expect_name = Some((NameTarget::Destination, *index));
                GvMessage::SetName {
                    target: NameTarget::Destination,
                    index: *index,
                    name: text.clone(),
                }
            }
            // No lock surface on this protocol.
            WireCommand::SetLock { .. } => {
                debug!(?cmd, "unsupported on GV Native, ignored");
                return Ok(AckMode::Immediate);
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
        let mut evs = Vec::new();
        match msg {
            GvMessage::RouteTally { output, input, .. } => {
                evs.push(StateEvent::Routing(vec![(output, input)]));
                if let Some((want_out, want_in)) = self.expect_route {
                    if output == want_out {
                        self.expect_route = None;
                        evs.push(if input == want_in {
                            StateEvent::Ack
                        } else {
                            StateEvent::Nak
                        });
                    }
                }
            }
            GvMessage::RoutingSnapshot { routes } => {
                evs.push(StateEvent::Routing(
                    routes.iter().map(|r| (r.output, r.input)).collect(),
                ));
            }
            GvMessage::NameTally {
                target,
                index,
                name,
            } => {
                let entry = vec![(index as Port, name)];
                evs.push(match target {
                    NameTarget::Source => StateEvent::InputLabels(entry),
                    NameTarget::Destination => StateEvent::OutputLabels(entry),
                });
                if self.expect_name == Some((target, index)) {
                    self.expect_name = None;
                    evs.push(StateEvent::Ack);
                }
            }
            GvMessage::NamesSnapshot { target, names } => {
                let entries: Vec<(Port, String)> =
                    names.into_iter().map(|n| (n.index, n.name)).collect();
                evs.push(match target {
                    NameTarget::Source => StateEvent::InputLabels(entries),
                    NameTarget::Destination => StateEvent::OutputLabels(entries),
                });
            }
            GvMessage::Error { message } => {
                debug!(%message, "device reported error");
                if self.expect_route.take().is_some() || self.expect_name.take().is_some() {
                    evs.push(StateEvent::Nak);
                }
            }
            _ => {}
        }
        Some(Ok(evs))
    }
}

async fn next_msg(
    framed: &mut Framed<TcpStream, GvNativeCodec>,
) -> Result<GvMessage, ControllerError> {
    framed
        .next()
        .await
        .ok_or_else(|| protocol_err("connection closed during handshake"))?
        .map_err(protocol_err)
}
