//! Scripted Videohub peer for loopback tests.
//!
//! Serves the real wire protocol from an in-memory matrix so controller,
//! bridge and orchestrator tests can run against actual sockets.

use super::{Protocol, RouterConfig};
use crate::matrix::{LockState, Port, RouterState};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_util::codec::Framed;
use videohub::{DeviceInfo, Label, Lock, Preamble, Present, Route, VideohubCodec, VideohubMessage};

pub(crate) struct MockHub {
    addr: SocketAddr,
    state: Arc<Mutex<RouterState>>,
    // Echoes and injected tallies go to every connected client; a `None`
    // tells connections to hang up.
    fanout: broadcast::Sender<Option<VideohubMessage>>,
}

impl MockHub {
    pub(crate) async fn spawn(inputs: u32, outputs: u32) -> MockHub {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(RouterState::with_size(inputs, outputs)));
        let (fanout, _) = broadcast::channel(64);

        let accept_state = Arc::clone(&state);
        let accept_fanout = fanout.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve_client(
                    socket,
                    Arc::clone(&accept_state),
                    accept_fanout.clone(),
                ));
            }
        });

        MockHub { addr, state, fanout }
    }

    pub(crate) fn config(&self) -> RouterConfig {
        RouterConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            protocol: Protocol::Videohub,
            levels: 1,
        }
    }

    pub(crate) async fn routing(&self) -> std::collections::BTreeMap<Port, Port> {
        self.state.lock().await.routing.clone()
    }

    pub(crate) async fn input_label(&self, port: Port) -> Option<String> {
        self.state.lock().await.input_labels.get(&port).cloned()
    }

    pub(crate) async fn set_input_label(&self, port: Port, text: &str) {
        self.state
            .lock()
            .await
            .input_labels
            .insert(port, text.to_string());
    }

    /// Route made "by someone else": updates hub state and tallies out.
    pub(crate) async fn push_route(&self, output: Port, input: Port) {
        self.state.lock().await.routing.insert(output, input);
        let _ = self.fanout.send(Some(VideohubMessage::VideoOutputRouting(vec![Route {
            to_output: output,
            from_input: input,
        }])));
    }

    /// Hang up every connection; the listener keeps accepting new ones.
    pub(crate) async fn drop_connections(&self) {
        let _ = self.fanout.send(None);
    }
}

async fn serve_client(
    socket: TcpStream,
    state: Arc<Mutex<RouterState>>,
    fanout: broadcast::Sender<Option<VideohubMessage>>,
) {
    let mut framed = Framed::new(socket, VideohubCodec);
    let mut fanout_rx = fanout.subscribe();

    // Prelude: the full state dump.
    {
        let st = state.lock().await;
        let dump = [
            VideohubMessage::Preamble(Preamble {
                version: "2.8".into(),
            }),
            VideohubMessage::DeviceInfo(DeviceInfo {
                present: Some(Present::Yes),
                model_name: Some("Mock Videohub".into()),
                video_inputs: Some(st.inputs),
                video_outputs: Some(st.outputs),
                ..Default::default()
            }),
            VideohubMessage::InputLabels(
                (0..st.inputs)
                    .map(|i| Label {
                        id: i,
                        name: st.input_label(i),
                    })
                    .collect(),
            ),
            VideohubMessage::OutputLabels(
                (0..st.outputs)
                    .map(|o| Label {
                        id: o,
                        name: st.output_label(o),
                    })
                    .collect(),
            ),
            VideohubMessage::VideoOutputLocks(
                (0..st.outputs)
                    .map(|o| Lock {
                        id: o,
                        state: wire_lock(st.output_lock(o)),
                    })
                    .collect(),
            ),
            VideohubMessage::VideoOutputRouting(
                st.routing
                    .iter()
                    .map(|(o, i)| Route {
                        to_output: *o,
                        from_input: *i,
                    })
                    .collect(),
            ),
            VideohubMessage::EndPrelude,
        ];
        drop(st);
        for msg in dump {
            if framed.send(msg).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            request = framed.next() => {
                let Some(Ok(msg)) = request else { break };
                let replies = handle_request(msg, &state, &fanout).await;
                for r in replies {
                    if framed.send(r).await.is_err() {
                        return;
                    }
                }
            }
            echo = fanout_rx.recv() => match echo {
                Ok(Some(msg)) => {
                    if framed.send(msg).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            },
        }
    }
}

fn wire_lock(state: LockState) -> videohub::LockState {
    match state {
        LockState::Owned => videohub::LockState::Owned,
        LockState::Locked => videohub::LockState::Locked,
        LockState::Unlocked => videohub::LockState::Unlocked,
    }
}

async fn handle_request(
    msg: VideohubMessage,
    state: &Arc<Mutex<RouterState>>,
    fanout: &broadcast::Sender<Option<VideohubMessage>>,
) -> Vec<VideohubMessage> {
    let mut st = state.lock().await;
    match msg {
        VideohubMessage::Ping => vec![VideohubMessage::ACK],

        VideohubMessage::VideoOutputRouting(routes) if routes.is_empty() => {
            vec![VideohubMessage::VideoOutputRouting(
                st.routing
                    .iter()
                    .map(|(o, i)| Route {
                        to_output: *o,
                        from_input: *i,
                    })
                    .collect(),
            )]
        }
        VideohubMessage::VideoOutputRouting(routes) => {
            if routes
                .iter()
                .any(|r| r.to_output >= st.outputs || r.from_input >= st.inputs)
            {
                return vec![VideohubMessage::NAK];
            }
            for r in &routes {
                st.routing.insert(r.to_output, r.from_input);
            }
            let _ = fanout.send(Some(VideohubMessage::VideoOutputRouting(routes)));
            vec![VideohubMessage::ACK]
        }

        VideohubMessage::InputLabels(labels) if labels.is_empty() => {
            vec![VideohubMessage::InputLabels(
                (0..st.inputs)
                    .map(|i| Label {
                        id: i,
                        name: st.input_label(i),
                    })
                    .collect(),
            )]
        }
        VideohubMessage::InputLabels(labels) => {
            if labels.iter().any(|l| l.id >= st.inputs) {
                return vec![VideohubMessage::NAK];
            }
            for l in &labels {
                st.input_labels.insert(l.id, l.name.clone());
            }
            let _ = fanout.send(Some(VideohubMessage::InputLabels(labels)));
            vec![VideohubMessage::ACK]
        }

        VideohubMessage::OutputLabels(labels) if labels.is_empty() => {
            vec![VideohubMessage::OutputLabels(
                (0..st.outputs)
                    .map(|o| Label {
                        id: o,
                        name: st.output_label(o),
                    })
                    .collect(),
            )]
        }
        VideohubMessage::OutputLabels(labels) => {
            if labels.iter().any(|l| l.id >= st.outputs) {
                return vec![VideohubMessage::NAK];
            }
            for l in &labels {
                st.output_labels.insert(l.id, l.name.clone());
            }
            let _ = fanout.send(Some(VideohubMessage::OutputLabels(labels)));
            vec![VideohubMessage::ACK]
        }

        VideohubMessage::VideoOutputLocks(locks) => {
            if locks.iter().any(|l| l.id >= st.outputs) {
                return vec![VideohubMessage::NAK];
            }
            let mut echoed = Vec::new();
            for l in &locks {
                let applied = match l.state {
                    videohub::LockState::Owned => LockState::Owned,
                    videohub::LockState::Locked => LockState::Locked,
                    videohub::LockState::Unlocked | videohub::LockState::Force => {
                        LockState::Unlocked
                    }
                };
                st.output_locks.insert(l.id, applied);
                echoed.push(Lock {
                    id: l.id,
                    state: wire_lock(applied),
                });
            }
            let _ = fanout.send(Some(VideohubMessage::VideoOutputLocks(echoed)));
            vec![VideohubMessage::ACK]
        }

        _ => vec![VideohubMessage::NAK],
    }
}
