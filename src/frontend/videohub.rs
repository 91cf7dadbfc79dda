//! Northbound Videohub bridge.
//!
//! Re-exposes the virtual matrix over the Videohub Ethernet Protocol so
//! third-party panels can drive it. Each client gets the full dump on
//! connect and row-level diffs afterwards; lock ownership is tracked per
//! TCP session on top of the physical routers' locks.

use crate::matrix::{LockAction, LockState, VirtualState};
use crate::orchestrator::OrchestratorHandle;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, error, info};
use videohub::{DeviceInfo, Label, Lock, Preamble, Present, Route, VideohubCodec, VideohubMessage};

/// Session identifier for lock ownership.
type SessionId = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub running: bool,
    pub port: u16,
    pub clients: usize,
}

struct BridgeShared {
    /// Which session, if any, holds each virtual output.
    owners: Mutex<HashMap<u32, SessionId>>,
    /// Bumped whenever `owners` changes so clients re-derive lock views.
    epoch: watch::Sender<u64>,
    next_session: AtomicU64,
    clients: AtomicUsize,
}

pub struct VideohubBridge {
    port: u16,
    shared: Arc<BridgeShared>,
    shutdown: watch::Sender<bool>,
}

impl VideohubBridge {
    /// Bind and start accepting panels. Port 0 picks an ephemeral port;
    /// the bound one is reported by [Self::port].
    pub async fn start(api: OrchestratorHandle, port: u16) -> std::io::Result<VideohubBridge> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let port = listener.local_addr()?.port();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (epoch, _) = watch::channel(0);
        let shared = Arc::new(BridgeShared {
            owners: Mutex::new(HashMap::new()),
            epoch,
            next_session: AtomicU64::new(1),
            clients: AtomicUsize::new(0),
        });

        tokio::spawn(accept_loop(listener, api, Arc::clone(&shared), shutdown_rx));
        Ok(VideohubBridge {
            port,
            shared,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            running: true,
            port: self.port,
            clients: self.shared.clients.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting and hang up every client.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[tracing::instrument(skip_all, fields(port = listener.local_addr().map(|a| a.port()).unwrap_or(0)))]
async fn accept_loop(
    listener: TcpListener,
    api: OrchestratorHandle,
    shared: Arc<BridgeShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("bridge listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((socket, peer)) = accepted else { break };
                let session = shared.next_session.fetch_add(1, Ordering::SeqCst);
                info!(?peer, session, "panel connected");
                shared.clients.fetch_add(1, Ordering::SeqCst);
                let api = api.clone();
                let shared = Arc::clone(&shared);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(session, socket, &api, &shared, shutdown).await {
                        debug!(session, error = ?e, "client loop ended with error");
                    }
                    release_session_locks(session, &api, &shared).await;
                    shared.clients.fetch_sub(1, Ordering::SeqCst);
                    info!(session, "panel disconnected");
                });
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("bridge accept loop stopped");
}

/// What one panel currently believes the matrix looks like. Locks are
/// per-session: own holdings show `O`, anything else held shows `L`.
#[derive(Clone, Debug, Default, PartialEq)]
struct ClientView {
    inputs: u32,
    outputs: u32,
    routing: BTreeMap<u32, u32>,
    input_labels: Vec<String>,
    output_labels: Vec<String>,
    locks: Vec<videohub::LockState>,
}

fn client_view(vs: &VirtualState, owners: &HashMap<u32, SessionId>, session: SessionId) -> ClientView {
    let locks = (0..vs.outputs)
        .map(|v| match owners.get(&v) {
            Some(s) if *s == session => videohub::LockState::Owned,
            Some(_) => videohub::LockState::Locked,
            None => match vs.locks.get(v as usize) {
                // The physical router's own locks count as foreign.
                Some(LockState::Owned) | Some(LockState::Locked) => videohub::LockState::Locked,
                _ => videohub::LockState::Unlocked,
            },
        })
        .collect();
    ClientView {
        inputs: vs.inputs,
        outputs: vs.outputs,
        routing: vs.routing.clone(),
        input_labels: vs.input_labels.clone(),
        output_labels: vs.output_labels.clone(),
        locks,
    }
}

fn label_block(labels: &[String]) -> Vec<Label> {
    labels
        .iter()
        .enumerate()
        .map(|(i, name)| Label {
            id: i as u32,
            name: name.clone(),
        })
        .collect()
}

fn routing_block(routing: &BTreeMap<u32, u32>) -> Vec<Route> {
    routing
        .iter()
        .map(|(o, i)| Route {
            to_output: *o,
            from_input: *i,
        })
        .collect()
}

fn lock_block(locks: &[videohub::LockState]) -> Vec<Lock> {
    locks
        .iter()
        .enumerate()
        .map(|(i, state)| Lock {
            id: i as u32,
            state: *state,
        })
        .collect()
}

/// The full-status dump sent on connect and after a size change.
fn full_dump(view: &ClientView) -> Vec<VideohubMessage> {
    vec![
        VideohubMessage::Preamble(Preamble {
            version: "2.8".into(),
        }),
        VideohubMessage::DeviceInfo(DeviceInfo {
            present: Some(Present::Yes),
            model_name: Some("unimatrix".into()),
            friendly_name: Some("Virtual Router".into()),
            video_inputs: Some(view.inputs),
            video_outputs: Some(view.outputs),
            ..Default::default()
        }),
        VideohubMessage::InputLabels(label_block(&view.input_labels)),
        VideohubMessage::OutputLabels(label_block(&view.output_labels)),
        VideohubMessage::VideoOutputLocks(lock_block(&view.locks)),
        VideohubMessage::VideoOutputRouting(routing_block(&view.routing)),
        VideohubMessage::EndPrelude,
    ]
}

/// Row-level diff between two views. `None` means the matrix changed
/// size and the client needs a full re-dump.
fn diff_messages(old: &ClientView, new: &ClientView) -> Option<Vec<VideohubMessage>> {
    if old.inputs != new.inputs || old.outputs != new.outputs {
        return None;
    }
    let mut out = Vec::new();

    let labels: Vec<Label> = new
        .input_labels
        .iter()
        .enumerate()
        .filter(|(i, name)| old.input_labels.get(*i) != Some(*name))
        .map(|(i, name)| Label {
            id: i as u32,
            name: name.clone(),
        })
        .collect();
    if !labels.is_empty() {
        out.push(VideohubMessage::InputLabels(labels));
    }

    let labels: Vec<Label> = new
        .output_labels
        .iter()
        .enumerate()
        .filter(|(i, name)| old.output_labels.get(*i) != Some(*name))
        .map(|(i, name)| Label {
            id: i as u32,
            name: name.clone(),
        })
        .collect();
    if !labels.is_empty() {
        out.push(VideohubMessage::OutputLabels(labels));
    }

    let locks: Vec<Lock> = new
        .locks
        .iter()
        .enumerate()
        .filter(|(i, state)| old.locks.get(*i) != Some(*state))
        .map(|(i, state)| Lock {
            id: i as u32,
            state: *state,
        })
        .collect();
    if !locks.is_empty() {
        out.push(VideohubMessage::VideoOutputLocks(locks));
    }

    let routes: Vec<Route> = new
        .routing
        .iter()
        .filter(|(o, i)| old.routing.get(*o) != Some(*i))
        .map(|(o, i)| Route {
            to_output: *o,
            from_input: *i,
        })
        .collect();
    if !routes.is_empty() {
        out.push(VideohubMessage::VideoOutputRouting(routes));
    }

    Some(out)
}

async fn handle_client(
    session: SessionId,
    socket: TcpStream,
    api: &OrchestratorHandle,
    shared: &Arc<BridgeShared>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut framed = Framed::new(socket, VideohubCodec);
    let mut vstate = api.watch_virtual_state();
    let mut epoch = shared.epoch.subscribe();

    let mut view = {
        let owners = shared.owners.lock().await;
        client_view(&vstate.borrow_and_update(), &owners, session)
    };
    for msg in full_dump(&view) {
        framed.send(msg).await?;
    }

    loop {
        tokio::select! {
            request = framed.next() => {
                let Some(request) = request else { break };
                let replies = handle_request(session, request?, &view, api, shared).await;
                for msg in replies {
                    framed.send(msg).await?;
                }
            }

            changed = vstate.changed() => {
                if changed.is_err() {
                    break;
                }
                refresh(session, &mut view, &vstate, shared, &mut framed).await?;
            }

            _ = epoch.changed() => {
                refresh(session, &mut view, &vstate, shared, &mut framed).await?;
            }

            _ = shutdown.changed() => break,
        }
    }
    Ok(())
}

/// Re-derive this client's view and push only what changed.
async fn refresh(
    session: SessionId,
    view: &mut ClientView,
    vstate: &watch::Receiver<Arc<VirtualState>>,
    shared: &Arc<BridgeShared>,
    framed: &mut Framed<TcpStream, VideohubCodec>,
) -> Result<()> {
    let new_view = {
        let owners = shared.owners.lock().await;
        client_view(&vstate.borrow(), &owners, session)
    };
    if new_view == *view {
        return Ok(());
    }
    match diff_messages(view, &new_view) {
        Some(msgs) => {
            for msg in msgs {
                framed.send(msg).await?;
            }
        }
        None => {
            // Size change: start over with a full dump.
            for msg in full_dump(&new_view) {
                framed.send(msg).await?;
            }
        }
    }
    *view = new_view;
    Ok(())
}

async fn handle_request(
    session: SessionId,
    msg: VideohubMessage,
    view: &ClientView,
    api: &OrchestratorHandle,
    shared: &Arc<BridgeShared>,
) -> Vec<VideohubMessage> {
    match msg {
        VideohubMessage::Ping => vec![VideohubMessage::ACK],

        VideohubMessage::VideoOutputRouting(routes) if routes.is_empty() => {
            vec![VideohubMessage::VideoOutputRouting(routing_block(
                &view.routing,
            ))]
        }
        VideohubMessage::VideoOutputRouting(routes) => {
            let mut all_ok = true;
            let mut corrections = Vec::new();
            for r in routes {
                let locked_by_other = {
                    let owners = shared.owners.lock().await;
                    owners.get(&r.to_output).is_some_and(|s| *s != session)
                };
                let ok = !locked_by_other
                    && matches!(
                        api.set_virtual_route(r.to_output, r.from_input, 0).await,
                        Ok(Ok(_))
                    );
                if !ok {
                    all_ok = false;
                    // Re-assert the unchanged crosspoint, this client only.
                    if let Some(current) = view.routing.get(&r.to_output) {
                        corrections.push(Route {
                            to_output: r.to_output,
                            from_input: *current,
                        });
                    }
                }
            }
            let mut replies = vec![if all_ok {
                VideohubMessage::ACK
            } else {
                VideohubMessage::NAK
            }];
            if !corrections.is_empty() {
                replies.push(VideohubMessage::VideoOutputRouting(corrections));
            }
            replies
        }

        VideohubMessage::VideoOutputLocks(locks) if locks.is_empty() => {
            vec![VideohubMessage::VideoOutputLocks(lock_block(&view.locks))]
        }
        VideohubMessage::VideoOutputLocks(locks) => {
            let mut all_ok = true;
            for l in locks {
                if l.id >= view.outputs {
                    all_ok = false;
                    continue;
                }
                let (granted, forward) = {
                    let mut owners = shared.owners.lock().await;
                    apply_lock(&mut owners, session, l.id, l.state)
                };
                match granted {
                    Some(changed) => {
                        if changed {
                            shared.epoch.send_modify(|e| *e += 1);
                        }
                        if let Some(action) = forward {
                            // Physical routers see the lock too;
                            // best-effort on protocols without locks.
                            if let Err(e) = api.set_virtual_lock(l.id, action).await {
                                debug!(output = l.id, error = %e, "lock forward failed");
                            }
                        }
                    }
                    None => all_ok = false,
                }
            }
            vec![if all_ok {
                VideohubMessage::ACK
            } else {
                VideohubMessage::NAK
            }]
        }

        VideohubMessage::InputLabels(labels) if labels.is_empty() => {
            vec![VideohubMessage::InputLabels(label_block(&view.input_labels))]
        }
        VideohubMessage::InputLabels(labels) => {
            let mut all_ok = true;
            for l in labels {
                if api.set_input_label(l.id, l.name).await.is_err() {
                    all_ok = false;
                }
            }
            vec![if all_ok {
                VideohubMessage::ACK
            } else {
                VideohubMessage::NAK
            }]
        }

        VideohubMessage::OutputLabels(labels) if labels.is_empty() => {
            vec![VideohubMessage::OutputLabels(label_block(
                &view.output_labels,
            ))]
        }
        VideohubMessage::OutputLabels(labels) => {
            let mut all_ok = true;
            for l in labels {
                if api.set_output_label(l.id, l.name).await.is_err() {
                    all_ok = false;
                }
            }
            vec![if all_ok {
                VideohubMessage::ACK
            } else {
                VideohubMessage::NAK
            }]
        }

        _ => vec![VideohubMessage::NAK],
    }
}

/// Session-level lock bookkeeping. Returns `(granted, forward)`:
/// `granted` is `Some(owners_changed)` on success, `None` when refused;
/// `forward` is the action to mirror onto the physical router.
fn apply_lock(
    owners: &mut HashMap<u32, SessionId>,
    session: SessionId,
    output: u32,
    state: videohub::LockState,
) -> (Option<bool>, Option<LockAction>) {
    match state {
        videohub::LockState::Owned => match owners.get(&output) {
            Some(s) if *s != session => (None, None),
            Some(_) => (Some(false), None),
            None => {
                owners.insert(output, session);
                (Some(true), Some(LockAction::Lock))
            }
        },
        videohub::LockState::Unlocked => match owners.get(&output) {
            Some(s) if *s != session => (None, None),
            Some(_) => {
                owners.remove(&output);
                (Some(true), Some(LockAction::Unlock))
            }
            // Unlocking the unlocked is a no-op, not an error.
            None => (Some(false), None),
        },
        videohub::LockState::Force => {
            let had = owners.remove(&output).is_some();
            (Some(had), Some(LockAction::Force))
        }
        // Panels cannot assign a foreign lock.
        videohub::LockState::Locked => (None, None),
    }
}

/// Client went away: everything it held is released, physically too.
async fn release_session_locks(
    session: SessionId,
    api: &OrchestratorHandle,
    shared: &Arc<BridgeShared>,
) {
    let mine: Vec<u32> = {
        let mut owners = shared.owners.lock().await;
        let mine: Vec<u32> = owners
            .iter()
            .filter(|(_, s)| **s == session)
            .map(|(v, _)| *v)
            .collect();
        for v in &mine {
            owners.remove(v);
        }
        mine
    };
    if mine.is_empty() {
        return;
    }
    shared.epoch.send_modify(|e| *e += 1);
    for v in mine {
        if let Err(e) = api.set_virtual_lock(v, LockAction::Unlock).await {
            error!(output = v, error = %e, "unlock forward failed on disconnect");
        }
    }
}
