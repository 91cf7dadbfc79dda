use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A physical port index on one router, 0-based.
pub type Port = u32;

/// Opaque audio/video breakaway level, passed through to the router.
pub type Level = u8;

/// Which of the two physical routers a port belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RouterId {
    A,
    B,
}

impl RouterId {
    pub fn other(self) -> RouterId {
        match self {
            RouterId::A => RouterId::B,
            RouterId::B => RouterId::A,
        }
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RouterId::A => f.write_str("A"),
            RouterId::B => f.write_str("B"),
        }
    }
}

/// Per-output lock state as mirrored from a router.
/// Only Videohub surfaces locks; the other protocols report `Unlocked`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockState {
    #[default]
    Unlocked,
    /// Owned by our control session.
    Owned,
    /// Held by a different control session.
    Locked,
}

/// A lock mutation request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockAction {
    /// `O` — take ownership.
    Lock,
    /// `U` — release our own lock.
    Unlock,
    /// `F` — force-release whoever holds it.
    Force,
}

/// Live mirror of one router's matrix, kept current by its controller.
///
/// `routing` maps output to input and is sparse: a missing output means
/// the crosspoint is unknown, not unrouted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterState {
    pub inputs: u32,
    pub outputs: u32,
    pub routing: BTreeMap<Port, Port>,
    pub input_labels: BTreeMap<Port, String>,
    pub output_labels: BTreeMap<Port, String>,
    pub output_locks: BTreeMap<Port, LockState>,
    pub connected: bool,
}

impl RouterState {
    pub fn with_size(inputs: u32, outputs: u32) -> Self {
        RouterState {
            inputs,
            outputs,
            connected: true,
            ..Default::default()
        }
    }

    /// Label of an input port, falling back to the `Input N` default.
    /// Absent and default labels are deliberately indistinguishable.
    pub fn input_label(&self, port: Port) -> String {
        match self.input_labels.get(&port) {
            Some(l) if !l.is_empty() => l.clone(),
            _ => format!("Input {}", port + 1),
        }
    }

    /// Label of an output port, falling back to the `Output N` default.
    pub fn output_label(&self, port: Port) -> String {
        match self.output_labels.get(&port) {
            Some(l) if !l.is_empty() => l.clone(),
            _ => format!("Output {}", port + 1),
        }
    }

    pub fn output_lock(&self, port: Port) -> LockState {
        self.output_locks.get(&port).copied().unwrap_or_default()
    }
}
