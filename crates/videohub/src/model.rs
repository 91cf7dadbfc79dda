// BMD Videohub Protocol Data Model

use bytes::BytesMut;
use std::fmt;

/// Preamble contains the protocol version.
/// Compatible with major version 2; minor versions add sections we pass
/// through as [VideohubMessage::Unknown].
///
/// ```text
/// PROTOCOL PREAMBLE:↵
/// Version: 2.8↵
/// ↵
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Preamble {
    pub version: String,
}

/// One of:
/// - `Device present: true`
/// - `Device present: false`
/// - `Device present: needs_update`
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Present {
    Yes,
    #[default]
    No,
    NeedsUpdate,
}

impl fmt::Display for Present {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let v = match self {
            Present::Yes => "true",
            Present::No => "false",
            Present::NeedsUpdate => "needs_update",
        };
        f.write_str(v)
    }
}

/// An unknown Key-Value pair.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnknownKVPair {
    pub key: String,
    pub value: String,
}

/// VIDEOHUB DEVICE:↵
/// Device present: true↵
/// Model name: Blackmagic Smart Videohub↵
/// Video inputs: 16↵
/// Video outputs: 16↵
/// ↵
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceInfo {
    pub present: Option<Present>,
    pub model_name: Option<String>,
    pub friendly_name: Option<String>,
    pub unique_id: Option<String>,
    pub video_inputs: Option<u32>,
    pub video_outputs: Option<u32>,
    pub unknown_fields: Option<Vec<UnknownKVPair>>,
}

/// Singular label line of `INPUT LABELS:` or `OUTPUT LABELS:`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Label {
    pub id: u32,
    pub name: String,
}

/// Singular route line of `VIDEO OUTPUT ROUTING:`.
/// Transmitted as `output input`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Route {
    pub from_input: u32,
    pub to_output: u32,
}

/// Lock State
///
/// Represented by something like the following:
/// - `x O` - x is owned by current client
/// - `x L` - x is locked by a different client
/// - `x U` - x is not locked
/// - `x F` - force-release request (client to hub only)
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LockState {
    /// Lock owned by the current Client
    Owned,
    /// Locked by a different Client
    Locked,
    /// Not locked
    #[default]
    Unlocked,
    /// Force-release, only valid in a request
    Force,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LockState::Owned => "O",
            LockState::Locked => "L",
            LockState::Unlocked => "U",
            LockState::Force => "F",
        };
        f.write_str(s)
    }
}

/// A lock line of `VIDEO OUTPUT LOCKS:`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Lock {
    pub id: u32,
    pub state: LockState,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VideohubMessage {
    /// `PROTOCOL PREAMBLE:`
    Preamble(Preamble),
    /// `VIDEOHUB DEVICE:`
    DeviceInfo(DeviceInfo),

    /// `INPUT LABELS:`
    InputLabels(Vec<Label>),
    /// `OUTPUT LABELS:`
    OutputLabels(Vec<Label>),

    /// `VIDEO OUTPUT ROUTING:`
    VideoOutputRouting(Vec<Route>),

    /// `VIDEO OUTPUT LOCKS:`
    VideoOutputLocks(Vec<Lock>),

    /// `ACK`
    ACK,
    /// `NAK`
    NAK,
    /// `PING:`
    Ping,
    /// `END PRELUDE:`
    EndPrelude,

    /// Anything we don't understand, kept verbatim.
    Unknown(BytesMut, BytesMut),
}
