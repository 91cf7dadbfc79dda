// GV Native session messages.
//
// Each frame is a big-endian u32 length followed by one JSON object with
// an `op` discriminator. The device echoes accepted mutations as tallies.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NameTarget {
    Source,
    Destination,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub output: u32,
    pub input: u32,
    pub level: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameEntry {
    pub index: u32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum GvMessage {
    /// Session opener, sent by the client.
    Hello,
    /// Device identity and matrix dimensions.
    #[serde(rename_all = "camelCase")]
    HelloReply {
        name: String,
        inputs: u32,
        outputs: u32,
    },

    /// Ask for the complete routing and name state.
    FullStatusRequest,
    #[serde(rename_all = "camelCase")]
    RoutingSnapshot { routes: Vec<RouteEntry> },
    #[serde(rename_all = "camelCase")]
    NamesSnapshot {
        target: NameTarget,
        names: Vec<NameEntry>,
    },

    /// Take a crosspoint. Confirmed by an echoed [GvMessage::RouteTally].
    #[serde(rename_all = "camelCase")]
    RouteRequest {
        output: u32,
        input: u32,
        level: u8,
    },
    #[serde(rename_all = "camelCase")]
    RouteTally {
        output: u32,
        input: u32,
        level: u8,
    },

    #[serde(rename_all = "camelCase")]
    SetName {
        target: NameTarget,
        index: u32,
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    NameTally {
        target: NameTarget,
        index: u32,
        name: String,
    },

    #[serde(rename_all = "camelCase")]
    Error { message: String },
}
