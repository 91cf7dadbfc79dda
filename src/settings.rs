//! Typed model of the persisted settings document.
//!
//! Storage belongs to the external settings collaborator; this crate only
//! defines the shape and reads a document at startup. All keys are
//! camelCase JSON.

use crate::backend::{Protocol, RouterConfig};
use crate::matrix::Level;
use crate::tieline::TieLineConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub router_a: Option<RouterSettings>,
    pub router_b: Option<RouterSettings>,
    pub tie_lines: TieLineConfig,
    pub salvos: Vec<Salvo>,
    pub auto_connect: bool,
    pub auto_reconnect: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterSettings {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub protocol: Protocol,
    #[serde(default = "one")]
    pub levels: u8,
    #[serde(default)]
    pub name: String,
}

fn one() -> u8 {
    1
}

impl RouterSettings {
    pub fn controller_config(&self) -> RouterConfig {
        RouterConfig {
            host: self.host.clone(),
            port: self.port.unwrap_or_else(|| self.protocol.default_port()),
            protocol: self.protocol,
            levels: self.levels,
        }
    }
}

/// A named preset: an ordered list of virtual routes applied as a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Salvo {
    pub name: String,
    pub routes: Vec<SalvoRoute>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalvoRoute {
    pub output: u32,
    pub input: u32,
    #[serde(default)]
    pub level: Level,
}
