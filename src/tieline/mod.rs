mod engine;

pub use engine::*;

use crate::matrix::{Port, RouterId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use thiserror::Error;

/// Which way a tie-line pool carries signal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    AToB,
    BToA,
}

impl Direction {
    /// The router whose output feeds the cable.
    pub fn source_router(self) -> RouterId {
        match self {
            Direction::AToB => RouterId::A,
            Direction::BToA => RouterId::B,
        }
    }

    /// The router whose input receives the cable.
    pub fn sink_router(self) -> RouterId {
        self.source_router().other()
    }

    /// The pool carrying signal *into* `router`.
    pub fn into_router(router: RouterId) -> Direction {
        match router {
            RouterId::A => Direction::BToA,
            RouterId::B => Direction::AToB,
        }
    }

    /// The pool carrying signal *out of* `router`.
    pub fn out_of_router(router: RouterId) -> Direction {
        Direction::into_router(router).reverse()
    }

    pub fn reverse(self) -> Direction {
        match self {
            Direction::AToB => Direction::BToA,
            Direction::BToA => Direction::AToB,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::AToB => f.write_str("A→B"),
            Direction::BToA => f.write_str("B→A"),
        }
    }
}

/// One physical cable: `output` on the source-side router is wired to
/// `input` on the sink-side router.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TieLine {
    pub output: Port,
    pub input: Port,
}

/// The configured tie-line pools, one ordered sequence per direction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TieLineConfig {
    pub a_to_b: Vec<TieLine>,
    pub b_to_a: Vec<TieLine>,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("duplicate source output {port} in {dir} tie-lines")]
    DuplicateOutput { dir: Direction, port: Port },
    #[error("duplicate sink input {port} in {dir} tie-lines")]
    DuplicateInput { dir: Direction, port: Port },
}

impl TieLineConfig {
    pub fn lines(&self, dir: Direction) -> &[TieLine] {
        match dir {
            Direction::AToB => &self.a_to_b,
            Direction::BToA => &self.b_to_a,
        }
    }

    /// Within one direction no output and no input may repeat. The same
    /// port number appearing in both directions is legal: those are
    /// different physical connectors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for dir in [Direction::AToB, Direction::BToA] {
            let mut outputs = HashSet::new();
            let mut inputs = HashSet::new();
            for line in self.lines(dir) {
                if !outputs.insert(line.output) {
                    return Err(ConfigError::DuplicateOutput {
                        dir,
                        port: line.output,
                    });
                }
                if !inputs.insert(line.input) {
                    return Err(ConfigError::DuplicateInput {
                        dir,
                        port: line.input,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TieLineStatus {
    #[default]
    Free,
    InUse,
}

/// Runtime record for one configured tie-line.
///
/// Invariant: `status == InUse` exactly when `source_input` is set and
/// `destinations` is nonempty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TieLineRuntime {
    pub index: usize,
    pub line: TieLine,
    pub status: TieLineStatus,
    /// Physical input on the source-side router currently claimed.
    pub source_input: Option<Port>,
    /// Physical outputs on the sink-side router fed by this cable.
    pub destinations: BTreeSet<Port>,
    /// What the cable physically carries, claimed or orphaned. Survives
    /// a release so a failed allocation can restore it.
    #[serde(skip)]
    pub(crate) carried: Option<Port>,
}

impl TieLineRuntime {
    fn new(index: usize, line: TieLine) -> Self {
        TieLineRuntime {
            index,
            line,
            status: TieLineStatus::Free,
            source_input: None,
            destinations: BTreeSet::new(),
            carried: None,
        }
    }

    pub fn in_use(&self) -> bool {
        self.status == TieLineStatus::InUse
    }

    /// Release the claim. The physical carriage is left alone: the cable
    /// keeps its signal until the next allocation overwrites it.
    pub(crate) fn release(&mut self) {
        self.status = TieLineStatus::Free;
        self.source_input = None;
        self.destinations.clear();
    }

    pub(crate) fn commit(&mut self, source: Port, destinations: BTreeSet<Port>) {
        debug_assert!(!destinations.is_empty());
        self.status = TieLineStatus::InUse;
        self.source_input = Some(source);
        self.destinations = destinations;
        self.carried = Some(source);
    }
}

/// Snapshot of both pools.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TieLineState {
    pub a_to_b: Vec<TieLineRuntime>,
    pub b_to_a: Vec<TieLineRuntime>,
}

impl TieLineState {
    pub fn from_config(cfg: &TieLineConfig) -> Self {
        let build = |lines: &[TieLine]| {
            lines
                .iter()
                .enumerate()
                .map(|(i, l)| TieLineRuntime::new(i, *l))
                .collect()
        };
        TieLineState {
            a_to_b: build(&cfg.a_to_b),
            b_to_a: build(&cfg.b_to_a),
        }
    }

    pub fn pool(&self, dir: Direction) -> &[TieLineRuntime] {
        match dir {
            Direction::AToB => &self.a_to_b,
            Direction::BToA => &self.b_to_a,
        }
    }

    pub(crate) fn pool_mut(&mut self, dir: Direction) -> &mut Vec<TieLineRuntime> {
        match dir {
            Direction::AToB => &mut self.a_to_b,
            Direction::BToA => &mut self.b_to_a,
        }
    }

    /// The record in `dir` whose sink input is `input`, if configured.
    pub fn by_sink_input(&self, dir: Direction, input: Port) -> Option<&TieLineRuntime> {
        self.pool(dir).iter().find(|t| t.line.input == input)
    }
}
