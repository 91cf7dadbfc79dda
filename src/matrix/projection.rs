// Virtual router projection.
//
// Pure mapping from two router mirrors plus a tie-line configuration to a
// single combined matrix. Tie-line ports are hidden; the remaining ports
// of router A come first, router B's after, in ascending physical order.

use super::{LockState, Port, RouterId, RouterState};
use crate::tieline::{Direction, TieLineConfig, TieLineState};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Index tables for one concrete (state A, state B, config) triple.
/// Rebuilt by the orchestrator whenever any of the three change.
#[derive(Clone, Debug, Default)]
pub struct VirtualMatrix {
    inputs: Vec<(RouterId, Port)>,
    outputs: Vec<(RouterId, Port)>,
    input_rev: HashMap<(RouterId, Port), u32>,
    output_rev: HashMap<(RouterId, Port), u32>,
    /// Hidden inputs: tie-line sink → the pool and record index feeding it.
    tie_sinks: HashMap<(RouterId, Port), (Direction, usize)>,
}

/// The combined matrix as shown to operators and panels.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualState {
    pub inputs: u32,
    pub outputs: u32,
    /// Virtual output → virtual input. Sparse: missing means unknown.
    pub routing: BTreeMap<u32, u32>,
    pub input_labels: Vec<String>,
    pub output_labels: Vec<String>,
    pub locks: Vec<LockState>,
    /// Back-pointers: virtual index → owning router and physical port.
    pub input_ports: Vec<(RouterId, Port)>,
    pub output_ports: Vec<(RouterId, Port)>,
}

impl VirtualMatrix {
    pub fn build(state_a: &RouterState, state_b: &RouterState, cfg: &TieLineConfig) -> Self {
        // Exclusion sets per router and side.
        let excl_out_a: HashSet<Port> = cfg.a_to_b.iter().map(|t| t.output).collect();
        let excl_out_b: HashSet<Port> = cfg.b_to_a.iter().map(|t| t.output).collect();
        let excl_in_b: HashSet<Port> = cfg.a_to_b.iter().map(|t| t.input).collect();
        let excl_in_a: HashSet<Port> = cfg.b_to_a.iter().map(|t| t.input).collect();

        let mut m = VirtualMatrix::default();

        let visible = |count: u32, excl: &HashSet<Port>| {
            (0..count).filter(|p| !excl.contains(p)).collect::<Vec<_>>()
        };

        for p in visible(state_a.inputs, &excl_in_a) {
            m.input_rev.insert((RouterId::A, p), m.inputs.len() as u32);
            m.inputs.push((RouterId::A, p));
        }
        for p in visible(state_b.inputs, &excl_in_b) {
            m.input_rev.insert((RouterId::B, p), m.inputs.len() as u32);
            m.inputs.push((RouterId::B, p));
        }
        for p in visible(state_a.outputs, &excl_out_a) {
            m.output_rev.insert((RouterId::A, p), m.outputs.len() as u32);
            m.outputs.push((RouterId::A, p));
        }
        for p in visible(state_b.outputs, &excl_out_b) {
            m.output_rev.insert((RouterId::B, p), m.outputs.len() as u32);
            m.outputs.push((RouterId::B, p));
        }

        for (i, t) in cfg.a_to_b.iter().enumerate() {
            m.tie_sinks.insert((RouterId::B, t.input), (Direction::AToB, i));
        }
        for (i, t) in cfg.b_to_a.iter().enumerate() {
            m.tie_sinks.insert((RouterId::A, t.input), (Direction::BToA, i));
        }

        m
    }

    pub fn input_count(&self) -> u32 {
        self.inputs.len() as u32
    }

    pub fn output_count(&self) -> u32 {
        self.outputs.len() as u32
    }

    pub fn resolve_input(&self, v: u32) -> Option<(RouterId, Port)> {
        self.inputs.get(v as usize).copied()
    }

    pub fn resolve_output(&self, v: u32) -> Option<(RouterId, Port)> {
        self.outputs.get(v as usize).copied()
    }

    pub fn input_to_virtual(&self, router: RouterId, port: Port) -> Option<u32> {
        self.input_rev.get(&(router, port)).copied()
    }

    pub fn output_to_virtual(&self, router: RouterId, port: Port) -> Option<u32> {
        self.output_rev.get(&(router, port)).copied()
    }

    /// The tie-line record feeding `(router, input)`, if that input is a
    /// configured tie-line sink.
    pub fn tie_sink(&self, router: RouterId, input: Port) -> Option<(Direction, usize)> {
        self.tie_sinks.get(&(router, input)).copied()
    }

    /// Project the full virtual state. Routing through an in-use tie-line
    /// resolves to the source input on the far router; routing into an
    /// idle tie-line sink stays undefined.
    pub fn project(
        &self,
        state_a: &RouterState,
        state_b: &RouterState,
        ties: &TieLineState,
    ) -> VirtualState {
        let state_of = |r: RouterId| match r {
            RouterId::A => state_a,
            RouterId::B => state_b,
        };

        let mut routing = BTreeMap::new();
        for (v_out, &(router, port)) in self.outputs.iter().enumerate() {
            let Some(&q) = state_of(router).routing.get(&port) else {
                continue;
            };
            let v_in = match self.tie_sink(router, q) {
                Some((dir, idx)) => {
                    let tl = &ties.pool(dir)[idx];
                    match tl.source_input {
                        Some(s) if tl.in_use() => self.input_to_virtual(router.other(), s),
                        _ => None,
                    }
                }
                None => self.input_to_virtual(router, q),
            };
            if let Some(v_in) = v_in {
                routing.insert(v_out as u32, v_in);
            }
        }

        VirtualState {
            inputs: self.input_count(),
            outputs: self.output_count(),
            routing,
            input_labels: self
                .inputs
                .iter()
                .map(|&(r, p)| state_of(r).input_label(p))
                .collect(),
            output_labels: self
                .outputs
                .iter()
                .map(|&(r, p)| state_of(r).output_label(p))
                .collect(),
            locks: self
                .outputs
                .iter()
                .map(|&(r, p)| state_of(r).output_lock(p))
                .collect(),
            input_ports: self.inputs.clone(),
            output_ports: self.outputs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tieline::{TieLine, TieLineEngine};

    fn cfg_one_a_to_b() -> TieLineConfig {
        TieLineConfig {
            a_to_b: vec![TieLine { output: 7, input: 0 }],
            b_to_a: vec![],
        }
    }

    /// 8×8 + 8×8 with one A→B tie-line on (A out 7, B in 0):
    /// 15 virtual inputs and outputs, A first.
    #[test]
    fn index_space_hides_tie_ports() {
        let a = RouterState::with_size(8, 8);
        let b = RouterState::with_size(8, 8);
        let m = VirtualMatrix::build(&a, &b, &cfg_one_a_to_b());

        assert_eq!(m.input_count(), 15);
        assert_eq!(m.output_count(), 15);

        // Virtual inputs 0..7 are A's, 8..14 are B's visible inputs.
        assert_eq!(m.resolve_input(0), Some((RouterId::A, 0)));
        assert_eq!(m.resolve_input(7), Some((RouterId::A, 7)));
        assert_eq!(m.resolve_input(8), Some((RouterId::B, 1)));
        assert_eq!(m.resolve_input(14), Some((RouterId::B, 7)));

        // Virtual outputs 0..6 are A's (7 hidden), 7..14 are B's.
        assert_eq!(m.resolve_output(6), Some((RouterId::A, 6)));
        assert_eq!(m.resolve_output(7), Some((RouterId::B, 0)));
        assert_eq!(m.resolve_output(14), Some((RouterId::B, 7)));

        // No virtual port resolves to a tie-line port.
        for v in 0..m.output_count() {
            assert_ne!(m.resolve_output(v), Some((RouterId::A, 7)));
        }
        for v in 0..m.input_count() {
            assert_ne!(m.resolve_input(v), Some((RouterId::B, 0)));
        }

        assert_eq!(m.resolve_input(15), None);
        assert_eq!(m.resolve_output(15), None);

        // Inverse mappings agree.
        assert_eq!(m.input_to_virtual(RouterId::B, 1), Some(8));
        assert_eq!(m.input_to_virtual(RouterId::B, 0), None);
        assert_eq!(m.output_to_virtual(RouterId::A, 7), None);
        assert_eq!(m.output_to_virtual(RouterId::B, 0), Some(7));
    }

    #[test]
    fn direct_routing_projects() {
        let mut a = RouterState::with_size(8, 8);
        a.routing.insert(2, 3);
        let b = RouterState::with_size(8, 8);
        let cfg = TieLineConfig::default();
        let m = VirtualMatrix::build(&a, &b, &cfg);
        let vs = m.project(&a, &b, &TieLineState::from_config(&cfg));
        assert_eq!(vs.routing.get(&2), Some(&3));
    }

    #[test]
    fn tie_line_routing_projects_to_far_source() {
        let mut a = RouterState::with_size(8, 8);
        let mut b = RouterState::with_size(8, 8);
        let cfg = cfg_one_a_to_b();

        // A carries input 0 on its tie output; B outputs 0 and 1 tap the
        // tie sink.
        a.routing.insert(7, 0);
        b.routing.insert(0, 0);
        b.routing.insert(1, 0);

        let mut engine = TieLineEngine::new(cfg.clone()).unwrap();
        engine.reconstruct(&a.routing, &b.routing);

        let m = VirtualMatrix::build(&a, &b, &cfg);
        let vs = m.project(&a, &b, engine.state());

        // B out 0 = virtual output 7, B out 1 = virtual output 8; both
        // show A input 0 = virtual input 0.
        assert_eq!(vs.routing.get(&7), Some(&0));
        assert_eq!(vs.routing.get(&8), Some(&0));
    }

    #[test]
    fn idle_tie_sink_routing_is_undefined() {
        let a = RouterState::with_size(8, 8);
        let mut b = RouterState::with_size(8, 8);
        let cfg = cfg_one_a_to_b();
        // B out 3 points at the tie sink, but nothing is carried on the
        // tie-line (A side unrouted).
        b.routing.insert(3, 0);

        let engine = TieLineEngine::new(cfg.clone()).unwrap();
        let m = VirtualMatrix::build(&a, &b, &cfg);
        let vs = m.project(&a, &b, engine.state());
        assert_eq!(vs.routing.get(&10), None);
    }

    #[test]
    fn labels_and_locks_aggregate_from_owner() {
        let mut a = RouterState::with_size(2, 2);
        let mut b = RouterState::with_size(2, 2);
        a.input_labels.insert(0, "CAM 1".into());
        b.output_labels.insert(1, "MON".into());
        b.output_locks.insert(1, LockState::Locked);

        let cfg = TieLineConfig::default();
        let m = VirtualMatrix::build(&a, &b, &cfg);
        let vs = m.project(&a, &b, &TieLineState::from_config(&cfg));

        assert_eq!(vs.input_labels[0], "CAM 1");
        assert_eq!(vs.input_labels[1], "Input 2");
        assert_eq!(vs.input_labels[2], "Input 1");
        assert_eq!(vs.output_labels[3], "MON");
        assert_eq!(vs.locks[3], LockState::Locked);
        assert_eq!(vs.locks[0], LockState::Unlocked);
    }

    #[test]
    fn disconnected_router_contributes_nothing() {
        let a = RouterState::with_size(8, 8);
        let b = RouterState::default();
        let cfg = cfg_one_a_to_b();
        let m = VirtualMatrix::build(&a, &b, &cfg);
        // A's 8 inputs remain; output 7 is still hidden.
        assert_eq!(m.input_count(), 8);
        assert_eq!(m.output_count(), 7);
    }
}
