// Tie-line allocator.
//
// Executes virtual routes by issuing one or two physical crosspoint
// changes, claiming, sharing and releasing tie-lines as it goes. All
// decisions are synchronous; only the physical legs await.

use super::{ConfigError, Direction, TieLineConfig, TieLineState};
use crate::backend::ControllerError;
use crate::matrix::{Level, Port, RouterId, VirtualMatrix};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

/// The engine's view of a physical router: connectivity plus one
/// crosspoint operation. Implemented by [crate::backend::Controller].
pub trait PhysicalRouter: Send + Sync {
    fn is_connected(&self) -> bool;

    fn set_route(
        &self,
        output: Port,
        input: Port,
        level: Level,
    ) -> impl Future<Output = Result<(), ControllerError>> + Send;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteSuccess {
    /// An already-carried tie-line was shared instead of allocating.
    pub reused: bool,
    /// The tie-line involved, when the route crossed routers.
    pub tie_line: Option<(Direction, usize)>,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("virtual index out of range")]
    InvalidIndex,
    #[error("router {0} is not connected")]
    RouterNotConnected(RouterId),
    #[error("physical route failed: {0}")]
    RouteFailed(#[source] ControllerError),
    #[error("no tie-lines available ({in_use}/{total} in use)")]
    NoTieLinesAvailable { in_use: usize, total: usize },
    #[error("source leg committed but destination leg failed: {0}")]
    PartialFailure(#[source] ControllerError),
}

pub struct TieLineEngine {
    config: TieLineConfig,
    state: TieLineState,
    /// On a destination-leg failure, try to restore the previous carriage
    /// of the source leg. Off by default: the observed behavior is to
    /// leave the half-committed leg in place for the next attempt.
    pub rollback_on_partial_failure: bool,
}

impl TieLineEngine {
    pub fn new(config: TieLineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = TieLineState::from_config(&config);
        Ok(TieLineEngine {
            config,
            state,
            rollback_on_partial_failure: false,
        })
    }

    pub fn config(&self) -> &TieLineConfig {
        &self.config
    }

    pub fn state(&self) -> &TieLineState {
        &self.state
    }

    /// Replace the configuration. Every runtime record is reinitialized
    /// to free; physical routing is not touched. The caller should run
    /// [Self::reconstruct] afterwards when both routers are connected.
    pub fn update_config(&mut self, config: TieLineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.state = TieLineState::from_config(&config);
        self.config = config;
        Ok(())
    }

    /// Rebuild runtime state from observed physical routing, so sessions
    /// survive a reconnect. For each configured cable: the source-side
    /// routing names the carried input; sink-side outputs pointing at the
    /// cable's input are its destinations. An output equal to the sink
    /// input is ignored, suppressing the 1:1 passthrough many routers
    /// power up with — which can also hide a legitimate same-index route
    /// made before we connected, hence the warning.
    pub fn reconstruct(
        &mut self,
        routing_a: &BTreeMap<Port, Port>,
        routing_b: &BTreeMap<Port, Port>,
    ) {
        let routing_of = |r: RouterId| match r {
            RouterId::A => routing_a,
            RouterId::B => routing_b,
        };

        for dir in [Direction::AToB, Direction::BToA] {
            let src_routing = routing_of(dir.source_router());
            let sink_routing = routing_of(dir.sink_router());
            let sink_side_tie_outputs: BTreeSet<Port> = self
                .config
                .lines(dir.reverse())
                .iter()
                .map(|l| l.output)
                .collect();

            for tl in self.state.pool_mut(dir) {
                let carried = src_routing.get(&tl.line.output).copied();
                let sink = tl.line.input;
                let destinations: BTreeSet<Port> = sink_routing
                    .iter()
                    .filter(|(o, i)| {
                        **i == sink && !sink_side_tie_outputs.contains(o) && **o != sink
                    })
                    .map(|(o, _)| *o)
                    .collect();
                if sink_routing.get(&sink) == Some(&sink) {
                    warn!(
                        %dir, tie = tl.index, port = sink,
                        "ignoring same-index route into tie sink; \
                         indistinguishable from power-on passthrough"
                    );
                }

                tl.carried = carried;
                match (carried, destinations.is_empty()) {
                    (Some(s), false) => tl.commit(s, destinations),
                    _ => tl.release(),
                }
            }
        }
    }

    /// Execute one virtual route, spec'd down to the failure modes:
    /// resolve both ends, release the destination from any other
    /// tie-line, then either route locally, share an already-carried
    /// tie-line, or allocate a free one with a two-leg commit.
    pub async fn execute_virtual_route<T: PhysicalRouter>(
        &mut self,
        matrix: &VirtualMatrix,
        router_a: Option<&T>,
        router_b: Option<&T>,
        v_out: u32,
        v_in: u32,
        level: Level,
    ) -> Result<RouteSuccess, RouteError> {
        let (src_r, src_p) = matrix.resolve_input(v_in).ok_or(RouteError::InvalidIndex)?;
        let (dst_r, dst_p) = matrix
            .resolve_output(v_out)
            .ok_or(RouteError::InvalidIndex)?;

        if src_r == dst_r {
            let router = pick(router_a, router_b, dst_r)?;
            // The output leaves whatever tie-line fed it. No physical
            // un-route on the far side: the cable just loses a consumer.
            self.release_destination(Direction::into_router(dst_r), dst_p, None);
            router
                .set_route(dst_p, src_p, level)
                .await
                .map_err(RouteError::RouteFailed)?;
            debug!(router = %dst_r, output = dst_p, input = src_p, "local route");
            return Ok(RouteSuccess {
                reused: false,
                tie_line: None,
            });
        }

        let dir = Direction::out_of_router(src_r);
        let src = pick(router_a, router_b, src_r)?;
        let dst = pick(router_a, router_b, dst_r)?;

        let reuse_idx = self
            .state
            .pool(dir)
            .iter()
            .position(|t| t.in_use() && t.source_input == Some(src_p));
        self.release_destination(dir, dst_p, reuse_idx);

        // Share a tie-line that already carries this source. Never
        // allocate in that case, even with free lines in the pool.
        if let Some(idx) = reuse_idx {
            let sink = self.state.pool(dir)[idx].line.input;
            dst.set_route(dst_p, sink, level)
                .await
                .map_err(RouteError::RouteFailed)?;
            self.state.pool_mut(dir)[idx].destinations.insert(dst_p);
            debug!(%dir, tie = idx, output = dst_p, "joined carried tie-line");
            return Ok(RouteSuccess {
                reused: true,
                tie_line: Some((dir, idx)),
            });
        }

        let Some(idx) = self.state.pool(dir).iter().position(|t| !t.in_use()) else {
            let total = self.state.pool(dir).len();
            return Err(RouteError::NoTieLinesAvailable {
                in_use: total,
                total,
            });
        };
        let line = self.state.pool(dir)[idx].line;
        let previous_carriage = self.state.pool(dir)[idx].carried;

        src.set_route(line.output, src_p, level)
            .await
            .map_err(RouteError::RouteFailed)?;
        self.state.pool_mut(dir)[idx].carried = Some(src_p);

        match dst.set_route(dst_p, line.input, level).await {
            Ok(()) => {
                self.state.pool_mut(dir)[idx].commit(src_p, BTreeSet::from([dst_p]));
                debug!(%dir, tie = idx, source = src_p, output = dst_p, "allocated tie-line");
                Ok(RouteSuccess {
                    reused: false,
                    tie_line: Some((dir, idx)),
                })
            }
            Err(e) => {
                warn!(%dir, tie = idx, error = %e, "destination leg failed after source leg");
                if self.rollback_on_partial_failure {
                    if let Some(old) = previous_carriage.filter(|old| *old != src_p) {
                        if src.set_route(line.output, old, level).await.is_ok() {
                            self.state.pool_mut(dir)[idx].carried = Some(old);
                        }
                    }
                }
                Err(RouteError::PartialFailure(e))
            }
        }
    }

    /// Drop `dst` from every record of `dir` except `keep`; a record
    /// whose destination set empties becomes free.
    fn release_destination(&mut self, dir: Direction, dst: Port, keep: Option<usize>) {
        for tl in self.state.pool_mut(dir).iter_mut() {
            if Some(tl.index) == keep {
                continue;
            }
            if tl.destinations.remove(&dst) {
                debug!(%dir, tie = tl.index, output = dst, "destination retargeted away");
                if tl.destinations.is_empty() {
                    tl.release();
                }
            }
        }
    }
}

fn pick<'t, T: PhysicalRouter>(
    router_a: Option<&'t T>,
    router_b: Option<&'t T>,
    id: RouterId,
) -> Result<&'t T, RouteError> {
    let r = match id {
        RouterId::A => router_a,
        RouterId::B => router_b,
    };
    match r {
        Some(r) if r.is_connected() => Ok(r),
        _ => Err(RouteError::RouterNotConnected(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::RouterState;
    use crate::tieline::{TieLine, TieLineStatus};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory stand-in for a controller.
    #[derive(Default)]
    struct FakeRouter {
        routing: Mutex<BTreeMap<Port, Port>>,
        offline: AtomicBool,
        fail_next_route: AtomicBool,
    }

    impl FakeRouter {
        fn routing(&self) -> BTreeMap<Port, Port> {
            self.routing.lock().unwrap().clone()
        }

        fn route_of(&self, output: Port) -> Option<Port> {
            self.routing.lock().unwrap().get(&output).copied()
        }
    }

    impl PhysicalRouter for FakeRouter {
        fn is_connected(&self) -> bool {
            !self.offline.load(Ordering::SeqCst)
        }

        async fn set_route(
            &self,
            output: Port,
            input: Port,
            _level: Level,
        ) -> Result<(), ControllerError> {
            if self.fail_next_route.swap(false, Ordering::SeqCst) {
                return Err(ControllerError::Rejected);
            }
            self.routing.lock().unwrap().insert(output, input);
            Ok(())
        }
    }

    fn one_tie_cfg() -> TieLineConfig {
        TieLineConfig {
            a_to_b: vec![TieLine { output: 7, input: 0 }],
            b_to_a: vec![],
        }
    }

    /// 8×8 routers with the given config; matrix built from clean mirrors.
    fn setup(cfg: &TieLineConfig) -> (TieLineEngine, VirtualMatrix, FakeRouter, FakeRouter) {
        let engine = TieLineEngine::new(cfg.clone()).unwrap();
        let a = RouterState::with_size(8, 8);
        let b = RouterState::with_size(8, 8);
        let matrix = VirtualMatrix::build(&a, &b, cfg);
        (engine, matrix, FakeRouter::default(), FakeRouter::default())
    }

    fn assert_status_consistency(state: &TieLineState) {
        for dir in [Direction::AToB, Direction::BToA] {
            for tl in state.pool(dir) {
                assert_eq!(tl.in_use(), !tl.destinations.is_empty(), "tie {}", tl.index);
                assert_eq!(tl.in_use(), tl.source_input.is_some(), "tie {}", tl.index);
            }
        }
    }

    #[tokio::test]
    async fn direct_intra_router_route() {
        let cfg = TieLineConfig::default();
        let (mut engine, matrix, a, b) = setup(&cfg);

        let res = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 2, 3, 0)
            .await
            .unwrap();
        assert_eq!(
            res,
            RouteSuccess {
                reused: false,
                tie_line: None
            }
        );
        assert_eq!(a.route_of(2), Some(3));
        assert!(b.routing().is_empty());
        assert_status_consistency(engine.state());
    }

    #[tokio::test]
    async fn allocate_then_reuse_then_retarget() {
        let cfg = one_tie_cfg();
        let (mut engine, matrix, a, b) = setup(&cfg);

        // Allocate: B's output 0 (virtual 7) takes A's input 0 (virtual 0).
        let res = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 0, 0)
            .await
            .unwrap();
        assert!(!res.reused);
        assert_eq!(res.tie_line, Some((Direction::AToB, 0)));
        assert_eq!(a.route_of(7), Some(0), "source leg: tie output carries input 0");
        assert_eq!(b.route_of(0), Some(0), "destination leg: output taps tie sink");
        let tl = &engine.state().a_to_b[0];
        assert_eq!(tl.source_input, Some(0));
        assert_eq!(tl.destinations, BTreeSet::from([0]));

        // Reuse: same source to B's output 1 (virtual 8) must share.
        let res = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 8, 0, 0)
            .await
            .unwrap();
        assert!(res.reused);
        assert_eq!(a.route_of(7), Some(0), "source leg untouched");
        assert_eq!(b.route_of(1), Some(0));
        let tl = &engine.state().a_to_b[0];
        assert_eq!(tl.destinations, BTreeSet::from([0, 1]));
        assert_eq!(
            engine.state().a_to_b.iter().filter(|t| t.in_use()).count(),
            1,
            "reuse must not grow the in-use count"
        );

        // Retarget B output 1 to a B-local source (physical input 5 =
        // virtual 12): drops out of the tie-line, which stays in use.
        let res = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 8, 12, 0)
            .await
            .unwrap();
        assert_eq!(res.tie_line, None);
        assert_eq!(b.route_of(1), Some(5));
        let tl = &engine.state().a_to_b[0];
        assert_eq!(tl.status, TieLineStatus::InUse);
        assert_eq!(tl.destinations, BTreeSet::from([0]));
        assert_status_consistency(engine.state());
    }

    #[tokio::test]
    async fn exhaustion_reports_pool_size() {
        let cfg = one_tie_cfg();
        let (mut engine, matrix, a, b) = setup(&cfg);

        // The single tie-line fans source 0 out to B outputs 0 and 1.
        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 0, 0)
            .await
            .unwrap();
        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 8, 0, 0)
            .await
            .unwrap();
        let before_a = a.routing();
        let before_b = b.routing();

        // A different source has nowhere to go: the retargeted output
        // leaves the record, but the other destination keeps it in use.
        let err = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 1, 0)
            .await
            .unwrap_err();
        match err {
            RouteError::NoTieLinesAvailable { in_use, total } => {
                assert_eq!((in_use, total), (1, 1));
            }
            other => panic!("expected NoTieLinesAvailable, got {other:?}"),
        }
        assert_eq!(a.routing(), before_a, "physical state must be unchanged");
        assert_eq!(b.routing(), before_b);
        assert_eq!(engine.state().a_to_b[0].destinations, BTreeSet::from([1]));
        assert_status_consistency(engine.state());
    }

    #[tokio::test]
    async fn freeing_last_destination_releases_the_line() {
        let cfg = one_tie_cfg();
        let (mut engine, matrix, a, b) = setup(&cfg);

        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 0, 0)
            .await
            .unwrap();
        // Retarget the only destination to a B-local source.
        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 12, 0)
            .await
            .unwrap();

        let tl = &engine.state().a_to_b[0];
        assert_eq!(tl.status, TieLineStatus::Free);
        assert_eq!(tl.source_input, None);
        assert!(tl.destinations.is_empty());
        // The orphaned carriage stays: no un-route was issued.
        assert_eq!(a.route_of(7), Some(0));
        assert_status_consistency(engine.state());
    }

    #[tokio::test]
    async fn destination_exclusive_across_tie_lines() {
        let cfg = TieLineConfig {
            a_to_b: vec![
                TieLine { output: 7, input: 0 },
                TieLine { output: 6, input: 1 },
            ],
            b_to_a: vec![],
        };
        let (mut engine, matrix, a, b) = setup(&cfg);

        // Source 0 fans out to B outputs 0 and 1 over the first line.
        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 6, 0, 0)
            .await
            .unwrap();
        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 0, 0)
            .await
            .unwrap();

        // Retargeting B output 0 to source 1 moves it onto the second
        // line; the first keeps its other destination.
        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 6, 1, 0)
            .await
            .unwrap();

        let dst = matrix.resolve_output(6).unwrap().1;
        let claiming: Vec<usize> = engine
            .state()
            .a_to_b
            .iter()
            .filter(|t| t.destinations.contains(&dst))
            .map(|t| t.index)
            .collect();
        assert_eq!(claiming, vec![1], "destination may appear in one record only");
        assert_eq!(engine.state().a_to_b[0].destinations, BTreeSet::from([1]));
        assert_eq!(engine.state().a_to_b[1].source_input, Some(1));
        assert_status_consistency(engine.state());
    }

    #[tokio::test]
    async fn b_to_a_pool_is_symmetric() {
        let cfg = TieLineConfig {
            a_to_b: vec![],
            b_to_a: vec![TieLine { output: 3, input: 6 }],
        };
        let (mut engine, matrix, a, b) = setup(&cfg);

        // A outputs are all visible (0..7); B input 0 is virtual 7 (A's
        // 7 inputs minus the hidden input 6 leaves 0..5,7 = 7 inputs).
        let v_in = matrix.input_to_virtual(RouterId::B, 0).unwrap();
        let v_out = matrix.output_to_virtual(RouterId::A, 2).unwrap();
        let res = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), v_out, v_in, 0)
            .await
            .unwrap();
        assert_eq!(res.tie_line, Some((Direction::BToA, 0)));
        assert_eq!(b.route_of(3), Some(0), "B feeds its input 0 onto the cable");
        assert_eq!(a.route_of(2), Some(6), "A output taps the cable's sink");
        assert_status_consistency(engine.state());
    }

    #[tokio::test]
    async fn invalid_indices_and_disconnects() {
        let cfg = one_tie_cfg();
        let (mut engine, matrix, a, b) = setup(&cfg);

        let err = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 99, 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidIndex));

        b.offline.store(true, Ordering::SeqCst);
        let err = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::RouterNotConnected(RouterId::B)));

        let err = engine
            .execute_virtual_route::<FakeRouter>(&matrix, Some(&a), None, 7, 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::RouterNotConnected(RouterId::B)));
    }

    #[tokio::test]
    async fn partial_failure_keeps_source_leg() {
        let cfg = one_tie_cfg();
        let (mut engine, matrix, a, b) = setup(&cfg);

        b.fail_next_route.store(true, Ordering::SeqCst);
        let err = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::PartialFailure(_)));

        // Source leg committed, record not: the cable carries an orphan.
        assert_eq!(a.route_of(7), Some(0));
        assert!(b.routing().is_empty());
        assert_eq!(engine.state().a_to_b[0].status, TieLineStatus::Free);
        assert_status_consistency(engine.state());

        // The next attempt allocates the same line and completes.
        let res = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 0, 0)
            .await
            .unwrap();
        assert!(!res.reused);
        assert_eq!(b.route_of(0), Some(0));
        assert_eq!(engine.state().a_to_b[0].status, TieLineStatus::InUse);
    }

    #[tokio::test]
    async fn optional_rollback_restores_previous_carriage() {
        let cfg = one_tie_cfg();
        let (mut engine, matrix, a, b) = setup(&cfg);
        engine.rollback_on_partial_failure = true;

        // Carry input 2, then retarget the destination away so the line
        // frees but keeps carrying 2.
        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 2, 0)
            .await
            .unwrap();
        engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 12, 0)
            .await
            .unwrap();
        assert_eq!(a.route_of(7), Some(2));

        // New allocation for input 4 fails on the destination leg; the
        // rollback re-routes the cable to its previous source.
        b.fail_next_route.store(true, Ordering::SeqCst);
        let err = engine
            .execute_virtual_route(&matrix, Some(&a), Some(&b), 7, 4, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::PartialFailure(_)));
        assert_eq!(a.route_of(7), Some(2));
    }

    #[test]
    fn reconstruction_from_observed_routing() {
        let cfg = one_tie_cfg();
        let mut engine = TieLineEngine::new(cfg).unwrap();

        let routing_a = BTreeMap::from([(7, 3)]);
        let routing_b = BTreeMap::from([(4, 0), (5, 0), (0, 0)]);
        engine.reconstruct(&routing_a, &routing_b);

        let tl = &engine.state().a_to_b[0];
        assert_eq!(tl.status, TieLineStatus::InUse);
        assert_eq!(tl.source_input, Some(3));
        // Output 0 equals the sink input: power-on passthrough, dropped.
        assert_eq!(tl.destinations, BTreeSet::from([4, 5]));
        assert_status_consistency(engine.state());

        // Idempotent.
        let snapshot = engine.state().clone();
        engine.reconstruct(&routing_a, &routing_b);
        assert_eq!(engine.state(), &snapshot);
    }

    #[test]
    fn reconstruction_skips_far_side_tie_outputs() {
        // B output 3 feeds the B→A pool; even while it points at an A→B
        // sink it must not count as a destination.
        let cfg = TieLineConfig {
            a_to_b: vec![TieLine { output: 7, input: 0 }],
            b_to_a: vec![TieLine { output: 3, input: 6 }],
        };
        let mut engine = TieLineEngine::new(cfg).unwrap();

        let routing_a = BTreeMap::from([(7, 1)]);
        let routing_b = BTreeMap::from([(3, 0), (5, 0)]);
        engine.reconstruct(&routing_a, &routing_b);

        let tl = &engine.state().a_to_b[0];
        assert_eq!(tl.destinations, BTreeSet::from([5]));
    }

    #[test]
    fn reconstruction_frees_idle_lines() {
        let cfg = one_tie_cfg();
        let mut engine = TieLineEngine::new(cfg).unwrap();
        // Carried but unconsumed on the far side.
        engine.reconstruct(&BTreeMap::from([(7, 3)]), &BTreeMap::new());
        assert_eq!(engine.state().a_to_b[0].status, TieLineStatus::Free);

        // Consumed but nothing carried.
        engine.reconstruct(&BTreeMap::new(), &BTreeMap::from([(4, 0)]));
        assert_eq!(engine.state().a_to_b[0].status, TieLineStatus::Free);
    }

    #[test]
    fn update_config_reinitializes_pools() {
        let mut engine = TieLineEngine::new(one_tie_cfg()).unwrap();
        engine.reconstruct(&BTreeMap::from([(7, 3)]), &BTreeMap::from([(4, 0)]));
        assert!(engine.state().a_to_b[0].in_use());

        let cfg = TieLineConfig {
            a_to_b: vec![
                TieLine { output: 7, input: 0 },
                TieLine { output: 6, input: 1 },
            ],
            b_to_a: vec![],
        };
        engine.update_config(cfg).unwrap();
        assert_eq!(engine.state().a_to_b.len(), 2);
        assert!(engine.state().a_to_b.iter().all(|t| !t.in_use()));

        // Invalid update leaves the previous configuration standing.
        let bad = TieLineConfig {
            a_to_b: vec![
                TieLine { output: 5, input: 2 },
                TieLine { output: 5, input: 3 },
            ],
            b_to_a: vec![],
        };
        assert!(engine.update_config(bad).is_err());
        assert_eq!(engine.config().a_to_b.len(), 2);
    }
}
