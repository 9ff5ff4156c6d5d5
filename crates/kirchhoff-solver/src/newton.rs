//! Newton-Raphson iteration over the device stamp protocol.
//!
//! One pass clears the system, loads every device at the current iterate
//! (`rhs_old`), factors, solves into `rhs`, tests convergence and then swaps
//! `rhs` into `rhs_old`. Devices see the initialization phase through
//! [`SimContext::init`](kirchhoff_core::SimContext) and the solver advances
//! it:
//!
//! ```text
//! Junction -> Fix -> Float
//! Transient | Predict | SmallSignal -> Float
//! ```
//!
//! Convergence is only declared in `Float`.

use log::{debug, trace};

use kirchhoff_core::{Circuit, InitMode, NodeId, NodeKind};

use crate::error::{Error, Result};
use crate::interrupt::Interrupt;

/// Conductance used to pull a node toward a nodeset or initial condition.
pub const FORCING_CONDUCTANCE: f64 = 1e10;

/// Largest node-voltage change per iteration with node damping enabled (V).
pub const DAMPING_LIMIT: f64 = 10.0;

/// Where a Newton solve stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NrPhase {
    #[default]
    Initial,
    Iterating,
    Converged,
    Failed,
}

/// A node held near a value through a large conductance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forcing {
    pub node: NodeId,
    pub value: f64,
    /// Applied on every iteration, not only during `Junction` and `Fix`.
    pub persistent: bool,
}

/// Unknown-by-unknown convergence test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    pub reltol: f64,
    /// Absolute tolerance for voltage unknowns.
    pub vntol: f64,
    /// Absolute tolerance for current unknowns.
    pub abstol: f64,
}

impl ConvergenceCriteria {
    pub fn from_options(options: &kirchhoff_core::SimOptions) -> Self {
        Self {
            reltol: options.reltol,
            vntol: options.vntol,
            abstol: options.abstol,
        }
    }

    /// True when `new` is within tolerance of `old` for an unknown of `kind`.
    pub fn within(&self, kind: NodeKind, new: f64, old: f64) -> bool {
        let abs = match kind {
            NodeKind::Voltage => self.vntol,
            NodeKind::Current => self.abstol,
        };
        let tol = self.reltol * new.abs().max(old.abs()) + abs;
        (new - old).abs() <= tol
    }
}

/// Counters from the most recent solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NrStats {
    pub iterations: usize,
    pub factorizations: usize,
    pub reorders: usize,
}

/// Newton-Raphson driver for one circuit.
pub struct Newton<'a> {
    interrupt: &'a dyn Interrupt,
    forcing: Vec<Forcing>,
    /// Conductance added to every diagonal element (gmin stepping).
    diag_gmin: f64,
    phase: NrPhase,
    stats: NrStats,
}

impl<'a> Newton<'a> {
    pub fn new(interrupt: &'a dyn Interrupt) -> Self {
        Self {
            interrupt,
            forcing: Vec::new(),
            diag_gmin: 0.0,
            phase: NrPhase::Initial,
            stats: NrStats::default(),
        }
    }

    /// Nodes to pull toward fixed values while iterating.
    pub fn with_forcing(mut self, forcing: Vec<Forcing>) -> Self {
        self.forcing = forcing;
        self
    }

    pub fn forcing(&self) -> &[Forcing] {
        &self.forcing
    }

    pub fn set_diag_gmin(&mut self, gmin: f64) {
        self.diag_gmin = gmin;
    }

    pub fn phase(&self) -> NrPhase {
        self.phase
    }

    pub fn stats(&self) -> NrStats {
        self.stats
    }

    /// Make sure every forced node has a diagonal element to stamp into.
    ///
    /// Must run after setup and before the first solve.
    pub fn prepare(&self, ckt: &mut Circuit) -> Result<()> {
        for f in &self.forcing {
            if !f.node.is_ground() {
                ckt.ctx.matrix.make_element(f.node.index(), f.node.index())?;
            }
        }
        Ok(())
    }

    /// Create a diagonal element for every unknown so gmin can be added.
    pub fn prepare_diag(&self, ckt: &mut Circuit) -> Result<()> {
        for i in 1..ckt.nodes.len() {
            if ckt.nodes.get(NodeId::new(i as u32)).is_some() {
                ckt.ctx.matrix.make_element(i, i)?;
            }
        }
        Ok(())
    }

    fn apply_extra_stamps(&self, ckt: &mut Circuit) {
        if self.diag_gmin > 0.0 {
            for i in 1..ckt.ctx.len() {
                if let Some(h) = ckt.ctx.matrix.find_element(i, i) {
                    ckt.ctx.matrix.add(h, self.diag_gmin);
                }
            }
        }
        let early = matches!(ckt.ctx.init, InitMode::Junction | InitMode::Fix);
        for f in &self.forcing {
            if f.node.is_ground() || !(f.persistent || early) {
                continue;
            }
            let i = f.node.index();
            if let Some(h) = ckt.ctx.matrix.find_element(i, i) {
                ckt.ctx.matrix.add(h, FORCING_CONDUCTANCE);
                ckt.ctx.rhs[i] += FORCING_CONDUCTANCE * f.value;
            }
        }
    }

    /// Iterate to convergence, starting from `ckt.ctx.rhs_old`.
    ///
    /// Returns the number of iterations. On success the solution is in
    /// `rhs_old` and `init` is `Float`.
    pub fn solve(&mut self, ckt: &mut Circuit, max_iter: usize) -> Result<usize> {
        self.phase = NrPhase::Initial;
        self.stats = NrStats::default();
        let result = self.iterate(ckt, max_iter);
        self.phase = if result.is_ok() {
            NrPhase::Converged
        } else {
            NrPhase::Failed
        };
        result
    }

    fn iterate(&mut self, ckt: &mut Circuit, max_iter: usize) -> Result<usize> {
        let criteria = ConvergenceCriteria::from_options(&ckt.ctx.options);
        let damping = ckt.ctx.options.node_damping;
        let dc = ckt.ctx.is_dc();
        let has_nodesets = dc && self.forcing.iter().any(|f| !f.persistent);
        let mut ipass = false;
        let mut forced_reorder = false;

        if !ckt.ctx.matrix.is_reordered() {
            ckt.ctx.matrix.reorder()?;
            self.stats.reorders += 1;
        }
        self.phase = NrPhase::Iterating;

        loop {
            if self.interrupt.pause_requested() {
                return Err(Error::Paused);
            }

            ckt.load()?;
            self.apply_extra_stamps(ckt);
            self.stats.iterations += 1;
            let iterations = self.stats.iterations;

            let ctx = &mut ckt.ctx;
            match ctx.matrix.factor() {
                Ok(()) => {
                    forced_reorder = false;
                    self.stats.factorizations += 1;
                }
                Err(e) if e.is_matrix_failure() && !forced_reorder => {
                    debug!("iteration {}: {}, reordering", iterations, e);
                    ctx.matrix.reorder()?;
                    self.stats.reorders += 1;
                    forced_reorder = true;
                    ctx.matrix.factor()?;
                    self.stats.factorizations += 1;
                }
                Err(e) => return Err(e.into()),
            }
            ctx.matrix.solve(&mut ctx.rhs)?;
            ctx.rhs[0] = 0.0;

            if iterations > max_iter {
                debug!("no convergence in {} iterations", max_iter);
                return Err(Error::ConvergenceFailed {
                    iterations: max_iter,
                });
            }

            let mut converged = if ctx.noncon == 0 && iterations != 1 {
                self.nodes_converged(ckt, &criteria)?
            } else {
                false
            };

            let ctx = &mut ckt.ctx;
            if damping && !converged && dc && iterations > 1 {
                damp(&mut ctx.rhs, &ctx.rhs_old);
            }

            ctx.swap_solution();
            if converged {
                converged = ckt.convergence_test();
            }
            trace!(
                "iteration {}: init {:?}, noncon {}, converged {}",
                iterations, ckt.ctx.init, ckt.ctx.noncon, converged
            );

            let ctx = &mut ckt.ctx;
            match ctx.init {
                InitMode::Float => {
                    if has_nodesets && ipass {
                        converged = false;
                        ipass = false;
                    }
                    if converged {
                        return Ok(iterations);
                    }
                }
                InitMode::Junction => {
                    ctx.init = InitMode::Fix;
                }
                InitMode::Fix => {
                    if converged {
                        ctx.init = InitMode::Float;
                    }
                    ipass = true;
                }
                InitMode::Transient | InitMode::Predict | InitMode::SmallSignal => {
                    ctx.init = InitMode::Float;
                }
            }
        }
    }

    /// Compare the new solution in `rhs` against `rhs_old`.
    fn nodes_converged(&self, ckt: &Circuit, criteria: &ConvergenceCriteria) -> Result<bool> {
        let ctx = &ckt.ctx;
        for node in ckt.nodes.iter().filter(|n| !n.is_ground()) {
            let i = node.id().index();
            let new = ctx.rhs[i];
            if !new.is_finite() {
                return Err(Error::ConvergenceFailed {
                    iterations: self.stats.iterations,
                });
            }
            if !criteria.within(node.kind(), new, ctx.rhs_old[i]) {
                trace!("{} not converged: {} -> {}", node.name(), ctx.rhs_old[i], new);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Scale the whole update so no node moves by more than [`DAMPING_LIMIT`].
fn damp(rhs: &mut [f64], old: &[f64]) {
    let max = rhs
        .iter()
        .zip(old)
        .skip(1)
        .map(|(n, o)| (n - o).abs())
        .fold(0.0, f64::max);
    if max <= DAMPING_LIMIT {
        return;
    }
    let factor = DAMPING_LIMIT / max;
    for (n, o) in rhs.iter_mut().zip(old).skip(1) {
        *n = o + factor * (*n - o);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::{CancelFlag, NoInterrupt};
    use kirchhoff_core::{Device, Result as CoreResult, SetupContext, SimContext};

    /// A node tied to ground by a conductance with a cubic current term:
    /// i(v) = g v + k v^3, driven by a constant current.
    #[derive(Debug)]
    struct Cubic {
        node: NodeId,
        g: f64,
        k: f64,
        drive: f64,
        h: kirchhoff_core::ElementHandle,
    }

    impl Device for Cubic {
        fn kind(&self) -> &'static str {
            "cubic"
        }

        fn instance_count(&self) -> usize {
            1
        }

        fn setup(&mut self, ctx: &mut SetupContext<'_>) -> CoreResult<()> {
            self.h = ctx.make_element(self.node, self.node)?;
            Ok(())
        }

        fn load(&mut self, ctx: &mut SimContext) -> CoreResult<()> {
            let v = ctx.voltage(self.node);
            let i = self.g * v + self.k * v * v * v;
            let gd = self.g + 3.0 * self.k * v * v;
            ctx.matrix.add(self.h, gd);
            ctx.add_rhs(self.node, self.drive - (i - gd * v));
            Ok(())
        }

        fn ac_load(&mut self, ctx: &mut SimContext) -> CoreResult<()> {
            self.load(ctx)
        }
    }

    fn cubic_circuit() -> (Circuit, NodeId) {
        let mut ckt = Circuit::new().unwrap();
        let a = ckt.node("a");
        ckt.add_device(Cubic {
            node: a,
            g: 1.0,
            k: 1.0,
            drive: 10.0,
            h: Default::default(),
        });
        ckt.setup().unwrap();
        (ckt, a)
    }

    #[test]
    fn test_converges_on_cubic() {
        let (mut ckt, a) = cubic_circuit();
        let mut nr = Newton::new(&NoInterrupt);
        let iters = nr.solve(&mut ckt, 100).unwrap();
        // v + v^3 = 10 at v = 2.
        assert!((ckt.ctx.voltage(a) - 2.0).abs() < 1e-6, "v = {}", ckt.ctx.voltage(a));
        assert_eq!(nr.phase(), NrPhase::Converged);
        assert_eq!(ckt.ctx.init, InitMode::Float);
        assert!(iters > 2 && iters < 30, "iterations = {}", iters);
        assert_eq!(ckt.ctx.rhs_old[0], 0.0);
    }

    #[test]
    fn test_iteration_limit() {
        let (mut ckt, _) = cubic_circuit();
        let mut nr = Newton::new(&NoInterrupt);
        let err = nr.solve(&mut ckt, 3).unwrap_err();
        assert!(matches!(err, Error::ConvergenceFailed { iterations: 3 }));
        assert_eq!(nr.phase(), NrPhase::Failed);
    }

    #[test]
    fn test_pause_before_first_pass() {
        let (mut ckt, _) = cubic_circuit();
        let flag = CancelFlag::new();
        flag.cancel();
        let mut nr = Newton::new(&flag);
        assert!(nr.solve(&mut ckt, 100).unwrap_err().is_pause());
        assert_eq!(nr.stats().iterations, 0);
    }

    #[test]
    fn test_redundant_loads_do_not_change_result() {
        let (mut ckt, a) = cubic_circuit();
        Newton::new(&NoInterrupt).solve(&mut ckt, 100).unwrap();
        let first = ckt.ctx.voltage(a);
        ckt.load().unwrap();
        ckt.load().unwrap();
        Newton::new(&NoInterrupt).solve(&mut ckt, 100).unwrap();
        assert!((ckt.ctx.voltage(a) - first).abs() < 1e-9);
    }

    #[test]
    fn test_criteria_by_kind() {
        let c = ConvergenceCriteria {
            reltol: 1e-3,
            vntol: 1e-6,
            abstol: 1e-12,
        };
        assert!(c.within(NodeKind::Voltage, 1.0, 1.0005));
        assert!(!c.within(NodeKind::Voltage, 1.0, 1.002));
        assert!(c.within(NodeKind::Voltage, 0.0, 5e-7));
        assert!(!c.within(NodeKind::Current, 0.0, 5e-7));
    }

    #[test]
    fn test_damping_scales_update() {
        let mut rhs = vec![0.0, 30.0, 5.0];
        let old = vec![0.0, 0.0, 0.0];
        damp(&mut rhs, &old);
        assert!((rhs[1] - 10.0).abs() < 1e-12);
        assert!((rhs[2] - 5.0 / 3.0).abs() < 1e-12);
    }
}
