//! DC operating point.
//!
//! Tries a direct Newton solve first, then gmin stepping, then source
//! stepping. Each stepping strategy walks from an easy problem to the real
//! one, reusing every intermediate solution as the next starting point.

use log::{debug, info, warn};

use kirchhoff_core::{Analysis, Circuit, InitMode};

use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::newton::{Forcing, Newton};
use crate::output::{OutputSink, PlotHeader, ScaleKind, Values, node_vectors, real_values};

/// How the operating point was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStrategy {
    Direct,
    GminStepping,
    SourceStepping,
}

/// Outcome of an operating-point solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpResult {
    /// Newton iterations of the final (full-strength) solve.
    pub iterations: usize,
    /// Newton iterations over every attempt.
    pub total_iterations: usize,
    pub strategy: OpStrategy,
}

/// Nodesets (first iterations only) and, optionally, initial conditions
/// (every iteration) as forced node values.
pub fn node_forcing(ckt: &Circuit, include_ic: bool) -> Vec<Forcing> {
    ckt.nodes
        .iter()
        .filter(|n| !n.is_ground())
        .filter_map(|n| match (n.ic, n.nodeset) {
            (Some(ic), _) if include_ic => Some(Forcing {
                node: n.id(),
                value: ic,
                persistent: true,
            }),
            (_, Some(ns)) => Some(Forcing {
                node: n.id(),
                value: ns,
                persistent: false,
            }),
            _ => None,
        })
        .collect()
}

/// Solve the DC operating point of an already set-up circuit.
///
/// The caller chooses the analysis mode; the starting point is whatever
/// `rhs_old` holds. On success `rhs_old` holds the solution, `init` is
/// `Float`, and the source factor and gmin are back at full strength.
pub fn dc_solve(ckt: &mut Circuit, newton: &mut Newton<'_>, max_iter: usize) -> Result<OpResult> {
    newton.prepare(ckt)?;
    let result = dc_solve_inner(ckt, newton, max_iter);
    ckt.ctx.src_fact = 1.0;
    ckt.ctx.gmin = ckt.ctx.options.gmin;
    newton.set_diag_gmin(0.0);
    result
}

fn dc_solve_inner(ckt: &mut Circuit, newton: &mut Newton<'_>, max_iter: usize) -> Result<OpResult> {
    let opts = ckt.ctx.options.clone();
    let mut total = 0;

    ckt.ctx.init = InitMode::Junction;
    match newton.solve(ckt, max_iter) {
        Ok(iterations) => {
            return Ok(OpResult {
                iterations,
                total_iterations: iterations,
                strategy: OpStrategy::Direct,
            });
        }
        Err(e) if e.is_convergence_failure() => {
            total += newton.stats().iterations;
            warn!("operating point: direct solve failed ({}), trying gmin stepping", e);
        }
        Err(e) => return Err(e),
    }

    if opts.gmin_steps > 0 {
        match gmin_stepping(ckt, newton, max_iter, &mut total) {
            Ok(iterations) => {
                return Ok(OpResult {
                    iterations,
                    total_iterations: total,
                    strategy: OpStrategy::GminStepping,
                });
            }
            Err(e) if e.is_convergence_failure() => {
                warn!("operating point: gmin stepping failed ({}), trying source stepping", e);
            }
            Err(e) => return Err(e),
        }
    }

    if opts.src_steps > 0 {
        match source_stepping(ckt, newton, max_iter, &mut total) {
            Ok(iterations) => {
                return Ok(OpResult {
                    iterations,
                    total_iterations: total,
                    strategy: OpStrategy::SourceStepping,
                });
            }
            Err(e) if e.is_convergence_failure() => {
                warn!("operating point: source stepping failed ({})", e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::ConvergenceFailed { iterations: total })
}

/// Start with `gmin * 10^steps` on every diagonal and junction, then drop
/// one decade per solve down to the real gmin.
fn gmin_stepping(
    ckt: &mut Circuit,
    newton: &mut Newton<'_>,
    max_iter: usize,
    total: &mut usize,
) -> Result<usize> {
    let steps = ckt.ctx.options.gmin_steps;
    let gmin = ckt.ctx.options.gmin;
    newton.prepare_diag(ckt)?;
    ckt.ctx.rhs_old.fill(0.0);
    ckt.ctx.init = InitMode::Junction;

    for k in (0..=steps).rev() {
        let step_gmin = gmin * 10f64.powi(k as i32);
        ckt.ctx.gmin = step_gmin;
        newton.set_diag_gmin(if k == 0 { 0.0 } else { step_gmin });
        let iterations = newton.solve(ckt, max_iter);
        *total += newton.stats().iterations;
        let iterations = iterations?;
        debug!("gmin step {:e}: {} iterations", step_gmin, iterations);
        if k == 0 {
            return Ok(iterations);
        }
        ckt.ctx.init = InitMode::Float;
    }
    Err(Error::ConvergenceFailed { iterations: *total })
}

/// Ramp every independent source from zero to full value.
fn source_stepping(
    ckt: &mut Circuit,
    newton: &mut Newton<'_>,
    max_iter: usize,
    total: &mut usize,
) -> Result<usize> {
    let steps = ckt.ctx.options.src_steps;
    ckt.ctx.gmin = ckt.ctx.options.gmin;
    newton.set_diag_gmin(0.0);
    ckt.ctx.rhs_old.fill(0.0);
    ckt.ctx.init = InitMode::Junction;

    for k in 0..=steps {
        ckt.ctx.src_fact = k as f64 / steps as f64;
        let iterations = newton.solve(ckt, max_iter);
        *total += newton.stats().iterations;
        let iterations = iterations?;
        debug!("source step {:.3}: {} iterations", ckt.ctx.src_fact, iterations);
        if k == steps {
            return Ok(iterations);
        }
        ckt.ctx.init = InitMode::Float;
    }
    Err(Error::ConvergenceFailed { iterations: *total })
}

/// Run a stand-alone operating-point analysis and emit one record.
pub fn run_op(
    ckt: &mut Circuit,
    interrupt: &dyn Interrupt,
    sink: &mut dyn OutputSink,
) -> Result<OpResult> {
    ckt.setup()?;
    ckt.ctx.analysis = Analysis::Op;
    ckt.ctx.rhs_old.fill(0.0);
    let forcing = node_forcing(ckt, false);
    let mut newton = Newton::new(interrupt).with_forcing(forcing);
    let max_iter = ckt.ctx.options.itl1;
    let result = dc_solve(ckt, &mut newton, max_iter)?;
    info!(
        "operating point: {:?} in {} iterations",
        result.strategy, result.total_iterations
    );

    sink.begin_plot(PlotHeader {
        name: "op".to_string(),
        scale: ScaleKind::None,
        vectors: node_vectors(&ckt.nodes),
        complex: false,
    })?;
    sink.data(0.0, &Values::Real(real_values(ckt)))?;
    sink.end_plot()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::NoInterrupt;
    use crate::output::Recorder;
    use kirchhoff_core::{Device, ElementHandle, NodeId, SetupContext, SimContext};

    /// Conductance `g` from `node` to ground driven by current `i`.
    #[derive(Debug)]
    struct Norton {
        node: NodeId,
        g: f64,
        i: f64,
        h: ElementHandle,
    }

    impl Device for Norton {
        fn kind(&self) -> &'static str {
            "norton"
        }

        fn instance_count(&self) -> usize {
            1
        }

        fn setup(&mut self, ctx: &mut SetupContext<'_>) -> kirchhoff_core::Result<()> {
            self.h = ctx.make_element(self.node, self.node)?;
            Ok(())
        }

        fn load(&mut self, ctx: &mut SimContext) -> kirchhoff_core::Result<()> {
            ctx.matrix.add(self.h, self.g);
            let i = self.i * ctx.src_fact;
            ctx.add_rhs(self.node, i);
            Ok(())
        }

        fn ac_load(&mut self, ctx: &mut SimContext) -> kirchhoff_core::Result<()> {
            ctx.matrix.add(self.h, self.g);
            Ok(())
        }
    }

    fn norton(g: f64, i: f64) -> (Circuit, NodeId) {
        let mut ckt = Circuit::new().unwrap();
        let a = ckt.node("a");
        ckt.add_device(Norton {
            node: a,
            g,
            i,
            h: ElementHandle::default(),
        });
        (ckt, a)
    }

    /// What a [`Stubborn`] device must see before it stops reporting
    /// non-convergence.
    #[derive(Debug, Clone, Copy)]
    enum Relaxation {
        Gmin,
        Source,
    }

    /// A [`Norton`] that flags every iteration as unconverged until the
    /// solver has relaxed the problem once.
    #[derive(Debug)]
    struct Stubborn {
        inner: Norton,
        needs: Relaxation,
        relaxed: bool,
    }

    impl Device for Stubborn {
        fn kind(&self) -> &'static str {
            "stubborn"
        }

        fn instance_count(&self) -> usize {
            1
        }

        fn setup(&mut self, ctx: &mut SetupContext<'_>) -> kirchhoff_core::Result<()> {
            self.inner.setup(ctx)
        }

        fn load(&mut self, ctx: &mut SimContext) -> kirchhoff_core::Result<()> {
            self.relaxed |= match self.needs {
                Relaxation::Gmin => ctx.gmin > ctx.options.gmin,
                Relaxation::Source => ctx.src_fact < 1.0,
            };
            if !self.relaxed {
                ctx.noncon += 1;
            }
            self.inner.load(ctx)
        }

        fn ac_load(&mut self, ctx: &mut SimContext) -> kirchhoff_core::Result<()> {
            self.inner.ac_load(ctx)
        }
    }

    fn stubborn(needs: Relaxation) -> (Circuit, NodeId) {
        let mut ckt = Circuit::new().unwrap();
        let a = ckt.node("a");
        ckt.add_device(Stubborn {
            inner: Norton {
                node: a,
                g: 1e-3,
                i: 2e-3,
                h: ElementHandle::default(),
            },
            needs,
            relaxed: false,
        });
        (ckt, a)
    }

    #[test]
    fn test_falls_back_to_gmin_stepping() {
        let (mut ckt, a) = stubborn(Relaxation::Gmin);
        let result = run_op(&mut ckt, &NoInterrupt, &mut crate::output::NullSink).unwrap();
        assert_eq!(result.strategy, OpStrategy::GminStepping);
        assert!(result.total_iterations > ckt.options().itl1);
        assert!(result.iterations <= result.total_iterations);
        assert!((ckt.ctx.voltage(a) - 2.0).abs() < 1e-9);
        // Back at full strength once the solve returns.
        assert_eq!(ckt.ctx.gmin, ckt.options().gmin);
        assert_eq!(ckt.ctx.init, InitMode::Float);
    }

    #[test]
    fn test_falls_back_to_source_stepping() {
        let (mut ckt, a) = stubborn(Relaxation::Source);
        let result = run_op(&mut ckt, &NoInterrupt, &mut crate::output::NullSink).unwrap();
        assert_eq!(result.strategy, OpStrategy::SourceStepping);
        assert!((ckt.ctx.voltage(a) - 2.0).abs() < 1e-9);
        assert_eq!(ckt.ctx.src_fact, 1.0);
    }

    #[test]
    fn test_source_stepping_without_gmin_steps() {
        let (mut ckt, a) = stubborn(Relaxation::Source);
        ckt.options_mut().gmin_steps = 0;
        let result = run_op(&mut ckt, &NoInterrupt, &mut crate::output::NullSink).unwrap();
        assert_eq!(result.strategy, OpStrategy::SourceStepping);
        assert!((ckt.ctx.voltage(a) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_every_strategy_fails() {
        let (mut ckt, _) = stubborn(Relaxation::Source);
        ckt.options_mut().src_steps = 0;
        let err = run_op(&mut ckt, &NoInterrupt, &mut crate::output::NullSink).unwrap_err();
        assert!(matches!(err, Error::ConvergenceFailed { .. }));
    }

    #[test]
    fn test_linear_op_is_direct() {
        let (mut ckt, a) = norton(1e-3, 1e-3);
        let mut rec = Recorder::new();
        let result = run_op(&mut ckt, &NoInterrupt, &mut rec).unwrap();
        assert_eq!(result.strategy, OpStrategy::Direct);
        assert!(result.iterations <= 5);
        assert!((ckt.ctx.voltage(a) - 1.0).abs() < 1e-9);
        let plot = rec.plot("op").unwrap();
        assert_eq!(plot.header.vectors, vec!["v(a)".to_string()]);
        assert!((plot.real("v(a)").unwrap()[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_nodeset_only_guides() {
        let (mut ckt, a) = norton(1e-3, 1e-3);
        ckt.nodes.set_nodeset("a", 5.0).unwrap();
        run_op(&mut ckt, &NoInterrupt, &mut crate::output::NullSink).unwrap();
        assert!((ckt.ctx.voltage(a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_forcing_from_nodes() {
        let (mut ckt, a) = norton(1.0, 0.0);
        ckt.nodes.set_nodeset("a", 2.0).unwrap();
        ckt.nodes.set_ic("a", 3.0).unwrap();
        let f = node_forcing(&ckt, true);
        assert_eq!(f, vec![Forcing { node: a, value: 3.0, persistent: true }]);
        let f = node_forcing(&ckt, false);
        assert_eq!(f, vec![Forcing { node: a, value: 2.0, persistent: false }]);
    }
}
