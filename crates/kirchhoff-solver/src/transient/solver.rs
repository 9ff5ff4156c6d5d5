//! Time-stepping driver.

use log::{debug, info, trace};

use kirchhoff_core::{Analysis, Circuit, InitMode, NUM_STATE_VECTORS};

use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::newton::Newton;
use crate::op::{dc_solve, node_forcing};
use crate::output::{OutputSink, PlotHeader, ScaleKind, Values, node_vectors, real_values};

use super::result::TransientSummary;
use super::types::{SyncHook, TranPhase, TransientParams};

/// Smallest step, relative to the largest one.
const DELMIN_FACTOR: f64 = 1e-11;

/// Breakpoints closer than this fraction of the largest step are merged.
const MIN_BREAK_FACTOR: f64 = 5e-5;

/// A step is rejected when the truncation error asks for less than this
/// fraction of it.
const REJECT_RATIO: f64 = 0.9;

/// Largest growth of the step from one time point to the next.
const MAX_GROWTH: f64 = 2.0;

/// Why an attempt was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Newton,
    Truncation,
    Sync,
}

/// Drives one transient analysis a step at a time.
///
/// [`TransientDriver::initialize`] solves the starting point and emits it;
/// every [`TransientDriver::advance`] makes one attempt at the next time
/// point. [`run_transient`] loops until [`TranPhase::Done`].
pub struct TransientDriver<'a> {
    params: TransientParams,
    interrupt: &'a dyn Interrupt,
    newton: Newton<'a>,
    phase: TranPhase,
    tmax: f64,
    delmin: f64,
    max_order: usize,
    /// Last committed time.
    time: f64,
    /// Step for the next attempt.
    delta: f64,
    /// Step in use before it was cut to land on a breakpoint.
    save_delta: f64,
    /// No time point after the initial one has been committed yet.
    first: bool,
    /// The next attempt repeats a rejected one.
    redo: bool,
    /// Consecutive Newton failures at the current time.
    retries: usize,
    /// Solution at the last committed time.
    accepted: Vec<f64>,
    summary: TransientSummary,
}

impl<'a> TransientDriver<'a> {
    pub fn new(params: TransientParams, interrupt: &'a dyn Interrupt) -> Result<Self> {
        params.validate()?;
        let tmax = params.max_step();
        let delta = params.initial_step();
        Ok(Self {
            interrupt,
            newton: Newton::new(interrupt),
            phase: TranPhase::Setup,
            tmax,
            delmin: DELMIN_FACTOR * tmax,
            max_order: 1,
            time: 0.0,
            delta,
            save_delta: params.tstop / 50.0,
            first: true,
            redo: false,
            retries: 0,
            accepted: Vec::new(),
            summary: TransientSummary::default(),
            params,
        })
    }

    pub fn phase(&self) -> TranPhase {
        self.phase
    }

    /// Last committed time.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn summary(&self) -> &TransientSummary {
        &self.summary
    }

    /// Establish the starting point (operating point, or initial
    /// conditions with UIC), register breakpoints, and emit the record at
    /// t = 0.
    pub fn initialize(&mut self, ckt: &mut Circuit, sink: &mut dyn OutputSink) -> Result<()> {
        ckt.setup()?;
        let opts = ckt.ctx.options.clone();
        self.max_order = opts.effective_max_order();

        let ctx = &mut ckt.ctx;
        ctx.method = opts.method;
        ctx.order = 1;
        ctx.time = 0.0;
        ctx.delta = self.delta;
        ctx.delta_old = [self.tmax; NUM_STATE_VECTORS];
        ctx.uic = self.params.uic;
        ctx.breakpoints.clear();
        ctx.breakpoints.set_min_spacing(MIN_BREAK_FACTOR * self.tmax);
        ctx.breakpoints.set(self.params.tstop);
        for &t in &self.params.breakpoints {
            if t > 0.0 && t < self.params.tstop {
                ctx.breakpoints.set(t);
            }
        }
        ctx.rhs_old.fill(0.0);

        if self.params.uic {
            ctx.analysis = Analysis::Transient;
            ctx.states.zero();
            for node in ckt.nodes.iter() {
                if let Some(ic) = node.ic {
                    ckt.ctx.rhs_old[node.id().index()] = ic;
                }
            }
            info!("transient: starting from initial conditions");
        } else {
            ctx.analysis = Analysis::Op;
            let forcing = node_forcing(ckt, true);
            let mut newton = Newton::new(self.interrupt).with_forcing(forcing);
            let op = dc_solve(ckt, &mut newton, opts.itl1)?;
            self.summary.iterations += op.total_iterations;
            for age in 1..NUM_STATE_VECTORS {
                ckt.ctx.states.copy(0, age);
            }
            ckt.ctx.analysis = Analysis::Transient;
            info!(
                "transient: operating point in {} iterations ({:?})",
                op.total_iterations, op.strategy
            );
        }

        // Sources register their first breakpoints.
        ckt.accept()?;
        self.accepted = ckt.ctx.rhs_old.clone();

        sink.begin_plot(PlotHeader {
            name: "tran".to_string(),
            scale: ScaleKind::Time,
            vectors: node_vectors(&ckt.nodes),
            complex: false,
        })?;
        if self.params.tstart <= 0.0 {
            sink.data(0.0, &Values::Real(real_values(ckt)))?;
        }
        self.summary.accepted_steps = 1;
        ckt.ctx.init = InitMode::Transient;
        self.phase = TranPhase::Stepping;
        Ok(())
    }

    /// Make one attempt at the next time point.
    ///
    /// Returns the resulting phase: `StepAccepted`, `StepRejected`, or
    /// `Done` once `tstop` has been committed.
    pub fn advance(
        &mut self,
        ckt: &mut Circuit,
        sync: &mut dyn SyncHook,
        sink: &mut dyn OutputSink,
    ) -> Result<TranPhase> {
        match self.phase {
            TranPhase::Setup => {
                return Err(Error::InvalidJob(
                    "transient driver used before initialize".to_string(),
                ));
            }
            TranPhase::Done => return Ok(TranPhase::Done),
            _ => {}
        }
        if self.interrupt.pause_requested() {
            return Err(Error::Paused);
        }

        if !self.redo {
            self.new_time_point(ckt);
        }
        // Nothing has been tried yet, so a redo request here only sets the step.
        let decision = sync.sync(self.time, self.delta, ckt.ctx.delta_old[1], self.redo);
        if decision.delta.is_finite() && decision.delta > 0.0 {
            self.delta = decision.delta;
        }
        self.clamp_to_breakpoint(ckt);

        let ctx = &mut ckt.ctx;
        ctx.delta = self.delta;
        ctx.delta_old[0] = self.delta;
        ctx.time = self.time + self.delta;
        ctx.compute_coefficients();
        ctx.init = if self.first {
            InitMode::Transient
        } else {
            InitMode::Predict
        };
        trace!(
            "attempt t = {:e}, delta = {:e}, order {}",
            ctx.time, self.delta, ctx.order
        );

        let max_iter = ckt.ctx.options.itl4;
        let solved = self.newton.solve(ckt, max_iter);
        self.summary.iterations += self.newton.stats().iterations;
        match solved {
            Ok(_) => {}
            Err(e) if e.is_convergence_failure() => {
                debug!("t = {:e}: {}, cutting step", ckt.ctx.time, e);
                self.summary.nr_failures += 1;
                return self.reject(ckt, self.delta / 8.0, Rejection::Newton);
            }
            Err(e) => return Err(e),
        }

        let mut next = MAX_GROWTH * self.delta;
        if !self.first {
            ckt.truncation_error(&mut next);
            if next < REJECT_RATIO * self.delta {
                return self.reject(ckt, next, Rejection::Truncation);
            }
            if ckt.ctx.order == 1 && self.max_order > 1 {
                ckt.ctx.order = 2;
                let mut next2 = MAX_GROWTH * self.delta;
                ckt.truncation_error(&mut next2);
                if next2 <= 1.05 * self.delta {
                    ckt.ctx.order = 1;
                }
            }
        }

        let decision = sync.sync(ckt.ctx.time, next, self.delta, false);
        if decision.redo {
            let retry = if decision.delta.is_finite()
                && decision.delta > 0.0
                && decision.delta < self.delta
            {
                decision.delta
            } else {
                self.delta / 2.0
            };
            return self.reject(ckt, retry, Rejection::Sync);
        }
        if decision.delta.is_finite() && decision.delta > 0.0 {
            next = decision.delta;
        }

        self.commit(ckt, next, sink)
    }

    /// Rotate history and pick the step for a new time point.
    fn new_time_point(&mut self, ckt: &mut Circuit) {
        let ctx = &mut ckt.ctx;
        self.delta = self.delta.min(self.tmax);
        if let Some(bp) = ctx.breakpoints.first() {
            if bp - self.time <= self.delmin {
                // Just landed on a breakpoint: restart at low order with a
                // short step.
                ctx.order = 1;
                let gap = ctx
                    .breakpoints
                    .second()
                    .map(|next| next - bp)
                    .unwrap_or(self.save_delta);
                self.delta = self.delta.min(0.1 * self.save_delta.min(gap));
                self.delta = self.delta.max(2.0 * self.delmin);
                ctx.breakpoints.clear_through(self.time);
            }
        }
        ctx.states.rotate();
        ctx.delta_old.rotate_right(1);
    }

    /// Never step over the next breakpoint or past `tstop`.
    fn clamp_to_breakpoint(&mut self, ckt: &Circuit) {
        if let Some(bp) = ckt.ctx.breakpoints.first() {
            if self.time + self.delta >= bp {
                self.save_delta = self.delta;
                self.delta = bp - self.time;
            }
        }
        self.delta = self.delta.min(self.params.tstop - self.time);
    }

    fn reject(&mut self, ckt: &mut Circuit, delta: f64, why: Rejection) -> Result<TranPhase> {
        let ctx = &mut ckt.ctx;
        ctx.time = self.time;
        ctx.rhs_old.copy_from_slice(&self.accepted);
        if why == Rejection::Newton {
            ctx.order = 1;
            self.retries += 1;
        }
        self.summary.rejected_steps += 1;
        self.redo = true;
        debug!(
            "t = {:e}: step {:e} rejected ({:?}), retrying with {:e}",
            self.time, self.delta, why, delta
        );
        self.delta = delta;

        if self.retries > ctx.options.max_retries {
            return Err(Error::RetriesExhausted {
                time: self.time,
                retries: self.retries - 1,
            });
        }
        if !(self.delta >= self.delmin) {
            return Err(Error::TimestepTooSmall {
                time: self.time,
                delta: self.delta,
            });
        }
        self.phase = TranPhase::StepRejected;
        Ok(self.phase)
    }

    fn commit(&mut self, ckt: &mut Circuit, next: f64, sink: &mut dyn OutputSink) -> Result<TranPhase> {
        if self.first {
            for age in 2..NUM_STATE_VECTORS {
                ckt.ctx.states.copy(1, age);
            }
            self.first = false;
        }

        let mut time = ckt.ctx.time;
        if let Some(bp) = ckt.ctx.breakpoints.first() {
            if (bp - time).abs() <= self.delmin {
                time = bp;
            }
        }
        if self.params.tstop - time <= self.delmin {
            time = self.params.tstop;
        }
        ckt.ctx.time = time;
        ckt.accept()?;

        self.summary.record_step(self.delta, time);
        self.time = time;
        self.accepted.copy_from_slice(&ckt.ctx.rhs_old);
        self.delta = next;
        self.redo = false;
        self.retries = 0;

        if time >= self.params.tstart {
            sink.data(time, &Values::Real(real_values(ckt)))?;
        }
        if time >= self.params.tstop {
            sink.end_plot()?;
            self.phase = TranPhase::Done;
        } else {
            self.phase = TranPhase::StepAccepted;
        }
        Ok(self.phase)
    }
}

/// Run a transient analysis to `tstop`, emitting one record per accepted
/// time point.
///
/// On failure the records already emitted stay in the sink; the plot is
/// left open.
pub fn run_transient(
    ckt: &mut Circuit,
    params: &TransientParams,
    sync: &mut dyn SyncHook,
    interrupt: &dyn Interrupt,
    sink: &mut dyn OutputSink,
) -> Result<TransientSummary> {
    let mut driver = TransientDriver::new(params.clone(), interrupt)?;
    driver.initialize(ckt, sink)?;
    while driver.advance(ckt, sync, sink)? != TranPhase::Done {}
    let summary = driver.summary().clone();
    info!(
        "transient: {} points, {} rejected, {} iterations",
        summary.accepted_steps, summary.rejected_steps, summary.iterations
    );
    Ok(summary)
}
