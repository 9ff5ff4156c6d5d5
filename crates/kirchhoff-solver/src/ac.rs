//! Small-signal frequency sweep.
//!
//! The operating point is solved once and frozen; every device is then
//! loaded in `SmallSignal` mode so nonlinear models store their
//! conductances and capacitances. Each frequency point is a single complex
//! factor and solve.

use std::f64::consts::PI;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use kirchhoff_core::{Analysis, Circuit, InitMode};

use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::newton::Newton;
use crate::op::{OpResult, dc_solve, node_forcing};
use crate::output::{OutputSink, PlotHeader, ScaleKind, Values, complex_values, node_vectors};

/// Lowest start frequency of a logarithmic sweep.
const MIN_LOG_START: f64 = 1e-3;

/// Frequency stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepType {
    /// `steps` points, equally spaced.
    Linear,
    /// `steps` points per decade.
    Decade,
    /// `steps` points per octave.
    Octave,
}

/// Number of points and the step between them.
///
/// Linear sweeps add the step; logarithmic sweeps multiply by it.
pub fn count_steps(sweep: SweepType, start: f64, stop: f64, steps: usize) -> (usize, f64) {
    let steps = steps.max(1);
    let (start, stop) = log_range(sweep, start, stop);
    let (count, step) = match sweep {
        SweepType::Linear => (steps as f64, (stop - start) / steps as f64),
        SweepType::Decade => (
            (steps as f64 * (stop / start).log10() + 1.01).floor(),
            10f64.powf(1.0 / steps as f64),
        ),
        SweepType::Octave => (
            (steps as f64 * (stop / start).log2() + 1.01).floor(),
            2f64.powf(1.0 / steps as f64),
        ),
    };
    let count = if count.is_finite() && count >= 1.0 {
        count as usize
    } else {
        1
    };
    (count, step)
}

/// Clamp the range of a logarithmic sweep to something it can walk.
fn log_range(sweep: SweepType, start: f64, stop: f64) -> (f64, f64) {
    if sweep == SweepType::Linear {
        return (start, stop);
    }
    let start = if start <= 0.0 { MIN_LOG_START } else { start };
    let stop = match sweep {
        _ if stop > start => stop,
        SweepType::Octave => 2.0 * start,
        _ => 10.0 * start,
    };
    (start, stop)
}

/// An AC sweep request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcSweep {
    pub sweep: SweepType,
    pub start: f64,
    pub stop: f64,
    /// Points per decade or octave, or the total for a linear sweep.
    pub steps: usize,
}

impl AcSweep {
    pub fn linear(start: f64, stop: f64, steps: usize) -> Self {
        Self {
            sweep: SweepType::Linear,
            start,
            stop,
            steps,
        }
    }

    pub fn decade(start: f64, stop: f64, steps: usize) -> Self {
        Self {
            sweep: SweepType::Decade,
            start,
            stop,
            steps,
        }
    }

    pub fn octave(start: f64, stop: f64, steps: usize) -> Self {
        Self {
            sweep: SweepType::Octave,
            start,
            stop,
            steps,
        }
    }

    /// A single frequency.
    pub fn point(freq: f64) -> Self {
        Self::linear(freq, freq, 1)
    }

    /// `(count, step)` as returned by [`count_steps`].
    pub fn count_steps(&self) -> (usize, f64) {
        count_steps(self.sweep, self.start, self.stop, self.steps)
    }

    /// Every frequency of the sweep, in order.
    pub fn frequencies(&self) -> Vec<f64> {
        let (count, step) = self.count_steps();
        let (mut freq, _) = log_range(self.sweep, self.start, self.stop);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(freq);
            match self.sweep {
                SweepType::Linear => freq += step,
                SweepType::Decade | SweepType::Octave => freq *= step,
            }
        }
        out
    }

    pub fn validate(&self) -> Result<()> {
        if !self.start.is_finite() || !self.stop.is_finite() || self.start < 0.0 {
            return Err(Error::InvalidJob(format!(
                "ac sweep range {} to {} is not usable",
                self.start, self.stop
            )));
        }
        Ok(())
    }
}

/// Solve the operating point, freeze it, and let every device store its
/// small-signal parameters.
pub(crate) fn small_signal_op(ckt: &mut Circuit, interrupt: &dyn Interrupt) -> Result<OpResult> {
    ckt.setup()?;
    ckt.ctx.analysis = Analysis::Op;
    ckt.ctx.rhs_old.fill(0.0);
    let forcing = node_forcing(ckt, false);
    let mut newton = Newton::new(interrupt).with_forcing(forcing);
    let max_iter = ckt.ctx.options.itl1;
    let op = dc_solve(ckt, &mut newton, max_iter)?;

    ckt.ctx.init = InitMode::SmallSignal;
    ckt.load()?;
    ckt.ctx.analysis = Analysis::Ac;
    Ok(op)
}

/// Load, factor and solve one frequency point.
///
/// The complex solution ends up in `rhs_old`/`irhs_old`; the matrix stays
/// factored for reuse.
pub(crate) fn solve_point(ckt: &mut Circuit, freq: f64) -> Result<()> {
    ckt.ctx.omega = 2.0 * PI * freq;
    ckt.ac_load()?;
    let ctx = &mut ckt.ctx;
    match ctx.matrix.factor_complex() {
        Ok(()) => {}
        Err(e) if e.is_matrix_failure() => {
            debug!("ac point {:e} Hz: {}, reordering", freq, e);
            ctx.matrix.reorder()?;
            ctx.matrix.factor_complex()?;
        }
        Err(e) => return Err(e.into()),
    }
    ctx.matrix.solve_complex(&mut ctx.rhs, &mut ctx.irhs)?;
    ctx.swap_solution();
    Ok(())
}

/// Run an AC sweep, emitting one complex record per frequency.
///
/// Returns the number of points emitted.
pub fn run_ac(
    ckt: &mut Circuit,
    sweep: &AcSweep,
    interrupt: &dyn Interrupt,
    sink: &mut dyn OutputSink,
) -> Result<usize> {
    sweep.validate()?;
    let freqs = sweep.frequencies();
    let op = small_signal_op(ckt, interrupt)?;
    info!(
        "ac sweep: {} points from {:e} Hz (operating point in {} iterations)",
        freqs.len(),
        freqs.first().copied().unwrap_or(0.0),
        op.total_iterations
    );

    sink.begin_plot(PlotHeader {
        name: "ac".to_string(),
        scale: ScaleKind::Frequency,
        vectors: node_vectors(&ckt.nodes),
        complex: true,
    })?;
    for &freq in &freqs {
        if interrupt.pause_requested() {
            return Err(Error::Paused);
        }
        solve_point(ckt, freq)?;
        sink.data(freq, &Values::Complex(complex_values(ckt)))?;
    }
    sink.end_plot()?;
    Ok(freqs.len())
}
