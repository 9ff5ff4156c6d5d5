//! DC transfer sweep.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use kirchhoff_core::{Analysis, Circuit, InitMode, ParamKind, ParamRef};

use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::newton::Newton;
use crate::op::{dc_solve, node_forcing};
use crate::output::{OutputSink, PlotHeader, ScaleKind, Values, node_vectors, real_values};

/// Relative slack when deciding whether `stop` is still inside the sweep.
const SWEEP_SLACK: f64 = 1e-10;

/// Sweep one device parameter across a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcSweepParams {
    /// Instance name, e.g. `"v1"`.
    pub instance: String,
    /// Parameter name; the instance's principal parameter when `None`.
    #[serde(default)]
    pub param: Option<String>,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl DcSweepParams {
    pub fn new(instance: impl Into<String>, start: f64, stop: f64, step: f64) -> Self {
        Self {
            instance: instance.into(),
            param: None,
            start,
            stop,
            step,
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// Number of sweep points, `stop` included.
    pub fn count(&self) -> Result<usize> {
        let span = self.stop - self.start;
        if span == 0.0 {
            return Ok(1);
        }
        if self.step == 0.0 || !self.step.is_finite() || span.signum() != self.step.signum() {
            return Err(Error::InvalidJob(format!(
                "dc sweep step {} cannot reach {} from {}",
                self.step, self.stop, self.start
            )));
        }
        let n = ((span / self.step) * (1.0 + SWEEP_SLACK)).floor();
        let too_many = || {
            Error::InvalidJob(format!(
                "dc sweep from {} to {} by {} has too many points",
                self.start, self.stop, self.step
            ))
        };
        if !n.is_finite() || n >= usize::MAX as f64 {
            return Err(too_many());
        }
        (n as usize).checked_add(1).ok_or_else(too_many)
    }

    /// Value of point `k`.
    pub fn value(&self, k: usize) -> f64 {
        self.start + k as f64 * self.step
    }
}

fn find_param(ckt: &Circuit, params: &DcSweepParams) -> Result<(usize, ParamRef)> {
    let found = match &params.param {
        Some(name) => ckt.find_param(&params.instance, name),
        None => ckt
            .parameters()
            .into_iter()
            .find(|(_, p)| p.instance_name == params.instance && p.kind == ParamKind::Principal),
    };
    found.ok_or_else(|| {
        Error::InvalidJob(format!(
            "no parameter {} on {}",
            params.param.as_deref().unwrap_or("(principal)"),
            params.instance
        ))
    })
}

/// Run a DC sweep, emitting one real record per point.
///
/// The swept parameter is restored afterwards, whether or not the sweep
/// succeeds.
pub fn run_dc_sweep(
    ckt: &mut Circuit,
    params: &DcSweepParams,
    interrupt: &dyn Interrupt,
    sink: &mut dyn OutputSink,
) -> Result<usize> {
    let count = params.count()?;
    ckt.setup()?;
    let (device, param) = find_param(ckt, params)?;
    let original = ckt
        .param(device, &param)
        .ok_or_else(|| Error::InvalidJob(format!("{} is not readable", param.display_name())))?;

    ckt.ctx.analysis = Analysis::DcSweep;
    ckt.ctx.rhs_old.fill(0.0);
    info!(
        "dc sweep of {} from {} to {} ({} points)",
        param.display_name(),
        params.start,
        params.stop,
        count
    );

    sink.begin_plot(PlotHeader {
        name: "dc".to_string(),
        scale: ScaleKind::Sweep,
        vectors: node_vectors(&ckt.nodes),
        complex: false,
    })?;

    let result = sweep(ckt, params, count, device, &param, interrupt, sink);

    ckt.set_param(device, &param, original)?;
    ckt.temperature_device(device)?;
    result?;
    sink.end_plot()?;
    Ok(count)
}

fn sweep(
    ckt: &mut Circuit,
    params: &DcSweepParams,
    count: usize,
    device: usize,
    param: &ParamRef,
    interrupt: &dyn Interrupt,
    sink: &mut dyn OutputSink,
) -> Result<()> {
    let forcing = node_forcing(ckt, false);
    let mut newton = Newton::new(interrupt).with_forcing(forcing);
    let max_iter = ckt.ctx.options.itl1;

    for k in 0..count {
        if interrupt.pause_requested() {
            return Err(Error::Paused);
        }
        let value = params.value(k);
        ckt.set_param(device, param, value)?;
        ckt.temperature_device(device)?;
        let iterations = if k == 0 {
            dc_solve(ckt, &mut newton, max_iter)?.iterations
        } else {
            // Later points start from the previous solution.
            ckt.ctx.init = InitMode::Float;
            match newton.solve(ckt, max_iter) {
                Ok(iterations) => iterations,
                Err(e) if e.is_convergence_failure() => {
                    dc_solve(ckt, &mut newton, max_iter)?.iterations
                }
                Err(e) => return Err(e),
            }
        };
        debug!("dc sweep {} = {}: {} iterations", param.display_name(), value, iterations);
        sink.data(value, &Values::Real(real_values(ckt)))?;
    }
    Ok(())
}
