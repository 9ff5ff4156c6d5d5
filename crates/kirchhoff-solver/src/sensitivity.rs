//! Perturbation sensitivity of one output to every device parameter.
//!
//! For each parameter the device's contribution is loaded twice into a
//! separate matrix `dY` and right-hand side `dI`: once at the nominal value
//! (then negated) and once at `value + delta`. The output change follows
//! from the baseline matrix `Y`, which is already factored:
//!
//! ```text
//! dE = Y^-1 (dI - dY * E)
//! ```
//!
//! DC sensitivity uses the operating point; AC sensitivity repeats this at
//! every frequency of a sweep with the complex small-signal system.

use log::{debug, info, warn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use kirchhoff_core::{Analysis, Circuit, InitMode, NodeId, ParamRef, SparseMatrix};

use crate::ac::{AcSweep, small_signal_op, solve_point};
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::output::{OutputSink, PlotHeader, ScaleKind, Values};

/// Relative perturbation applied to non-zero parameters.
pub const SENS_DELTA: f64 = 1e-6;

/// Absolute perturbation applied to parameters whose value is zero.
pub const SENS_ABS_DELTA: f64 = 1e-6;

/// The quantity whose sensitivity is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensOutput {
    /// `V(pos) - V(neg)`; `neg` defaults to ground.
    Voltage {
        pos: String,
        #[serde(default)]
        neg: Option<String>,
    },
    /// Branch current of a named source.
    Current { source: String },
}

/// A sensitivity request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensParams {
    pub output: SensOutput,
    /// AC sweep; DC sensitivity when absent.
    #[serde(default)]
    pub sweep: Option<AcSweep>,
    /// Glob patterns (`*`, `?`) on parameter names; empty keeps every one.
    #[serde(default)]
    pub filter: Vec<String>,
}

impl SensParams {
    pub fn dc(output: SensOutput) -> Self {
        Self {
            output,
            sweep: None,
            filter: Vec::new(),
        }
    }

    pub fn ac(output: SensOutput, sweep: AcSweep) -> Self {
        Self {
            output,
            sweep: Some(sweep),
            filter: Vec::new(),
        }
    }

    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter.push(pattern.into());
        self
    }

    fn accepts(&self, name: &str) -> bool {
        self.filter.is_empty() || self.filter.iter().any(|p| glob_match(p, name))
    }
}

/// Shell-style match: `*` is any run of characters, `?` exactly one.
/// ASCII case is ignored.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi].eq_ignore_ascii_case(&n[ni])) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Where the output is read from the solution vector.
#[derive(Debug, Clone, Copy)]
enum Readout {
    Voltage(NodeId, NodeId),
    Branch(NodeId),
}

impl Readout {
    fn resolve(ckt: &Circuit, output: &SensOutput) -> Result<Self> {
        let node = |name: &str| {
            ckt.nodes
                .find(name)
                .ok_or_else(|| Error::InvalidJob(format!("no output node {name}")))
        };
        match output {
            SensOutput::Voltage { pos, neg } => {
                let neg = match neg {
                    Some(n) => node(n)?,
                    None => NodeId::GROUND,
                };
                Ok(Readout::Voltage(node(pos)?, neg))
            }
            SensOutput::Current { source } => ckt
                .find_branch(source)
                .map(Readout::Branch)
                .ok_or_else(|| Error::InvalidJob(format!("{source} has no branch current"))),
        }
    }

    fn read(self, re: &[f64], im: &[f64]) -> Complex64 {
        match self {
            Readout::Voltage(p, n) => Complex64::new(
                re[p.index()] - re[n.index()],
                im[p.index()] - im[n.index()],
            ),
            Readout::Branch(b) => Complex64::new(re[b.index()], im[b.index()]),
        }
    }
}

/// Perturbation system swapped into the circuit while a device is loaded.
struct Perturbation {
    matrix: SparseMatrix,
    rhs: Vec<f64>,
    irhs: Vec<f64>,
    /// `dY * E`.
    product: Vec<f64>,
    iproduct: Vec<f64>,
}

impl Perturbation {
    fn new(ckt: &Circuit) -> Result<Self> {
        let len = ckt.ctx.len();
        Ok(Self {
            matrix: ckt.ctx.matrix.structural_clone()?,
            rhs: vec![0.0; len],
            irhs: vec![0.0; len],
            product: vec![0.0; len],
            iproduct: vec![0.0; len],
        })
    }
}

/// Run a DC or AC sensitivity analysis.
///
/// Emits one record per frequency (a single record for DC) with one value
/// per parameter. Returns the number of parameters reported.
pub fn run_sensitivity(
    ckt: &mut Circuit,
    params: &SensParams,
    interrupt: &dyn Interrupt,
    sink: &mut dyn OutputSink,
) -> Result<usize> {
    let freqs = match &params.sweep {
        Some(sweep) => {
            sweep.validate()?;
            sweep.frequencies()
        }
        None => vec![0.0],
    };
    let is_dc = params.sweep.is_none();

    small_signal_op(ckt, interrupt)?;
    let readout = Readout::resolve(ckt, &params.output)?;

    let targets: Vec<(usize, ParamRef)> = ckt
        .parameters()
        .into_iter()
        .filter(|(_, p)| params.accepts(&p.display_name()))
        .collect();
    if targets.is_empty() {
        info!("sensitivity: no parameters selected");
        return Ok(0);
    }
    info!(
        "sensitivity: {} parameters at {} point(s)",
        targets.len(),
        freqs.len()
    );

    let bypass = ckt.ctx.bypass;
    ckt.ctx.bypass = false;
    let result = sweep(ckt, &targets, &freqs, is_dc, readout, interrupt, sink);
    ckt.ctx.bypass = bypass;
    result?;
    Ok(targets.len())
}

fn sweep(
    ckt: &mut Circuit,
    targets: &[(usize, ParamRef)],
    freqs: &[f64],
    is_dc: bool,
    readout: Readout,
    interrupt: &dyn Interrupt,
    sink: &mut dyn OutputSink,
) -> Result<()> {
    sink.begin_plot(PlotHeader {
        name: "sens".to_string(),
        scale: if is_dc {
            ScaleKind::None
        } else {
            ScaleKind::Frequency
        },
        vectors: targets.iter().map(|(_, p)| p.display_name()).collect(),
        complex: !is_dc,
    })?;

    if is_dc {
        // `E` is the operating point in `rhs_old`; `Y` is its Jacobian.
        ckt.ctx.analysis = Analysis::Op;
        ckt.ctx.init = InitMode::Float;
        ckt.load()?;
        ckt.ctx.matrix.factor()?;
    }

    let mut delta = Perturbation::new(ckt)?;
    for &freq in freqs {
        if interrupt.pause_requested() {
            return Err(Error::Paused);
        }
        if !is_dc {
            solve_point(ckt, freq)?;
        }

        let mut row = Vec::with_capacity(targets.len());
        for (device, param) in targets {
            let value = match perturb(ckt, &mut delta, *device, param, is_dc)? {
                Some(delta_var) => readout.read(&delta.rhs, &delta.irhs) / delta_var,
                None => Complex64::new(0.0, 0.0),
            };
            row.push(value);
        }
        let values = if is_dc {
            Values::Real(row.iter().map(|v| v.re).collect())
        } else {
            Values::Complex(row)
        };
        sink.data(freq, &values)?;
    }
    sink.end_plot()
}

/// Compute `dE` for one parameter into `delta.rhs`/`delta.irhs`.
///
/// Returns the perturbation size, or `None` when the device rejected the
/// load and the parameter is skipped.
fn perturb(
    ckt: &mut Circuit,
    delta: &mut Perturbation,
    device: usize,
    param: &ParamRef,
    is_dc: bool,
) -> Result<Option<f64>> {
    let original = ckt
        .param(device, param)
        .ok_or_else(|| Error::InvalidJob(format!("{} is not readable", param.display_name())))?;
    let states = ckt.ctx.states.clone();
    let nodes_before = ckt.nodes.len();

    let loaded = ckt.with_swapped(
        &mut delta.matrix,
        &mut delta.rhs,
        &mut delta.irhs,
        |ckt| load_difference(ckt, device, param, original, is_dc),
    );

    ckt.ctx.states = states;
    ckt.ctx.noncon = 0;
    // Re-bind the device's handles to `Y`.
    let rebind = ckt.setup_device(device);
    let delta_var = match loaded {
        Ok(dv) => dv,
        Err(Error::Core(kirchhoff_core::Error::DeviceLoad { device: name, reason })) => {
            warn!(
                "sensitivity: skipping {} ({}: {})",
                param.display_name(),
                name,
                reason
            );
            return Ok(None);
        }
        Err(Error::Core(kirchhoff_core::Error::InvalidCircuit(_)))
            if ckt.nodes.len() != nodes_before =>
        {
            return Err(Error::InternalNodeAllocation {
                device: param.instance_name.clone(),
            });
        }
        Err(e) => return Err(e),
    };
    rebind?;

    let e = &ckt.ctx.rhs_old;
    let ie = &ckt.ctx.irhs_old;
    let y = &ckt.ctx.matrix;
    if is_dc {
        delta.matrix.multiply(e, &mut delta.product)?;
        for (i, p) in delta.rhs.iter_mut().zip(&delta.product) {
            *i -= p;
        }
        y.solve(&mut delta.rhs)?;
        delta.irhs.fill(0.0);
    } else {
        delta
            .matrix
            .multiply_complex(e, ie, &mut delta.product, &mut delta.iproduct)?;
        for (i, p) in delta.rhs.iter_mut().zip(&delta.product) {
            *i -= p;
        }
        for (i, p) in delta.irhs.iter_mut().zip(&delta.iproduct) {
            *i -= p;
        }
        y.solve_complex(&mut delta.rhs, &mut delta.irhs)?;
    }
    delta.rhs[0] = 0.0;
    delta.irhs[0] = 0.0;

    debug!(
        "sensitivity {}: value {:e}, delta {:e}",
        param.display_name(),
        original,
        delta_var
    );
    Ok(Some(delta_var))
}

/// With the perturbation system swapped in: load the device at `original`,
/// negate, load again at `original + delta_var`, then restore the value.
fn load_difference(
    ckt: &mut Circuit,
    device: usize,
    param: &ParamRef,
    original: f64,
    is_dc: bool,
) -> Result<f64> {
    ckt.ctx.clear_system();
    ckt.setup_device(device)?;
    ckt.temperature_device(device)?;
    load_one(ckt, device, is_dc)?;

    let delta_var = if original != 0.0 {
        original * SENS_DELTA
    } else {
        SENS_ABS_DELTA
    };
    ckt.set_param(device, param, original + delta_var)?;
    ckt.ctx.matrix.scale(-1.0);
    for v in ckt.ctx.rhs.iter_mut().chain(ckt.ctx.irhs.iter_mut()) {
        *v = -*v;
    }

    let perturbed = ckt
        .temperature_device(device)
        .and_then(|()| load_one(ckt, device, is_dc));

    // Restore before reporting any load failure.
    ckt.set_param(device, param, original)?;
    ckt.temperature_device(device)?;
    perturbed?;
    Ok(delta_var)
}

fn load_one(ckt: &mut Circuit, device: usize, is_dc: bool) -> kirchhoff_core::Result<()> {
    if is_dc {
        ckt.load_device(device)
    } else {
        ckt.ac_load_device(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "r1"));
        assert!(glob_match("r?", "r1"));
        assert!(!glob_match("r?", "r12"));
        assert!(glob_match("d1:*", "d1:is"));
        assert!(glob_match("*_area", "d1_area"));
        assert!(glob_match("R*", "r1"));
        assert!(!glob_match("c*", "r1"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }

    #[test]
    fn test_filter_accepts() {
        let p = SensParams::dc(SensOutput::Voltage {
            pos: "out".into(),
            neg: None,
        });
        assert!(p.accepts("anything"));
        let p = p.with_filter("r*").with_filter("v1");
        assert!(p.accepts("r2"));
        assert!(p.accepts("v1"));
        assert!(!p.accepts("v2"));
    }

    #[test]
    fn test_params_from_json() {
        let p: SensParams = serde_json::from_str(
            r#"{"output":{"current":{"source":"v1"}},"filter":["r*"]}"#,
        )
        .unwrap();
        assert_eq!(
            p.output,
            SensOutput::Current {
                source: "v1".into()
            }
        );
        assert!(p.sweep.is_none());
        assert_eq!(p.filter, vec!["r*".to_string()]);
    }
}
