//! Pole-zero analysis.
//!
//! Poles and zeros are the roots of determinants of the small-signal
//! matrix `Y(s)`. A transfer function `Vo / Ii` is found by Cramer's rule:
//! the output column is replaced by the input current vector, so
//!
//! ```text
//! zeros:                 det Y(s) with the output column replaced
//! poles (current input): det Y(s)
//! poles (voltage input): det Y(s) with the input column replaced
//! ```
//!
//! A differential output is handled by adding its positive column into the
//! negative one before the replacement. Roots are located one at a time by
//! Muller iteration on the determinant divided by the roots already found.

use log::{debug, info, warn};
use nalgebra::DMatrix;
use num_complex::Complex64;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use kirchhoff_core::{Analysis, Circuit, NodeId};

use crate::ac::small_signal_op;
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::output::{OutputSink, PlotHeader, ScaleKind, Values};

/// Muller iterations allowed per root.
const MAX_ITERATIONS: usize = 200;

/// Imaginary parts below this fraction of the magnitude are dropped.
const REAL_AXIS_TOL: f64 = 1e-6;

/// Relative spread below which the deflated determinant counts as constant.
const FLAT_TOL: f64 = 1e-8;

/// Iterates past this magnitude are taken as a root at infinity.
const DIVERGENCE: f64 = 1e30;

/// Starting points of every root search, near the origin so small roots are
/// found (and divided out) first.
const STARTS: [Complex64; 3] = [
    Complex64::new(-0.97e-3, 0.0),
    Complex64::new(1.03e-3, 0.0),
    Complex64::new(0.0, 1.1e-3),
];

/// Points spread over many decades where the deflated determinant is
/// sampled to decide whether any root is left.
const SAMPLE_POINTS: [Complex64; 4] = [
    Complex64::new(1.3e2, 0.7e2),
    Complex64::new(-1.1e5, 3.1e4),
    Complex64::new(2.3e8, -6.7e8),
    Complex64::new(-3.1e11, 1.7e11),
];

/// How the input is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PzInput {
    /// Transfer function `Vo / Vi`.
    Voltage,
    /// Transfer impedance `Vo / Ii`.
    Current,
}

/// Which roots to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PzTarget {
    Poles,
    Zeros,
    #[default]
    Both,
}

fn default_reltol() -> f64 {
    1e-10
}

fn default_abstol() -> f64 {
    1e-15
}

/// A pole-zero request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PzParams {
    pub input_pos: String,
    pub input_neg: String,
    pub output_pos: String,
    pub output_neg: String,
    pub input_type: PzInput,
    #[serde(default)]
    pub target: PzTarget,
    /// Most roots of each kind to report; the number of unknowns when absent.
    #[serde(default)]
    pub max_roots: Option<usize>,
    /// Relative step size at which a root is accepted.
    #[serde(default = "default_reltol")]
    pub reltol: f64,
    /// Absolute step size at which a root is accepted (rad/s).
    #[serde(default = "default_abstol")]
    pub abstol: f64,
}

impl PzParams {
    pub fn new(
        input: (impl Into<String>, impl Into<String>),
        output: (impl Into<String>, impl Into<String>),
        input_type: PzInput,
    ) -> Self {
        Self {
            input_pos: input.0.into(),
            input_neg: input.1.into(),
            output_pos: output.0.into(),
            output_neg: output.1.into(),
            input_type,
            target: PzTarget::Both,
            max_roots: None,
            reltol: default_reltol(),
            abstol: default_abstol(),
        }
    }

    pub fn poles_only(mut self) -> Self {
        self.target = PzTarget::Poles;
        self
    }

    pub fn zeros_only(mut self) -> Self {
        self.target = PzTarget::Zeros;
        self
    }

    pub fn with_max_roots(mut self, n: usize) -> Self {
        self.max_roots = Some(n);
        self
    }
}

/// Poles and zeros in rad/s. Complex roots come in conjugate pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PzResult {
    pub poles: Vec<Complex64>,
    pub zeros: Vec<Complex64>,
}

/// Column operations turning `det Y(s)` into a transfer-function numerator.
///
/// Indices are node numbers; 0 means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PzColumns {
    /// Column replaced by the drive.
    pub solution: usize,
    /// Column the solution column is added into first.
    pub balance: usize,
    /// Row receiving +1 in the solution column.
    pub drive_pos: usize,
    /// Row receiving -1 in the solution column.
    pub drive_neg: usize,
}

impl PzColumns {
    /// Columns for the zeros (`zeros == true`) or poles of a transfer
    /// function from `input` to `output`.
    pub fn new(input: (NodeId, NodeId), output: (NodeId, NodeId), kind: PzInput, zeros: bool) -> Self {
        let (mut in_pos, mut in_neg) = (input.0.index(), input.1.index());
        let (out_pos, out_neg) = if zeros {
            (output.0.index(), output.1.index())
        } else if kind == PzInput::Voltage {
            (in_pos, in_neg)
        } else {
            // Plain denominator.
            in_pos = 0;
            in_neg = 0;
            (0, 0)
        };

        let (solution, balance) = if out_pos != 0 {
            (out_pos, out_neg)
        } else {
            std::mem::swap(&mut in_pos, &mut in_neg);
            (out_neg, 0)
        };
        let (drive_pos, drive_neg) = if solution != 0 { (in_pos, in_neg) } else { (0, 0) };
        Self {
            solution,
            balance,
            drive_pos,
            drive_neg,
        }
    }

    /// Apply the column operations to a dense copy of `Y(s)` (ground
    /// excluded, so node `k` is index `k - 1`).
    pub fn apply(&self, y: &mut DMatrix<Complex64>) {
        if self.solution == 0 || self.solution > y.ncols() {
            return;
        }
        let sc = self.solution - 1;
        if self.balance != 0 && self.balance <= y.ncols() {
            let bc = self.balance - 1;
            for r in 0..y.nrows() {
                let v = y[(r, sc)];
                y[(r, bc)] += v;
            }
        }
        y.column_mut(sc).fill(Complex64::zero());
        if self.drive_pos != 0 {
            y[(self.drive_pos - 1, sc)] = Complex64::one();
        }
        if self.drive_neg != 0 {
            y[(self.drive_neg - 1, sc)] = -Complex64::one();
        }
    }
}

/// A complex number with a separate binary exponent, so determinants of
/// large matrices neither overflow nor underflow.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scaled {
    mantissa: Complex64,
    exp: i32,
}

impl Scaled {
    fn new(value: Complex64) -> Self {
        Self {
            mantissa: value,
            exp: 0,
        }
        .normalized()
    }

    fn normalized(mut self) -> Self {
        let mag = self.mantissa.norm();
        if mag == 0.0 || !mag.is_finite() {
            return self;
        }
        let e = mag.log2().floor() as i32;
        self.mantissa *= 2f64.powi(-e);
        self.exp += e;
        self
    }

    fn mul(self, z: Complex64) -> Self {
        Self {
            mantissa: self.mantissa * z,
            exp: self.exp,
        }
        .normalized()
    }

    fn div(self, z: Complex64) -> Self {
        Self {
            mantissa: self.mantissa / z,
            exp: self.exp,
        }
        .normalized()
    }

    fn is_zero(self) -> bool {
        self.mantissa.is_zero()
    }

    fn is_finite(self) -> bool {
        self.mantissa.re.is_finite() && self.mantissa.im.is_finite()
    }

    /// The value expressed in units of `2^exp`.
    fn relative_to(self, exp: i32) -> Complex64 {
        if self.is_zero() {
            return self.mantissa;
        }
        self.mantissa * 2f64.powi(self.exp - exp)
    }
}

/// Determinant of a dense complex matrix via LU.
fn dense_determinant(y: DMatrix<Complex64>) -> Scaled {
    let n = y.nrows();
    let lu = y.lu();
    let mut det = Scaled::new(lu.p().determinant::<Complex64>());
    let u = lu.u();
    for i in 0..n {
        det = det.mul(u[(i, i)]);
    }
    det
}

/// Load `Y(s)`, apply the column operations and take the determinant.
fn determinant(ckt: &mut Circuit, cols: &PzColumns, s: Complex64) -> Result<Scaled> {
    ckt.pz_load(s)?;
    let mut y = ckt.ctx.matrix.to_dense_complex();
    cols.apply(&mut y);
    Ok(dense_determinant(y))
}

/// Muller search over one determinant with implicit deflation.
struct RootSearch<'c, 'i> {
    ckt: &'c mut Circuit,
    interrupt: &'i dyn Interrupt,
    cols: PzColumns,
    reltol: f64,
    abstol: f64,
    roots: Vec<Complex64>,
}

impl RootSearch<'_, '_> {
    /// Determinant divided by every root found so far.
    fn eval(&mut self, s: Complex64) -> Result<Scaled> {
        let mut d = determinant(self.ckt, &self.cols, s)?;
        for &r in &self.roots {
            d = d.div(s - r);
        }
        Ok(d)
    }

    /// True when no root is left: the deflated determinant is the same
    /// everywhere.
    fn exhausted(&mut self) -> Result<bool> {
        let mut values = Vec::with_capacity(SAMPLE_POINTS.len());
        for &p in &SAMPLE_POINTS {
            let v = self.eval(p)?;
            if !v.is_finite() {
                return Ok(true);
            }
            values.push(v);
        }
        let exp = values.iter().map(|v| v.exp).max().unwrap_or(0);
        let rel: Vec<Complex64> = values.iter().map(|v| v.relative_to(exp)).collect();
        let scale = rel.iter().map(|v| v.norm()).fold(0.0, f64::max);
        if scale == 0.0 {
            // Identically zero: the transfer function vanishes.
            return Ok(true);
        }
        Ok(rel.iter().all(|v| (v - rel[0]).norm() <= FLAT_TOL * scale))
    }

    /// Find the next root, or `None` when the iteration gets nowhere.
    fn next_root(&mut self) -> Result<Option<Complex64>> {
        let mut x = STARTS;
        let mut f = [self.eval(x[0])?, self.eval(x[1])?, self.eval(x[2])?];

        for _ in 0..MAX_ITERATIONS {
            if self.interrupt.pause_requested() {
                return Err(Error::Paused);
            }
            if f[2].is_zero() {
                return Ok(Some(x[2]));
            }
            if !f.iter().all(|v| v.is_finite()) {
                return Ok(None);
            }

            let exp = f.iter().filter(|v| !v.is_zero()).map(|v| v.exp).max().unwrap_or(0);
            let [f0, f1, f2] = f.map(|v| v.relative_to(exp));
            let h1 = x[1] - x[0];
            let h2 = x[2] - x[1];
            let d1 = (f1 - f0) / h1;
            let d2 = (f2 - f1) / h2;
            let a = (d2 - d1) / (h2 + h1);
            let b = a * h2 + d2;
            let disc = (b * b - 4.0 * f2 * a).sqrt();
            let den = if (b + disc).norm() >= (b - disc).norm() {
                b + disc
            } else {
                b - disc
            };
            let step = if den.norm() == 0.0 {
                // Flat parabola: move away and try again.
                Complex64::new(1.0 + x[2].norm(), 0.0)
            } else {
                -2.0 * f2 / den
            };
            let next = x[2] + step;
            if !next.norm().is_finite() || next.norm() > DIVERGENCE {
                return Ok(None);
            }
            if step.norm() <= self.reltol * next.norm() + self.abstol {
                return Ok(Some(next));
            }
            x = [x[1], x[2], next];
            f = [f[1], f[2], self.eval(next)?];
        }
        Ok(None)
    }

    /// Every root, up to `max`.
    fn run(mut self, max: usize) -> Result<Vec<Complex64>> {
        while self.roots.len() < max {
            if self.exhausted()? {
                break;
            }
            let Some(mut root) = self.next_root()? else {
                warn!(
                    "pole-zero: root search stalled after {} roots",
                    self.roots.len()
                );
                break;
            };
            if root.im.abs() <= REAL_AXIS_TOL * root.norm() {
                root.im = 0.0;
            }
            debug!("pole-zero: root {}", root);
            self.roots.push(root);
            if root.im != 0.0 {
                self.roots.push(root.conj());
            }
        }
        Ok(self.roots)
    }
}

fn find_roots(
    ckt: &mut Circuit,
    interrupt: &dyn Interrupt,
    cols: PzColumns,
    params: &PzParams,
    max: usize,
) -> Result<Vec<Complex64>> {
    RootSearch {
        ckt,
        interrupt,
        cols,
        reltol: params.reltol,
        abstol: params.abstol,
        roots: Vec::new(),
    }
    .run(max)
}

fn resolve(ckt: &Circuit, name: &str) -> Result<NodeId> {
    ckt.nodes
        .find(name)
        .ok_or_else(|| Error::InvalidJob(format!("no pole-zero node {name}")))
}

/// Run a pole-zero analysis about the operating point.
///
/// Emits one complex record with vectors `pole(k)` and `zero(k)`.
pub fn run_pz(
    ckt: &mut Circuit,
    params: &PzParams,
    interrupt: &dyn Interrupt,
    sink: &mut dyn OutputSink,
) -> Result<PzResult> {
    let input = (resolve(ckt, &params.input_pos)?, resolve(ckt, &params.input_neg)?);
    let output = (resolve(ckt, &params.output_pos)?, resolve(ckt, &params.output_neg)?);
    if input.0 == input.1 {
        return Err(Error::InvalidJob("pole-zero input nodes coincide".to_string()));
    }

    small_signal_op(ckt, interrupt)?;
    ckt.ctx.analysis = Analysis::PoleZero;
    let max = params.max_roots.unwrap_or_else(|| ckt.nodes.num_unknowns());

    let mut result = PzResult::default();
    if params.target != PzTarget::Zeros {
        let cols = PzColumns::new(input, output, params.input_type, false);
        result.poles = find_roots(ckt, interrupt, cols, params, max)?;
    }
    if params.target != PzTarget::Poles {
        let cols = PzColumns::new(input, output, params.input_type, true);
        result.zeros = find_roots(ckt, interrupt, cols, params, max)?;
    }
    info!(
        "pole-zero: {} poles, {} zeros",
        result.poles.len(),
        result.zeros.len()
    );

    let mut vectors = Vec::with_capacity(result.poles.len() + result.zeros.len());
    vectors.extend((1..=result.poles.len()).map(|k| format!("pole({k})")));
    vectors.extend((1..=result.zeros.len()).map(|k| format!("zero({k})")));
    sink.begin_plot(PlotHeader {
        name: "pz".to_string(),
        scale: ScaleKind::None,
        vectors,
        complex: true,
    })?;
    let values: Vec<Complex64> = result.poles.iter().chain(&result.zeros).copied().collect();
    sink.data(0.0, &Values::Complex(values))?;
    sink.end_plot()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(k: u32) -> NodeId {
        NodeId::new(k)
    }

    #[test]
    fn test_columns_for_zeros() {
        let c = PzColumns::new((n(1), n(0)), (n(3), n(2)), PzInput::Current, true);
        assert_eq!(
            c,
            PzColumns {
                solution: 3,
                balance: 2,
                drive_pos: 1,
                drive_neg: 0
            }
        );
    }

    #[test]
    fn test_columns_for_poles() {
        let v = PzColumns::new((n(1), n(2)), (n(3), n(0)), PzInput::Voltage, false);
        assert_eq!((v.solution, v.balance, v.drive_pos, v.drive_neg), (1, 2, 1, 2));
        let i = PzColumns::new((n(1), n(2)), (n(3), n(0)), PzInput::Current, false);
        assert_eq!(i, PzColumns::default());
    }

    #[test]
    fn test_grounded_positive_output_swaps_input() {
        let c = PzColumns::new((n(1), n(0)), (n(0), n(2)), PzInput::Current, true);
        assert_eq!((c.solution, c.balance, c.drive_pos, c.drive_neg), (2, 0, 0, 1));
    }

    #[test]
    fn test_apply_replaces_column() {
        let mut y = DMatrix::from_fn(2, 2, |r, c| Complex64::new((1 + 2 * r + c) as f64, 0.0));
        let cols = PzColumns {
            solution: 2,
            balance: 1,
            drive_pos: 1,
            drive_neg: 2,
        };
        cols.apply(&mut y);
        // Column 1 += column 2, column 2 becomes the drive.
        assert_eq!(y[(0, 0)].re, 3.0);
        assert_eq!(y[(1, 0)].re, 7.0);
        assert_eq!(y[(0, 1)].re, 1.0);
        assert_eq!(y[(1, 1)].re, -1.0);
    }

    #[test]
    fn test_scaled_determinant_survives_underflow() {
        let y = DMatrix::from_diagonal_element(400, 400, Complex64::new(1e-3, 0.0));
        let det = dense_determinant(y);
        assert!(det.is_finite() && !det.is_zero());
        // 1e-3^400 = 2^(-3986.3...)
        assert!((det.exp as f64 + 1200.0 * 10f64.log2()).abs() < 2.0);
    }

    #[test]
    fn test_permutation_sign() {
        let y = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex64::new(0.0, 0.0),
                Complex64::new(1.0, 0.0),
                Complex64::new(1.0, 0.0),
                Complex64::new(0.0, 0.0),
            ],
        );
        let det = dense_determinant(y);
        assert!((det.relative_to(0) - Complex64::new(-1.0, 0.0)).norm() < 1e-15);
    }

    #[test]
    fn test_params_from_json() {
        let p: PzParams = serde_json::from_str(
            r#"{"input_pos":"in","input_neg":"0","output_pos":"out","output_neg":"0","input_type":"voltage"}"#,
        )
        .unwrap();
        assert_eq!(p, PzParams::new(("in", "0"), ("out", "0"), PzInput::Voltage));
    }
}
