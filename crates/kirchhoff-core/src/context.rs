//! Numerical state shared by every analysis: matrix, solution vectors,
//! state history, time-step bookkeeping and mode flags.

use crate::breakpoint::Breakpoints;
use crate::error::{Error, Result};
use crate::integration::{IntegrationMethod, MAX_ORDER};
use crate::matrix::SparseMatrix;
use crate::node::NodeId;
use crate::options::SimOptions;
use crate::state::{NUM_STATE_VECTORS, StateHistory};

/// Analysis currently driving device loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analysis {
    /// DC operating point.
    Op,
    /// DC transfer sweep.
    DcSweep,
    Transient,
    /// Small-signal frequency sweep.
    Ac,
    PoleZero,
}

/// Newton-Raphson initialization phase seen by device models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// First DC iteration: junctions start at their critical voltages.
    Junction,
    /// Devices marked OFF are held off until the first convergence.
    Fix,
    /// Normal iteration from the previous solution.
    Float,
    /// First iteration of the first time point.
    Transient,
    /// First iteration of a later time point; states are predicted.
    Predict,
    /// Store small-signal parameters at the operating point.
    SmallSignal,
}

fn zeroed(len: usize) -> Result<Vec<f64>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory { requested: len })?;
    v.resize(len, 0.0);
    Ok(v)
}

/// Numerical context for one circuit.
///
/// Vectors are indexed by node number and include ground at index 0.
/// `rhs_old` holds the current iterate (the solution devices read from);
/// `rhs` is rebuilt by every load and overwritten by the solve.
#[derive(Debug)]
pub struct SimContext {
    pub matrix: SparseMatrix,
    pub rhs: Vec<f64>,
    pub irhs: Vec<f64>,
    pub rhs_old: Vec<f64>,
    pub irhs_old: Vec<f64>,
    pub rhs_spare: Vec<f64>,
    pub states: StateHistory,

    pub analysis: Analysis,
    pub init: InitMode,
    /// Use initial conditions instead of an operating point.
    pub uic: bool,

    pub time: f64,
    pub delta: f64,
    /// `delta_old[0]` is the current step, `delta_old[1]` the previous one.
    pub delta_old: [f64; NUM_STATE_VECTORS],
    pub order: usize,
    pub ag: [f64; MAX_ORDER + 1],
    pub method: IntegrationMethod,

    /// Angular frequency for AC loads (rad/s).
    pub omega: f64,
    /// Circuit temperature (K).
    pub temp: f64,
    /// Conductance currently added across junctions.
    pub gmin: f64,
    /// Source scale factor for source stepping.
    pub src_fact: f64,
    /// Devices that limited their inputs during the last load.
    pub noncon: usize,
    pub bypass: bool,

    pub options: SimOptions,
    pub breakpoints: Breakpoints,
}

impl SimContext {
    /// Create a context for `len` node slots (ground included).
    pub fn new(len: usize, num_states: usize, options: SimOptions) -> Result<Self> {
        Ok(Self {
            matrix: SparseMatrix::new(len.saturating_sub(1))?,
            rhs: zeroed(len)?,
            irhs: zeroed(len)?,
            rhs_old: zeroed(len)?,
            irhs_old: zeroed(len)?,
            rhs_spare: zeroed(len)?,
            states: StateHistory::new(num_states),
            analysis: Analysis::Op,
            init: InitMode::Junction,
            uic: false,
            time: 0.0,
            delta: 0.0,
            delta_old: [0.0; NUM_STATE_VECTORS],
            order: 1,
            ag: [0.0; MAX_ORDER + 1],
            method: options.method,
            omega: 0.0,
            temp: options.temp,
            gmin: options.gmin,
            src_fact: 1.0,
            noncon: 0,
            bypass: options.bypass,
            breakpoints: Breakpoints::default(),
            options,
        })
    }

    /// Resize solution vectors and state history after setup.
    pub fn resize(&mut self, len: usize, num_states: usize) -> Result<()> {
        for v in [
            &mut self.rhs,
            &mut self.irhs,
            &mut self.rhs_old,
            &mut self.irhs_old,
            &mut self.rhs_spare,
        ] {
            if v.len() < len {
                v.try_reserve_exact(len - v.len())
                    .map_err(|_| Error::OutOfMemory { requested: len })?;
            }
            v.resize(len, 0.0);
        }
        if self.states.len() != num_states {
            self.states = StateHistory::new(num_states);
        }
        self.matrix.ensure_size(len.saturating_sub(1));
        Ok(())
    }

    /// Number of node slots, ground included.
    pub fn len(&self) -> usize {
        self.rhs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rhs.len() <= 1
    }

    /// Current iterate at `node` (0 for ground).
    #[inline]
    pub fn voltage(&self, node: NodeId) -> f64 {
        self.rhs_old[node.index()]
    }

    /// Imaginary part of the current AC solution at `node`.
    #[inline]
    pub fn voltage_imag(&self, node: NodeId) -> f64 {
        self.irhs_old[node.index()]
    }

    /// `V(pos) - V(neg)` from the current iterate.
    #[inline]
    pub fn voltage_diff(&self, pos: NodeId, neg: NodeId) -> f64 {
        self.rhs_old[pos.index()] - self.rhs_old[neg.index()]
    }

    /// Inject `value` amps into `node` on the right-hand side.
    #[inline]
    pub fn add_rhs(&mut self, node: NodeId, value: f64) {
        self.rhs[node.index()] += value;
    }

    #[inline]
    pub fn add_irhs(&mut self, node: NodeId, value: f64) {
        self.irhs[node.index()] += value;
    }

    pub fn is_dc(&self) -> bool {
        matches!(self.analysis, Analysis::Op | Analysis::DcSweep)
    }

    pub fn is_transient(&self) -> bool {
        self.analysis == Analysis::Transient
    }

    /// Zero the matrix and both right-hand sides before a load.
    pub fn clear_system(&mut self) {
        self.matrix.clear();
        self.rhs.fill(0.0);
        self.irhs.fill(0.0);
    }

    /// Make the freshly solved `rhs` the current iterate.
    pub fn swap_solution(&mut self) {
        std::mem::swap(&mut self.rhs, &mut self.rhs_old);
        std::mem::swap(&mut self.irhs, &mut self.irhs_old);
    }

    /// Recompute `ag` for the current method, order and step.
    pub fn compute_coefficients(&mut self) {
        self.ag = self
            .method
            .coefficients(self.order, self.delta, &self.delta_old);
    }

    /// Integrate the charge at state `qcap` and store its current at
    /// `qcap + 1`.
    ///
    /// Returns the companion `(geq, ceq)` so that the branch current is
    /// `geq * v + ceq`.
    pub fn integrate(&mut self, cap: f64, qcap: usize) -> (f64, f64) {
        let ccap = qcap + 1;
        let ag = self.ag;
        let q0 = self.states.get(0, qcap);
        let q1 = self.states.get(1, qcap);
        let current = match (self.method, self.order) {
            (_, 0 | 1) | (IntegrationMethod::BackwardEuler, _) => ag[0] * q0 + ag[1] * q1,
            (IntegrationMethod::Trapezoidal, _) => {
                -self.states.get(1, ccap) * ag[1] + ag[0] * (q0 - q1)
            }
            (IntegrationMethod::Gear, _) => {
                ag[0] * q0 + ag[1] * q1 + ag[2] * self.states.get(2, qcap)
            }
        };
        self.states.set(0, ccap, current);
        (ag[0] * cap, current - ag[0] * q0)
    }

    /// Shrink `timestep` to keep the truncation error of the charge at
    /// `qcap` within tolerance.
    ///
    /// Uses divided differences of the charge history over the last
    /// `order + 1` steps.
    pub fn truncation_error(&self, qcap: usize, timestep: &mut f64) {
        let ccap = qcap + 1;
        let opts = &self.options;
        let s = &self.states;
        let volttol =
            opts.abstol + opts.reltol * s.get(0, ccap).abs().max(s.get(1, ccap).abs());
        let chargetol = opts.reltol
            * s.get(0, qcap).abs().max(s.get(1, qcap).abs()).max(opts.chgtol)
            / self.delta;
        let tol = volttol.max(chargetol);

        let order = self.order.clamp(1, MAX_ORDER);
        let mut diff = [0.0; NUM_STATE_VECTORS];
        let mut deltmp = [0.0; NUM_STATE_VECTORS];
        for (i, d) in diff.iter_mut().enumerate().take(order + 2) {
            *d = s.get(i, qcap);
        }
        deltmp[..=order].copy_from_slice(&self.delta_old[..=order]);

        let mut j = order;
        loop {
            for i in 0..=j {
                diff[i] = (diff[i] - diff[i + 1]) / deltmp[i];
            }
            if j == 0 {
                break;
            }
            j -= 1;
            for i in 0..=j {
                deltmp[i] = deltmp[i + 1] + self.delta_old[i];
            }
        }

        let factor = self.method.lte_factor(order);
        let mut del = opts.trtol * tol / opts.abstol.max(factor * diff[0].abs());
        if order == 2 {
            del = del.sqrt();
        } else if order > 2 {
            del = del.powf(1.0 / order as f64);
        }
        *timestep = timestep.min(del);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SimContext {
        SimContext::new(3, 2, SimOptions::default()).unwrap()
    }

    #[test]
    fn test_voltage_reads_current_iterate() {
        let mut c = ctx();
        c.rhs_old[1] = 2.0;
        c.rhs_old[2] = 0.5;
        let a = NodeId::new(1);
        let b = NodeId::new(2);
        assert_eq!(c.voltage(a), 2.0);
        assert_eq!(c.voltage_diff(a, b), 1.5);
        assert_eq!(c.voltage(NodeId::GROUND), 0.0);
    }

    #[test]
    fn test_integrate_backward_euler() {
        let mut c = ctx();
        c.order = 1;
        c.delta = 1e-3;
        c.compute_coefficients();
        // q moved from 1e-6 to 2e-6 C over 1 ms: 1 mA.
        c.states.set(1, 0, 1e-6);
        c.states.set(0, 0, 2e-6);
        let (geq, ceq) = c.integrate(1e-6, 0);
        assert!((c.states.get(0, 1) - 1e-3).abs() < 1e-15);
        assert!((geq - 1e-3).abs() < 1e-15);
        // geq * v + ceq reproduces the current with v = q / C = 2.
        assert!((geq * 2.0 + ceq - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn test_integrate_trapezoidal() {
        let mut c = ctx();
        c.method = IntegrationMethod::Trapezoidal;
        c.order = 2;
        c.delta = 1.0;
        c.compute_coefficients();
        c.states.set(1, 0, 1.0);
        c.states.set(1, 1, 0.5);
        c.states.set(0, 0, 2.0);
        c.integrate(1.0, 0);
        // i1 = 2/h * (q1 - q0) - i0 = 2 - 0.5
        assert!((c.states.get(0, 1) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_truncation_error_linear_charge_is_free() {
        let mut c = ctx();
        c.order = 1;
        c.delta = 1e-6;
        c.delta_old = [1e-6; NUM_STATE_VECTORS];
        // Charge ramps linearly: second divided difference is zero.
        for age in 0..NUM_STATE_VECTORS {
            c.states.set(age, 0, 1e-9 * (3 - age) as f64);
        }
        let mut step = 1.0;
        c.truncation_error(0, &mut step);
        assert!(step > 1e-3, "step = {step}");
    }

    #[test]
    fn test_truncation_error_curved_charge_limits_step() {
        let mut c = ctx();
        c.order = 1;
        c.delta = 1e-6;
        c.delta_old = [1e-6; NUM_STATE_VECTORS];
        for (age, q) in [4e-9, 1e-9, 0.0, 0.0].iter().enumerate() {
            c.states.set(age, 0, *q);
        }
        let mut step = 1.0;
        c.truncation_error(0, &mut step);
        assert!(step < 1.0 && step > 0.0, "step = {step}");
    }
}
