//! Simulator options.

use serde::{Deserialize, Serialize};

use crate::integration::IntegrationMethod;

/// 0 °C in kelvin.
pub const CELSIUS_OFFSET: f64 = 273.15;

/// Tolerances, iteration limits and algorithm switches for one run.
///
/// Defaults match the usual SPICE option values. All fields are optional
/// when deserializing; missing ones take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimOptions {
    /// Relative convergence tolerance.
    pub reltol: f64,
    /// Absolute current tolerance (A).
    pub abstol: f64,
    /// Absolute voltage tolerance (V).
    pub vntol: f64,
    /// Charge tolerance for truncation-error control (C).
    pub chgtol: f64,
    /// Truncation-error overestimation factor.
    pub trtol: f64,
    /// Minimum conductance added across junctions (S).
    pub gmin: f64,
    /// Conductance from every voltage node to ground (S); 0 disables.
    /// Read at setup.
    pub gshunt: f64,
    /// DC iteration limit.
    pub itl1: usize,
    /// Transient per-timepoint iteration limit.
    pub itl4: usize,
    /// Relative pivot threshold.
    pub pivot_rel_tol: f64,
    /// Absolute pivot threshold.
    pub pivot_abs_tol: f64,
    /// Circuit temperature (K).
    pub temp: f64,
    /// Nominal model temperature (K).
    pub tnom: f64,
    /// Highest integration order.
    pub max_order: usize,
    /// Integration method.
    pub method: IntegrationMethod,
    /// Number of gmin-stepping decades (0 disables).
    pub gmin_steps: usize,
    /// Number of source-stepping increments (0 disables).
    pub src_steps: usize,
    /// Time-step cuts allowed per timepoint before giving up.
    pub max_retries: usize,
    /// Limit node-voltage changes between iterations.
    pub node_damping: bool,
    /// Let devices skip evaluation when their inputs have not moved.
    pub bypass: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            reltol: 1e-3,
            abstol: 1e-12,
            vntol: 1e-6,
            chgtol: 1e-14,
            trtol: 7.0,
            gmin: 1e-12,
            gshunt: 0.0,
            itl1: 100,
            itl4: 10,
            pivot_rel_tol: 1e-3,
            pivot_abs_tol: 1e-13,
            temp: 27.0 + CELSIUS_OFFSET,
            tnom: 27.0 + CELSIUS_OFFSET,
            max_order: 2,
            method: IntegrationMethod::Trapezoidal,
            gmin_steps: 10,
            src_steps: 10,
            max_retries: 20,
            node_damping: false,
            bypass: true,
        }
    }
}

impl SimOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relative tolerance.
    pub fn with_reltol(mut self, reltol: f64) -> Self {
        self.reltol = reltol;
        self
    }

    /// Set the absolute current tolerance.
    pub fn with_abstol(mut self, abstol: f64) -> Self {
        self.abstol = abstol;
        self
    }

    /// Set the absolute voltage tolerance.
    pub fn with_vntol(mut self, vntol: f64) -> Self {
        self.vntol = vntol;
        self
    }

    pub fn with_gmin(mut self, gmin: f64) -> Self {
        self.gmin = gmin;
        self
    }

    pub fn with_gshunt(mut self, gshunt: f64) -> Self {
        self.gshunt = gshunt;
        self
    }

    /// Set the DC and transient iteration limits.
    pub fn with_iteration_limits(mut self, itl1: usize, itl4: usize) -> Self {
        self.itl1 = itl1;
        self.itl4 = itl4;
        self
    }

    /// Set the circuit temperature in degrees Celsius.
    pub fn with_temp_celsius(mut self, celsius: f64) -> Self {
        self.temp = celsius + CELSIUS_OFFSET;
        self
    }

    /// Set the integration method, capping the order to what it supports.
    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.method = method;
        self.max_order = self.max_order.min(method.max_order()).max(1);
        self
    }

    pub fn with_max_order(mut self, order: usize) -> Self {
        self.max_order = order.clamp(1, self.method.max_order());
        self
    }

    pub fn with_gmin_steps(mut self, steps: usize) -> Self {
        self.gmin_steps = steps;
        self
    }

    pub fn with_src_steps(mut self, steps: usize) -> Self {
        self.src_steps = steps;
        self
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_node_damping(mut self, enabled: bool) -> Self {
        self.node_damping = enabled;
        self
    }

    pub fn with_bypass(mut self, enabled: bool) -> Self {
        self.bypass = enabled;
        self
    }

    /// Effective maximum order for the configured method.
    pub fn effective_max_order(&self) -> usize {
        self.max_order.clamp(1, self.method.max_order())
    }
}
