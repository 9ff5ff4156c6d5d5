//! Integration formulas for charge-storage elements.
//!
//! Reactive devices keep their charge (or flux) in the state history and ask
//! the context to turn it into a companion conductance and current. The
//! coefficients below are recomputed once per time step.

use serde::{Deserialize, Serialize};

/// Highest integration order supported by any method.
pub const MAX_ORDER: usize = 2;

/// Integration method for transient analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    /// Backward Euler (first order, A-stable).
    BackwardEuler,
    /// Trapezoidal (second order, A-stable).
    #[default]
    Trapezoidal,
    /// Variable-step BDF (Gear) up to second order, L-stable.
    Gear,
}

impl IntegrationMethod {
    /// Highest order this method can run at.
    pub fn max_order(self) -> usize {
        match self {
            IntegrationMethod::BackwardEuler => 1,
            IntegrationMethod::Trapezoidal | IntegrationMethod::Gear => MAX_ORDER,
        }
    }

    /// Derivative coefficients for the current step.
    ///
    /// `delta_old[1]` is the previous accepted step, used by second-order
    /// Gear. For order 1 every method reduces to backward Euler.
    pub fn coefficients(self, order: usize, delta: f64, delta_old: &[f64]) -> [f64; MAX_ORDER + 1] {
        let mut ag = [0.0; MAX_ORDER + 1];
        if order <= 1 {
            ag[0] = 1.0 / delta;
            ag[1] = -1.0 / delta;
            return ag;
        }
        match self {
            IntegrationMethod::BackwardEuler => {
                ag[0] = 1.0 / delta;
                ag[1] = -1.0 / delta;
            }
            IntegrationMethod::Trapezoidal => {
                // ag[1] multiplies the previous current rather than a charge.
                ag[0] = 2.0 / delta;
                ag[1] = 1.0;
            }
            IntegrationMethod::Gear => {
                let h0 = delta;
                let h1 = delta_old.get(1).copied().filter(|h| *h > 0.0).unwrap_or(delta);
                ag[0] = (2.0 * h0 + h1) / (h0 * (h0 + h1));
                ag[1] = -(h0 + h1) / (h0 * h1);
                ag[2] = h0 / (h1 * (h0 + h1));
            }
        }
        ag
    }

    /// Error constant used by the truncation-error estimate.
    pub fn lte_factor(self, order: usize) -> f64 {
        match (self, order) {
            (_, 0 | 1) => 0.5,
            (IntegrationMethod::Gear, _) => 2.0 / 9.0,
            _ => 1.0 / 12.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_order_is_backward_euler() {
        for method in [
            IntegrationMethod::BackwardEuler,
            IntegrationMethod::Trapezoidal,
            IntegrationMethod::Gear,
        ] {
            let ag = method.coefficients(1, 1e-3, &[1e-3, 1e-3]);
            assert_eq!(ag[0], 1e3);
            assert_eq!(ag[1], -1e3);
        }
    }

    #[test]
    fn test_gear2_uniform_step() {
        let h = 1e-6;
        let ag = IntegrationMethod::Gear.coefficients(2, h, &[h, h]);
        assert!((ag[0] - 1.5 / h).abs() / ag[0] < 1e-12);
        assert!((ag[1] + 2.0 / h).abs() / ag[0] < 1e-12);
        assert!((ag[2] - 0.5 / h).abs() / ag[0] < 1e-12);
        // Derivative of a constant is zero.
        assert!((ag[0] + ag[1] + ag[2]).abs() * h < 1e-9);
    }

    #[test]
    fn test_trapezoidal_order2() {
        let ag = IntegrationMethod::Trapezoidal.coefficients(2, 0.5, &[0.5, 0.5]);
        assert_eq!(ag[0], 4.0);
        assert_eq!(ag[1], 1.0);
    }

    #[test]
    fn test_max_order() {
        assert_eq!(IntegrationMethod::BackwardEuler.max_order(), 1);
        assert_eq!(IntegrationMethod::Trapezoidal.max_order(), 2);
    }
}
