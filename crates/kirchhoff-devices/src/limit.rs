//! Junction helpers shared by semiconductor models.

/// Boltzmann constant (J/K).
pub const BOLTZMANN: f64 = 1.380649e-23;
/// Elementary charge (C).
pub const CHARGE: f64 = 1.602176634e-19;

/// Thermal voltage kT/q at a given temperature.
pub fn thermal_voltage(temp_k: f64) -> f64 {
    BOLTZMANN * temp_k / CHARGE
}

/// Voltage at which the junction current curvature becomes critical.
pub fn critical_voltage(vte: f64, isat: f64) -> f64 {
    vte * (vte / (std::f64::consts::SQRT_2 * isat)).ln()
}

/// Limit the change of a pn-junction voltage between iterations.
///
/// Returns the limited voltage and whether limiting kicked in. Forward
/// steps above `vcrit` are compressed logarithmically; large reverse steps
/// are clamped.
pub fn pnjlim(vnew: f64, vold: f64, vt: f64, vcrit: f64) -> (f64, bool) {
    if vnew > vcrit && (vnew - vold).abs() > 2.0 * vt {
        if vold > 0.0 {
            let arg = 1.0 + (vnew - vold) / vt;
            if arg > 0.0 {
                (vold + vt * arg.ln(), true)
            } else {
                (vcrit, true)
            }
        } else {
            (vt * (vnew / vt).ln(), true)
        }
    } else if vnew < 0.0 {
        let floor = if vold > 0.0 {
            -vold - 1.0
        } else {
            2.0 * vold - 1.0
        };
        if vnew < floor {
            (floor, true)
        } else {
            (vnew, false)
        }
    } else {
        (vnew, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thermal_voltage_room_temp() {
        let vt = thermal_voltage(300.15);
        assert!((vt - 0.025865).abs() < 1e-5, "vt = {}", vt);
    }

    #[test]
    fn test_pnjlim_compresses_forward_jump() {
        let vt = 0.0259;
        let vcrit = critical_voltage(vt, 1e-14);
        let (v, limited) = pnjlim(5.0, 0.6, vt, vcrit);
        assert!(limited);
        assert!(v < 1.0 && v > 0.6, "v = {}", v);
    }

    #[test]
    fn test_pnjlim_small_step_untouched() {
        let vt = 0.0259;
        let vcrit = critical_voltage(vt, 1e-14);
        assert_eq!(pnjlim(0.61, 0.6, vt, vcrit), (0.61, false));
        assert_eq!(pnjlim(-0.5, -0.4, vt, vcrit), (-0.5, false));
    }

    #[test]
    fn test_pnjlim_clamps_reverse_jump() {
        let (v, limited) = pnjlim(-50.0, 0.5, 0.0259, 0.6);
        assert!(limited);
        assert_eq!(v, -1.5);
    }
}
