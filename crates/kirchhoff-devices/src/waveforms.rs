//! Time-varying source waveforms for transient analysis.

use std::f64::consts::PI;

/// A time-varying source waveform.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Waveform {
    /// Pulse waveform: PULSE(V1 V2 TD TR TF PW PER)
    ///
    /// - V1: Initial value
    /// - V2: Pulsed value
    /// - TD: Delay time (before first pulse)
    /// - TR: Rise time
    /// - TF: Fall time
    /// - PW: Pulse width (at V2)
    /// - PER: Period (0 for single pulse)
    Pulse {
        v1: f64,
        v2: f64,
        td: f64,
        tr: f64,
        tf: f64,
        pw: f64,
        per: f64,
    },

    /// Sinusoidal waveform: SIN(VO VA FREQ TD THETA PHASE)
    ///
    /// THETA is a damping factor (1/s); PHASE is in degrees.
    Sin {
        vo: f64,
        va: f64,
        freq: f64,
        td: f64,
        theta: f64,
        phase: f64,
    },

    /// Piecewise linear waveform: PWL(T1 V1 T2 V2 ...), sorted by time.
    Pwl { points: Vec<(f64, f64)> },
}

impl Waveform {
    /// Create a pulse waveform.
    pub fn pulse(v1: f64, v2: f64, td: f64, tr: f64, tf: f64, pw: f64, per: f64) -> Self {
        Waveform::Pulse {
            v1,
            v2,
            td,
            tr,
            tf,
            pw,
            per,
        }
    }

    /// Create an undamped sinusoid starting at t = 0.
    pub fn sin(vo: f64, va: f64, freq: f64) -> Self {
        Waveform::Sin {
            vo,
            va,
            freq,
            td: 0.0,
            theta: 0.0,
            phase: 0.0,
        }
    }

    /// Create a piecewise linear waveform. Points are sorted by time.
    pub fn pwl(mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Waveform::Pwl { points }
    }

    /// Evaluate the waveform at a given time.
    pub fn value_at(&self, time: f64) -> f64 {
        match self {
            Waveform::Pulse {
                v1,
                v2,
                td,
                tr,
                tf,
                pw,
                per,
            } => eval_pulse(*v1, *v2, *td, *tr, *tf, *pw, *per, time),
            Waveform::Sin {
                vo,
                va,
                freq,
                td,
                theta,
                phase,
            } => {
                if time < *td {
                    return vo + va * (phase * PI / 180.0).sin();
                }
                let t = time - td;
                let damping = if *theta > 0.0 { (-theta * t).exp() } else { 1.0 };
                vo + va * damping * (2.0 * PI * freq * t + phase * PI / 180.0).sin()
            }
            Waveform::Pwl { points } => eval_pwl(points, time),
        }
    }

    /// Next corner of the waveform strictly after `time + min_gap`.
    pub fn next_breakpoint(&self, time: f64, min_gap: f64) -> Option<f64> {
        match self {
            Waveform::Pulse {
                td,
                tr,
                tf,
                pw,
                per,
                ..
            } => {
                if time + min_gap < *td {
                    return Some(*td);
                }
                let since = time - td;
                let (base, t_rel) = if *per > 0.0 {
                    let cycles = (since / per).floor();
                    (td + cycles * per, since - cycles * per)
                } else {
                    (*td, since)
                };
                let corners = [*tr, tr + pw, tr + pw + tf];
                corners
                    .iter()
                    .find(|&&c| c > t_rel + min_gap)
                    .map(|c| base + c)
                    .or_else(|| (*per > 0.0).then(|| base + per))
            }
            Waveform::Sin { td, .. } => (time + min_gap < *td).then_some(*td),
            Waveform::Pwl { points } => points
                .iter()
                .map(|&(t, _)| t)
                .find(|&t| t > time + min_gap),
        }
    }
}

/// Evaluate a pulse waveform at time t.
#[allow(clippy::too_many_arguments)]
fn eval_pulse(v1: f64, v2: f64, td: f64, tr: f64, tf: f64, pw: f64, per: f64, t: f64) -> f64 {
    if t < td {
        return v1;
    }

    let t_rel = if per > 0.0 { (t - td) % per } else { t - td };

    if t_rel < tr {
        v1 + (v2 - v1) * t_rel / tr
    } else if t_rel < tr + pw {
        v2
    } else if t_rel < tr + pw + tf {
        v2 - (v2 - v1) * (t_rel - tr - pw) / tf
    } else {
        v1
    }
}

/// Evaluate a PWL waveform, holding the end values outside its range.
fn eval_pwl(points: &[(f64, f64)], t: f64) -> f64 {
    let Some(&(t0, v0)) = points.first() else {
        return 0.0;
    };
    if t <= t0 {
        return v0;
    }
    for w in points.windows(2) {
        let (ta, va) = w[0];
        let (tb, vb) = w[1];
        if t <= tb {
            if tb <= ta {
                return vb;
            }
            return va + (vb - va) * (t - ta) / (tb - ta);
        }
    }
    points.last().map(|p| p.1).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_shape() {
        let w = Waveform::pulse(0.0, 1.0, 1e-6, 1e-9, 1e-9, 5e-6, 10e-6);
        assert_eq!(w.value_at(0.0), 0.0);
        assert!((w.value_at(1e-6 + 0.5e-9) - 0.5).abs() < 1e-6);
        assert_eq!(w.value_at(3e-6), 1.0);
        assert_eq!(w.value_at(8e-6), 0.0);
        assert_eq!(w.value_at(13e-6), 1.0);
    }

    #[test]
    fn test_pulse_breakpoints() {
        let w = Waveform::pulse(0.0, 1.0, 1e-6, 1e-9, 1e-9, 5e-6, 10e-6);
        let gap = 1e-15;
        assert_eq!(w.next_breakpoint(0.0, gap), Some(1e-6));
        let b = w.next_breakpoint(1e-6, gap).unwrap();
        assert!((b - (1e-6 + 1e-9)).abs() < 1e-18);
        // After the fall edge the next corner is the start of the next period.
        let b = w.next_breakpoint(7e-6, gap).unwrap();
        assert!((b - 11e-6).abs() < 1e-15, "b = {}", b);
    }

    #[test]
    fn test_single_pulse_ends() {
        let w = Waveform::pulse(0.0, 1.0, 0.0, 1e-9, 1e-9, 1e-6, 0.0);
        assert_eq!(w.next_breakpoint(2e-6, 1e-15), None);
    }

    #[test]
    fn test_sin_value() {
        let w = Waveform::sin(1.0, 2.0, 1e3);
        assert!((w.value_at(0.25e-3) - 3.0).abs() < 1e-9);
        assert_eq!(w.next_breakpoint(0.0, 1e-15), None);
    }

    #[test]
    fn test_pwl_interpolates() {
        let w = Waveform::pwl(vec![(1.0, 2.0), (0.0, 0.0), (2.0, 2.0)]);
        assert_eq!(w.value_at(-1.0), 0.0);
        assert_eq!(w.value_at(0.5), 1.0);
        assert_eq!(w.value_at(1.5), 2.0);
        assert_eq!(w.value_at(5.0), 2.0);
        assert_eq!(w.next_breakpoint(0.5, 1e-15), Some(1.0));
    }
}
