//! Type definitions for transient analysis.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Transient analysis parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientParams {
    /// Suggested output step (s).
    pub tstep: f64,
    /// Stop time (s).
    pub tstop: f64,
    /// Time before which no records are emitted (s).
    #[serde(default)]
    pub tstart: f64,
    /// Largest internal step (s); `min(tstep, (tstop - tstart) / 50)` when
    /// absent.
    #[serde(default)]
    pub tmax: Option<f64>,
    /// Skip the operating point and start from initial conditions.
    #[serde(default)]
    pub uic: bool,
    /// Extra times to land on exactly.
    #[serde(default)]
    pub breakpoints: Vec<f64>,
}

impl TransientParams {
    pub fn new(tstep: f64, tstop: f64) -> Self {
        Self {
            tstep,
            tstop,
            tstart: 0.0,
            tmax: None,
            uic: false,
            breakpoints: Vec::new(),
        }
    }

    pub fn with_uic(mut self) -> Self {
        self.uic = true;
        self
    }

    pub fn with_tmax(mut self, tmax: f64) -> Self {
        self.tmax = Some(tmax);
        self
    }

    pub fn with_tstart(mut self, tstart: f64) -> Self {
        self.tstart = tstart;
        self
    }

    pub fn with_breakpoint(mut self, time: f64) -> Self {
        self.breakpoints.push(time);
        self
    }

    /// Largest step the driver will take.
    pub fn max_step(&self) -> f64 {
        match self.tmax {
            Some(tmax) if tmax > 0.0 => tmax,
            _ => self.tstep.min((self.tstop - self.tstart) / 50.0),
        }
    }

    /// First trial step.
    pub fn initial_step(&self) -> f64 {
        (self.tstep.min(self.tstop / 50.0) / 10.0).min(self.max_step())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.tstep) || !positive(self.tstop) {
            return Err(Error::InvalidJob(format!(
                "transient needs positive tstep and tstop (got {} and {})",
                self.tstep, self.tstop
            )));
        }
        if !(0.0..self.tstop).contains(&self.tstart) {
            return Err(Error::InvalidJob(format!(
                "tstart {} is outside [0, {})",
                self.tstart, self.tstop
            )));
        }
        if let Some(tmax) = self.tmax {
            if !tmax.is_finite() || tmax < 0.0 {
                return Err(Error::InvalidJob(format!("invalid tmax {tmax}")));
            }
        }
        Ok(())
    }
}

/// Where the transient driver stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranPhase {
    /// Operating point and history not yet established.
    #[default]
    Setup,
    /// Ready to attempt the next time point.
    Stepping,
    /// The last attempt was committed.
    StepAccepted,
    /// The last attempt was discarded; the next one retries from the same
    /// time with a smaller step.
    StepRejected,
    /// `tstop` reached.
    Done,
}

/// Answer of a [`SyncHook`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncDecision {
    /// Discard the step that just passed the error checks and redo it
    /// with `delta`.
    pub redo: bool,
    /// Step to use next. Ignored unless positive and finite.
    pub delta: f64,
}

impl SyncDecision {
    /// Go on with `delta`.
    pub fn keep(delta: f64) -> Self {
        Self { redo: false, delta }
    }

    /// Redo the last step with `delta`.
    pub fn redo(delta: f64) -> Self {
        Self { redo: true, delta }
    }
}

/// External time synchronization.
///
/// Consulted before every trial step (with the step about to be tried) and
/// after every step that passed the error checks (with the proposed next
/// step). Only the second call can discard a step: before the trial a
/// `redo` answer just sets the step. A redo must shrink the step; one that
/// does not halves it. The driver never steps past `tstop`, whatever the
/// hook answers.
pub trait SyncHook {
    fn sync(
        &mut self,
        time: f64,
        proposed_delta: f64,
        prev_delta: f64,
        redo_requested: bool,
    ) -> SyncDecision;
}

/// Accepts every proposal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSync;

impl SyncHook for NoSync {
    fn sync(&mut self, _time: f64, proposed_delta: f64, _prev_delta: f64, _redo: bool) -> SyncDecision {
        SyncDecision::keep(proposed_delta)
    }
}

impl<F> SyncHook for F
where
    F: FnMut(f64, f64, f64, bool) -> SyncDecision,
{
    fn sync(
        &mut self,
        time: f64,
        proposed_delta: f64,
        prev_delta: f64,
        redo_requested: bool,
    ) -> SyncDecision {
        self(time, proposed_delta, prev_delta, redo_requested)
    }
}
