//! Analysis drivers for Kirchhoff.
//!
//! This crate provides:
//! - Newton-Raphson iteration over the device stamp protocol
//! - DC operating point (with gmin and source stepping) and DC sweeps
//! - Transient analysis with truncation-error and breakpoint control
//! - AC small-signal sweeps (linear, decade, octave)
//! - DC and AC sensitivity by parameter perturbation
//! - Pole-zero analysis
//! - Output sinks and cooperative cancellation

pub mod ac;
pub mod dc;
pub mod error;
pub mod interrupt;
pub mod job;
pub mod newton;
pub mod op;
pub mod output;
pub mod pz;
pub mod sensitivity;
pub mod transient;

pub use ac::{AcSweep, SweepType, count_steps, run_ac};
pub use dc::{DcSweepParams, run_dc_sweep};
pub use error::{Error, Result};
pub use interrupt::{CancelFlag, Interrupt, NoInterrupt};
pub use job::{Job, JobOutcome};
pub use newton::{ConvergenceCriteria, Forcing, Newton, NrPhase, NrStats};
pub use op::{OpResult, OpStrategy, dc_solve, node_forcing, run_op};
pub use output::{NullSink, OutputSink, Plot, PlotHeader, Recorder, ScaleKind, Values};
pub use pz::{PzInput, PzParams, PzResult, PzTarget, run_pz};
pub use sensitivity::{SensOutput, SensParams, run_sensitivity};
pub use transient::{
    NoSync, SyncDecision, SyncHook, TranPhase, TransientDriver, TransientParams,
    TransientSummary, run_transient,
};
