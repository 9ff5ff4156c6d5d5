//! Transient analysis engine.
//!
//! Time points are found one at a time by Newton iteration on the device
//! companion models. The step is controlled by:
//!
//! - **Convergence**: a time point that fails to converge is retried with
//!   an eighth of the step at first order.
//! - **Truncation error**: devices shrink the proposed next step; an
//!   attempt whose error asks for less than 90 % of the step taken is
//!   rejected.
//! - **Breakpoints**: waveform corners and user times are landed on
//!   exactly, after which the method restarts at first order.
//! - **Synchronization**: an optional [`SyncHook`] may shorten steps or
//!   discard them.
//!
//! # Module Structure
//!
//! - [`types`] - Parameters, driver phases and the sync hook
//! - [`result`] - Run statistics and interpolation of recorded plots
//! - [`solver`] - The stepping driver

pub mod result;
pub mod solver;
pub mod types;

pub use result::{TransientSummary, sample};
pub use solver::{TransientDriver, run_transient};
pub use types::{NoSync, SyncDecision, SyncHook, TranPhase, TransientParams};
