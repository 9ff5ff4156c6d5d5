//! Reference device models for Kirchhoff.
//!
//! This crate provides device models for:
//! - Passive elements: R, C, L
//! - Sources: V, I (independent) with time-varying waveforms
//! - Linear controlled sources: VCCS, VCVS
//! - Junction diode with voltage limiting and bypass
//!
//! Every model implements [`kirchhoff_core::Device`] for all instances of
//! its kind.

pub mod controlled;
pub mod diode;
pub mod limit;
pub mod passive;
pub mod sources;
pub mod waveforms;

pub use controlled::{Vccs, VccsModel, Vcvs, VcvsModel};
pub use diode::{Diode, DiodeModel, DiodeParams};
pub use passive::{
    Capacitor, CapacitorModel, Inductor, InductorModel, Resistor, ResistorModel,
};
pub use sources::{CurrentSource, CurrentSourceModel, SourceValue, VoltageSource, VoltageSourceModel};
pub use waveforms::Waveform;
