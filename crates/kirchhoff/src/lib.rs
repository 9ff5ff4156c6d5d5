//! Kirchhoff: an analog circuit simulation engine.
//!
//! The engine is split into three crates, re-exported here:
//! - [`core`]: sparse matrix, node table, device protocol and the
//!   simulation context
//! - [`devices`]: reference models (R, L, C, sources, controlled
//!   sources, diode)
//! - [`solver`]: Newton-Raphson and the analysis drivers
//!
//! # Example
//!
//! ```
//! use kirchhoff::prelude::*;
//!
//! let mut ckt = Circuit::new().unwrap();
//! let input = ckt.node("in");
//! let out = ckt.node("out");
//! ckt.add_device(VoltageSourceModel::new().with(VoltageSource::dc(
//!     "v1",
//!     input,
//!     NodeId::GROUND,
//!     1.0,
//! )));
//! ckt.add_device(
//!     ResistorModel::new()
//!         .with(Resistor::new("r1", input, out, 1e3))
//!         .with(Resistor::new("r2", out, NodeId::GROUND, 1e3)),
//! );
//!
//! let mut rec = Recorder::new();
//! run_op(&mut ckt, &NoInterrupt, &mut rec).unwrap();
//! let v = rec.plot("op").unwrap().real("v(out)").unwrap()[0];
//! assert!((v - 0.5).abs() < 1e-9);
//! ```

pub use kirchhoff_core as core;
pub use kirchhoff_devices as devices;
pub use kirchhoff_solver as solver;

pub use kirchhoff_core::{Circuit, NodeId, SimOptions};
pub use kirchhoff_solver::{Error, Job, JobOutcome, Result};

/// Everything needed to build a circuit and run an analysis on it.
pub mod prelude {
    pub use num_complex::Complex64;

    pub use kirchhoff_core::{Circuit, Device, NodeId, SimOptions};
    pub use kirchhoff_devices::{
        Capacitor, CapacitorModel, CurrentSource, CurrentSourceModel, Diode, DiodeModel,
        DiodeParams, Inductor, InductorModel, Resistor, ResistorModel, Vccs, VccsModel, Vcvs,
        VcvsModel, VoltageSource, VoltageSourceModel, Waveform,
    };
    pub use kirchhoff_solver::{
        AcSweep, CancelFlag, DcSweepParams, Interrupt, Job, JobOutcome, NoInterrupt, NoSync,
        NullSink, OutputSink, Plot, PzInput, PzParams, Recorder, SensOutput, SensParams,
        SweepType, SyncDecision, SyncHook, TransientParams, run_ac, run_dc_sweep, run_op, run_pz,
        run_sensitivity, run_transient,
    };
}
