//! Core circuit representation for Kirchhoff.
//!
//! This crate provides:
//! - [`SparseMatrix`]: sparse real/complex matrix with stable element handles
//!   and cached LU ordering
//! - [`NodeTable`]: circuit unknowns (node voltages and branch currents)
//! - [`Device`]: the stamp protocol every device kind implements
//! - [`Circuit`] and [`SimContext`]: the mutable state one analysis runs on
//! - [`SimOptions`]: tolerances and algorithm switches

pub mod breakpoint;
pub mod circuit;
pub mod context;
pub mod device;
pub mod error;
pub mod integration;
pub mod matrix;
pub mod node;
pub mod options;
pub mod state;

pub use breakpoint::Breakpoints;
pub use circuit::Circuit;
pub use context::{Analysis, InitMode, SimContext};
pub use device::{AdmittanceStamp, Device, ParamKind, ParamRef, SetupContext};
pub use error::{Error, Result};
pub use integration::{IntegrationMethod, MAX_ORDER};
pub use matrix::{ElementHandle, SparseMatrix};
pub use node::{Node, NodeId, NodeKind, NodeTable};
pub use options::SimOptions;
pub use state::{NUM_STATE_VECTORS, StateHistory};
