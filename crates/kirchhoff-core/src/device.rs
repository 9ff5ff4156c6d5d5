//! Device stamp protocol.
//!
//! One [`Device`] implementation exists per device *kind* and owns every
//! instance of that kind. The driver calls the protocol in this order:
//!
//! 1. [`Device::setup`] once per topology: allocate matrix elements, internal
//!    nodes and state slots. Calling it again must be harmless and return
//!    the same handles.
//! 2. [`Device::temperature`] whenever the circuit temperature changes.
//! 3. [`Device::load`] (or [`Device::ac_load`], [`Device::pz_load`]) on every
//!    iteration. The context has already cleared the matrix and RHS. Loads
//!    must be idempotent for identical node voltages.
//! 4. [`Device::unsetup`] before the topology is torn down.

use std::fmt;

use num_complex::Complex64;

use crate::context::SimContext;
use crate::error::Result;
use crate::matrix::{ElementHandle, SparseMatrix};
use crate::node::{NodeId, NodeTable};

/// Allocation context handed to [`Device::setup`].
pub struct SetupContext<'a> {
    pub matrix: &'a mut SparseMatrix,
    pub nodes: &'a mut NodeTable,
    num_states: &'a mut usize,
}

impl<'a> SetupContext<'a> {
    pub fn new(
        matrix: &'a mut SparseMatrix,
        nodes: &'a mut NodeTable,
        num_states: &'a mut usize,
    ) -> Self {
        Self {
            matrix,
            nodes,
            num_states,
        }
    }

    /// Get or create the element at `(row, col)`.
    pub fn make_element(&mut self, row: NodeId, col: NodeId) -> Result<ElementHandle> {
        self.matrix.make_element(row.index(), col.index())
    }

    /// Reserve `count` consecutive state slots and return the first index.
    pub fn alloc_states(&mut self, count: usize) -> usize {
        let offset = *self.num_states;
        *self.num_states += count;
        offset
    }

    pub fn num_states(&self) -> usize {
        *self.num_states
    }
}

/// The four handles of a two-terminal admittance stamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmittanceStamp {
    pub pp: ElementHandle,
    pub pn: ElementHandle,
    pub np: ElementHandle,
    pub nn: ElementHandle,
}

impl AdmittanceStamp {
    pub fn new(ctx: &mut SetupContext<'_>, pos: NodeId, neg: NodeId) -> Result<Self> {
        Ok(Self {
            pp: ctx.make_element(pos, pos)?,
            pn: ctx.make_element(pos, neg)?,
            np: ctx.make_element(neg, pos)?,
            nn: ctx.make_element(neg, neg)?,
        })
    }

    /// Stamp a real conductance.
    #[inline]
    pub fn stamp(&self, m: &mut SparseMatrix, g: f64) {
        m.add(self.pp, g);
        m.add(self.nn, g);
        m.add(self.pn, -g);
        m.add(self.np, -g);
    }

    /// Stamp a complex admittance.
    #[inline]
    pub fn stamp_complex(&self, m: &mut SparseMatrix, y: Complex64) {
        m.add_complex(self.pp, y);
        m.add_complex(self.nn, y);
        m.add_complex(self.pn, -y);
        m.add_complex(self.np, -y);
    }
}

/// How a parameter is named in sensitivity output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// The instance's defining value (R of a resistor); named `inst`.
    Principal,
    /// Other instance parameters; named `inst_param`.
    Instance,
    /// Model parameters; named `inst:param`.
    Model,
}

/// A perturbable real parameter of one device instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRef {
    /// Index of the instance within its device.
    pub instance: usize,
    /// Device-defined parameter identifier.
    pub id: u32,
    pub instance_name: String,
    pub param_name: &'static str,
    pub kind: ParamKind,
}

impl ParamRef {
    /// Name used for filtering and output.
    pub fn display_name(&self) -> String {
        match self.kind {
            ParamKind::Principal => self.instance_name.clone(),
            ParamKind::Instance => format!("{}_{}", self.instance_name, self.param_name),
            ParamKind::Model => format!("{}:{}", self.instance_name, self.param_name),
        }
    }
}

/// A device kind implementing the stamp protocol for all of its instances.
pub trait Device: fmt::Debug {
    /// Short kind name used in logs ("resistor", "diode", ...).
    fn kind(&self) -> &'static str;

    /// Number of instances held.
    fn instance_count(&self) -> usize;

    /// Allocate matrix elements, internal nodes and state slots.
    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()>;

    /// Release internal nodes and forget cached handles.
    fn unsetup(&mut self, _nodes: &mut NodeTable) -> Result<()> {
        Ok(())
    }

    /// Recompute temperature-dependent quantities.
    fn temperature(&mut self, _ctx: &SimContext) -> Result<()> {
        Ok(())
    }

    /// Stamp the linearized model at the current iterate.
    fn load(&mut self, ctx: &mut SimContext) -> Result<()>;

    /// Stamp the small-signal model at `ctx.omega`.
    fn ac_load(&mut self, ctx: &mut SimContext) -> Result<()>;

    /// Stamp the small-signal model at complex frequency `s`.
    fn pz_load(&mut self, _ctx: &mut SimContext, _s: Complex64) -> Result<()> {
        Ok(())
    }

    /// Device-level convergence check after a Newton pass.
    fn convergence_test(&self, _ctx: &SimContext) -> bool {
        true
    }

    /// Shrink `timestep` to honor this device's truncation error.
    fn truncation_error(&self, _ctx: &SimContext, _timestep: &mut f64) {}

    /// Called once a time point is accepted; sources register their next
    /// breakpoints here.
    fn accept(&mut self, _ctx: &mut SimContext) -> Result<()> {
        Ok(())
    }

    /// Perturbable parameters of every instance.
    fn parameters(&self) -> Vec<ParamRef> {
        Vec::new()
    }

    /// Read a parameter by reference.
    fn param(&self, _param: &ParamRef) -> Option<f64> {
        None
    }

    /// Write a parameter by reference.
    fn set_param(&mut self, param: &ParamRef, _value: f64) -> Result<()> {
        Err(crate::error::Error::UnknownParameter {
            device: param.instance_name.clone(),
            param: param.param_name.to_string(),
        })
    }

    /// Branch-current unknown of a named instance, if it has one.
    fn find_branch(&self, _instance: &str) -> Option<NodeId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_display_names() {
        let mut p = ParamRef {
            instance: 0,
            id: 1,
            instance_name: "r1".to_string(),
            param_name: "r",
            kind: ParamKind::Principal,
        };
        assert_eq!(p.display_name(), "r1");
        p.kind = ParamKind::Instance;
        assert_eq!(p.display_name(), "r1_r");
        p.kind = ParamKind::Model;
        assert_eq!(p.display_name(), "r1:r");
    }

    #[test]
    fn test_alloc_states_is_consecutive() {
        let mut matrix = SparseMatrix::new(0).unwrap();
        let mut nodes = NodeTable::new();
        let mut count = 0;
        let mut ctx = SetupContext::new(&mut matrix, &mut nodes, &mut count);
        assert_eq!(ctx.alloc_states(2), 0);
        assert_eq!(ctx.alloc_states(3), 2);
        assert_eq!(ctx.num_states(), 5);
    }

    #[test]
    fn test_admittance_stamp() {
        let mut matrix = SparseMatrix::new(0).unwrap();
        let mut nodes = NodeTable::new();
        let a = nodes.node("a");
        let mut count = 0;
        let stamp = {
            let mut ctx = SetupContext::new(&mut matrix, &mut nodes, &mut count);
            AdmittanceStamp::new(&mut ctx, a, NodeId::GROUND).unwrap()
        };
        stamp.stamp(&mut matrix, 2.0);
        assert_eq!(matrix.value_at(1, 1).re, 2.0);
        assert_eq!(matrix.element_count(), 1);
    }
}
