//! Circuit: node table, device kinds and the numerical context.

use std::fmt;

use log::debug;
use num_complex::Complex64;

use crate::context::SimContext;
use crate::device::{Device, ParamRef, SetupContext};
use crate::error::{Error, Result};
use crate::matrix::{ElementHandle, SparseMatrix};
use crate::node::{NodeId, NodeKind, NodeTable};
use crate::options::SimOptions;

/// Top-level owner of everything one simulation run touches.
///
/// Devices refer to nodes by [`NodeId`] only. Analyses borrow the circuit
/// mutably for their whole run.
pub struct Circuit {
    pub nodes: NodeTable,
    devices: Vec<Box<dyn Device>>,
    pub ctx: SimContext,
    /// Diagonals that receive `gshunt`.
    shunts: Vec<ElementHandle>,
    num_states: usize,
    is_setup: bool,
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("nodes", &self.nodes.len())
            .field("devices", &self.devices)
            .field("num_states", &self.num_states)
            .field("is_setup", &self.is_setup)
            .finish()
    }
}

impl Circuit {
    pub fn new() -> Result<Self> {
        Self::with_options(SimOptions::default())
    }

    pub fn with_options(options: SimOptions) -> Result<Self> {
        Ok(Self {
            nodes: NodeTable::new(),
            devices: Vec::new(),
            ctx: SimContext::new(1, 0, options)?,
            shunts: Vec::new(),
            num_states: 0,
            is_setup: false,
        })
    }

    /// Find or create a named node.
    pub fn node(&mut self, name: &str) -> NodeId {
        self.nodes.node(name)
    }

    pub fn options(&self) -> &SimOptions {
        &self.ctx.options
    }

    pub fn options_mut(&mut self) -> &mut SimOptions {
        &mut self.ctx.options
    }

    /// Add a device kind and return its index.
    pub fn add_device<D: Device + 'static>(&mut self, device: D) -> usize {
        self.devices.push(Box::new(device));
        self.is_setup = false;
        self.devices.len() - 1
    }

    pub fn device(&self, index: usize) -> Option<&dyn Device> {
        self.devices.get(index).map(|d| d.as_ref())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn devices(&self) -> impl Iterator<Item = &dyn Device> {
        self.devices.iter().map(|d| d.as_ref())
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// Allocate matrix elements and state for every device, then apply
    /// the circuit temperature.
    pub fn setup(&mut self) -> Result<()> {
        if self.is_setup {
            return Ok(());
        }
        for device in &mut self.devices {
            let mut ctx =
                SetupContext::new(&mut self.ctx.matrix, &mut self.nodes, &mut self.num_states);
            device.setup(&mut ctx)?;
        }
        if self.ctx.options.gshunt > 0.0 {
            for node in self.nodes.iter() {
                if !node.is_ground() && node.kind() == NodeKind::Voltage {
                    let i = node.id().index();
                    self.shunts.push(self.ctx.matrix.make_element(i, i)?);
                }
            }
        }
        self.ctx.resize(self.nodes.len(), self.num_states)?;
        self.is_setup = true;
        self.temperature()?;
        debug!(
            "setup: {} unknowns, {} matrix elements, {} states",
            self.nodes.num_unknowns(),
            self.ctx.matrix.element_count(),
            self.num_states
        );
        Ok(())
    }

    /// Tear down what `setup` allocated and rebuild a fresh numerical
    /// context with the same options.
    pub fn unsetup(&mut self) -> Result<()> {
        for device in self.devices.iter_mut().rev() {
            device.unsetup(&mut self.nodes)?;
        }
        let options = self.ctx.options.clone();
        self.ctx = SimContext::new(self.nodes.len(), 0, options)?;
        self.shunts.clear();
        self.num_states = 0;
        self.is_setup = false;
        Ok(())
    }

    /// Destroy and rebuild the numerical context.
    pub fn reset(&mut self) -> Result<()> {
        self.unsetup()?;
        self.setup()
    }

    pub fn temperature(&mut self) -> Result<()> {
        self.ctx.temp = self.ctx.options.temp;
        for device in &mut self.devices {
            device.temperature(&self.ctx)?;
        }
        Ok(())
    }

    /// Clear the system and load every device.
    pub fn load(&mut self) -> Result<()> {
        self.ctx.clear_system();
        self.ctx.noncon = 0;
        for device in &mut self.devices {
            device.load(&mut self.ctx)?;
        }
        self.stamp_shunts();
        Ok(())
    }

    /// Clear the system and load the small-signal model of every device.
    pub fn ac_load(&mut self) -> Result<()> {
        self.ctx.clear_system();
        for device in &mut self.devices {
            device.ac_load(&mut self.ctx)?;
        }
        self.stamp_shunts();
        Ok(())
    }

    /// Clear the system and load every device at complex frequency `s`.
    pub fn pz_load(&mut self, s: Complex64) -> Result<()> {
        self.ctx.clear_system();
        for device in &mut self.devices {
            device.pz_load(&mut self.ctx, s)?;
        }
        self.stamp_shunts();
        Ok(())
    }

    fn stamp_shunts(&mut self) {
        let g = self.ctx.options.gshunt;
        for &h in &self.shunts {
            self.ctx.matrix.add(h, g);
        }
    }

    /// True when every device accepts the current iterate.
    pub fn convergence_test(&self) -> bool {
        self.devices.iter().all(|d| d.convergence_test(&self.ctx))
    }

    /// Smallest step allowed by any device's truncation error.
    pub fn truncation_error(&self, timestep: &mut f64) {
        for device in &self.devices {
            device.truncation_error(&self.ctx, timestep);
        }
    }

    pub fn accept(&mut self) -> Result<()> {
        for device in &mut self.devices {
            device.accept(&mut self.ctx)?;
        }
        Ok(())
    }

    /// Branch-current unknown of a named instance.
    pub fn find_branch(&self, instance: &str) -> Option<NodeId> {
        self.devices.iter().find_map(|d| d.find_branch(instance))
    }

    /// Every perturbable parameter, tagged with its device index.
    pub fn parameters(&self) -> Vec<(usize, ParamRef)> {
        self.devices
            .iter()
            .enumerate()
            .flat_map(|(i, d)| d.parameters().into_iter().map(move |p| (i, p)))
            .collect()
    }

    fn device_mut(&mut self, index: usize) -> Result<&mut Box<dyn Device>> {
        self.devices
            .get_mut(index)
            .ok_or_else(|| Error::InvalidCircuit(format!("no device at index {index}")))
    }

    pub fn param(&self, index: usize, param: &ParamRef) -> Option<f64> {
        self.devices.get(index).and_then(|d| d.param(param))
    }

    pub fn set_param(&mut self, index: usize, param: &ParamRef, value: f64) -> Result<()> {
        self.device_mut(index)?.set_param(param, value)
    }

    /// Find a parameter by instance and parameter name.
    pub fn find_param(&self, instance: &str, param: &str) -> Option<(usize, ParamRef)> {
        self.parameters()
            .into_iter()
            .find(|(_, p)| p.instance_name == instance && p.param_name == param)
    }

    /// Run `f` with `matrix`, `rhs` and `irhs` swapped into the context.
    ///
    /// Device loads inside `f` stamp into the swapped-in system. The
    /// circuit's own matrix and right-hand sides are swapped back before
    /// returning, whatever `f` returns.
    pub fn with_swapped<R>(
        &mut self,
        matrix: &mut SparseMatrix,
        rhs: &mut Vec<f64>,
        irhs: &mut Vec<f64>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.swap_system(matrix, rhs, irhs);
        let out = f(self);
        self.swap_system(matrix, rhs, irhs);
        out
    }

    fn swap_system(&mut self, matrix: &mut SparseMatrix, rhs: &mut Vec<f64>, irhs: &mut Vec<f64>) {
        std::mem::swap(&mut self.ctx.matrix, matrix);
        std::mem::swap(&mut self.ctx.rhs, rhs);
        std::mem::swap(&mut self.ctx.irhs, irhs);
    }

    /// Re-run setup for one device against the context's current matrix.
    ///
    /// Used once the topology is fixed; creating nodes or state here is an
    /// error.
    pub fn setup_device(&mut self, index: usize) -> Result<()> {
        let nodes_before = self.nodes.len();
        let mut num_states = self.num_states;
        let device = self
            .devices
            .get_mut(index)
            .ok_or_else(|| Error::InvalidCircuit(format!("no device at index {index}")))?;
        let mut ctx = SetupContext::new(&mut self.ctx.matrix, &mut self.nodes, &mut num_states);
        device.setup(&mut ctx)?;
        if self.nodes.len() != nodes_before || num_states != self.num_states {
            return Err(Error::InvalidCircuit(format!(
                "{} allocated nodes or state after setup",
                device.kind()
            )));
        }
        Ok(())
    }

    pub fn temperature_device(&mut self, index: usize) -> Result<()> {
        let device = self
            .devices
            .get_mut(index)
            .ok_or_else(|| Error::InvalidCircuit(format!("no device at index {index}")))?;
        device.temperature(&self.ctx)
    }

    /// Load one device without clearing the system first.
    pub fn load_device(&mut self, index: usize) -> Result<()> {
        let device = self
            .devices
            .get_mut(index)
            .ok_or_else(|| Error::InvalidCircuit(format!("no device at index {index}")))?;
        device.load(&mut self.ctx)
    }

    /// AC-load one device without clearing the system first.
    pub fn ac_load_device(&mut self, index: usize) -> Result<()> {
        let device = self
            .devices
            .get_mut(index)
            .ok_or_else(|| Error::InvalidCircuit(format!("no device at index {index}")))?;
        device.ac_load(&mut self.ctx)
    }
}
