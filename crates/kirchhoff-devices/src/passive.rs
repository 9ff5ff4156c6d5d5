//! Passive device models: R, C, L.

use log::warn;
use num_complex::Complex64;

use kirchhoff_core::{
    AdmittanceStamp, Device, ElementHandle, Error, InitMode, NodeId, NodeTable, ParamKind,
    ParamRef, Result, SetupContext, SimContext,
};

/// Resistances below this are raised to it.
pub const MIN_RESISTANCE: f64 = 1e-3;

fn unknown(param: &ParamRef) -> Error {
    Error::UnknownParameter {
        device: param.instance_name.clone(),
        param: param.param_name.to_string(),
    }
}

// ────────────────────── Resistor ──────────────────────

/// A resistor instance.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub name: String,
    pub pos: NodeId,
    pub neg: NodeId,
    /// Resistance at the nominal temperature (ohms).
    pub resistance: f64,
    /// First- and second-order temperature coefficients.
    pub tc1: f64,
    pub tc2: f64,
    conductance: f64,
    stamp: AdmittanceStamp,
}

impl Resistor {
    pub fn new(name: impl Into<String>, pos: NodeId, neg: NodeId, resistance: f64) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            resistance,
            tc1: 0.0,
            tc2: 0.0,
            conductance: 1.0 / resistance.abs().max(MIN_RESISTANCE),
            stamp: AdmittanceStamp::default(),
        }
    }

    pub fn with_tc(mut self, tc1: f64, tc2: f64) -> Self {
        self.tc1 = tc1;
        self.tc2 = tc2;
        self
    }

    /// Conductance at the last applied temperature.
    pub fn conductance(&self) -> f64 {
        self.conductance
    }
}

const R_RESISTANCE: u32 = 0;
const R_TC1: u32 = 1;
const R_TC2: u32 = 2;

/// All resistors of a circuit.
#[derive(Debug, Clone, Default)]
pub struct ResistorModel {
    pub instances: Vec<Resistor>,
}

impl ResistorModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, r: Resistor) -> Self {
        self.instances.push(r);
        self
    }

    pub fn add(&mut self, r: Resistor) -> usize {
        self.instances.push(r);
        self.instances.len() - 1
    }
}

impl Device for ResistorModel {
    fn kind(&self) -> &'static str {
        "resistor"
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        for r in &mut self.instances {
            r.stamp = AdmittanceStamp::new(ctx, r.pos, r.neg)?;
        }
        Ok(())
    }

    fn temperature(&mut self, ctx: &SimContext) -> Result<()> {
        let dt = ctx.temp - ctx.options.tnom;
        for r in &mut self.instances {
            let mut resistance = r.resistance * (1.0 + r.tc1 * dt + r.tc2 * dt * dt);
            if resistance.abs() < MIN_RESISTANCE {
                warn!("{}: resistance {} raised to {}", r.name, resistance, MIN_RESISTANCE);
                resistance = MIN_RESISTANCE;
            }
            r.conductance = 1.0 / resistance;
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for r in &self.instances {
            r.stamp.stamp(&mut ctx.matrix, r.conductance);
        }
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut SimContext) -> Result<()> {
        self.load(ctx)
    }

    fn pz_load(&mut self, ctx: &mut SimContext, _s: Complex64) -> Result<()> {
        self.load(ctx)
    }

    fn parameters(&self) -> Vec<ParamRef> {
        let mut params = Vec::new();
        for (i, r) in self.instances.iter().enumerate() {
            for (id, name, kind) in [
                (R_RESISTANCE, "r", ParamKind::Principal),
                (R_TC1, "tc1", ParamKind::Instance),
                (R_TC2, "tc2", ParamKind::Instance),
            ] {
                params.push(ParamRef {
                    instance: i,
                    id,
                    instance_name: r.name.clone(),
                    param_name: name,
                    kind,
                });
            }
        }
        params
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        let r = self.instances.get(param.instance)?;
        match param.id {
            R_RESISTANCE => Some(r.resistance),
            R_TC1 => Some(r.tc1),
            R_TC2 => Some(r.tc2),
            _ => None,
        }
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> Result<()> {
        let r = self
            .instances
            .get_mut(param.instance)
            .ok_or_else(|| unknown(param))?;
        match param.id {
            R_RESISTANCE => r.resistance = value,
            R_TC1 => r.tc1 = value,
            R_TC2 => r.tc2 = value,
            _ => return Err(unknown(param)),
        }
        Ok(())
    }
}

// ────────────────────── Capacitor ──────────────────────

/// A capacitor instance. Keeps its charge and current in two state slots.
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub name: String,
    pub pos: NodeId,
    pub neg: NodeId,
    /// Capacitance (F).
    pub capacitance: f64,
    /// Initial voltage used with UIC.
    pub ic: Option<f64>,
    state: Option<usize>,
    stamp: AdmittanceStamp,
}

impl Capacitor {
    pub fn new(name: impl Into<String>, pos: NodeId, neg: NodeId, capacitance: f64) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            capacitance,
            ic: None,
            state: None,
            stamp: AdmittanceStamp::default(),
        }
    }

    pub fn with_ic(mut self, volts: f64) -> Self {
        self.ic = Some(volts);
        self
    }
}

const C_CAPACITANCE: u32 = 0;

/// All capacitors of a circuit.
#[derive(Debug, Clone, Default)]
pub struct CapacitorModel {
    pub instances: Vec<Capacitor>,
}

impl CapacitorModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, c: Capacitor) -> Self {
        self.instances.push(c);
        self
    }

    pub fn add(&mut self, c: Capacitor) -> usize {
        self.instances.push(c);
        self.instances.len() - 1
    }
}

impl Device for CapacitorModel {
    fn kind(&self) -> &'static str {
        "capacitor"
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        for c in &mut self.instances {
            if c.state.is_none() {
                c.state = Some(ctx.alloc_states(2));
            }
            c.stamp = AdmittanceStamp::new(ctx, c.pos, c.neg)?;
        }
        Ok(())
    }

    fn unsetup(&mut self, _nodes: &mut NodeTable) -> Result<()> {
        for c in &mut self.instances {
            c.state = None;
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for c in &self.instances {
            let Some(q) = c.state else { continue };
            let vcap = match c.ic {
                Some(ic) if ctx.uic && ctx.init == InitMode::Transient => ic,
                _ => ctx.voltage_diff(c.pos, c.neg),
            };
            ctx.states.set(0, q, c.capacitance * vcap);
            if !ctx.is_transient() {
                // Open circuit; the charge is kept for the first time step.
                continue;
            }
            if ctx.init == InitMode::Transient {
                ctx.states.set(1, q, ctx.states.get(0, q));
            }
            let (geq, ceq) = ctx.integrate(c.capacitance, q);
            if ctx.init == InitMode::Transient {
                ctx.states.set(1, q + 1, ctx.states.get(0, q + 1));
            }
            c.stamp.stamp(&mut ctx.matrix, geq);
            ctx.add_rhs(c.pos, -ceq);
            ctx.add_rhs(c.neg, ceq);
        }
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut SimContext) -> Result<()> {
        let omega = ctx.omega;
        for c in &self.instances {
            c.stamp
                .stamp_complex(&mut ctx.matrix, Complex64::new(0.0, omega * c.capacitance));
        }
        Ok(())
    }

    fn pz_load(&mut self, ctx: &mut SimContext, s: Complex64) -> Result<()> {
        for c in &self.instances {
            c.stamp.stamp_complex(&mut ctx.matrix, s * c.capacitance);
        }
        Ok(())
    }

    fn truncation_error(&self, ctx: &SimContext, timestep: &mut f64) {
        for c in &self.instances {
            if let Some(q) = c.state {
                ctx.truncation_error(q, timestep);
            }
        }
    }

    fn parameters(&self) -> Vec<ParamRef> {
        self.instances
            .iter()
            .enumerate()
            .map(|(i, c)| ParamRef {
                instance: i,
                id: C_CAPACITANCE,
                instance_name: c.name.clone(),
                param_name: "c",
                kind: ParamKind::Principal,
            })
            .collect()
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        let c = self.instances.get(param.instance)?;
        (param.id == C_CAPACITANCE).then_some(c.capacitance)
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> Result<()> {
        match self.instances.get_mut(param.instance) {
            Some(c) if param.id == C_CAPACITANCE => {
                c.capacitance = value;
                Ok(())
            }
            _ => Err(unknown(param)),
        }
    }
}

// ────────────────────── Inductor ──────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct InductorHandles {
    pos_br: ElementHandle,
    neg_br: ElementHandle,
    br_pos: ElementHandle,
    br_neg: ElementHandle,
    br_br: ElementHandle,
}

/// An inductor instance. Adds one branch-current unknown and keeps its
/// flux and voltage in two state slots.
#[derive(Debug, Clone)]
pub struct Inductor {
    pub name: String,
    pub pos: NodeId,
    pub neg: NodeId,
    /// Inductance (H).
    pub inductance: f64,
    /// Initial current used with UIC.
    pub ic: Option<f64>,
    branch: Option<NodeId>,
    state: Option<usize>,
    h: InductorHandles,
}

impl Inductor {
    pub fn new(name: impl Into<String>, pos: NodeId, neg: NodeId, inductance: f64) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            inductance,
            ic: None,
            branch: None,
            state: None,
            h: InductorHandles::default(),
        }
    }

    pub fn with_ic(mut self, amps: f64) -> Self {
        self.ic = Some(amps);
        self
    }

    pub fn branch(&self) -> Option<NodeId> {
        self.branch
    }
}

const L_INDUCTANCE: u32 = 0;

/// All inductors of a circuit.
#[derive(Debug, Clone, Default)]
pub struct InductorModel {
    pub instances: Vec<Inductor>,
}

impl InductorModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, l: Inductor) -> Self {
        self.instances.push(l);
        self
    }

    pub fn add(&mut self, l: Inductor) -> usize {
        self.instances.push(l);
        self.instances.len() - 1
    }

    fn stamp_incidence(ctx: &mut SimContext, h: &InductorHandles) {
        ctx.matrix.add(h.pos_br, 1.0);
        ctx.matrix.add(h.neg_br, -1.0);
        ctx.matrix.add(h.br_pos, 1.0);
        ctx.matrix.add(h.br_neg, -1.0);
    }
}

impl Device for InductorModel {
    fn kind(&self) -> &'static str {
        "inductor"
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        for l in &mut self.instances {
            if l.state.is_none() {
                l.state = Some(ctx.alloc_states(2));
            }
            let br = match l.branch {
                Some(br) => br,
                None => {
                    let br = ctx.nodes.branch(&l.name)?;
                    l.branch = Some(br);
                    br
                }
            };
            l.h = InductorHandles {
                pos_br: ctx.make_element(l.pos, br)?,
                neg_br: ctx.make_element(l.neg, br)?,
                br_pos: ctx.make_element(br, l.pos)?,
                br_neg: ctx.make_element(br, l.neg)?,
                br_br: ctx.make_element(br, br)?,
            };
        }
        Ok(())
    }

    fn unsetup(&mut self, nodes: &mut NodeTable) -> Result<()> {
        for l in self.instances.iter_mut().rev() {
            if let Some(br) = l.branch.take() {
                nodes.remove(br)?;
            }
            l.state = None;
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for l in &self.instances {
            let (Some(br), Some(flux)) = (l.branch, l.state) else {
                continue;
            };
            let current = match l.ic {
                Some(ic) if ctx.uic && ctx.init == InitMode::Transient => ic,
                _ => ctx.voltage(br),
            };
            ctx.states.set(0, flux, l.inductance * current);

            Self::stamp_incidence(ctx, &l.h);
            if !ctx.is_transient() {
                // Short circuit at DC.
                continue;
            }
            if ctx.init == InitMode::Transient {
                ctx.states.set(1, flux, ctx.states.get(0, flux));
            }
            let (req, veq) = ctx.integrate(l.inductance, flux);
            if ctx.init == InitMode::Transient {
                ctx.states.set(1, flux + 1, ctx.states.get(0, flux + 1));
            }
            ctx.add_rhs(br, veq);
            ctx.matrix.add(l.h.br_br, -req);
        }
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut SimContext) -> Result<()> {
        let omega = ctx.omega;
        for l in &self.instances {
            Self::stamp_incidence(ctx, &l.h);
            ctx.matrix.add_imag(l.h.br_br, -omega * l.inductance);
        }
        Ok(())
    }

    fn pz_load(&mut self, ctx: &mut SimContext, s: Complex64) -> Result<()> {
        for l in &self.instances {
            Self::stamp_incidence(ctx, &l.h);
            ctx.matrix.add_complex(l.h.br_br, -s * l.inductance);
        }
        Ok(())
    }

    fn truncation_error(&self, ctx: &SimContext, timestep: &mut f64) {
        for l in &self.instances {
            if let Some(flux) = l.state {
                ctx.truncation_error(flux, timestep);
            }
        }
    }

    fn find_branch(&self, instance: &str) -> Option<NodeId> {
        self.instances
            .iter()
            .find(|l| l.name == instance)
            .and_then(|l| l.branch)
    }

    fn parameters(&self) -> Vec<ParamRef> {
        self.instances
            .iter()
            .enumerate()
            .map(|(i, l)| ParamRef {
                instance: i,
                id: L_INDUCTANCE,
                instance_name: l.name.clone(),
                param_name: "l",
                kind: ParamKind::Principal,
            })
            .collect()
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        let l = self.instances.get(param.instance)?;
        (param.id == L_INDUCTANCE).then_some(l.inductance)
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> Result<()> {
        match self.instances.get_mut(param.instance) {
            Some(l) if param.id == L_INDUCTANCE => {
                l.inductance = value;
                Ok(())
            }
            _ => Err(unknown(param)),
        }
    }
}
