//! Independent voltage and current sources.

use num_complex::Complex64;

use kirchhoff_core::{
    Device, ElementHandle, Error, NodeId, NodeTable, ParamKind, ParamRef, Result, SetupContext,
    SimContext,
};

use crate::waveforms::Waveform;

const SRC_DC: u32 = 0;
const SRC_ACMAG: u32 = 1;
const SRC_ACPHASE: u32 = 2;

/// Value, AC stimulus and transient waveform shared by both source kinds.
#[derive(Debug, Clone, Default)]
pub struct SourceValue {
    /// DC value; when absent, DC analyses use the waveform at t = 0.
    pub dc: Option<f64>,
    pub waveform: Option<Waveform>,
    pub ac_mag: f64,
    /// AC phase in degrees.
    pub ac_phase: f64,
}

impl SourceValue {
    /// Instantaneous value for the analysis the context is running,
    /// scaled by the source-stepping factor.
    pub fn value(&self, ctx: &SimContext) -> f64 {
        let raw = match (&self.waveform, self.dc) {
            (_, Some(dc)) if ctx.is_dc() => dc,
            (Some(w), _) => w.value_at(if ctx.is_dc() { 0.0 } else { ctx.time }),
            (None, dc) => dc.unwrap_or(0.0),
        };
        raw * ctx.src_fact
    }

    /// AC stimulus as a phasor.
    pub fn phasor(&self) -> Complex64 {
        Complex64::from_polar(self.ac_mag, self.ac_phase.to_radians())
    }

    fn register_breakpoint(&self, ctx: &mut SimContext) {
        if !ctx.is_transient() {
            return;
        }
        if let Some(w) = &self.waveform {
            let gap = ctx.breakpoints.min_spacing();
            if let Some(t) = w.next_breakpoint(ctx.time, gap) {
                ctx.breakpoints.set(t);
            }
        }
    }

    fn get(&self, id: u32) -> Option<f64> {
        match id {
            SRC_DC => Some(self.dc.unwrap_or(0.0)),
            SRC_ACMAG => Some(self.ac_mag),
            SRC_ACPHASE => Some(self.ac_phase),
            _ => None,
        }
    }

    fn set(&mut self, id: u32, value: f64) -> bool {
        match id {
            SRC_DC => self.dc = Some(value),
            SRC_ACMAG => self.ac_mag = value,
            SRC_ACPHASE => self.ac_phase = value,
            _ => return false,
        }
        true
    }
}

fn source_params(index: usize, name: &str) -> [ParamRef; 3] {
    [
        (SRC_DC, "dc", ParamKind::Principal),
        (SRC_ACMAG, "acmag", ParamKind::Instance),
        (SRC_ACPHASE, "acphase", ParamKind::Instance),
    ]
    .map(|(id, param_name, kind)| ParamRef {
        instance: index,
        id,
        instance_name: name.to_string(),
        param_name,
        kind,
    })
}

fn unknown(param: &ParamRef) -> Error {
    Error::UnknownParameter {
        device: param.instance_name.clone(),
        param: param.param_name.to_string(),
    }
}

// ────────────────────── Voltage source ──────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct BranchHandles {
    pos_br: ElementHandle,
    neg_br: ElementHandle,
    br_pos: ElementHandle,
    br_neg: ElementHandle,
}

/// Independent voltage source. Adds one branch-current unknown; positive
/// current flows from `pos` through the source to `neg`.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub name: String,
    pub pos: NodeId,
    pub neg: NodeId,
    pub value: SourceValue,
    branch: Option<NodeId>,
    h: BranchHandles,
}

impl VoltageSource {
    /// A constant source.
    pub fn dc(name: impl Into<String>, pos: NodeId, neg: NodeId, volts: f64) -> Self {
        Self::from_value(
            name,
            pos,
            neg,
            SourceValue {
                dc: Some(volts),
                ..Default::default()
            },
        )
    }

    /// A source driven by a transient waveform.
    pub fn waveform(name: impl Into<String>, pos: NodeId, neg: NodeId, waveform: Waveform) -> Self {
        Self::from_value(
            name,
            pos,
            neg,
            SourceValue {
                waveform: Some(waveform),
                ..Default::default()
            },
        )
    }

    pub fn from_value(name: impl Into<String>, pos: NodeId, neg: NodeId, value: SourceValue) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            value,
            branch: None,
            h: BranchHandles::default(),
        }
    }

    /// Set the AC magnitude and phase (degrees).
    pub fn with_ac(mut self, mag: f64, phase_deg: f64) -> Self {
        self.value.ac_mag = mag;
        self.value.ac_phase = phase_deg;
        self
    }

    pub fn branch(&self) -> Option<NodeId> {
        self.branch
    }
}

/// All independent voltage sources of a circuit.
#[derive(Debug, Clone, Default)]
pub struct VoltageSourceModel {
    pub instances: Vec<VoltageSource>,
}

impl VoltageSourceModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, v: VoltageSource) -> Self {
        self.instances.push(v);
        self
    }

    pub fn add(&mut self, v: VoltageSource) -> usize {
        self.instances.push(v);
        self.instances.len() - 1
    }

    fn stamp_incidence(ctx: &mut SimContext, h: &BranchHandles) {
        ctx.matrix.add(h.pos_br, 1.0);
        ctx.matrix.add(h.neg_br, -1.0);
        ctx.matrix.add(h.br_pos, 1.0);
        ctx.matrix.add(h.br_neg, -1.0);
    }
}

impl Device for VoltageSourceModel {
    fn kind(&self) -> &'static str {
        "vsource"
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        for v in &mut self.instances {
            let br = match v.branch {
                Some(br) => br,
                None => {
                    let br = ctx.nodes.branch(&v.name)?;
                    v.branch = Some(br);
                    br
                }
            };
            v.h = BranchHandles {
                pos_br: ctx.make_element(v.pos, br)?,
                neg_br: ctx.make_element(v.neg, br)?,
                br_pos: ctx.make_element(br, v.pos)?,
                br_neg: ctx.make_element(br, v.neg)?,
            };
        }
        Ok(())
    }

    fn unsetup(&mut self, nodes: &mut NodeTable) -> Result<()> {
        for v in self.instances.iter_mut().rev() {
            if let Some(br) = v.branch.take() {
                nodes.remove(br)?;
            }
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for v in &self.instances {
            let Some(br) = v.branch else { continue };
            Self::stamp_incidence(ctx, &v.h);
            let value = v.value.value(ctx);
            ctx.add_rhs(br, value);
        }
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for v in &self.instances {
            let Some(br) = v.branch else { continue };
            Self::stamp_incidence(ctx, &v.h);
            let phasor = v.value.phasor();
            ctx.add_rhs(br, phasor.re);
            ctx.add_irhs(br, phasor.im);
        }
        Ok(())
    }

    fn pz_load(&mut self, ctx: &mut SimContext, _s: Complex64) -> Result<()> {
        for v in &self.instances {
            Self::stamp_incidence(ctx, &v.h);
        }
        Ok(())
    }

    fn accept(&mut self, ctx: &mut SimContext) -> Result<()> {
        for v in &self.instances {
            v.value.register_breakpoint(ctx);
        }
        Ok(())
    }

    fn find_branch(&self, instance: &str) -> Option<NodeId> {
        self.instances
            .iter()
            .find(|v| v.name == instance)
            .and_then(|v| v.branch)
    }

    fn parameters(&self) -> Vec<ParamRef> {
        self.instances
            .iter()
            .enumerate()
            .flat_map(|(i, v)| source_params(i, &v.name))
            .collect()
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        self.instances.get(param.instance)?.value.get(param.id)
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> Result<()> {
        let updated = self
            .instances
            .get_mut(param.instance)
            .is_some_and(|v| v.value.set(param.id, value));
        if updated { Ok(()) } else { Err(unknown(param)) }
    }
}

// ────────────────────── Current source ──────────────────────

/// Independent current source; positive current flows from `pos` through
/// the source to `neg`.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub name: String,
    pub pos: NodeId,
    pub neg: NodeId,
    pub value: SourceValue,
}

impl CurrentSource {
    pub fn dc(name: impl Into<String>, pos: NodeId, neg: NodeId, amps: f64) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            value: SourceValue {
                dc: Some(amps),
                ..Default::default()
            },
        }
    }

    pub fn waveform(name: impl Into<String>, pos: NodeId, neg: NodeId, waveform: Waveform) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            value: SourceValue {
                waveform: Some(waveform),
                ..Default::default()
            },
        }
    }

    pub fn with_ac(mut self, mag: f64, phase_deg: f64) -> Self {
        self.value.ac_mag = mag;
        self.value.ac_phase = phase_deg;
        self
    }
}

/// All independent current sources of a circuit.
#[derive(Debug, Clone, Default)]
pub struct CurrentSourceModel {
    pub instances: Vec<CurrentSource>,
}

impl CurrentSourceModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, i: CurrentSource) -> Self {
        self.instances.push(i);
        self
    }

    pub fn add(&mut self, i: CurrentSource) -> usize {
        self.instances.push(i);
        self.instances.len() - 1
    }
}

impl Device for CurrentSourceModel {
    fn kind(&self) -> &'static str {
        "isource"
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn setup(&mut self, _ctx: &mut SetupContext<'_>) -> Result<()> {
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for i in &self.instances {
            let value = i.value.value(ctx);
            ctx.add_rhs(i.pos, -value);
            ctx.add_rhs(i.neg, value);
        }
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for i in &self.instances {
            let phasor = i.value.phasor();
            ctx.add_rhs(i.pos, -phasor.re);
            ctx.add_rhs(i.neg, phasor.re);
            ctx.add_irhs(i.pos, -phasor.im);
            ctx.add_irhs(i.neg, phasor.im);
        }
        Ok(())
    }

    fn accept(&mut self, ctx: &mut SimContext) -> Result<()> {
        for i in &self.instances {
            i.value.register_breakpoint(ctx);
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<ParamRef> {
        self.instances
            .iter()
            .enumerate()
            .flat_map(|(idx, i)| source_params(idx, &i.name))
            .collect()
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        self.instances.get(param.instance)?.value.get(param.id)
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> Result<()> {
        let updated = self
            .instances
            .get_mut(param.instance)
            .is_some_and(|i| i.value.set(param.id, value));
        if updated { Ok(()) } else { Err(unknown(param)) }
    }
}
