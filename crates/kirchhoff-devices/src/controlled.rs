//! Linear controlled sources: VCCS (G) and VCVS (E).

use num_complex::Complex64;

use kirchhoff_core::{
    Device, ElementHandle, Error, NodeId, NodeTable, ParamKind, ParamRef, Result, SetupContext,
    SimContext,
};

fn unknown(param: &ParamRef) -> Error {
    Error::UnknownParameter {
        device: param.instance_name.clone(),
        param: param.param_name.to_string(),
    }
}

// ────────────────────── VCCS (G element) ──────────────────────

/// Voltage-controlled current source.
///
/// I(out+ → out-) = gm * V(ctrl+, ctrl-), flowing through the source from
/// out+ to out-.
#[derive(Debug, Clone)]
pub struct Vccs {
    pub name: String,
    pub out_pos: NodeId,
    pub out_neg: NodeId,
    pub ctrl_pos: NodeId,
    pub ctrl_neg: NodeId,
    pub gm: f64,
    /// (op,cp), (op,cn), (on,cp), (on,cn)
    h: [ElementHandle; 4],
}

impl Vccs {
    pub fn new(
        name: impl Into<String>,
        out_pos: NodeId,
        out_neg: NodeId,
        ctrl_pos: NodeId,
        ctrl_neg: NodeId,
        gm: f64,
    ) -> Self {
        Self {
            name: name.into(),
            out_pos,
            out_neg,
            ctrl_pos,
            ctrl_neg,
            gm,
            h: [ElementHandle::default(); 4],
        }
    }

    fn stamp(&self, ctx: &mut SimContext, gm: Complex64) {
        let [pp, pn, np, nn] = self.h;
        ctx.matrix.add_complex(pp, gm);
        ctx.matrix.add_complex(pn, -gm);
        ctx.matrix.add_complex(np, -gm);
        ctx.matrix.add_complex(nn, gm);
    }
}

/// All VCCS instances of a circuit.
#[derive(Debug, Clone, Default)]
pub struct VccsModel {
    pub instances: Vec<Vccs>,
}

impl VccsModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, g: Vccs) -> Self {
        self.instances.push(g);
        self
    }

    pub fn add(&mut self, g: Vccs) -> usize {
        self.instances.push(g);
        self.instances.len() - 1
    }
}

impl Device for VccsModel {
    fn kind(&self) -> &'static str {
        "vccs"
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        for g in &mut self.instances {
            g.h = [
                ctx.make_element(g.out_pos, g.ctrl_pos)?,
                ctx.make_element(g.out_pos, g.ctrl_neg)?,
                ctx.make_element(g.out_neg, g.ctrl_pos)?,
                ctx.make_element(g.out_neg, g.ctrl_neg)?,
            ];
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for g in &self.instances {
            g.stamp(ctx, Complex64::new(g.gm, 0.0));
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
        self.instances
            .iter()
            .enumerate()
            .map(|(i, g)| ParamRef {
                instance: i,
                id: 0,
                instance_name: g.name.clone(),
                param_name: "gain",
                kind: ParamKind::Principal,
            })
            .collect()
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        self.instances.get(param.instance).map(|g| g.gm)
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> Result<()> {
        let g = self
            .instances
            .get_mut(param.instance)
            .ok_or_else(|| unknown(param))?;
        g.gm = value;
        Ok(())
    }
}

// ────────────────────── VCVS (E element) ──────────────────────

/// Voltage-controlled voltage source.
///
/// V(out+, out-) = gain * V(ctrl+, ctrl-), with one branch-current unknown.
#[derive(Debug, Clone)]
pub struct Vcvs {
    pub name: String,
    pub out_pos: NodeId,
    pub out_neg: NodeId,
    pub ctrl_pos: NodeId,
    pub ctrl_neg: NodeId,
    pub gain: f64,
    branch: Option<NodeId>,
    h: VcvsHandles,
}

#[derive(Debug, Clone, Copy, Default)]
struct VcvsHandles {
    pos_br: ElementHandle,
    neg_br: ElementHandle,
    br_pos: ElementHandle,
    br_neg: ElementHandle,
    br_cp: ElementHandle,
    br_cn: ElementHandle,
}

impl Vcvs {
    pub fn new(
        name: impl Into<String>,
        out_pos: NodeId,
        out_neg: NodeId,
        ctrl_pos: NodeId,
        ctrl_neg: NodeId,
        gain: f64,
    ) -> Self {
        Self {
            name: name.into(),
            out_pos,
            out_neg,
            ctrl_pos,
            ctrl_neg,
            gain,
            branch: None,
            h: VcvsHandles::default(),
        }
    }

    /// Branch-current unknown, once set up.
    pub fn branch(&self) -> Option<NodeId> {
        self.branch
    }

    fn stamp(&self, ctx: &mut SimContext) {
        let h = &self.h;
        ctx.matrix.add(h.pos_br, 1.0);
        ctx.matrix.add(h.neg_br, -1.0);
        ctx.matrix.add(h.br_pos, 1.0);
        ctx.matrix.add(h.br_neg, -1.0);
        ctx.matrix.add(h.br_cp, -self.gain);
        ctx.matrix.add(h.br_cn, self.gain);
    }
}

/// All VCVS instances of a circuit.
#[derive(Debug, Clone, Default)]
pub struct VcvsModel {
    pub instances: Vec<Vcvs>,
}

impl VcvsModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, e: Vcvs) -> Self {
        self.instances.push(e);
        self
    }

    pub fn add(&mut self, e: Vcvs) -> usize {
        self.instances.push(e);
        self.instances.len() - 1
    }
}

impl Device for VcvsModel {
    fn kind(&self) -> &'static str {
        "vcvs"
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        for e in &mut self.instances {
            let br = match e.branch {
                Some(br) => br,
                None => {
                    let br = ctx.nodes.branch(&e.name)?;
                    e.branch = Some(br);
                    br
                }
            };
            e.h = VcvsHandles {
                pos_br: ctx.make_element(e.out_pos, br)?,
                neg_br: ctx.make_element(e.out_neg, br)?,
                br_pos: ctx.make_element(br, e.out_pos)?,
                br_neg: ctx.make_element(br, e.out_neg)?,
                br_cp: ctx.make_element(br, e.ctrl_pos)?,
                br_cn: ctx.make_element(br, e.ctrl_neg)?,
            };
        }
        Ok(())
    }

    fn unsetup(&mut self, nodes: &mut NodeTable) -> Result<()> {
        for e in self.instances.iter_mut().rev() {
            if let Some(br) = e.branch.take() {
                nodes.remove(br)?;
            }
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for e in &self.instances {
            e.stamp(ctx);
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
        self.instances
            .iter()
            .enumerate()
            .map(|(i, e)| ParamRef {
                instance: i,
                id: 0,
                instance_name: e.name.clone(),
                param_name: "gain",
                kind: ParamKind::Principal,
            })
            .collect()
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        self.instances.get(param.instance).map(|e| e.gain)
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> Result<()> {
        let e = self
            .instances
            .get_mut(param.instance)
            .ok_or_else(|| unknown(param))?;
        e.gain = value;
        Ok(())
    }

    fn find_branch(&self, instance: &str) -> Option<NodeId> {
        self.instances
            .iter()
            .find(|e| e.name == instance)
            .and_then(|e| e.branch)
    }
}
