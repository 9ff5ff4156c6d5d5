//! Junction diode using the Shockley equation.
//!
//! Each [`DiodeModel`] is one parameter set (a `.model` card) shared by its
//! instances. The model covers the exponential junction current with a gmin
//! shunt, depletion and diffusion charge, optional series resistance (which
//! adds an internal node) and temperature scaling of the saturation current.

use num_complex::Complex64;

use kirchhoff_core::{
    Device, ElementHandle, Error, InitMode, NodeId, NodeTable, ParamKind, ParamRef, Result,
    SetupContext, SimContext,
};

use crate::limit::{critical_voltage, pnjlim, thermal_voltage};

/// Forward-bias depletion capacitance coefficient.
const FC: f64 = 0.5;

/// Diode model parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeParams {
    /// Saturation current (A). Default: 1e-14.
    pub is: f64,
    /// Emission coefficient. Default: 1.0.
    pub n: f64,
    /// Series resistance (ohms). Default: 0.0.
    pub rs: f64,
    /// Zero-bias junction capacitance (F). Default: 0.0.
    pub cjo: f64,
    /// Junction potential (V). Default: 1.0.
    pub vj: f64,
    /// Grading coefficient. Default: 0.5.
    pub m: f64,
    /// Transit time (s). Default: 0.0.
    pub tt: f64,
    /// Activation energy (eV). Default: 1.11.
    pub eg: f64,
    /// Saturation-current temperature exponent. Default: 3.0.
    pub xti: f64,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self {
            is: 1e-14,
            n: 1.0,
            rs: 0.0,
            cjo: 0.0,
            vj: 1.0,
            m: 0.5,
            tt: 0.0,
            eg: 1.11,
            xti: 3.0,
        }
    }
}

const ST_VD: usize = 0;
const ST_ID: usize = 1;
const ST_GD: usize = 2;
const ST_Q: usize = 3;
const NUM_STATES: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
struct DiodeHandles {
    pos_pos: ElementHandle,
    neg_neg: ElementHandle,
    prime_prime: ElementHandle,
    pos_prime: ElementHandle,
    neg_prime: ElementHandle,
    prime_pos: ElementHandle,
    prime_neg: ElementHandle,
}

/// A diode instance.
#[derive(Debug, Clone)]
pub struct Diode {
    pub name: String,
    /// Anode.
    pub pos: NodeId,
    /// Cathode.
    pub neg: NodeId,
    /// Area scale factor.
    pub area: f64,
    /// Start the DC solution with the junction off.
    pub off: bool,
    /// Anode-side internal node; equal to `pos` without series resistance.
    pos_prime: NodeId,
    state: Option<usize>,
    h: DiodeHandles,
    /// Junction capacitance at the last load, for small-signal analyses.
    cap: f64,
}

impl Diode {
    pub fn new(name: impl Into<String>, pos: NodeId, neg: NodeId) -> Self {
        Self {
            name: name.into(),
            pos,
            neg,
            area: 1.0,
            off: false,
            pos_prime: pos,
            state: None,
            h: DiodeHandles::default(),
            cap: 0.0,
        }
    }

    pub fn with_area(mut self, area: f64) -> Self {
        self.area = area;
        self
    }

    pub fn with_off(mut self) -> Self {
        self.off = true;
        self
    }

    /// Node on the junction side of the series resistance.
    pub fn internal_node(&self) -> NodeId {
        self.pos_prime
    }
}

/// Temperature-adjusted quantities shared by all instances of a model.
#[derive(Debug, Clone, Copy, Default)]
struct Thermal {
    vt: f64,
    isat: f64,
}

const D_IS: u32 = 0;
const D_N: u32 = 1;
const D_CJO: u32 = 2;
const D_VJ: u32 = 3;
const D_M: u32 = 4;
const D_TT: u32 = 5;
const D_AREA: u32 = 100;

const MODEL_PARAMS: [(u32, &str); 6] = [
    (D_IS, "is"),
    (D_N, "n"),
    (D_CJO, "cjo"),
    (D_VJ, "vj"),
    (D_M, "m"),
    (D_TT, "tt"),
];

/// One diode parameter set and its instances.
#[derive(Debug, Clone)]
pub struct DiodeModel {
    pub name: String,
    pub params: DiodeParams,
    pub instances: Vec<Diode>,
    thermal: Thermal,
}

impl DiodeModel {
    pub fn new(name: impl Into<String>, params: DiodeParams) -> Self {
        Self {
            name: name.into(),
            params,
            instances: Vec::new(),
            thermal: Thermal::default(),
        }
    }

    pub fn with(mut self, d: Diode) -> Self {
        self.instances.push(d);
        self
    }

    pub fn add(&mut self, d: Diode) -> usize {
        self.instances.push(d);
        self.instances.len() - 1
    }

    /// Junction current and conductance at `vd`, including the gmin shunt.
    pub fn evaluate(&self, vd: f64, area: f64, gmin: f64) -> (f64, f64) {
        let csat = self.thermal.isat * area;
        let vte = self.params.n * self.thermal.vt;
        if vd >= -3.0 * vte {
            let evd = (vd / vte).exp();
            (csat * (evd - 1.0) + gmin * vd, csat * evd / vte + gmin)
        } else {
            let arg = 3.0 * vte / (vd * std::f64::consts::E);
            let arg = arg * arg * arg;
            (-csat * (1.0 + arg) + gmin * vd, csat * 3.0 * arg / vd + gmin)
        }
    }

    /// Junction charge and capacitance at `vd` for current `id` and
    /// conductance `gd`.
    fn charge(&self, vd: f64, id: f64, gd: f64, area: f64) -> (f64, f64) {
        let p = &self.params;
        let cjo = p.cjo * area;
        let (mut q, mut cap) = (p.tt * id, p.tt * gd);
        if cjo == 0.0 {
            return (q, cap);
        }
        let depletion = FC * p.vj;
        if vd < depletion {
            let arg = 1.0 - vd / p.vj;
            let sarg = (-p.m * arg.ln()).exp();
            q += p.vj * cjo * (1.0 - arg * sarg) / (1.0 - p.m);
            cap += cjo * sarg;
        } else {
            let f1 = p.vj * (1.0 - (1.0 - FC).powf(1.0 - p.m)) / (1.0 - p.m);
            let f2 = (1.0 - FC).powf(1.0 + p.m);
            let f3 = 1.0 - FC * (1.0 + p.m);
            let czof2 = cjo / f2;
            q += cjo * f1
                + czof2
                    * (f3 * (vd - depletion)
                        + (p.m / (2.0 * p.vj)) * (vd * vd - depletion * depletion));
            cap += czof2 * (f3 + p.m * vd / p.vj);
        }
        (q, cap)
    }

    fn vcrit(&self, area: f64) -> f64 {
        critical_voltage(self.params.n * self.thermal.vt, self.thermal.isat * area)
    }

    fn series_conductance(&self, area: f64) -> f64 {
        if self.params.rs > 0.0 {
            area / self.params.rs
        } else {
            0.0
        }
    }

    fn stamp(ctx: &mut SimContext, d: &Diode, gd: f64, gspr: f64, cdeq: f64) {
        let h = &d.h;
        ctx.matrix.add(h.pos_pos, gspr);
        ctx.matrix.add(h.neg_neg, gd);
        ctx.matrix.add(h.prime_prime, gd + gspr);
        ctx.matrix.add(h.pos_prime, -gspr);
        ctx.matrix.add(h.neg_prime, -gd);
        ctx.matrix.add(h.prime_pos, -gspr);
        ctx.matrix.add(h.prime_neg, -gd);
        ctx.add_rhs(d.neg, cdeq);
        ctx.add_rhs(d.pos_prime, -cdeq);
    }

    fn stamp_small_signal(ctx: &mut SimContext, d: &Diode, y: Complex64, gspr: f64) {
        let h = &d.h;
        ctx.matrix.add(h.pos_pos, gspr);
        ctx.matrix.add_complex(h.neg_neg, y);
        ctx.matrix.add_complex(h.prime_prime, y + gspr);
        ctx.matrix.add(h.pos_prime, -gspr);
        ctx.matrix.add_complex(h.neg_prime, -y);
        ctx.matrix.add(h.prime_pos, -gspr);
        ctx.matrix.add_complex(h.prime_neg, -y);
    }

    fn model_param(&self, param: &ParamRef) -> Option<f64> {
        let p = &self.params;
        Some(match param.id {
            D_IS => p.is,
            D_N => p.n,
            D_CJO => p.cjo,
            D_VJ => p.vj,
            D_M => p.m,
            D_TT => p.tt,
            _ => return None,
        })
    }
}

impl Device for DiodeModel {
    fn kind(&self) -> &'static str {
        "diode"
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        let has_rs = self.params.rs > 0.0;
        for d in &mut self.instances {
            if d.state.is_none() {
                d.state = Some(ctx.alloc_states(NUM_STATES));
            }
            if has_rs && d.pos_prime == d.pos {
                d.pos_prime = ctx.nodes.internal(&d.name, "internal")?;
            }
            let (p, n, pp) = (d.pos, d.neg, d.pos_prime);
            d.h = DiodeHandles {
                pos_pos: ctx.make_element(p, p)?,
                neg_neg: ctx.make_element(n, n)?,
                prime_prime: ctx.make_element(pp, pp)?,
                pos_prime: ctx.make_element(p, pp)?,
                neg_prime: ctx.make_element(n, pp)?,
                prime_pos: ctx.make_element(pp, p)?,
                prime_neg: ctx.make_element(pp, n)?,
            };
        }
        Ok(())
    }

    fn unsetup(&mut self, nodes: &mut NodeTable) -> Result<()> {
        for d in self.instances.iter_mut().rev() {
            if d.pos_prime != d.pos {
                nodes.remove(d.pos_prime)?;
                d.pos_prime = d.pos;
            }
            d.state = None;
        }
        Ok(())
    }

    fn temperature(&mut self, ctx: &SimContext) -> Result<()> {
        let p = &self.params;
        if p.is <= 0.0 || p.n <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "{}: is and n must be positive",
                self.name
            )));
        }
        let tnom = ctx.options.tnom;
        let vt = thermal_voltage(ctx.temp);
        let vtnom = thermal_voltage(tnom);
        let ratio = ctx.temp / tnom;
        let arg = (ratio - 1.0) * p.eg / (p.n * vtnom);
        let isat = p.is * (arg + p.xti / p.n * ratio.ln()).exp();
        self.thermal = Thermal { vt, isat };
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> Result<()> {
        let vte = self.params.n * self.thermal.vt;
        let opts = ctx.options.clone();
        for d in &self.instances {
            let Some(s) = d.state else { continue };
            let gspr = self.series_conductance(d.area);
            let vcrit = self.vcrit(d.area);

            let mut limited = false;
            let mut bypassed = None;
            let vd = match ctx.init {
                InitMode::SmallSignal => ctx.states.get(0, s + ST_VD),
                InitMode::Transient => ctx.states.get(1, s + ST_VD),
                InitMode::Junction | InitMode::Fix if d.off => 0.0,
                InitMode::Junction => vcrit,
                _ => {
                    let vd = if ctx.init == InitMode::Predict {
                        let xfact = ctx.delta / ctx.delta_old[1];
                        for k in [ST_VD, ST_ID, ST_GD] {
                            ctx.states.set(0, s + k, ctx.states.get(1, s + k));
                        }
                        (1.0 + xfact) * ctx.states.get(1, s + ST_VD)
                            - xfact * ctx.states.get(2, s + ST_VD)
                    } else {
                        ctx.voltage_diff(d.pos_prime, d.neg)
                    };
                    let vd_old = ctx.states.get(0, s + ST_VD);
                    let id_old = ctx.states.get(0, s + ST_ID);
                    let gd_old = ctx.states.get(0, s + ST_GD);
                    let delvd = vd - vd_old;
                    let cdhat = id_old + gd_old * delvd;
                    if ctx.bypass
                        && ctx.init != InitMode::Predict
                        && delvd.abs() < opts.reltol * vd.abs().max(vd_old.abs()) + opts.vntol
                        && (cdhat - id_old).abs()
                            < opts.reltol * cdhat.abs().max(id_old.abs()) + opts.abstol
                    {
                        bypassed = Some((vd_old, id_old, gd_old));
                        vd_old
                    } else {
                        let (v, lim) = pnjlim(vd, vd_old, vte, vcrit);
                        limited = lim;
                        v
                    }
                }
            };

            let (vd, mut cd, mut gd) = match bypassed {
                Some(stored) => stored,
                None => {
                    let (cd, gd) = self.evaluate(vd, d.area, ctx.gmin);
                    (vd, cd, gd)
                }
            };

            if bypassed.is_none() {
                let (q, cap) = self.charge(vd, cd, gd, d.area);
                ctx.states.set(0, s + ST_Q, q);
                if ctx.init == InitMode::SmallSignal {
                    // Small-signal parameters only; nothing is stamped.
                    ctx.states.set(0, s + ST_GD, gd);
                    continue;
                }
                if ctx.is_transient() {
                    if ctx.init == InitMode::Transient {
                        ctx.states.set(1, s + ST_Q, q);
                    }
                    let (geq, _) = ctx.integrate(cap, s + ST_Q);
                    gd += geq;
                    cd += ctx.states.get(0, s + ST_Q + 1);
                    if ctx.init == InitMode::Transient {
                        ctx.states.set(1, s + ST_Q + 1, ctx.states.get(0, s + ST_Q + 1));
                    }
                }
            }

            if limited && !(ctx.init == InitMode::Fix && d.off) {
                ctx.noncon += 1;
            }

            ctx.states.set(0, s + ST_VD, vd);
            ctx.states.set(0, s + ST_ID, cd);
            ctx.states.set(0, s + ST_GD, gd);

            let cdeq = cd - gd * vd;
            Self::stamp(ctx, d, gd, gspr, cdeq);
        }

        // Capacitances for a later small-signal analysis.
        let caps: Vec<Option<f64>> = self
            .instances
            .iter()
            .map(|d| {
                let s = d.state?;
                let vd = ctx.states.get(0, s + ST_VD);
                let (cd, gd) = self.evaluate(vd, d.area, 0.0);
                Some(self.charge(vd, cd, gd, d.area).1)
            })
            .collect();
        for (d, cap) in self.instances.iter_mut().zip(caps) {
            if let Some(cap) = cap {
                d.cap = cap;
            }
        }
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut SimContext) -> Result<()> {
        for d in &self.instances {
            let Some(s) = d.state else { continue };
            let gd = ctx.states.get(0, s + ST_GD);
            let y = Complex64::new(gd, ctx.omega * d.cap);
            Self::stamp_small_signal(ctx, d, y, self.series_conductance(d.area));
        }
        Ok(())
    }

    fn pz_load(&mut self, ctx: &mut SimContext, s: Complex64) -> Result<()> {
        for d in &self.instances {
            let Some(st) = d.state else { continue };
            let gd = ctx.states.get(0, st + ST_GD);
            let y = s * d.cap + gd;
            Self::stamp_small_signal(ctx, d, y, self.series_conductance(d.area));
        }
        Ok(())
    }

    fn convergence_test(&self, ctx: &SimContext) -> bool {
        let opts = &ctx.options;
        self.instances.iter().all(|d| {
            let Some(s) = d.state else { return true };
            let vd = ctx.voltage_diff(d.pos_prime, d.neg);
            let delvd = vd - ctx.states.get(0, s + ST_VD);
            let cd = ctx.states.get(0, s + ST_ID);
            let cdhat = cd + ctx.states.get(0, s + ST_GD) * delvd;
            let tol = opts.reltol * cdhat.abs().max(cd.abs()) + opts.abstol;
            (cdhat - cd).abs() <= tol
        })
    }

    fn truncation_error(&self, ctx: &SimContext, timestep: &mut f64) {
        if self.params.cjo == 0.0 && self.params.tt == 0.0 {
            return;
        }
        for d in &self.instances {
            if let Some(s) = d.state {
                ctx.truncation_error(s + ST_Q, timestep);
            }
        }
    }

    fn parameters(&self) -> Vec<ParamRef> {
        let mut params: Vec<ParamRef> = MODEL_PARAMS
            .iter()
            .map(|&(id, name)| ParamRef {
                instance: 0,
                id,
                instance_name: self.name.clone(),
                param_name: name,
                kind: ParamKind::Model,
            })
            .collect();
        params.extend(self.instances.iter().enumerate().map(|(i, d)| ParamRef {
            instance: i,
            id: D_AREA,
            instance_name: d.name.clone(),
            param_name: "area",
            kind: ParamKind::Instance,
        }));
        params
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        match param.kind {
            ParamKind::Model => self.model_param(param),
            _ if param.id == D_AREA => self.instances.get(param.instance).map(|d| d.area),
            _ => None,
        }
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> Result<()> {
        let p = &mut self.params;
        let slot = match (param.kind, param.id) {
            (ParamKind::Model, D_IS) => &mut p.is,
            (ParamKind::Model, D_N) => &mut p.n,
            (ParamKind::Model, D_CJO) => &mut p.cjo,
            (ParamKind::Model, D_VJ) => &mut p.vj,
            (ParamKind::Model, D_M) => &mut p.m,
            (ParamKind::Model, D_TT) => &mut p.tt,
            (_, D_AREA) => match self.instances.get_mut(param.instance) {
                Some(d) => &mut d.area,
                None => return Err(unknown(param)),
            },
            _ => return Err(unknown(param)),
        };
        *slot = value;
        Ok(())
    }
}

fn unknown(param: &ParamRef) -> Error {
    Error::UnknownParameter {
        device: param.instance_name.clone(),
        param: param.param_name.to_string(),
    }
}
