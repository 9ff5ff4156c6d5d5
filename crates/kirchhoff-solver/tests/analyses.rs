//! Analysis drivers exercised on small circuits built from the reference
//! device models.

use kirchhoff_core::{
    AdmittanceStamp, Circuit, Device, NodeId, ParamKind, ParamRef, Result as CoreResult,
    SetupContext, SimContext, SimOptions,
};
use kirchhoff_devices::limit::thermal_voltage;
use kirchhoff_devices::{
    Capacitor, CapacitorModel, Diode, DiodeModel, DiodeParams, Inductor, InductorModel, Resistor,
    ResistorModel, VoltageSource, VoltageSourceModel,
};
use kirchhoff_solver::{
    AcSweep, CancelFlag, DcSweepParams, Error, NoInterrupt, NullSink, PzInput, PzParams, Recorder,
    SensOutput, SensParams, run_ac, run_dc_sweep, run_op, run_pz, run_sensitivity,
};
use num_complex::Complex64;

/// `v1` (1 V) into a divider `r1`/`r2` with the midpoint at `out`.
fn divider(r1: f64, r2: f64) -> Circuit {
    let mut ckt = Circuit::new().unwrap();
    let input = ckt.node("in");
    let out = ckt.node("out");
    ckt.add_device(
        VoltageSourceModel::new()
            .with(VoltageSource::dc("v1", input, NodeId::GROUND, 1.0).with_ac(1.0, 0.0)),
    );
    ckt.add_device(
        ResistorModel::new()
            .with(Resistor::new("r1", input, out, r1))
            .with(Resistor::new("r2", out, NodeId::GROUND, r2)),
    );
    ckt
}

fn has_root(roots: &[Complex64], expected: Complex64) -> bool {
    roots
        .iter()
        .any(|r| (r - expected).norm() <= 1e-6 * expected.norm().max(1.0))
}

#[test]
fn test_diode_operating_point() {
    let mut ckt = Circuit::new().unwrap();
    let input = ckt.node("in");
    let anode = ckt.node("a");
    ckt.add_device(VoltageSourceModel::new().with(VoltageSource::dc("v1", input, NodeId::GROUND, 5.0)));
    ckt.add_device(ResistorModel::new().with(Resistor::new("r1", input, anode, 1e3)));
    let params = DiodeParams::default();
    let is = params.is;
    ckt.add_device(DiodeModel::new("dmod", params).with(Diode::new("d1", anode, NodeId::GROUND)));

    let result = run_op(&mut ckt, &NoInterrupt, &mut NullSink).unwrap();
    let vd = ckt.ctx.voltage(anode);
    assert!(vd > 0.6 && vd < 0.75, "vd = {}", vd);

    // KCL at the anode.
    let vt = thermal_voltage(ckt.options().temp);
    let i_r = (5.0 - vd) / 1e3;
    let i_d = is * ((vd / vt).exp() - 1.0);
    assert!((i_r - i_d).abs() / i_r < 1e-3, "i_r = {}, i_d = {}", i_r, i_d);
    assert!(result.iterations < 50);
}

#[test]
fn test_ground_stays_zero() {
    let mut ckt = divider(1e3, 3e3);
    run_op(&mut ckt, &NoInterrupt, &mut NullSink).unwrap();
    assert_eq!(ckt.ctx.rhs_old[0], 0.0);
    let out = ckt.nodes.find("out").unwrap();
    assert!((ckt.ctx.voltage(out) - 0.75).abs() < 1e-9);
}

#[test]
fn test_dc_sweep_restores_source() {
    let mut ckt = divider(1e3, 1e3);
    let mut rec = Recorder::new();
    let n = run_dc_sweep(
        &mut ckt,
        &DcSweepParams::new("v1", 0.0, 2.0, 0.5),
        &NoInterrupt,
        &mut rec,
    )
    .unwrap();
    assert_eq!(n, 5);

    let plot = rec.plot("dc").unwrap();
    assert!(plot.complete);
    assert_eq!(plot.scale, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    for (v, out) in plot.scale.iter().zip(plot.real("v(out)").unwrap()) {
        assert!((out - v / 2.0).abs() < 1e-9);
    }

    let (dev, p) = ckt
        .parameters()
        .into_iter()
        .find(|(_, p)| p.display_name() == "v1")
        .unwrap();
    assert_eq!(ckt.param(dev, &p), Some(1.0));
}

#[test]
fn test_dc_sweep_unknown_instance() {
    let mut ckt = divider(1e3, 1e3);
    let err = run_dc_sweep(
        &mut ckt,
        &DcSweepParams::new("v9", 0.0, 1.0, 0.5),
        &NoInterrupt,
        &mut NullSink,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidJob(_)));
}

#[test]
fn test_dc_sensitivity_of_divider() {
    let (r1, r2) = (1e3, 3e3);
    let mut ckt = divider(r1, r2);
    let mut rec = Recorder::new();
    let params = SensParams::dc(SensOutput::Voltage {
        pos: "out".into(),
        neg: None,
    })
    .with_filter("r?")
    .with_filter("v1");
    let n = run_sensitivity(&mut ckt, &params, &NoInterrupt, &mut rec).unwrap();
    assert_eq!(n, 3);

    let plot = rec.plot("sens").unwrap();
    let value = |name: &str| plot.real(name).unwrap()[0];
    let sum = r1 + r2;
    let d_r1 = -r2 / (sum * sum);
    let d_r2 = r1 / (sum * sum);
    assert!((value("r1") - d_r1).abs() / d_r1.abs() < 1e-4, "r1: {}", value("r1"));
    assert!((value("r2") - d_r2).abs() / d_r2.abs() < 1e-4, "r2: {}", value("r2"));
    assert!((value("v1") - r2 / sum).abs() < 1e-6, "v1: {}", value("v1"));

    // Every parameter is back at its nominal value, bit for bit.
    for (dev, p) in ckt.parameters() {
        let expected = match p.display_name().as_str() {
            "r1" => r1,
            "r2" => r2,
            "v1" => 1.0,
            _ => continue,
        };
        assert_eq!(ckt.param(dev, &p), Some(expected));
    }
}

#[test]
fn test_sensitivity_filter_without_match() {
    let mut ckt = divider(1e3, 1e3);
    let mut rec = Recorder::new();
    let params = SensParams::dc(SensOutput::Voltage {
        pos: "out".into(),
        neg: None,
    })
    .with_filter("q*");
    assert_eq!(run_sensitivity(&mut ckt, &params, &NoInterrupt, &mut rec).unwrap(), 0);
    assert!(rec.plots.is_empty());
}

/// A conductance to ground that refuses to load at anything but its
/// nominal value.
#[derive(Debug)]
struct Fragile {
    node: NodeId,
    g: f64,
    nominal: f64,
    stamp: AdmittanceStamp,
}

impl Device for Fragile {
    fn kind(&self) -> &'static str {
        "fragile"
    }

    fn instance_count(&self) -> usize {
        1
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> CoreResult<()> {
        self.stamp = AdmittanceStamp::new(ctx, self.node, NodeId::GROUND)?;
        Ok(())
    }

    fn load(&mut self, ctx: &mut SimContext) -> CoreResult<()> {
        if self.g != self.nominal {
            return Err(kirchhoff_core::Error::device_load("f1", "conductance moved"));
        }
        self.stamp.stamp(&mut ctx.matrix, self.g);
        Ok(())
    }

    fn ac_load(&mut self, ctx: &mut SimContext) -> CoreResult<()> {
        self.load(ctx)
    }

    fn parameters(&self) -> Vec<ParamRef> {
        vec![ParamRef {
            instance: 0,
            id: 0,
            instance_name: "f1".to_string(),
            param_name: "g",
            kind: ParamKind::Instance,
        }]
    }

    fn param(&self, param: &ParamRef) -> Option<f64> {
        (param.instance == 0 && param.id == 0).then_some(self.g)
    }

    fn set_param(&mut self, param: &ParamRef, value: f64) -> CoreResult<()> {
        if param.instance != 0 || param.id != 0 {
            return Err(kirchhoff_core::Error::UnknownParameter {
                device: "f1".to_string(),
                param: param.display_name(),
            });
        }
        self.g = value;
        Ok(())
    }
}

#[test]
fn test_sensitivity_skips_parameter_that_fails_to_load() {
    let mut ckt = Circuit::new().unwrap();
    let input = ckt.node("in");
    let out = ckt.node("out");
    ckt.add_device(VoltageSourceModel::new().with(VoltageSource::dc("v1", input, NodeId::GROUND, 1.0)));
    ckt.add_device(Fragile {
        node: out,
        g: 1e-3,
        nominal: 1e-3,
        stamp: AdmittanceStamp::default(),
    });
    ckt.add_device(
        ResistorModel::new()
            .with(Resistor::new("r1", input, out, 1e3))
            .with(Resistor::new("r2", out, NodeId::GROUND, 3e3)),
    );

    let mut rec = Recorder::new();
    let params = SensParams::dc(SensOutput::Voltage {
        pos: "out".into(),
        neg: None,
    })
    .with_filter("f1_g")
    .with_filter("r1");
    assert_eq!(run_sensitivity(&mut ckt, &params, &NoInterrupt, &mut rec).unwrap(), 2);

    let plot = rec.plot("sens").unwrap();
    assert_eq!(plot.real("f1_g").unwrap()[0], 0.0);
    // The skip leaves the baseline intact for the parameters after it:
    // r2 || f1 is 750 ohms.
    let expected = -750.0 / (1750.0 * 1750.0);
    let s = plot.real("r1").unwrap()[0];
    assert!((s - expected).abs() / expected.abs() < 1e-4, "s = {}", s);
    assert!((ckt.ctx.voltage(out) - 750.0 / 1750.0).abs() < 1e-9);
}

/// `v1` (5 V) through `r1` (1 k) into `d1` at node `a`.
fn diode_circuit(params: DiodeParams, area: f64) -> Circuit {
    let options = SimOptions::default().with_reltol(1e-6).with_vntol(1e-9);
    let mut ckt = Circuit::with_options(options).unwrap();
    let input = ckt.node("in");
    let anode = ckt.node("a");
    ckt.add_device(VoltageSourceModel::new().with(VoltageSource::dc("v1", input, NodeId::GROUND, 5.0)));
    ckt.add_device(ResistorModel::new().with(Resistor::new("r1", input, anode, 1e3)));
    ckt.add_device(
        DiodeModel::new("dmod", params).with(Diode::new("d1", anode, NodeId::GROUND).with_area(area)),
    );
    ckt
}

fn anode_voltage(params: DiodeParams, area: f64) -> f64 {
    let mut ckt = diode_circuit(params, area);
    run_op(&mut ckt, &NoInterrupt, &mut NullSink).unwrap();
    ckt.ctx.voltage(ckt.nodes.find("a").unwrap())
}

#[test]
fn test_diode_sensitivity_matches_finite_differences() {
    let nominal = DiodeParams::default();
    let mut ckt = diode_circuit(nominal.clone(), 1.0);
    let mut rec = Recorder::new();
    let params = SensParams::dc(SensOutput::Voltage {
        pos: "a".into(),
        neg: None,
    })
    .with_filter("dmod:is")
    .with_filter("d1_area");
    assert_eq!(run_sensitivity(&mut ckt, &params, &NoInterrupt, &mut rec).unwrap(), 2);
    let plot = rec.plot("sens").unwrap();

    let h = 1e-2;
    let is = nominal.is;
    let shifted = |scale: f64| DiodeParams {
        is: is * scale,
        ..nominal.clone()
    };
    let d_is = (anode_voltage(shifted(1.0 + h), 1.0) - anode_voltage(shifted(1.0 - h), 1.0))
        / (2.0 * h * is);
    let d_area = (anode_voltage(nominal.clone(), 1.0 + h) - anode_voltage(nominal.clone(), 1.0 - h))
        / (2.0 * h);

    let s_is = plot.real("dmod:is").unwrap()[0];
    let s_area = plot.real("d1_area").unwrap()[0];
    assert!(d_is < 0.0 && d_area < 0.0);
    assert!((s_is - d_is).abs() / d_is.abs() < 1e-2, "{} vs {}", s_is, d_is);
    assert!((s_area - d_area).abs() / d_area.abs() < 1e-2, "{} vs {}", s_area, d_area);
}

#[test]
fn test_current_sensitivity_of_source() {
    let mut ckt = divider(1e3, 1e3);
    let mut rec = Recorder::new();
    let params = SensParams::dc(SensOutput::Current {
        source: "v1".into(),
    })
    .with_filter("r1");
    run_sensitivity(&mut ckt, &params, &NoInterrupt, &mut rec).unwrap();
    // The source current is -1 / (r1 + r2); its derivative is 1 / (r1 + r2)^2.
    let s = rec.plot("sens").unwrap().real("r1").unwrap()[0];
    assert!((s - 1.0 / 4e6).abs() / (1.0 / 4e6) < 1e-4, "s = {}", s);
}

#[test]
fn test_ac_sensitivity_tracks_frequency() {
    let mut ckt = divider(1e3, 1e3);
    let out = ckt.nodes.find("out").unwrap();
    ckt.add_device(CapacitorModel::new().with(Capacitor::new("c1", out, NodeId::GROUND, 1e-6)));
    let mut rec = Recorder::new();
    let params = SensParams::ac(
        SensOutput::Voltage {
            pos: "out".into(),
            neg: None,
        },
        AcSweep::decade(1.0, 1e6, 1),
    )
    .with_filter("c1");
    run_sensitivity(&mut ckt, &params, &NoInterrupt, &mut rec).unwrap();

    let plot = rec.plot("sens").unwrap();
    assert_eq!(plot.len(), 7);
    let s = plot.vector("c1").unwrap();
    // Negligible at 1 Hz, large near the corner, falling off above it.
    let mag: Vec<f64> = s.iter().map(|(_, v)| v.norm()).collect();
    assert!(mag[0] < mag[3]);
    assert!(mag[6] < mag[3]);

    // Check one point against dV/dC = -j w R / (2 + j w R C)^2 for r1 = r2 = R.
    let (f, v) = s[3];
    let w = 2.0 * std::f64::consts::PI * f;
    let den = Complex64::new(2.0, w * 1e3 * 1e-6);
    let expected = Complex64::new(0.0, -w * 1e3) / (den * den);
    assert!((v - expected).norm() / expected.norm() < 1e-3, "{} vs {}", v, expected);
}

#[test]
fn test_ac_pause() {
    let mut ckt = divider(1e3, 1e3);
    let flag = CancelFlag::new();
    flag.cancel();
    let err = run_ac(&mut ckt, &AcSweep::decade(1.0, 1e3, 5), &flag, &mut NullSink).unwrap_err();
    assert!(err.is_pause());
}

/// `r1` from `in` to `out` and `r2` from `out` to ground. `c1` goes from
/// `out` to ground, or across `r1` when `c_bypass` is given.
fn rc_network(c_bypass: Option<f64>) -> Circuit {
    let mut ckt = Circuit::new().unwrap();
    let input = ckt.node("in");
    let out = ckt.node("out");
    ckt.add_device(
        ResistorModel::new()
            .with(Resistor::new("r1", input, out, 1e3))
            .with(Resistor::new("r2", out, NodeId::GROUND, 1e3)),
    );
    let mut caps = CapacitorModel::new();
    match c_bypass {
        Some(c) => {
            caps.add(Capacitor::new("c1", input, out, c));
        }
        None => {
            caps.add(Capacitor::new("c1", out, NodeId::GROUND, 1e-6));
        }
    }
    ckt.add_device(caps);
    ckt
}

#[test]
fn test_pz_lowpass() {
    let mut ckt = rc_network(None);
    let mut rec = Recorder::new();
    let params = PzParams::new(("in", "0"), ("out", "0"), PzInput::Voltage);
    let result = run_pz(&mut ckt, &params, &NoInterrupt, &mut rec).unwrap();
    assert_eq!(result.poles.len(), 1);
    assert!(has_root(&result.poles, Complex64::new(-2000.0, 0.0)), "{:?}", result.poles);
    assert!(result.zeros.is_empty(), "{:?}", result.zeros);

    let plot = rec.plot("pz").unwrap();
    assert_eq!(plot.header.vectors, vec!["pole(1)".to_string()]);
}

#[test]
fn test_pz_current_input_denominator() {
    let mut ckt = rc_network(None);
    let params = PzParams::new(("in", "0"), ("out", "0"), PzInput::Current).poles_only();
    let result = run_pz(&mut ckt, &params, &NoInterrupt, &mut NullSink).unwrap();
    assert!(has_root(&result.poles, Complex64::new(-1000.0, 0.0)), "{:?}", result.poles);
    assert!(result.zeros.is_empty());
}

#[test]
fn test_pz_lead_network_zero() {
    let mut ckt = rc_network(Some(1e-6));
    let params = PzParams::new(("in", "0"), ("out", "0"), PzInput::Voltage);
    let result = run_pz(&mut ckt, &params, &NoInterrupt, &mut NullSink).unwrap();
    assert!(has_root(&result.zeros, Complex64::new(-1000.0, 0.0)), "{:?}", result.zeros);
    assert!(has_root(&result.poles, Complex64::new(-2000.0, 0.0)), "{:?}", result.poles);
}

#[test]
fn test_pz_resonator_conjugate_poles() {
    let mut ckt = Circuit::new().unwrap();
    let a = ckt.node("a");
    ckt.add_device(ResistorModel::new().with(Resistor::new("r1", a, NodeId::GROUND, 100.0)));
    ckt.add_device(CapacitorModel::new().with(Capacitor::new("c1", a, NodeId::GROUND, 1e-6)));
    ckt.add_device(InductorModel::new().with(Inductor::new("l1", a, NodeId::GROUND, 1e-3)));

    let params = PzParams::new(("a", "0"), ("a", "0"), PzInput::Current);
    let result = run_pz(&mut ckt, &params, &NoInterrupt, &mut NullSink).unwrap();

    // s^2 + s / RC + 1 / LC = 0
    let alpha: f64 = 1.0 / (2.0 * 100.0 * 1e-6);
    let wd = (1.0 / (1e-3 * 1e-6) - alpha * alpha).sqrt();
    assert_eq!(result.poles.len(), 2);
    assert!(has_root(&result.poles, Complex64::new(-alpha, wd)), "{:?}", result.poles);
    assert!(has_root(&result.poles, Complex64::new(-alpha, -wd)), "{:?}", result.poles);

    // The impedance vanishes at DC.
    assert_eq!(result.zeros.len(), 1);
    assert!(result.zeros[0].norm() < 1e-6, "{:?}", result.zeros);
}

#[test]
fn test_pz_unknown_node() {
    let mut ckt = rc_network(None);
    let params = PzParams::new(("nowhere", "0"), ("out", "0"), PzInput::Voltage);
    let err = run_pz(&mut ckt, &params, &NoInterrupt, &mut NullSink).unwrap_err();
    assert!(matches!(err, Error::InvalidJob(_)));
}
