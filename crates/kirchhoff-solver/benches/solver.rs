//! Benchmarks for the analysis drivers.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use kirchhoff_core::{Circuit, NodeId};
use kirchhoff_devices::{
    CapacitorModel, Capacitor, Diode, DiodeModel, DiodeParams, Resistor, ResistorModel,
    VoltageSource, VoltageSourceModel,
};
use kirchhoff_solver::{AcSweep, NoInterrupt, NullSink, run_ac, run_op};

/// A resistor ladder driven by 5 V, with a diode to ground on every rung
/// when `diodes` is set and a capacitor otherwise.
fn ladder(size: usize, diodes: bool) -> Circuit {
    let mut ckt = Circuit::new().unwrap();
    let input = ckt.node("in");
    ckt.add_device(VoltageSourceModel::new().with(
        VoltageSource::dc("v1", input, NodeId::GROUND, 5.0).with_ac(1.0, 0.0),
    ));

    let mut resistors = ResistorModel::new();
    let mut caps = CapacitorModel::new();
    let mut junctions = DiodeModel::new("d", DiodeParams::default());
    let mut prev = input;
    for k in 0..size {
        let node = ckt.node(&format!("n{k}"));
        resistors.add(Resistor::new(format!("r{k}"), prev, node, 1e3));
        if diodes {
            junctions.add(Diode::new(format!("d{k}"), node, NodeId::GROUND));
        } else {
            caps.add(Capacitor::new(format!("c{k}"), node, NodeId::GROUND, 1e-9));
        }
        prev = node;
    }
    ckt.add_device(resistors);
    if diodes {
        ckt.add_device(junctions);
    } else {
        ckt.add_device(caps);
    }
    ckt
}

fn bench_operating_point(c: &mut Criterion) {
    let mut group = c.benchmark_group("operating_point");

    for size in [10, 50, 200] {
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &size,
            |bencher, &size| {
                let mut ckt = ladder(size, true);
                bencher.iter(|| run_op(black_box(&mut ckt), &NoInterrupt, &mut NullSink).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_ac_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("ac_sweep");
    let sweep = AcSweep::decade(1.0, 1e9, 10);

    for size in [10, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &size,
            |bencher, &size| {
                let mut ckt = ladder(size, false);
                bencher.iter(|| {
                    run_ac(black_box(&mut ckt), &sweep, &NoInterrupt, &mut NullSink).unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_operating_point, bench_ac_sweep);
criterion_main!(benches);
