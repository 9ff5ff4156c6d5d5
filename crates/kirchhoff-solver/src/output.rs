//! Output boundary: analyses stream records into an [`OutputSink`].

use num_complex::Complex64;

use kirchhoff_core::{Circuit, NodeKind, NodeTable};

use crate::error::Result;

/// Kind of the independent variable of a plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKind {
    /// Operating point: one record, scale unused.
    None,
    Time,
    Frequency,
    /// Swept parameter value.
    Sweep,
}

/// Describes the vectors of a plot before any data arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotHeader {
    /// Analysis name ("op", "tran", "ac", ...).
    pub name: String,
    pub scale: ScaleKind,
    /// One name per value in each record.
    pub vectors: Vec<String>,
    pub complex: bool,
}

/// Values of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl Values {
    pub fn len(&self) -> usize {
        match self {
            Values::Real(v) => v.len(),
            Values::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index` as a complex number (real values get zero imaginary).
    pub fn get(&self, index: usize) -> Option<Complex64> {
        match self {
            Values::Real(v) => v.get(index).map(|&x| Complex64::new(x, 0.0)),
            Values::Complex(v) => v.get(index).copied(),
        }
    }
}

/// Output vector names for every unknown, in node order: `v(name)` for
/// voltages, the branch name itself for currents.
pub fn node_vectors(nodes: &NodeTable) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| !n.is_ground())
        .map(|n| match n.kind() {
            NodeKind::Voltage => format!("v({})", n.name()),
            NodeKind::Current => n.name().to_string(),
        })
        .collect()
}

/// Current real solution, in [`node_vectors`] order.
pub fn real_values(ckt: &Circuit) -> Vec<f64> {
    ckt.nodes
        .iter()
        .filter(|n| !n.is_ground())
        .map(|n| ckt.ctx.rhs_old[n.id().index()])
        .collect()
}

/// Current complex solution, in [`node_vectors`] order.
pub fn complex_values(ckt: &Circuit) -> Vec<Complex64> {
    ckt.nodes
        .iter()
        .filter(|n| !n.is_ground())
        .map(|n| {
            let i = n.id().index();
            Complex64::new(ckt.ctx.rhs_old[i], ckt.ctx.irhs_old[i])
        })
        .collect()
}

/// Receives analysis output.
///
/// A sink error aborts the analysis and is returned to the caller.
pub trait OutputSink {
    fn begin_plot(&mut self, header: PlotHeader) -> Result<()>;
    fn data(&mut self, scale: f64, values: &Values) -> Result<()>;
    fn end_plot(&mut self) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn begin_plot(&mut self, _header: PlotHeader) -> Result<()> {
        Ok(())
    }

    fn data(&mut self, _scale: f64, _values: &Values) -> Result<()> {
        Ok(())
    }

    fn end_plot(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One recorded plot.
#[derive(Debug, Clone, PartialEq)]
pub struct Plot {
    pub header: PlotHeader,
    pub scale: Vec<f64>,
    pub rows: Vec<Values>,
    /// False while records are still arriving (or the analysis aborted).
    pub complete: bool,
}

impl Plot {
    /// Index of a vector by name.
    pub fn vector_index(&self, name: &str) -> Option<usize> {
        self.header.vectors.iter().position(|v| v == name)
    }

    /// `(scale, value)` pairs of one vector across all records.
    pub fn vector(&self, name: &str) -> Option<Vec<(f64, Complex64)>> {
        let idx = self.vector_index(name)?;
        self.scale
            .iter()
            .zip(&self.rows)
            .map(|(&s, row)| row.get(idx).map(|v| (s, v)))
            .collect()
    }

    /// Real parts of one vector across all records.
    pub fn real(&self, name: &str) -> Option<Vec<f64>> {
        Some(self.vector(name)?.into_iter().map(|(_, v)| v.re).collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Keeps every plot in memory.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub plots: Vec<Plot>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent plot.
    pub fn last(&self) -> Option<&Plot> {
        self.plots.last()
    }

    /// Most recent plot with the given analysis name.
    pub fn plot(&self, name: &str) -> Option<&Plot> {
        self.plots.iter().rev().find(|p| p.header.name == name)
    }
}

impl OutputSink for Recorder {
    fn begin_plot(&mut self, header: PlotHeader) -> Result<()> {
        self.plots.push(Plot {
            header,
            scale: Vec::new(),
            rows: Vec::new(),
            complete: false,
        });
        Ok(())
    }

    fn data(&mut self, scale: f64, values: &Values) -> Result<()> {
        if let Some(plot) = self.plots.last_mut() {
            plot.scale.push(scale);
            plot.rows.push(values.clone());
        }
        Ok(())
    }

    fn end_plot(&mut self) -> Result<()> {
        if let Some(plot) = self.plots.last_mut() {
            plot.complete = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_collects_vectors() {
        let mut rec = Recorder::new();
        rec.begin_plot(PlotHeader {
            name: "tran".into(),
            scale: ScaleKind::Time,
            vectors: vec!["v(a)".into(), "v(b)".into()],
            complex: false,
        })
        .unwrap();
        rec.data(0.0, &Values::Real(vec![1.0, 2.0])).unwrap();
        rec.data(1e-3, &Values::Real(vec![1.5, 2.5])).unwrap();
        rec.end_plot().unwrap();

        let plot = rec.plot("tran").unwrap();
        assert!(plot.complete);
        assert_eq!(plot.len(), 2);
        assert_eq!(plot.real("v(b)").unwrap(), vec![2.0, 2.5]);
        assert!(plot.vector("v(c)").is_none());
    }

    #[test]
    fn test_values_get() {
        let v = Values::Complex(vec![Complex64::new(1.0, -1.0)]);
        assert_eq!(v.get(0), Some(Complex64::new(1.0, -1.0)));
        assert_eq!(v.get(1), None);
        assert_eq!(Values::Real(vec![3.0]).get(0), Some(Complex64::new(3.0, 0.0)));
    }
}
