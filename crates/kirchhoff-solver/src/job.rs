//! Analysis descriptors.
//!
//! A [`Job`] names one analysis and its parameters. Jobs deserialize from
//! JSON with an `"analysis"` tag:
//!
//! ```text
//! {"analysis": "ac", "sweep": "decade", "start": 1, "stop": 1e6, "steps": 10}
//! ```

use serde::{Deserialize, Serialize};

use kirchhoff_core::Circuit;

use crate::ac::{AcSweep, run_ac};
use crate::dc::{DcSweepParams, run_dc_sweep};
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::op::{OpResult, run_op};
use crate::output::OutputSink;
use crate::pz::{PzParams, PzResult, run_pz};
use crate::sensitivity::{SensParams, run_sensitivity};
use crate::transient::{NoSync, SyncHook, TransientParams, TransientSummary, run_transient};

/// One requested analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "analysis", rename_all = "lowercase")]
pub enum Job {
    Op,
    #[serde(rename = "dc")]
    DcSweep(DcSweepParams),
    Ac(AcSweep),
    Tran(TransientParams),
    Sens(SensParams),
    Pz(PzParams),
}

/// What a finished job reports besides its plot.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Op(OpResult),
    /// Number of records emitted.
    Points(usize),
    Tran(TransientSummary),
    Pz(PzResult),
}

impl Job {
    /// Name of the plot the job emits.
    pub fn name(&self) -> &'static str {
        match self {
            Job::Op => "op",
            Job::DcSweep(_) => "dc",
            Job::Ac(_) => "ac",
            Job::Tran(_) => "tran",
            Job::Sens(_) => "sens",
            Job::Pz(_) => "pz",
        }
    }

    pub fn run(
        &self,
        ckt: &mut Circuit,
        interrupt: &dyn Interrupt,
        sink: &mut dyn OutputSink,
    ) -> Result<JobOutcome> {
        self.run_with_sync(ckt, &mut NoSync, interrupt, sink)
    }

    /// Run the job; a transient analysis consults `sync` at every step.
    pub fn run_with_sync(
        &self,
        ckt: &mut Circuit,
        sync: &mut dyn SyncHook,
        interrupt: &dyn Interrupt,
        sink: &mut dyn OutputSink,
    ) -> Result<JobOutcome> {
        let outcome = match self {
            Job::Op => JobOutcome::Op(run_op(ckt, interrupt, sink)?),
            Job::DcSweep(p) => JobOutcome::Points(run_dc_sweep(ckt, p, interrupt, sink)?),
            Job::Ac(p) => JobOutcome::Points(run_ac(ckt, p, interrupt, sink)?),
            Job::Tran(p) => JobOutcome::Tran(run_transient(ckt, p, sync, interrupt, sink)?),
            Job::Sens(p) => JobOutcome::Points(run_sensitivity(ckt, p, interrupt, sink)?),
            Job::Pz(p) => JobOutcome::Pz(run_pz(ckt, p, interrupt, sink)?),
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ac::SweepType;
    use crate::sensitivity::SensOutput;

    #[test]
    fn test_jobs_from_json() {
        let jobs: Vec<Job> = serde_json::from_str(
            r#"[
                {"analysis": "op"},
                {"analysis": "dc", "instance": "v1", "start": 0, "stop": 1, "step": 0.1},
                {"analysis": "ac", "sweep": "decade", "start": 1, "stop": 100, "steps": 10},
                {"analysis": "tran", "tstep": 1e-5, "tstop": 1e-3},
                {"analysis": "sens", "output": {"voltage": {"pos": "out"}}},
                {"analysis": "pz", "input_pos": "in", "input_neg": "0",
                 "output_pos": "out", "output_neg": "0", "input_type": "current"}
            ]"#,
        )
        .unwrap();
        assert_eq!(jobs[0], Job::Op);
        assert_eq!(jobs[1], Job::DcSweep(DcSweepParams::new("v1", 0.0, 1.0, 0.1)));
        match &jobs[2] {
            Job::Ac(s) => {
                assert_eq!(s.sweep, SweepType::Decade);
                assert_eq!(s.count_steps().0, 21);
            }
            other => panic!("unexpected job {:?}", other),
        }
        assert_eq!(jobs[3], Job::Tran(TransientParams::new(1e-5, 1e-3)));
        assert_eq!(
            jobs[4],
            Job::Sens(SensParams::dc(SensOutput::Voltage {
                pos: "out".into(),
                neg: None
            }))
        );
        let names: Vec<_> = jobs.iter().map(Job::name).collect();
        assert_eq!(names, ["op", "dc", "ac", "tran", "sens", "pz"]);
    }

    #[test]
    fn test_job_round_trips_tag() {
        let json = serde_json::to_string(&Job::Op).unwrap();
        assert_eq!(json, r#"{"analysis":"op"}"#);
    }
}
