//! ## Segment-based scheduling engine
//!
//! Computes an offline static schedule for recurring DAG tasks on cores that
//! share partitionable cache ways and memory bandwidth: deadline
//! decomposition, hyper-period job expansion, and the segment-driven
//! EDF-with-resource-allocation main loop.
//!
//! ---
//! #### References:
//! 1. X. Jiang, N. Guan, X. Long, and H. Wan, "Decomposition-Based Real-Time
//!    Scheduling of Parallel Tasks on Multicores Platforms," IEEE TCAD,
//!    vol. 39, no. 10, pp. 2319-2332, 2020. doi: 10.1109/TCAD.2019.2935443.
//! 2. R. Gifford, N. Gandhi, L. T. X. Phan, and A. Haeberlen, "DNA: Dynamic
//!    resource allocation for soft real-time multicore systems," RTAS 2021.

use crate::prelude::*;

pub mod prelude {
    pub use super::decompose::prelude::*;
    pub use super::jobs::prelude::*;
    pub use super::scheduler::prelude::*;
    pub use super::schedulability::prelude::*;
    pub use super::output::prelude::*;
    pub use super::{
        AlgoKind,
        Error,
        RunOutcome,
        run,
    };
}

pub mod decompose;
pub mod jobs;
pub mod scheduler;
pub mod schedulability;
pub mod output;

#[cfg(test)]
pub(crate) mod testbed;

/// Which scheduling path to run.
#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum AlgoKind {
    /// Analytic schedulability test only (no simulation).
    BaselineTest,
    /// The main algorithm: deadline-aware resource allocation per segment.
    Rasco,
    /// Simulation with even resource partitions for every running job.
    BaselineSim,
}

#[derive(Debug)]
pub enum Error {
    EmptyTaskset,
    Phase(PhaseLoadError),
}

/// Everything one task-set run produces.
pub struct RunOutcome {
    pub stats: Vec<DecompStats>,
    pub jobs: JobSet,
    pub schedule: Option<Vec<SegmentRecord>>,
}

// =============================================================================

impl AlgoKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::BaselineTest),
            1 => Some(Self::Rasco),
            2 => Some(Self::BaselineSim),
            _ => None,
        }
    }

    /// Name of the per-algorithm output directory.
    pub fn output_dir(&self) -> &'static str {
        match self {
            Self::BaselineTest => "baseline-test",
            Self::Rasco => "RASCO",
            Self::BaselineSim => "baseline-sim",
        }
    }
}

impl std::fmt::Display for AlgoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.output_dir())
    }
}

/// Run the engine over one task set: preprocess every DAG, expand the jobs of
/// one hyper-period, and (for the simulating algorithms) build the schedule.
pub fn run(
    taskset: &mut Taskset,
    algo: AlgoKind,
    platform: &Platform,
    phases: &PhaseDb,
) -> Result<RunOutcome, Error> {
    if taskset.dags.is_empty() {
        return Err(Error::EmptyTaskset);
    }

    // Input-shape checks up front, so the hot loops can assume full tables.
    let mut checked = std::collections::HashSet::new();
    for dag in &taskset.dags {
        for subtask in &dag.subtasks {
            if checked.insert((subtask.workload.clone(), subtask.max_insn)) {
                phases.validate_for(&subtask.workload, subtask.max_insn)?;
            }
        }
    }

    let stats = decompose_taskset(taskset, algo, platform, phases);
    let mut jobs = expand_jobs(taskset);

    let schedule = match algo {
        AlgoKind::BaselineTest => None,
        _ => Some(build_schedule(&mut jobs, taskset, algo, platform, phases)),
    };

    Ok(RunOutcome { stats, jobs, schedule })
}

// =============================================================================

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::EmptyTaskset => write!(f, "Engine Error, empty task set"),
            Error::Phase(error) => write!(f, "Engine Error, {error}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<PhaseLoadError> for Error {
    fn from(value: PhaseLoadError) -> Self {
        Self::Phase(value)
    }
}
