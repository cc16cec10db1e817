//! Hyper-period job expansion.
//!
//! Every subtask is instantiated once per DAG release in the hyper-period;
//! relative times become absolute and parent/child edges are remapped onto
//! the jobs of the same release.

use crate::prelude::*;

pub mod prelude {
    pub use super::{
        Job,
        JobId,
        JobSet,
        expand_jobs,
    };
}

#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq, Hash)]
pub struct JobId {
    pub uid: u32,
    pub release_num: u32,
}

/// One subtask instance. Carries the instance-specific scheduling state plus
/// copies of the hot template fields; everything else is reached through
/// `(dag_idx, sub_idx)`.
#[derive(Clone)]
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub dag_idx: usize,
    pub sub_idx: usize,

    pub max_insn: u64,
    pub even_rate: f64,
    pub c_init: u32,
    pub bw_init: u32,

    pub anchor_point: Time,
    pub release_offset: Time,
    pub deadline: Time,
    pub deadline_init: Time,
    pub dag_deadline: Time,
    pub cur_finish: Time,

    pub c: u32,
    pub bw: u32,
    pub cur_insn: u64,
    pub complete: bool,

    /// Indices into the owning [`JobSet`] arena.
    pub parents: Vec<usize>,
    pub children: Vec<usize>,
}

/// All jobs of one hyper-period, plus the DAG release times.
pub struct JobSet {
    pub jobs: Vec<Job>,
    /// Job indices in ascending `release_offset` order (ties keep creation
    /// order, which is ascending uid within a release).
    pub by_release: Vec<usize>,
    pub anchor_points: std::collections::BTreeSet<Time>,
    pub hyper_period: Time,
}

// =============================================================================

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.uid, self.release_num)
    }
}

impl Job {
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_sink(&self) -> bool {
        self.children.is_empty()
    }
}

impl JobSet {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

pub fn expand_jobs(taskset: &Taskset) -> JobSet {
    let hyper_period = taskset.hyper_period();

    let mut jobs: Vec<Job> = Vec::new();
    let mut anchor_points = std::collections::BTreeSet::new();

    for (dag_idx, dag) in taskset.dags.iter().enumerate() {
        let period = dag.period();
        let releases = hyper_period.as_nanos() / period.as_nanos();

        for release_num in 0..releases {
            let anchor_point = period * release_num;
            anchor_points.insert(anchor_point);

            // Jobs of one release mirror the subtask indices, so the edge
            // remap is a pure offset.
            let base = jobs.len();
            for (sub_idx, subtask) in dag.subtasks.iter().enumerate() {
                jobs.push(Job {
                    id: JobId { uid: subtask.uid, release_num: release_num as u32 },
                    dag_idx,
                    sub_idx,
                    max_insn: subtask.max_insn,
                    even_rate: subtask.even_rate,
                    c_init: subtask.c_init,
                    bw_init: subtask.bw_init,
                    anchor_point,
                    release_offset: subtask.release_offset + anchor_point,
                    deadline: subtask.deadline + anchor_point,
                    deadline_init: subtask.deadline + anchor_point,
                    dag_deadline: subtask.dag_deadline + anchor_point,
                    cur_finish: subtask.cur_finish + anchor_point,
                    c: subtask.c_init,
                    bw: subtask.bw_init,
                    cur_insn: 1,
                    complete: false,
                    parents: subtask.parents.iter().map(|&parent| base + parent).collect(),
                    children: subtask.children.iter().map(|&child| base + child).collect(),
                });
            }
        }
    }

    let mut by_release: Vec<usize> = (0..jobs.len()).collect();
    by_release.sort_by_key(|&at| jobs[at].release_offset);

    JobSet { jobs, by_release, anchor_points, hyper_period }
}

// Tests -----------------------------------------------------------------------

#[cfg(test)]
use crate::engine::testbed;

#[test]
fn coprime_periods_expand_over_the_hyperperiod() {
    let platform = testbed::platform2();
    let mut db = PhaseDb::new(&platform);
    testbed::uniform_workload(&mut db, &platform, "fft", 4, 400_000_000, testbed::flat_theta());

    let mut dag_a = testbed::chain_dag("fft", 1, 6, 4, &db, &platform);
    let mut dag_b = testbed::chain_dag("fft", 1, 10, 4, &db, &platform);
    dag_b.subtasks[0].uid = 1;
    dag_a.subtasks[0].deadline = Time::nanos(6);
    dag_b.subtasks[0].deadline = Time::nanos(10);

    let taskset = Taskset { dags: vec![dag_a, dag_b] };
    let jobs = expand_jobs(&taskset);

    assert_eq!(jobs.hyper_period, Time::nanos(30));
    assert_eq!(jobs.len(), 5 + 3);

    let anchors: Vec<i64> = jobs.anchor_points.iter().map(Time::as_nanos).collect();
    assert_eq!(anchors, vec![0, 6, 10, 12, 18, 20, 24]);

    let ids: Vec<String> = jobs.jobs.iter().map(|job| job.id.to_string()).collect();
    assert_eq!(
        ids,
        vec!["0_0", "0_1", "0_2", "0_3", "0_4", "1_0", "1_1", "1_2"],
    );

    // times shift by the anchor of each release
    assert_eq!(jobs.jobs[3].anchor_point, Time::nanos(18));
    assert_eq!(jobs.jobs[3].release_offset, Time::nanos(18));
    assert_eq!(jobs.jobs[3].deadline, Time::nanos(24));
    assert_eq!(jobs.jobs[6].release_offset, Time::nanos(10));
    assert_eq!(jobs.jobs[6].dag_deadline, Time::nanos(20));
}

#[test]
fn edges_rewire_within_each_release() {
    let platform = testbed::platform2();
    let mut db = PhaseDb::new(&platform);
    testbed::uniform_workload(&mut db, &platform, "fft", 4, 400_000_000, testbed::flat_theta());

    let dag = testbed::chain_dag("fft", 3, 10, 4, &db, &platform);
    let taskset = Taskset { dags: vec![dag] };
    let jobs = expand_jobs(&taskset);

    assert_eq!(jobs.len(), 3);
    assert!(jobs.jobs[0].is_root());
    assert_eq!(jobs.jobs[0].children, vec![1]);
    assert_eq!(jobs.jobs[1].parents, vec![0]);
    assert_eq!(jobs.jobs[1].children, vec![2]);
    assert!(jobs.jobs[2].is_sink());

    for job in &jobs.jobs {
        assert_eq!(job.cur_insn, 1);
        assert!(!job.complete);
        assert_eq!((job.c, job.bw), (job.c_init, job.bw_init));
        assert_eq!(job.deadline, job.deadline_init);
    }
}
