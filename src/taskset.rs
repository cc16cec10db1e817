use crate::prelude::*;

pub mod prelude {
    pub use super::gml::prelude::*;
    pub use super::profiles::prelude::*;
    pub use super::{
        Subtask,
        DagTask,
        Taskset,
        WcetMatrix,
    };
}

pub mod gml;
pub mod profiles;

/// Worst-case execution times per resource partition, indexed `[cache][membw]`.
///
/// Rows and columns 0 and 1 are unused: the minimum partition is 2 units per
/// resource. A zero cell means the profile was missing for that partition.
#[derive(Clone)]
#[derive(Debug)]
pub struct WcetMatrix {
    max_membw: u32,
    values: Vec<Time>,
}

/// One node of a DAG task, annotated by the preprocessor.
///
/// `parents` and `children` are indices into the owning [`DagTask`] arena,
/// which keeps the graph acyclic by construction and makes job instantiation
/// a pure index remap.
#[derive(Clone)]
#[derive(Debug)]
pub struct Subtask {
    pub uid: u32,
    pub workload: String,
    pub period: Time,
    pub max_insn: u64,
    /// Instructions per nanosecond at the even partition.
    pub even_rate: f64,
    pub wcets: WcetMatrix,
    pub parents: Vec<usize>,
    pub children: Vec<usize>,

    // Written by the preprocessor, relative to the DAG release.
    pub release_offset: Time,
    pub deadline: Time,
    pub cur_finish: Time,
    pub dag_deadline: Time,
    pub c_init: u32,
    pub bw_init: u32,
}

/// One DAG task: subtasks in ascending `uid` order, the last one being the
/// sink used for the Γ and utilization exports.
#[derive(Clone)]
#[derive(Debug)]
pub struct DagTask {
    pub subtasks: Vec<Subtask>,
}

#[derive(Clone)]
#[derive(Debug, Default)]
pub struct Taskset {
    pub dags: Vec<DagTask>,
}

// =============================================================================

impl WcetMatrix {
    pub fn new(platform: &Platform) -> Self {
        let cells = (platform.max_cache as usize + 1) * (platform.max_membw as usize + 1);

        Self {
            max_membw: platform.max_membw,
            values: vec![Time::zero(); cells],
        }
    }

    pub fn get(&self, cache: u32, membw: u32) -> Time {
        self.values[self.cell(cache, membw)]
    }

    pub fn set(&mut self, cache: u32, membw: u32, wcet: Time) {
        let cell = self.cell(cache, membw);
        self.values[cell] = wcet;
    }

    fn cell(&self, cache: u32, membw: u32) -> usize {
        cache as usize * (self.max_membw as usize + 1) + membw as usize
    }
}

impl Subtask {
    pub fn new(
        uid: u32,
        workload: String,
        period: Time,
        max_insn: u64,
        wcets: WcetMatrix,
        platform: &Platform,
    ) -> Self {
        let even_wcet = wcets.get(platform.even_cache(), platform.even_membw());
        assert!(even_wcet > Time::zero(), "no WCET at the even partition for {workload}");

        Self {
            uid,
            workload,
            period,
            max_insn,
            even_rate: max_insn as f64 / even_wcet.as_nanos() as f64,
            wcets,
            parents: Vec::new(),
            children: Vec::new(),
            release_offset: Time::zero(),
            deadline: Time::zero(),
            cur_finish: Time::zero(),
            dag_deadline: period,
            c_init: Platform::MIN_PARTITION,
            bw_init: Platform::MIN_PARTITION,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_sink(&self) -> bool {
        self.children.is_empty()
    }
}

impl DagTask {
    pub fn period(&self) -> Time {
        self.subtasks[0].period
    }

    pub fn sink(&self) -> &Subtask {
        self.subtasks.last().unwrap()
    }

    /// Topological order over the subtask indices, parents first. Ties break
    /// by index so repeated runs stay deterministic.
    ///
    /// Returns `None` when the edges contain a cycle.
    pub fn topological_order(&self) -> Option<Vec<usize>> {
        let mut missing_parents: Vec<usize> = self.subtasks.iter()
            .map(|subtask| subtask.parents.len())
            .collect();

        let mut order = Vec::with_capacity(self.subtasks.len());
        let mut ready: Vec<usize> = (0..self.subtasks.len())
            .filter(|&idx| missing_parents[idx] == 0)
            .collect();

        while let Some(next) = ready.first().copied() {
            ready.remove(0);
            order.push(next);

            for &child in &self.subtasks[next].children {
                missing_parents[child] -= 1;
                if missing_parents[child] == 0 {
                    let at = ready.partition_point(|&other| other < child);
                    ready.insert(at, child);
                }
            }
        }

        (order.len() == self.subtasks.len()).then_some(order)
    }
}

impl Taskset {
    pub fn num_subtasks(&self) -> usize {
        self.dags.iter().map(|dag| dag.subtasks.len()).sum()
    }

    /// LCM of the DAG periods. Zero for an empty task set, which callers
    /// must handle.
    pub fn hyper_period(&self) -> Time {
        if self.dags.is_empty() {
            return Time::zero();
        }

        let hyper_period_ns = self.dags.iter()
            .map(|dag| dag.period().as_nanos())
            .fold(1, num::integer::lcm);

        Time::nanos(hyper_period_ns)
    }
}

// Tests -----------------------------------------------------------------------

#[cfg(test)]
fn plain_subtask(uid: u32, period: i64, platform: &Platform) -> Subtask {
    let mut wcets = WcetMatrix::new(platform);
    for cache in Platform::MIN_PARTITION..=platform.max_cache {
        for membw in Platform::MIN_PARTITION..=platform.max_membw {
            wcets.set(cache, membw, Time::nanos(1000));
        }
    }

    Subtask::new(uid, format!("w{uid}"), Time::nanos(period), 2000, wcets, platform)
}

#[test]
fn hyperperiod_is_the_lcm_of_periods() {
    let platform = Platform::new(2, 8, 8);
    let dag_a = DagTask { subtasks: vec![plain_subtask(0, 6, &platform)] };
    let dag_b = DagTask { subtasks: vec![plain_subtask(1, 10, &platform)] };

    let taskset = Taskset { dags: vec![dag_a, dag_b] };
    assert_eq!(taskset.hyper_period(), Time::nanos(30));

    assert_eq!(Taskset::default().hyper_period(), Time::zero());
}

#[test]
fn topological_order_breaks_ties_by_index() {
    let platform = Platform::new(2, 8, 8);
    let mut subtasks: Vec<Subtask> = (0..4)
        .map(|uid| plain_subtask(uid, 100, &platform))
        .collect();

    // 0 -> {1, 2} -> 3
    subtasks[0].children = vec![1, 2];
    subtasks[1].parents = vec![0];
    subtasks[1].children = vec![3];
    subtasks[2].parents = vec![0];
    subtasks[2].children = vec![3];
    subtasks[3].parents = vec![1, 2];

    let dag = DagTask { subtasks };
    assert_eq!(dag.topological_order(), Some(vec![0, 1, 2, 3]));
}

#[test]
fn cycles_have_no_topological_order() {
    let platform = Platform::new(2, 8, 8);
    let mut subtasks: Vec<Subtask> = (0..2)
        .map(|uid| plain_subtask(uid, 100, &platform))
        .collect();

    subtasks[0].children = vec![1];
    subtasks[0].parents = vec![1];
    subtasks[1].children = vec![0];
    subtasks[1].parents = vec![0];

    let dag = DagTask { subtasks };
    assert_eq!(dag.topological_order(), None);
}
