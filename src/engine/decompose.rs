//! Per-DAG deadline decomposition.
//!
//! Segments the DAG's timeline, classifies segments as heavy or light
//! against the mean execution density, stretches the segments to fill the
//! period, and derives per-subtask releases, deadlines and minimum resource
//! floors from the stretched layout.
//!
//! ---
//! #### References:
//! 1. X. Jiang, N. Guan, X. Long, and H. Wan, "Decomposition-Based Real-Time
//!    Scheduling of Parallel Tasks on Multicores Platforms," IEEE TCAD,
//!    vol. 39, no. 10, pp. 2319-2332, 2020. doi: 10.1109/TCAD.2019.2935443.

use crate::prelude::*;
use super::AlgoKind;

pub mod prelude {
    pub use super::{
        DecompStats,
        decompose_taskset,
    };
}

/// Per-DAG quantities exported for the analytic schedulability test:
/// utilization, deadline-tightening ratio Γ and stretch factor Ω.
#[derive(Clone, Copy)]
#[derive(Debug)]
pub struct DecompStats {
    pub util: f64,
    pub gamma: f64,
    pub omega: f64,
}

struct Segment {
    start: f64,
    end: f64,
    sum_wcet: i64,
    is_heavy: bool,
    fully_contained: Vec<usize>,
    partially_contained: Vec<usize>,
}

impl Segment {
    fn length(&self) -> f64 {
        self.end - self.start
    }

    fn threshold(&self) -> f64 {
        self.sum_wcet as f64 / self.length()
    }

    fn spans(&self, subtask: &Subtask) -> bool {
        subtask.release_offset.as_nanos() as f64 <= self.start
            && subtask.deadline.as_nanos() as f64 >= self.end
    }
}

// =============================================================================

pub fn decompose_taskset(
    taskset: &mut Taskset,
    algo: AlgoKind,
    platform: &Platform,
    phases: &PhaseDb,
) -> Vec<DecompStats> {
    taskset.dags.iter_mut()
        .map(|dag| decompose_dag(dag, algo, platform, phases))
        .collect()
}

fn decompose_dag(
    dag: &mut DagTask,
    algo: AlgoKind,
    platform: &Platform,
    phases: &PhaseDb,
) -> DecompStats {
    let topo = dag.topological_order().expect("task graphs are acyclic");
    let count = dag.subtasks.len();

    // Initial partitions: the largest one core can hold for the main
    // algorithm, the even split for the baselines.
    for subtask in &mut dag.subtasks {
        if algo == AlgoKind::Rasco {
            subtask.c_init = platform.max_cache_one_core();
            subtask.bw_init = platform.max_membw_one_core();
        } else {
            subtask.c_init = platform.even_cache();
            subtask.bw_init = platform.even_membw();
        }
    }

    // Initial releases and finish times at those budgets, parents first.
    for &at in &topo {
        let release = dag.subtasks[at].parents.iter()
            .map(|&parent| dag.subtasks[parent].cur_finish)
            .max()
            .unwrap_or(Time::zero());

        let subtask = &dag.subtasks[at];
        let wcet = subtask.wcets.get(subtask.c_init, subtask.bw_init);
        let subtask = &mut dag.subtasks[at];
        subtask.release_offset = release;
        subtask.cur_finish = release + wcet;
    }

    // Deadlines close the gap to the earliest child release.
    for at in 0..count {
        let deadline = if dag.subtasks[at].is_sink() {
            dag.subtasks[at].cur_finish
        } else {
            dag.subtasks[at].children.iter()
                .map(|&child| dag.subtasks[child].release_offset)
                .min()
                .unwrap()
        };
        dag.subtasks[at].deadline = deadline;
    }

    for subtask in &dag.subtasks {
        assert!(
            subtask.deadline - subtask.release_offset
                >= subtask.wcets.get(subtask.c_init, subtask.bw_init),
            "initial window shorter than the wcet for subtask {}", subtask.uid,
        );
    }

    // Segment boundaries: merged releases and deadlines, strictly increasing.
    let mut boundaries: Vec<i64> = dag.subtasks.iter()
        .flat_map(|subtask| [
            subtask.release_offset.as_nanos(),
            subtask.deadline.as_nanos(),
        ])
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();
    assert!(boundaries.len() >= 2);

    let mut segments: Vec<Segment> = boundaries.windows(2)
        .map(|bounds| Segment {
            start: bounds[0] as f64,
            end: bounds[1] as f64,
            sum_wcet: 0,
            is_heavy: false,
            fully_contained: Vec::new(),
            partially_contained: Vec::new(),
        })
        .collect();

    // Fully-contained subtasks and the per-segment density.
    let mut contained = vec![false; count];
    for segment in &mut segments {
        for (at, subtask) in dag.subtasks.iter().enumerate() {
            let inside = subtask.release_offset.as_nanos() as f64 >= segment.start
                && subtask.deadline.as_nanos() as f64 <= segment.end;

            if inside && !contained[at] {
                contained[at] = true;
                segment.fully_contained.push(at);
                segment.sum_wcet += subtask.wcets.get(subtask.c_init, subtask.bw_init).as_nanos();
            }
        }
    }

    let total_len = (boundaries[boundaries.len() - 1] - boundaries[0]) as f64;
    assert!(total_len > 0.0);

    let total_threshold = dag.subtasks.iter().enumerate()
        .filter(|(at, _)| contained[*at])
        .map(|(_, subtask)| subtask.wcets.get(subtask.c_init, subtask.bw_init).as_nanos())
        .sum::<i64>() as f64
        / total_len;
    assert!(total_threshold > 0.0);

    for segment in &mut segments {
        segment.is_heavy = segment.threshold() > total_threshold;
    }

    // Spread the subtasks spanning several segments: light segments absorb
    // work up to the mean density, splitting where the work does not fit.
    let mut queue: std::collections::VecDeque<(usize, i64)> = dag.subtasks.iter()
        .enumerate()
        .filter(|(at, _)| !contained[*at])
        .map(|(at, subtask)| {
            (at, subtask.wcets.get(subtask.c_init, subtask.bw_init).as_nanos())
        })
        .collect();

    'light: for seg_at in 0..segments.len() {
        if segments[seg_at].is_heavy {
            continue;
        }

        let mut at = 0;
        while at < queue.len() {
            let (sub_at, remaining) = queue[at];
            let segment = &mut segments[seg_at];

            if !segment.spans(&dag.subtasks[sub_at]) {
                at += 1;
                continue;
            }

            if (remaining + segment.sum_wcet) as f64 / segment.length() <= total_threshold {
                segment.fully_contained.push(sub_at);
                segment.sum_wcet += remaining;
                assert!(
                    segment.threshold() <= total_threshold,
                    "light segment turned heavy on absorption",
                );
                queue.remove(at);
            } else {
                let take = ((total_threshold * segment.length() - segment.sum_wcet as f64)
                    .floor() as i64)
                    .min(segment.length() as i64);
                assert!(
                    take >= 0 && take as f64 <= segment.length(),
                    "split exceeds the segment for subtask {}", dag.subtasks[sub_at].uid,
                );

                segment.sum_wcet += take;
                segment.is_heavy = segment.threshold() > total_threshold;
                if take > 0 {
                    segment.partially_contained.push(sub_at);
                }

                queue.remove(at);
                let remaining = remaining - take;
                assert!(remaining >= 0, "negative remaining wcet after a split");
                if remaining > 0 {
                    queue.push_front((sub_at, remaining));
                }
                continue 'light;
            }
        }
    }

    // Residue goes wherever the subtask's window still covers a whole
    // segment, filling each up to its length.
    while let Some((sub_at, mut remaining)) = queue.pop_front() {
        let mut placed = false;

        for segment in &mut segments {
            if !segment.spans(&dag.subtasks[sub_at]) {
                continue;
            }

            if remaining as f64 <= segment.length() {
                segment.sum_wcet += remaining;
                placed = true;
            } else {
                let take = segment.length() as i64;
                segment.sum_wcet += take;
                remaining -= take;
                assert!(remaining > 0);
            }

            segment.is_heavy = segment.threshold() > total_threshold;
            segment.partially_contained.push(sub_at);
            if placed {
                break;
            }
        }

        assert!(placed, "subtask {} fits in no segment", dag.subtasks[sub_at].uid);
    }

    // Stretch factors.
    let wcets_heavy: i64 = segments.iter()
        .filter(|segment| segment.is_heavy)
        .map(|segment| segment.sum_wcet)
        .sum();
    let length_light: f64 = segments.iter()
        .filter(|segment| !segment.is_heavy)
        .map(Segment::length)
        .sum();
    let total_wcets = total_threshold * total_len;
    let omega = wcets_heavy as f64 / total_wcets + length_light / total_len;

    let period = dag.period();
    let sink = dag.sink();
    assert!(sink.is_sink(), "last subtask must be the sink");
    assert_eq!(
        boundaries[boundaries.len() - 1], sink.deadline.as_nanos(),
        "last segment boundary is not the sink deadline",
    );
    let util = total_wcets / period.as_nanos() as f64;
    let gamma = sink.deadline.ratio(period);

    // Stretch each segment and shift its successors.
    for at in 0..segments.len() {
        let segment = &segments[at];
        let end = if segment.is_heavy {
            segment.sum_wcet as f64 / (omega * util) + segment.start
        } else {
            segment.length() / (omega * gamma) + segment.start
        };
        assert!(end > 0.0);
        segments[at].end = end;

        if at + 1 < segments.len() {
            let next_len = segments[at + 1].length();
            segments[at + 1].start = end;
            segments[at + 1].end = end + next_len;
        }
    }

    // Propagate the stretched windows back onto the subtasks and recompute
    // the finish times through the phase tables.
    for at in 0..count {
        let mut earliest = f64::INFINITY;
        let mut latest = 0.0f64;
        for segment in &segments {
            if segment.fully_contained.contains(&at) || segment.partially_contained.contains(&at) {
                earliest = earliest.min(segment.start);
                latest = latest.max(segment.end);
            }
        }
        assert!(earliest.is_finite(), "subtask {} landed in no segment", dag.subtasks[at].uid);

        {
            let subtask = &mut dag.subtasks[at];
            subtask.release_offset = Time::nanos(earliest as i64);
            subtask.deadline = Time::nanos(latest as i64);
        }
        let subtask = &dag.subtasks[at];
        let walk = full_walk(phases, subtask, subtask.c_init, subtask.bw_init);
        dag.subtasks[at].cur_finish = dag.subtasks[at].release_offset + walk;
    }

    match algo {
        AlgoKind::Rasco => tighten_resources(dag, &topo, phases),
        _ => retime_even(dag, &topo),
    }

    DecompStats { util, gamma, omega }
}

/// Time for the whole job at the given partition, walking the phase table.
fn full_walk(phases: &PhaseDb, subtask: &Subtask, cache: u32, membw: u32) -> Time {
    let table = phases.slice(&subtask.workload, cache, membw);
    let (idx, _) = find_phase(table, 1)
        .unwrap_or_else(|| panic!("empty phase table for {}", subtask.workload));

    calc_ttf(table, 1, idx, subtask.max_insn)
}

/// Give back resource units while the WCET at the shrunk partition still
/// fits the decomposed window, then redo releases and finish times at the
/// tightened floor.
fn tighten_resources(dag: &mut DagTask, topo: &[usize], phases: &PhaseDb) {
    for subtask in &mut dag.subtasks {
        loop {
            let window = subtask.deadline - subtask.release_offset;
            let (dc, dbw) = select_droppable_res(subtask, window);
            if dc == 0 && dbw == 0 {
                break;
            }

            subtask.c_init -= dc;
            subtask.bw_init -= dbw;
            if subtask.c_init == Platform::MIN_PARTITION
                || subtask.bw_init == Platform::MIN_PARTITION
            {
                break;
            }
        }
    }

    for &at in topo {
        let release = dag.subtasks[at].parents.iter()
            .map(|&parent| dag.subtasks[parent].cur_finish)
            .max()
            .unwrap_or(Time::zero());

        let finish = release + full_walk(
            phases,
            &dag.subtasks[at],
            dag.subtasks[at].c_init,
            dag.subtasks[at].bw_init,
        );

        let subtask = &mut dag.subtasks[at];
        subtask.release_offset = release;
        subtask.cur_finish = finish;
        assert!(subtask.deadline <= subtask.dag_deadline);
    }
}

/// Baseline path: no tightening, releases chase the even-partition finish
/// times so children release early rather than late.
fn retime_even(dag: &mut DagTask, topo: &[usize]) {
    for &at in topo {
        let release = dag.subtasks[at].parents.iter()
            .map(|&parent| dag.subtasks[parent].cur_finish)
            .max()
            .unwrap_or(Time::zero());

        let subtask = &mut dag.subtasks[at];
        subtask.release_offset = release;
        subtask.cur_finish = release + subtask.wcets.get(subtask.c_init, subtask.bw_init);
        assert!(subtask.deadline <= subtask.dag_deadline);
        assert!(subtask.deadline > Time::zero());
    }
}

/// The resource whose removal grows the WCET least, or `(0, 0)` when any
/// removal would push the WCET past `window` or both dimensions sit at the
/// minimum already.
fn select_droppable_res(subtask: &Subtask, window: Time) -> (u32, u32) {
    let min = Platform::MIN_PARTITION;
    if subtask.c_init == min && subtask.bw_init == min {
        return (0, 0);
    }

    let cache_wcet = (subtask.c_init > min)
        .then(|| subtask.wcets.get(subtask.c_init - 1, subtask.bw_init));
    let membw_wcet = (subtask.bw_init > min)
        .then(|| subtask.wcets.get(subtask.c_init, subtask.bw_init - 1));

    let cache_blocked = cache_wcet.is_none_or(|wcet| wcet >= window);
    let membw_blocked = membw_wcet.is_none_or(|wcet| wcet >= window);

    match (cache_blocked, membw_blocked) {
        (true, true) => (0, 0),
        (true, false) => (0, 1),
        (false, true) => (1, 0),
        (false, false) => {
            if cache_wcet <= membw_wcet {
                (1, 0)
            } else {
                (0, 1)
            }
        },
    }
}

// Tests -----------------------------------------------------------------------

#[cfg(test)]
use super::testbed;

#[test]
fn chain_is_stretched_to_the_period() {
    let platform = testbed::platform2();
    let mut db = PhaseDb::new(&platform);
    // 1 insn/ns at the even partition, wcet(4,4) = 2000 ns
    testbed::uniform_workload(&mut db, &platform, "streamcluster", 2001, 125_000_000, testbed::flat_theta());

    let dag = testbed::chain_dag("streamcluster", 2, 10_000, 2001, &db, &platform);
    let mut taskset = Taskset { dags: vec![dag] };

    let stats = decompose_taskset(&mut taskset, AlgoKind::Rasco, &platform, &db);
    let dag = &taskset.dags[0];

    // Both windows stretch from 1334 ns to half the period (modulo the
    // float-to-int truncation of the segment bounds).
    let head = &dag.subtasks[0];
    assert_eq!(head.release_offset, Time::zero());
    assert!((4999..=5000).contains(&head.deadline.as_nanos()));

    let tail = &dag.subtasks[1];
    assert!((9999..=10000).contains(&tail.deadline.as_nanos()));

    // The stretch leaves room to shed resources down to (2, 6).
    assert_eq!((head.c_init, head.bw_init), (2, 6));
    assert_eq!((tail.c_init, tail.bw_init), (2, 6));

    // Finish times at the tightened floor: 1 insn/ns again.
    assert_eq!(head.cur_finish, Time::nanos(2000));
    assert_eq!(tail.release_offset, Time::nanos(2000));
    assert_eq!(tail.cur_finish, Time::nanos(4000));

    assert_eq!(stats.len(), 1);
    assert!((stats[0].omega - 1.0).abs() < 1e-9);
    assert!((stats[0].util - 0.2668).abs() < 1e-9);
    assert!((stats[0].gamma - 0.2668).abs() < 1e-9);
}

#[test]
fn spanning_subtask_is_split_across_segments() {
    let platform = testbed::platform2();
    let mut db = PhaseDb::new(&platform);
    // 1.2 insns/ns at (6, 6)
    testbed::uniform_workload(&mut db, &platform, "fft", 1201, 100_000_000, testbed::flat_theta());
    testbed::uniform_workload(&mut db, &platform, "canneal", 1801, 100_000_000, testbed::flat_theta());

    // a -> b1 -> b2 -> d and a -> c -> d, with c spanning two segments
    let mut subtasks = vec![
        testbed::subtask(0, "fft", 8000, 1201, &db, &platform),
        testbed::subtask(1, "fft", 8000, 1201, &db, &platform),
        testbed::subtask(2, "fft", 8000, 1201, &db, &platform),
        testbed::subtask(3, "canneal", 8000, 1801, &db, &platform),
        testbed::subtask(4, "fft", 8000, 1201, &db, &platform),
    ];
    subtasks[0].children = vec![1, 3];
    subtasks[1].parents = vec![0];
    subtasks[1].children = vec![2];
    subtasks[2].parents = vec![1];
    subtasks[2].children = vec![4];
    subtasks[3].parents = vec![0];
    subtasks[3].children = vec![4];
    subtasks[4].parents = vec![2, 3];

    let mut taskset = Taskset { dags: vec![DagTask { subtasks }] };
    let stats = decompose_taskset(&mut taskset, AlgoKind::Rasco, &platform, &db);
    let dag = &taskset.dags[0];

    // Segment layout before the stretch is [0, 1000, 2000, 3000, 4000] with
    // the spanning subtask split over the two middle segments, turning both
    // heavy: omega = 3500/4000 + 2000/4000.
    assert!((stats[0].omega - 1.375).abs() < 1e-9);
    assert!((stats[0].util - 0.5).abs() < 1e-9);
    assert!((stats[0].gamma - 0.5).abs() < 1e-9);

    // The split subtask's window covers both stretched middle segments:
    // [1000, 3000] maps to [16000/11, 72000/11].
    let split = &dag.subtasks[3];
    assert_eq!(split.release_offset, Time::nanos(1454));
    assert_eq!(split.deadline, Time::nanos(6545));

    // Tightening stops once a further drop would overrun the window: the
    // fork and join windows are a single stretched segment (too tight for a
    // (2, 6) wcet of 1500), the inner windows are roomier.
    assert_eq!((dag.subtasks[0].c_init, dag.subtasks[0].bw_init), (3, 6));
    assert_eq!((dag.subtasks[1].c_init, dag.subtasks[1].bw_init), (2, 6));
    assert_eq!((dag.subtasks[4].c_init, dag.subtasks[4].bw_init), (3, 6));
    assert_eq!((split.c_init, split.bw_init), (2, 6));

    // Releases chase the tightened finish times through the graph.
    assert_eq!(dag.subtasks[0].cur_finish, Time::nanos(1334));
    assert_eq!(dag.subtasks[1].release_offset, Time::nanos(1334));
    assert_eq!(dag.subtasks[1].cur_finish, Time::nanos(1334 + 1500));
    assert_eq!(dag.subtasks[2].cur_finish, Time::nanos(1334 + 3000));
    assert_eq!(split.cur_finish, Time::nanos(1334 + 2250));
    assert_eq!(dag.subtasks[4].release_offset, Time::nanos(4334));
    assert_eq!(dag.subtasks[4].cur_finish, Time::nanos(4334 + 1334));
}

#[test]
fn baseline_path_keeps_even_partitions() {
    let platform = testbed::platform2();
    let mut db = PhaseDb::new(&platform);
    testbed::uniform_workload(&mut db, &platform, "streamcluster", 2001, 125_000_000, testbed::flat_theta());

    let dag = testbed::chain_dag("streamcluster", 2, 10_000, 2001, &db, &platform);
    let mut taskset = Taskset { dags: vec![dag] };

    let stats = decompose_taskset(&mut taskset, AlgoKind::BaselineSim, &platform, &db);
    let dag = &taskset.dags[0];

    for subtask in &dag.subtasks {
        assert_eq!((subtask.c_init, subtask.bw_init), (4, 4));
    }
    assert_eq!(dag.subtasks[0].cur_finish, Time::nanos(2000));
    assert_eq!(dag.subtasks[1].release_offset, Time::nanos(2000));
    assert_eq!(dag.subtasks[1].cur_finish, Time::nanos(4000));

    assert!((stats[0].util - 0.4).abs() < 1e-9);
    assert!((stats[0].gamma - 0.4).abs() < 1e-9);
}

#[test]
fn droppable_resource_is_the_least_impactful() {
    let platform = testbed::platform2();
    let mut wcets = WcetMatrix::new(&platform);
    for cache in 2..=8 {
        for membw in 2..=8 {
            // dropping bandwidth hurts more than dropping cache
            wcets.set(cache, membw, Time::nanos(10_000 - 100 * cache as i64 - 300 * membw as i64));
        }
    }

    let mut subtask = Subtask::new(0, "fft".to_string(), Time::nanos(100_000), 1000, wcets, &platform);
    subtask.c_init = 5;
    subtask.bw_init = 5;

    assert_eq!(select_droppable_res(&subtask, Time::nanos(50_000)), (1, 0));

    // a tight window blocks both candidates
    assert_eq!(select_droppable_res(&subtask, Time::nanos(1_000)), (0, 0));

    // at the cache minimum only bandwidth may be dropped
    subtask.c_init = 2;
    assert_eq!(select_droppable_res(&subtask, Time::nanos(50_000)), (0, 1));

    subtask.bw_init = 2;
    assert_eq!(select_droppable_res(&subtask, Time::nanos(50_000)), (0, 0));
}
