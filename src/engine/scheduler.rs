//! Segment-driven EDF with iterative resource allocation.
//!
//! The outer loop emits one segment per decision point: pick the EDF
//! sched-set, trim any over-allocated initial budgets, then hand out the
//! remaining cache/bandwidth units one at a time to whichever ready job
//! shows the highest marginal gain (Θ) over the segment, swapping jobs into
//! the sched-set when the extra resources pull their deadline below a
//! member's. Core slots are kept sticky across segments to limit migrations.
//!
//! ---
//! #### References:
//! 1. R. Gifford, N. Gandhi, L. T. X. Phan, and A. Haeberlen, "DNA: Dynamic
//!    resource allocation for soft real-time multicore systems," RTAS 2021.

use crate::prelude::*;
use super::AlgoKind;

pub mod prelude {
    pub use super::{
        SlotAlloc,
        SegmentRecord,
        build_schedule,
    };
}

/// One core slot of a segment: the job index plus the partition it holds.
#[derive(Clone)]
#[derive(Debug)]
pub struct SlotAlloc {
    pub job: usize,
    pub c: u32,
    pub bw: u32,
}

/// Core assignments and partitions over `[t, tnext)`; `None` slots idle.
#[derive(Clone)]
#[derive(Debug)]
pub struct SegmentRecord {
    pub t: Time,
    pub slots: Vec<Option<SlotAlloc>>,
}

// =============================================================================

/// Build the static schedule for one hyper-period of jobs.
///
/// Mutates the jobs as it goes; after the call every job carries its final
/// `cur_finish`, which the schedulability check reads off the sinks.
pub fn build_schedule(
    jobs: &mut JobSet,
    taskset: &Taskset,
    algo: AlgoKind,
    platform: &Platform,
    phases: &PhaseDb,
) -> Vec<SegmentRecord> {
    let mut schedule: Vec<SegmentRecord> = Vec::new();
    if jobs.is_empty() {
        return schedule;
    }

    let mut remaining = jobs.len();
    let mut t = Time::zero();
    let mut ready: Vec<usize> = jobs.by_release.iter().copied()
        .filter(|&at| jobs.jobs[at].release_offset == Time::zero())
        .collect();

    loop {
        // Snapshot deadlines and re-arm the base budgets.
        for &at in &ready {
            let job = &mut jobs.jobs[at];
            job.deadline_init = job.deadline;
            job.c = job.c_init;
            job.bw = job.bw_init;
        }

        ready.sort_by_key(|&at| jobs.jobs[at].deadline);
        let mut sched: Vec<usize> = ready.iter().copied().take(platform.num_cpus).collect();
        let mut res_sched = budget_of(&sched, &jobs.jobs);

        let mut tnext = next_decision_point(&jobs.jobs, &sched, &jobs.anchor_points, t)
            .expect("no decision point with work remaining");

        if algo != AlgoKind::BaselineSim {
            deallocate_excess(jobs, &sched, &mut res_sched, t, tnext, taskset, platform, phases);

            tnext = next_decision_point(&jobs.jobs, &sched, &jobs.anchor_points, t)
                .expect("no decision point with work remaining");
            refresh_finish_times(jobs, &ready, t, tnext, taskset, phases);

            loop {
                let Some((chosen, dc, dbw)) = allocate_resource(
                    &jobs.jobs, &ready, &sched, res_sched, tnext - t, taskset, platform, phases,
                ) else {
                    break;
                };
                log::trace!(
                    "grant ({dc}, {dbw}) to job {} at t={t}", jobs.jobs[chosen].id,
                );

                {
                    let job = &mut jobs.jobs[chosen];
                    job.c += dc;
                    job.bw += dbw;
                }
                let new_finish = task_finish_time(&jobs.jobs[chosen], t, tnext, taskset, phases);
                {
                    let job = &mut jobs.jobs[chosen];
                    if new_finish < job.cur_finish {
                        job.deadline = job.deadline - (job.cur_finish - new_finish);
                    }
                    job.cur_finish = new_finish;
                }

                // An outsider with a now-earlier deadline may displace the
                // weakest member, budget permitting.
                if !sched.contains(&chosen) {
                    let weakest = *sched.last().unwrap();
                    let swapped_c = res_sched.c - jobs.jobs[weakest].c + jobs.jobs[chosen].c;
                    let swapped_bw = res_sched.bw - jobs.jobs[weakest].bw + jobs.jobs[chosen].bw;

                    if jobs.jobs[chosen].deadline < jobs.jobs[weakest].deadline
                        && swapped_c <= platform.max_cache
                        && swapped_bw <= platform.max_membw
                    {
                        sched.retain(|&at| at != weakest);
                        sched.push(chosen);
                        sched.sort_by_key(|&at| jobs.jobs[at].deadline);
                    }
                }

                if sched.contains(&chosen) {
                    res_sched = budget_of(&sched, &jobs.jobs);
                    tnext = next_decision_point(&jobs.jobs, &sched, &jobs.anchor_points, t)
                        .expect("no decision point with work remaining");
                    refresh_finish_times(jobs, &ready, t, tnext, taskset, phases);
                }
            }

            if algo == AlgoKind::Rasco {
                assert_eq!(
                    res_sched, platform.full_budget(),
                    "resource budget not fully allocated at t={t}",
                );
            }
        }

        // Losers fall back to their base budget and an optimistic finish.
        for ready_at in 0..ready.len() {
            let at = ready[ready_at];
            if sched.contains(&at) {
                continue;
            }

            {
                let job = &mut jobs.jobs[at];
                job.c = job.c_init;
                job.bw = job.bw_init;
                job.deadline = job.deadline_init;
            }
            let finish = match algo {
                AlgoKind::BaselineSim => {
                    let job = &jobs.jobs[at];
                    tnext + even_rate_eta(job)
                },
                _ => task_finish_time(&jobs.jobs[at], tnext, Time::MAX, taskset, phases),
            };
            jobs.jobs[at].cur_finish = finish;
        }

        // Advance the winners over the segment.
        for sched_at in 0..sched.len() {
            let at = sched[sched_at];

            if jobs.jobs[at].cur_finish <= tnext {
                finish_job(jobs, at, tnext, algo, &mut ready, &mut remaining, taskset, phases);
                continue;
            }

            let retired = match algo {
                AlgoKind::BaselineSim => {
                    let job = &jobs.jobs[at];
                    let by_rate = ((tnext - t).as_nanos() as f64 * job.even_rate) as u64;
                    by_rate.min(job.max_insn - job.cur_insn)
                },
                _ => {
                    let job = &jobs.jobs[at];
                    let table = phases.slice(workload_of(taskset, job), job.c, job.bw);
                    let (idx, _) = find_phase(table, job.cur_insn)
                        .expect("running job over-ran its phase table");
                    calc_insn_in_range(table, job.cur_insn, idx, tnext - t, job.max_insn)
                },
            };

            jobs.jobs[at].cur_insn += retired;
            // rounding between the time and instruction walks can land the
            // job on its last instruction within the segment
            if jobs.jobs[at].cur_insn >= jobs.jobs[at].max_insn {
                finish_job(jobs, at, tnext, algo, &mut ready, &mut remaining, taskset, phases);
            }
        }

        // Keep jobs on the core that last ran them (or ran a parent).
        let slots = match schedule.last() {
            None => {
                let mut slots: Vec<Option<usize>> = sched.iter().copied().map(Some).collect();
                slots.resize(platform.num_cpus, None);
                slots
            },
            Some(prev) => reorder_jobs(prev, &sched, &jobs.jobs, platform.num_cpus),
        };

        debug_assert!(schedule.last().is_none_or(|prev| prev.t < t));
        debug_assert!(slots.iter().flatten().all(|&at| {
            let job = &jobs.jobs[at];
            (Platform::MIN_PARTITION..=platform.max_cache).contains(&job.c)
                && (Platform::MIN_PARTITION..=platform.max_membw).contains(&job.bw)
        }));

        schedule.push(SegmentRecord {
            t,
            slots: slots.into_iter()
                .map(|slot| slot.map(|at| SlotAlloc {
                    job: at,
                    c: jobs.jobs[at].c,
                    bw: jobs.jobs[at].bw,
                }))
                .collect(),
        });

        if remaining == 0 {
            break;
        }

        // Advance to the next decision point; an empty ready set skips
        // straight to the next DAG release.
        if ready.is_empty() {
            t = jobs.anchor_points
                .range((std::ops::Bound::Excluded(t), std::ops::Bound::Unbounded))
                .next()
                .copied()
                .expect("idle with no future release but work remaining");
        } else {
            t = tnext;
        }

        for &at in &jobs.by_release {
            let job = &jobs.jobs[at];
            if job.release_offset == t && job.is_root() {
                ready.push(at);
            }
        }
    }

    schedule
}

// =============================================================================

fn workload_of<'a>(taskset: &'a Taskset, job: &Job) -> &'a str {
    &taskset.dags[job.dag_idx].subtasks[job.sub_idx].workload
}

fn wcets_of<'a>(taskset: &'a Taskset, job: &Job) -> &'a WcetMatrix {
    &taskset.dags[job.dag_idx].subtasks[job.sub_idx].wcets
}

fn budget_of(set: &[usize], jobs: &[Job]) -> ResVec {
    ResVec {
        c: set.iter().map(|&at| jobs[at].c).sum(),
        bw: set.iter().map(|&at| jobs[at].bw).sum(),
    }
}

fn even_rate_eta(job: &Job) -> Time {
    Time::nanos(((job.max_insn - job.cur_insn) as f64 / job.even_rate) as i64)
}

/// Earliest of the next DAG release and the next sched-set completion.
/// `None` only when no release lies ahead and the set is empty, which the
/// scheduler treats as "all work done".
pub fn next_decision_point(
    jobs: &[Job],
    set: &[usize],
    anchor_points: &std::collections::BTreeSet<Time>,
    t: Time,
) -> Option<Time> {
    let next_anchor = anchor_points
        .range((std::ops::Bound::Excluded(t), std::ops::Bound::Unbounded))
        .next()
        .copied();
    let next_finish = set.iter().map(|&at| jobs[at].cur_finish).min();

    match (next_anchor, next_finish) {
        (Some(anchor), Some(finish)) => Some(anchor.min(finish)),
        (anchor, finish) => anchor.or(finish),
    }
}

/// Finish time of a job running `[seg_start, seg_end)` at its current
/// partition, falling back to the base budget after the segment ends.
pub fn task_finish_time(
    job: &Job,
    seg_start: Time,
    seg_end: Time,
    taskset: &Taskset,
    phases: &PhaseDb,
) -> Time {
    if job.cur_insn >= job.max_insn {
        return seg_end;
    }

    let workload = workload_of(taskset, job);
    let table = phases.slice(workload, job.c, job.bw);
    let (idx, _) = find_phase(table, job.cur_insn)
        .expect("incomplete job over-ran its phase table");

    let finish = seg_start + calc_ttf(table, job.cur_insn, idx, job.max_insn);
    if finish <= seg_end {
        return finish;
    }

    let retired = calc_insn_in_range(table, job.cur_insn, idx, seg_end - seg_start, job.max_insn);
    let reached = job.cur_insn + retired;
    if reached >= job.max_insn {
        return seg_end;
    }

    let base = phases.slice(workload, job.c_init, job.bw_init);
    let (idx, _) = find_phase(base, reached)
        .expect("incomplete job over-ran its phase table");
    seg_end + calc_ttf(base, reached, idx, job.max_insn)
}

fn refresh_finish_times(
    jobs: &mut JobSet,
    ready: &[usize],
    t: Time,
    tnext: Time,
    taskset: &Taskset,
    phases: &PhaseDb,
) {
    for &at in ready {
        jobs.jobs[at].cur_finish = task_finish_time(&jobs.jobs[at], t, tnext, taskset, phases);
    }
}

/// Trim initial budgets that oversubscribe the platform, always taking from
/// the job with the most slack. The single job whose completion defines
/// `tnext` never shrinks, otherwise `tnext` could drift and the outer loop
/// would stall.
pub fn deallocate_excess(
    jobs: &mut JobSet,
    sched: &[usize],
    res_sched: &mut ResVec,
    t: Time,
    tnext: Time,
    taskset: &Taskset,
    platform: &Platform,
    phases: &PhaseDb,
) {
    let definer = sched.iter().copied()
        .reduce(|best, at| {
            if jobs.jobs[at].cur_finish < jobs.jobs[best].cur_finish { at } else { best }
        })
        .expect("empty sched set");
    assert!(
        jobs.jobs[definer].cur_finish >= tnext,
        "job {} finishes before tnext", jobs.jobs[definer].id,
    );
    let definer = (jobs.jobs[definer].cur_finish == tnext).then_some(definer);

    while res_sched.c > platform.max_cache || res_sched.bw > platform.max_membw {
        let mut order = sched.to_vec();
        order.sort_by(|&a, &b| {
            let slack = |at: usize| jobs.jobs[at].dag_deadline - jobs.jobs[at].cur_finish;
            slack(b).cmp(&slack(a))
        });

        let mut chosen = None;
        for at in order {
            if Some(at) == definer {
                continue;
            }

            let job = &jobs.jobs[at];
            if res_sched.c > platform.max_cache && res_sched.bw > platform.max_membw {
                let (dc, dbw) = select_least_impactful_res(job, wcets_of(taskset, job));
                if dc == 0 && dbw == 0 {
                    continue;
                }
                let job = &mut jobs.jobs[at];
                job.c -= dc;
                job.bw -= dbw;
                chosen = Some(at);
                break;
            } else if job.c > Platform::MIN_PARTITION && res_sched.c > platform.max_cache {
                jobs.jobs[at].c -= 1;
                chosen = Some(at);
                break;
            } else if job.bw > Platform::MIN_PARTITION && res_sched.bw > platform.max_membw {
                jobs.jobs[at].bw -= 1;
                chosen = Some(at);
                break;
            }
        }

        let chosen = chosen.expect("oversubscribed budget cannot be trimmed");
        *res_sched = budget_of(sched, &jobs.jobs);
        jobs.jobs[chosen].cur_finish =
            task_finish_time(&jobs.jobs[chosen], t, tnext, taskset, phases);
    }
}

/// The resource whose removal grows the job's WCET the least; a dimension
/// already at the minimum forces the other, both at minimum yields `(0, 0)`.
pub fn select_least_impactful_res(job: &Job, wcets: &WcetMatrix) -> (u32, u32) {
    let min = Platform::MIN_PARTITION;

    if job.c <= min && job.bw <= min {
        return (0, 0);
    }
    if job.c <= min {
        return (0, 1);
    }
    if job.bw <= min {
        return (1, 0);
    }

    if wcets.get(job.c - 1, job.bw) <= wcets.get(job.c, job.bw - 1) {
        (1, 0)
    } else {
        (0, 1)
    }
}

/// Pick the next single-unit grant: the ready job with the highest average Θ
/// over the instructions it can retire this segment, reading each phase's
/// Θ at the currently available headroom. Returns the job index and the
/// granted `(dc, dbw)`, or `None` once nothing feasible remains.
#[allow(clippy::too_many_arguments)]
pub fn allocate_resource(
    jobs: &[Job],
    ready: &[usize],
    sched: &[usize],
    res_sched: ResVec,
    seg_len: Time,
    taskset: &Taskset,
    platform: &Platform,
    phases: &PhaseDb,
) -> Option<(usize, u32, u32)> {
    let rem_c = platform.max_cache.checked_sub(res_sched.c)
        .expect("allocated cache exceeds the platform");
    let rem_bw = platform.max_membw.checked_sub(res_sched.bw)
        .expect("allocated bandwidth exceeds the platform");
    if rem_c == 0 && rem_bw == 0 {
        return None;
    }
    assert!(seg_len > Time::zero());

    // Members draw from the shared remainder; outsiders are only bounded by
    // their own gap, since they can only enter through a swap.
    let headroom = |at: usize| {
        let job = &jobs[at];
        if sched.contains(&at) {
            ((platform.max_cache - job.c).min(rem_c), (platform.max_membw - job.bw).min(rem_bw))
        } else {
            (platform.max_cache - job.c, platform.max_membw - job.bw)
        }
    };

    let mut best_theta = -1.0f64;
    let mut picked = None;

    for &at in ready {
        let job = &jobs[at];
        if job.c == platform.max_cache && job.bw == platform.max_membw {
            continue;
        }
        if job.c == platform.max_cache && rem_bw == 0 {
            continue;
        }
        if job.bw == platform.max_membw && rem_c == 0 {
            continue;
        }

        let workload = workload_of(taskset, job);
        let table = phases.slice(workload, job.c, job.bw);
        let (start_idx, _) = find_phase(table, job.cur_insn)
            .expect("ready job over-ran its phase table");

        let span = calc_insn_in_range(table, job.cur_insn, start_idx, seg_len, job.max_insn)
            .min(job.max_insn - job.cur_insn);
        let target = job.cur_insn + span;
        if target == job.cur_insn {
            continue;
        }

        let (avail_c, avail_bw) = headroom(at);

        let mut total: i64 = 0;
        let mut cache_insns: u64 = 0;
        let mut membw_insns: u64 = 0;
        let mut insn = job.cur_insn;
        let mut idx = start_idx;
        loop {
            let phase = &table[idx];
            if phase.insn_start >= target {
                break;
            }

            let theta = phase.theta_set[avail_c as usize][avail_bw as usize];
            assert!(
                theta.value != 0,
                "zero theta at headroom ({avail_c}, {avail_bw}) for {workload}",
            );

            let phase_insns = if phase.insn_end > target {
                target - phase.insn_start
            } else {
                phase.insn_end - insn
            };
            assert!(phase_insns > 0);

            if theta.which == 1 {
                membw_insns += phase_insns;
            } else {
                cache_insns += phase_insns;
            }
            total += theta.value * phase_insns as i64;

            if phase.insn_end >= target {
                break;
            }
            idx += 1;
            if idx >= table.len() {
                break;
            }
            insn = table[idx].insn_start;
            if insn >= job.max_insn {
                break;
            }
        }

        // A raw sum of 4 is the all-resources-at-max sentinel.
        let avg_theta = if total == 4 {
            1.0
        } else {
            total as f64 / (target - job.cur_insn) as f64
        };
        assert!(avg_theta >= 0.0);

        if avg_theta > best_theta {
            best_theta = avg_theta;
            picked = Some(if membw_insns > cache_insns {
                (at, 0, 1)
            } else {
                (at, 1, 0)
            });
        }
    }

    if best_theta == 1.0 {
        // Every candidate stays in its phase whatever it gets; level the
        // partitions instead: smallest total first, topping up its smaller
        // dimension, within the feasible headroom.
        let mut order: Vec<usize> = ready.iter().copied()
            .filter(|&at| {
                !(jobs[at].c == platform.max_cache && jobs[at].bw == platform.max_membw)
            })
            .collect();
        order.sort_by_key(|&at| jobs[at].c + jobs[at].bw);

        for at in order {
            let job = &jobs[at];
            let (avail_c, avail_bw) = headroom(at);

            if job.c <= job.bw && avail_c > 0 {
                return Some((at, 1, 0));
            }
            if job.bw <= job.c && avail_bw > 0 {
                return Some((at, 0, 1));
            }
            if avail_c > 0 {
                return Some((at, 1, 0));
            }
            if avail_bw > 0 {
                return Some((at, 0, 1));
            }
        }

        return None;
    }

    picked
}

fn finish_job(
    jobs: &mut JobSet,
    at: usize,
    tnext: Time,
    algo: AlgoKind,
    ready: &mut Vec<usize>,
    remaining: &mut usize,
    taskset: &Taskset,
    phases: &PhaseDb,
) {
    {
        let job = &mut jobs.jobs[at];
        job.cur_finish = tnext;
        job.complete = true;
        job.cur_insn = job.max_insn;
    }
    *remaining -= 1;
    ready.retain(|&other| other != at);
    log::debug!("job {} finished at t={tnext}", jobs.jobs[at].id);

    // Successors whose parents have all completed release right here.
    let children = jobs.jobs[at].children.clone();
    for child in children {
        if !jobs.jobs[child].parents.iter().all(|&parent| jobs.jobs[parent].complete) {
            continue;
        }

        jobs.jobs[child].release_offset = tnext;
        let finish = match algo {
            AlgoKind::Rasco => {
                let job = &jobs.jobs[child];
                assert!(
                    job.c == job.c_init && job.bw == job.bw_init,
                    "released job {} is not at its base budget", job.id,
                );
                task_finish_time(job, tnext, Time::MAX, taskset, phases)
            },
            _ => tnext + even_rate_eta(&jobs.jobs[child]),
        };
        jobs.jobs[child].cur_finish = finish;
        ready.push(child);
    }
}

/// Map the new sched-set onto core slots: a job keeps the core it ran on in
/// the previous segment, else takes the core a parent ran on, else any free
/// slot.
fn reorder_jobs(
    prev: &SegmentRecord,
    sched: &[usize],
    jobs: &[Job],
    num_cpus: usize,
) -> Vec<Option<usize>> {
    let prev_jobs: Vec<Option<usize>> = prev.slots.iter()
        .map(|slot| slot.as_ref().map(|alloc| alloc.job))
        .collect();

    let mut slots: Vec<Option<usize>> = vec![None; num_cpus];
    let mut unplaced = Vec::new();

    for &at in sched {
        let same_core = prev_jobs.iter().position(|&prev_at| prev_at == Some(at));
        if let Some(core) = same_core {
            if slots[core].is_none() {
                slots[core] = Some(at);
                continue;
            }
        }

        let parent_core = prev_jobs.iter().enumerate().position(|(core, &prev_at)| {
            slots[core].is_none()
                && prev_at.is_some_and(|prev_at| jobs[at].parents.contains(&prev_at))
        });
        match parent_core {
            Some(core) => slots[core] = Some(at),
            None => unplaced.push(at),
        }
    }

    for at in unplaced {
        if let Some(slot) = slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(at);
        }
    }

    debug_assert_eq!(slots.iter().flatten().count(), sched.len());
    slots
}

// Tests -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testbed;

    /// Single-phase workload at `unit * (c + bw)` instructions per second,
    /// with the WCET matrix derived from the same table.
    fn setup(max_insn: u64, unit: u64) -> (Platform, PhaseDb) {
        let platform = testbed::platform2();
        let mut db = PhaseDb::new(&platform);
        testbed::uniform_workload(&mut db, &platform, "streamcluster", max_insn, unit, testbed::flat_theta());
        (platform, db)
    }

    fn run_rasco(
        taskset: &mut Taskset,
        platform: &Platform,
        db: &PhaseDb,
    ) -> (JobSet, Vec<SegmentRecord>) {
        decompose_taskset(taskset, AlgoKind::Rasco, platform, db);
        let mut jobs = expand_jobs(taskset);
        let schedule = build_schedule(&mut jobs, taskset, AlgoKind::Rasco, platform, db);
        (jobs, schedule)
    }

    fn assert_invariants(
        jobs: &JobSet,
        schedule: &[SegmentRecord],
        platform: &Platform,
        full_budget: bool,
    ) {
        // segment starts strictly increase
        for pair in schedule.windows(2) {
            assert!(pair[0].t < pair[1].t);
        }

        for segment in schedule {
            let mut c_total = 0;
            let mut bw_total = 0;
            for slot in segment.slots.iter().flatten() {
                assert!((Platform::MIN_PARTITION..=platform.max_cache).contains(&slot.c));
                assert!((Platform::MIN_PARTITION..=platform.max_membw).contains(&slot.bw));
                c_total += slot.c;
                bw_total += slot.bw;

                // no job runs before its release
                assert!(segment.t >= jobs.jobs[slot.job].anchor_point);
            }
            if full_budget {
                assert_eq!((c_total, bw_total), (platform.max_cache, platform.max_membw));
            }
        }

        // every job shows up in some segment
        let scheduled: std::collections::HashSet<usize> = schedule.iter()
            .flat_map(|segment| segment.slots.iter().flatten().map(|slot| slot.job))
            .collect();
        assert_eq!(scheduled.len(), jobs.len());
    }

    #[test]
    fn chain_schedules_in_two_segments() {
        // wcet(4,4) = 2000 ns for a 2001-instruction job
        let (platform, db) = setup(2001, 125_000_000);
        let dag = testbed::chain_dag("streamcluster", 2, 10_000, 2001, &db, &platform);
        let mut taskset = Taskset { dags: vec![dag] };

        let (jobs, schedule) = run_rasco(&mut taskset, &platform, &db);

        assert_eq!(jobs.hyper_period, Time::nanos(10_000));
        assert_eq!(schedule.len(), 2);
        assert_invariants(&jobs, &schedule, &platform, true);

        // the lone runner soaks up the whole budget and finishes at
        // 2000 / 2 = 1000 ns
        let head = schedule[0].slots[0].as_ref().unwrap();
        assert_eq!(jobs.jobs[head.job].id.to_string(), "0_0");
        assert_eq!((head.c, head.bw), (8, 8));
        assert!(schedule[0].slots[1].is_none());
        assert_eq!(schedule[1].t, Time::nanos(1000));

        // the successor inherits its parent's core
        let tail = schedule[1].slots[0].as_ref().unwrap();
        assert_eq!(jobs.jobs[tail.job].id.to_string(), "1_0");

        // both jobs done well before 4000 ns
        assert!(jobs.jobs.iter().all(|job| job.complete));
        assert!(jobs.jobs.iter().all(|job| job.cur_finish <= Time::nanos(4000)));
        assert!(schedulable(&jobs));
    }

    #[test]
    fn oversubscribed_taskset_misses_a_sink() {
        // three identical 9000-ns jobs on two cores, period 12000
        let (platform, db) = setup(9001, 125_000_000);
        let mut dags = Vec::new();
        for uid in 0..3 {
            let mut dag = testbed::chain_dag("streamcluster", 1, 12_000, 9001, &db, &platform);
            dag.subtasks[0].uid = uid;
            dags.push(dag);
        }
        let mut taskset = Taskset { dags };

        let (jobs, schedule) = run_rasco(&mut taskset, &platform, &db);

        assert_invariants(&jobs, &schedule, &platform, true);
        assert!(jobs.jobs.iter().all(|job| job.complete));

        // aggregate service is 2 insns/ns, so 27000 instructions cannot make
        // the 12000 ns deadline
        assert!(!schedulable(&jobs));
        let worst = jobs.jobs.iter().map(|job| job.cur_finish).max().unwrap();
        assert!(worst > Time::nanos(12_000));
    }

    #[test]
    fn coprime_dags_cover_every_release() {
        let (platform, db) = setup(4, 400_000_000);
        let mut dag_a = testbed::chain_dag("streamcluster", 1, 6, 4, &db, &platform);
        let mut dag_b = testbed::chain_dag("streamcluster", 1, 10, 4, &db, &platform);
        dag_a.subtasks[0].uid = 0;
        dag_b.subtasks[0].uid = 1;
        let mut taskset = Taskset { dags: vec![dag_a, dag_b] };

        let (jobs, schedule) = run_rasco(&mut taskset, &platform, &db);

        assert_eq!(jobs.len(), 8);
        let anchors: Vec<i64> = jobs.anchor_points.iter().map(Time::as_nanos).collect();
        assert_eq!(anchors, vec![0, 6, 10, 12, 18, 20, 24]);

        assert_invariants(&jobs, &schedule, &platform, true);
        assert!(schedulable(&jobs));
    }

    #[test]
    fn trimming_spares_the_job_defining_tnext() {
        let (platform, mut db) = setup(1201, 100_000_000);
        testbed::uniform_workload(&mut db, &platform, "canneal", 1801, 100_000_000, testbed::flat_theta());

        let mut fast = testbed::chain_dag("streamcluster", 1, 20_000, 1201, &db, &platform);
        let mut slow = testbed::chain_dag("canneal", 1, 20_000, 1801, &db, &platform);
        fast.subtasks[0].uid = 0;
        slow.subtasks[0].uid = 1;
        for dag in [&mut fast, &mut slow] {
            dag.subtasks[0].c_init = 6;
            dag.subtasks[0].bw_init = 6;
        }
        let taskset = Taskset { dags: vec![fast, slow] };
        let mut jobs = expand_jobs(&taskset);

        // both at (6, 6): (12, 12) oversubscribes the (8, 8) platform
        for job in &mut jobs.jobs {
            job.c = 6;
            job.bw = 6;
        }
        jobs.jobs[0].cur_finish = Time::nanos(1000);
        jobs.jobs[1].cur_finish = Time::nanos(1500);

        let sched = vec![0, 1];
        let mut res_sched = budget_of(&sched, &jobs.jobs);
        let tnext = Time::nanos(1000);

        deallocate_excess(
            &mut jobs, &sched, &mut res_sched, Time::zero(), tnext,
            &taskset, &platform, &db,
        );

        assert_eq!(res_sched, ResVec { c: 8, bw: 8 });
        // the tnext-defining job kept its whole partition
        assert_eq!((jobs.jobs[0].c, jobs.jobs[0].bw), (6, 6));
        assert_eq!((jobs.jobs[1].c, jobs.jobs[1].bw), (2, 2));
        assert_eq!(jobs.jobs[0].cur_finish, Time::nanos(1000));
    }

    #[test]
    fn trimming_terminates_on_tied_slack() {
        let platform = Platform::new(3, 12, 12);
        let mut db = PhaseDb::new(&platform);
        testbed::uniform_workload(&mut db, &platform, "streamcluster", 1201, 100_000_000, testbed::flat_theta());

        let mut dags = Vec::new();
        for uid in 0..3 {
            let mut dag = testbed::chain_dag("streamcluster", 1, 30_000, 1201, &db, &platform);
            dag.subtasks[0].uid = uid;
            dag.subtasks[0].c_init = 8;
            dag.subtasks[0].bw_init = 8;
            dags.push(dag);
        }
        let taskset = Taskset { dags };
        let mut jobs = expand_jobs(&taskset);

        for job in &mut jobs.jobs {
            job.c = 8;
            job.bw = 8;
            job.cur_finish = Time::nanos(2000);
        }
        // all three tie on slack and on finish; the first defines tnext
        let sched = vec![0, 1, 2];
        let mut res_sched = budget_of(&sched, &jobs.jobs);

        deallocate_excess(
            &mut jobs, &sched, &mut res_sched, Time::zero(), Time::nanos(2000),
            &taskset, &platform, &db,
        );

        assert_eq!(res_sched, ResVec { c: 12, bw: 12 });
        assert_eq!((jobs.jobs[0].c, jobs.jobs[0].bw), (8, 8));
    }

    #[test]
    fn decision_point_is_the_earliest_event() {
        let (platform, db) = setup(1201, 100_000_000);
        let dag = testbed::chain_dag("streamcluster", 1, 100, 1201, &db, &platform);
        let taskset = Taskset { dags: vec![dag] };
        let mut jobs = expand_jobs(&taskset);
        jobs.jobs[0].cur_finish = Time::nanos(7);

        let anchors: std::collections::BTreeSet<Time> =
            [Time::nanos(5), Time::nanos(10)].into_iter().collect();

        let set = vec![0];
        assert_eq!(
            next_decision_point(&jobs.jobs, &set, &anchors, Time::zero()),
            Some(Time::nanos(5)),
        );
        assert_eq!(
            next_decision_point(&jobs.jobs, &set, &anchors, Time::nanos(6)),
            Some(Time::nanos(7)),
        );
        assert_eq!(
            next_decision_point(&jobs.jobs, &[], &anchors, Time::nanos(10)),
            None,
        );
    }

    #[test]
    fn baseline_sim_keeps_even_partitions() {
        let (platform, db) = setup(2001, 125_000_000);
        let dag = testbed::chain_dag("streamcluster", 2, 10_000, 2001, &db, &platform);
        let mut taskset = Taskset { dags: vec![dag] };

        decompose_taskset(&mut taskset, AlgoKind::BaselineSim, &platform, &db);
        let mut jobs = expand_jobs(&taskset);
        let schedule = build_schedule(&mut jobs, &taskset, AlgoKind::BaselineSim, &platform, &db);

        assert_invariants(&jobs, &schedule, &platform, false);
        for segment in &schedule {
            for slot in segment.slots.iter().flatten() {
                assert_eq!((slot.c, slot.bw), (4, 4));
            }
        }
        // 2000 ns for the head; the tail's completion lands one tick early
        // because the even-rate estimate truncates
        assert_eq!(jobs.jobs[0].cur_finish, Time::nanos(2000));
        assert_eq!(jobs.jobs[1].cur_finish, Time::nanos(3999));
        assert!(schedulable(&jobs));
    }
}
