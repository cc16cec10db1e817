//! Fan-out of `(utilization, index)` task sets over a worker pool.
//!
//! Workers share the read-only phase tables; everything mutable (profile
//! cache, task set, jobs) is per worker. The pool fails fast: the first
//! task-set error stops new work from being claimed, already running task
//! sets finish, and the driver exits non-zero.

use crate::prelude::*;
use rasco_engine::prelude::*;

use anyhow::Context as _;

pub fn run(args: &Args) -> anyhow::Result<()> {
    let algo = AlgoKind::from_code(args.algo_type)
        .with_context(|| format!("unknown algo_type {} (expected 0, 1 or 2)", args.algo_type))?;
    let platform = Platform::new(
        args.platform.num_cpus,
        args.platform.max_cache,
        args.platform.max_membw,
    );

    let phases = PhaseDb::load_dir(&args.data.phase_dir, &platform)
        .with_context(|| format!("loading phase tables from {}", args.data.phase_dir.display()))?;

    let pairs = taskset_pairs(args.min_util, args.max_util, args.max_idx);

    if args.num_threads > 1 {
        run_pool(args, algo, &platform, &phases, &pairs)
    } else {
        for &(util, idx) in &pairs {
            run_taskset(args, algo, &platform, &phases, util, idx)?;
        }
        Ok(())
    }
}

/// Utilizations from `min_util` to `max_util` inclusive in `min_util` steps
/// (rounded to one decimal), crossed with the task-set indices.
fn taskset_pairs(min_util: f64, max_util: f64, max_idx: usize) -> Vec<(f64, usize)> {
    let mut pairs = Vec::new();

    let mut step = 1;
    loop {
        let util = (min_util * step as f64 * 10.0).round() / 10.0;
        if util > max_util + 1e-9 {
            break;
        }
        for idx in 0..max_idx {
            pairs.push((util, idx));
        }
        step += 1;
    }

    pairs
}

fn run_pool(
    args: &Args,
    algo: AlgoKind,
    platform: &Platform,
    phases: &PhaseDb,
    pairs: &[(f64, usize)],
) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let failures = std::sync::Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..args.num_threads {
            scope.spawn(|| {
                while !abort.load(Ordering::Relaxed) {
                    let at = next.fetch_add(1, Ordering::Relaxed);
                    let Some(&(util, idx)) = pairs.get(at) else {
                        break;
                    };

                    if let Err(err) = run_taskset(args, algo, platform, phases, util, idx) {
                        abort.store(true, Ordering::Relaxed);
                        failures.lock().unwrap().push(err);
                        break;
                    }
                }
            });
        }
    });

    match failures.into_inner().unwrap().pop() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn run_taskset(
    args: &Args,
    algo: AlgoKind,
    platform: &Platform,
    phases: &PhaseDb,
    util: f64,
    idx: usize,
) -> anyhow::Result<()> {
    log::info!("running task set idx {idx} at utilization {util:.1}");

    let mut profiles = ProfileStore::new(&args.data.profile_dir, *platform);
    let (mut taskset, util_sum) =
        load_taskset(&args.taskset_path, util, idx, platform, &mut profiles)
            .with_context(|| format!("loading task set u={util:.1} idx={idx}"))?;

    let num_taskgraphs = taskset.dags.len();
    let num_tasks = taskset.num_subtasks();

    let started = std::time::Instant::now();
    let outcome = rasco_engine::engine::run(&mut taskset, algo, platform, phases)
        .with_context(|| format!("scheduling task set u={util:.1} idx={idx}"))?;
    let runtime_secs = started.elapsed().as_secs_f64();

    let verdict = match algo {
        AlgoKind::BaselineTest => baseline_schedulable(&outcome.stats, platform.num_cpus),
        _ => schedulable(&outcome.jobs),
    };
    log::info!(
        "task set idx {idx} u={util:.1} (actual {util_sum:.2}): schedulable={verdict} in {runtime_secs:.3}s",
    );

    let dir = args.data.output_root.join(algo.output_dir());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("out_{util:.1}_{idx}.txt"));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut out = std::io::BufWriter::new(file);

    let header = ResultHeader {
        idx,
        util,
        schedulable: verdict,
        runtime_secs,
        num_taskgraphs,
        num_tasks,
    };
    write_result(&mut out, &header, &outcome.jobs, &taskset, outcome.schedule.as_deref())
        .with_context(|| format!("writing {}", path.display()))?;

    Ok(())
}

// Tests -----------------------------------------------------------------------

#[test]
fn utilization_sweep_is_inclusive_and_rounded() {
    let pairs = taskset_pairs(0.2, 0.6, 2);

    let utils: Vec<f64> = pairs.iter().map(|&(util, _)| util).collect();
    assert_eq!(utils, vec![0.2, 0.2, 0.4, 0.4, 0.6, 0.6]);

    // 0.1 * 3 = 0.30000000000000004 must still round onto the grid
    let pairs = taskset_pairs(0.1, 0.3, 1);
    let utils: Vec<f64> = pairs.iter().map(|&(util, _)| util).collect();
    assert_eq!(utils, vec![0.1, 0.2, 0.3]);
}
