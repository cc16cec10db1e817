//! Synthetic workloads for the engine tests: uniform-rate phase tables whose
//! WCET matrices are derived from the same tables, so the accessor, the
//! preprocessor and the scheduler see one consistent model.

use crate::prelude::*;

pub fn platform2() -> Platform {
    Platform::new(2, 8, 8)
}

pub fn flat_theta() -> Theta {
    Theta { value: 1, which: 0 }
}

/// Register a single-phase workload whose rate scales linearly with the
/// partition: `rate(c, bw) = unit_rate * (c + bw)` instructions per second.
pub fn uniform_workload(
    db: &mut PhaseDb,
    platform: &Platform,
    name: &str,
    max_insn: u64,
    unit_rate: u64,
    theta: Theta,
) {
    let mut entries = Vec::new();
    for cache in Platform::MIN_PARTITION..=platform.max_cache {
        for membw in Platform::MIN_PARTITION..=platform.max_membw {
            entries.push(PhaseEntry::constant_rate(
                0,
                cache,
                membw,
                1,
                max_insn,
                unit_rate * (cache + membw) as u64,
                theta,
                platform,
            ));
        }
    }

    db.insert(name, entries).unwrap();
}

/// WCETs consistent with the phase tables: the full walk from instruction 1
/// to `max_insn` at each partition.
pub fn wcets_from_phases(
    db: &PhaseDb,
    platform: &Platform,
    name: &str,
    max_insn: u64,
) -> WcetMatrix {
    let mut wcets = WcetMatrix::new(platform);

    for cache in Platform::MIN_PARTITION..=platform.max_cache {
        for membw in Platform::MIN_PARTITION..=platform.max_membw {
            let phases = db.slice(name, cache, membw);
            let (idx, _) = find_phase(phases, 1).unwrap();
            wcets.set(cache, membw, calc_ttf(phases, 1, idx, max_insn));
        }
    }

    wcets
}

pub fn subtask(
    uid: u32,
    name: &str,
    period_ns: i64,
    max_insn: u64,
    db: &PhaseDb,
    platform: &Platform,
) -> Subtask {
    Subtask::new(
        uid,
        name.to_string(),
        Time::nanos(period_ns),
        max_insn,
        wcets_from_phases(db, platform, name, max_insn),
        platform,
    )
}

/// A single DAG made of a linear chain of `len` identical subtasks.
pub fn chain_dag(
    name: &str,
    len: usize,
    period_ns: i64,
    max_insn: u64,
    db: &PhaseDb,
    platform: &Platform,
) -> DagTask {
    let mut subtasks: Vec<Subtask> = (0..len)
        .map(|uid| subtask(uid as u32, name, period_ns, max_insn, db, platform))
        .collect();

    for at in 0..len {
        if at > 0 {
            subtasks[at].parents = vec![at - 1];
        }
        if at + 1 < len {
            subtasks[at].children = vec![at + 1];
        }
    }

    DagTask { subtasks }
}
