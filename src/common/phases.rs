//! ## Workload phase tables
//!
//! Piecewise-constant instruction-rate profiles per workload and resource
//! partition, together with the marginal-gain (Θ) tables used by the
//! resource allocator.
//!
//! ---
//! #### References:
//! 1. R. Gifford, N. Gandhi, L. T. X. Phan, and A. Haeberlen, "DNA: Dynamic
//!    resource allocation for soft real-time multicore systems," in 2021
//!    IEEE 27th Real-Time and Embedded Technology and Applications
//!    Symposium (RTAS), May 2021. doi: 10.1109/RTAS52030.2021.00024.

use crate::prelude::*;

pub mod prelude {
    pub use super::{
        Theta,
        PhaseEntry,
        PhaseDb,
        PhaseLoadError,
        find_phase,
        calc_ttf,
        calc_insn_in_range,
    };
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Marginal benefit of extra resource units at a given phase.
///
/// `which` steers the tie between the two dimensions: 0 means cache,
/// 1 means memory bandwidth.
#[derive(Clone, Copy, Default)]
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Theta {
    pub value: i64,
    pub which: i8,
}

/// One piecewise-constant phase of a workload profile, valid for the
/// instruction range `insn_start ..= insn_end` under the `(cache, membw)`
/// partition it was profiled at.
///
/// `theta_set[dc][dbw]` is the gain from granting `dc` extra cache ways and
/// `dbw` extra bandwidth slots on top of the profiled partition.
#[derive(Clone)]
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct PhaseEntry {
    pub task_id: u32,
    pub phase_idx: u32,
    pub cache: u32,
    pub membw: u32,
    pub insn_start: u64,
    pub insn_end: u64,
    /// Instructions per second.
    pub insn_rate: u64,
    pub theta_set: Vec<Vec<Theta>>,
}

/// All phase tables of a task set, keyed by workload name and partition.
///
/// Read-only after loading; the preprocessor and the scheduler take it as an
/// explicit context so that concurrently processed task sets stay decoupled.
pub struct PhaseDb {
    max_cache: u32,
    max_membw: u32,
    workloads: std::collections::HashMap<String, Vec<Vec<Vec<PhaseEntry>>>>,
}

#[derive(Debug)]
pub enum PhaseLoadError {
    IOError(std::io::Error),
    JSONError(serde_json::Error),
    MissingSlice { workload: String, cache: u32, membw: u32 },
    NotContiguous { workload: String, cache: u32, membw: u32, phase_idx: usize },
    ZeroRate { workload: String, cache: u32, membw: u32, phase_idx: usize },
    ShortTable { workload: String, cache: u32, membw: u32, covered: u64, needed: u64 },
    ThetaShape { workload: String, cache: u32, membw: u32, phase_idx: usize },
}

// =============================================================================

impl PhaseEntry {
    /// A single phase covering `insn_start ..= insn_end` at a constant rate,
    /// with the same Θ in every headroom cell. This is the coarse model used
    /// for workloads without a detailed phase profile.
    pub fn constant_rate(
        task_id: u32,
        cache: u32,
        membw: u32,
        insn_start: u64,
        insn_end: u64,
        insn_rate: u64,
        theta: Theta,
        platform: &Platform,
    ) -> Self {
        let theta_set = vec![
            vec![theta; platform.max_membw as usize];
            platform.max_cache as usize
        ];

        Self {
            task_id,
            phase_idx: 0,
            cache,
            membw,
            insn_start,
            insn_end,
            insn_rate,
            theta_set,
        }
    }
}

impl PhaseDb {
    pub fn new(platform: &Platform) -> Self {
        Self {
            max_cache: platform.max_cache,
            max_membw: platform.max_membw,
            workloads: std::collections::HashMap::new(),
        }
    }

    /// Insert the phase entries of one workload, grouping them into
    /// `(cache, membw)` slices and renumbering `phase_idx` per slice.
    pub fn insert(&mut self, workload: &str, entries: Vec<PhaseEntry>) -> Result<(), PhaseLoadError> {
        let (max_cache, max_membw) = (self.max_cache as usize, self.max_membw as usize);
        let tables = self.workloads
            .entry(workload.to_string())
            .or_insert_with(|| vec![vec![Vec::new(); max_membw]; max_cache]);

        for entry in entries {
            assert!(entry.cache >= 1 && entry.cache <= self.max_cache);
            assert!(entry.membw >= 1 && entry.membw <= self.max_membw);
            tables[entry.cache as usize - 1][entry.membw as usize - 1].push(entry);
        }

        for c_slices in tables.iter_mut() {
            for phases in c_slices.iter_mut() {
                phases.sort_by_key(|phase| phase.insn_start);
                for (idx, phase) in phases.iter_mut().enumerate() {
                    phase.phase_idx = idx as u32;
                }
            }
        }

        self.check_workload(workload)
    }

    /// Load every `{workload}.json` file in the given directory. Each file
    /// holds the flat list of phase entries for one workload.
    pub fn load_dir(dir: &std::path::Path, platform: &Platform) -> Result<Self, PhaseLoadError> {
        let mut db = Self::new(platform);

        for dirent in std::fs::read_dir(dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(workload) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let data = std::fs::read_to_string(&path)?;
            let entries: Vec<PhaseEntry> = serde_json::from_str(&data)?;
            let workload = workload.to_string();
            db.insert(&workload, entries)?;
            log::debug!("loaded phase tables for workload {workload}");
        }

        Ok(db)
    }

    /// The phase vector for `(workload, cache, membw)`.
    ///
    /// Panics when absent: the engine validates coverage up front
    /// (`validate_for`), so a miss here is corrupt state.
    pub fn slice(&self, workload: &str, cache: u32, membw: u32) -> &[PhaseEntry] {
        self.try_slice(workload, cache, membw)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_slice(&self, workload: &str, cache: u32, membw: u32) -> Result<&[PhaseEntry], PhaseLoadError> {
        let missing = || PhaseLoadError::MissingSlice {
            workload: workload.to_string(), cache, membw
        };

        let tables = self.workloads.get(workload).ok_or_else(missing)?;
        let phases = tables
            .get(cache as usize - 1)
            .and_then(|c_slices| c_slices.get(membw as usize - 1))
            .ok_or_else(missing)?;

        if phases.is_empty() {
            Err(missing())
        } else {
            Ok(phases)
        }
    }

    /// Check that every partition a job may hold has a phase slice covering
    /// at least `max_insn` instructions.
    pub fn validate_for(&self, workload: &str, max_insn: u64) -> Result<(), PhaseLoadError> {
        for cache in Platform::MIN_PARTITION..=self.max_cache {
            for membw in Platform::MIN_PARTITION..=self.max_membw {
                let phases = self.try_slice(workload, cache, membw)?;
                let covered = phases.last().unwrap().insn_end;

                if covered + 1 < max_insn {
                    return Err(PhaseLoadError::ShortTable {
                        workload: workload.to_string(),
                        cache, membw, covered, needed: max_insn,
                    });
                }
            }
        }

        Ok(())
    }

    fn check_workload(&self, workload: &str) -> Result<(), PhaseLoadError> {
        let tables = &self.workloads[workload];

        for c_slices in tables.iter() {
            for phases in c_slices.iter() {
                for (idx, phase) in phases.iter().enumerate() {
                    let fail = |err: fn(String, u32, u32, usize) -> PhaseLoadError| {
                        Err(err(workload.to_string(), phase.cache, phase.membw, idx))
                    };

                    if phase.insn_rate == 0 {
                        return fail(|w, c, bw, i| PhaseLoadError::ZeroRate {
                            workload: w, cache: c, membw: bw, phase_idx: i
                        });
                    }
                    if phase.theta_set.len() < self.max_cache as usize
                        || phase.theta_set.iter().any(|row| row.len() < self.max_membw as usize)
                    {
                        return fail(|w, c, bw, i| PhaseLoadError::ThetaShape {
                            workload: w, cache: c, membw: bw, phase_idx: i
                        });
                    }
                    if idx > 0 && phases[idx - 1].insn_end + 1 != phase.insn_start {
                        return fail(|w, c, bw, i| PhaseLoadError::NotContiguous {
                            workload: w, cache: c, membw: bw, phase_idx: i
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

// =============================================================================

/// Find the phase containing `target_insn` by binary search.
///
/// Returns `None` when the target over-runs the table; callers treat that as
/// "the job is already done".
pub fn find_phase(phases: &[PhaseEntry], target_insn: u64) -> Option<(usize, &PhaseEntry)> {
    let last = phases.last()?;
    if target_insn > last.insn_end {
        return None;
    }

    let mut left = 0;
    let mut right = phases.len();
    while left < right {
        let mid = left + (right - left) / 2;
        let phase = &phases[mid];

        if phase.insn_start <= target_insn && target_insn <= phase.insn_end {
            return Some((mid, phase));
        } else if target_insn < phase.insn_start {
            right = mid;
        } else {
            left = mid + 1;
        }
    }

    None
}

/// Time to advance from `cur_insn` (inside phase `phase_idx`) to
/// `target_insn`, walking contiguous phases.
pub fn calc_ttf(phases: &[PhaseEntry], cur_insn: u64, phase_idx: usize, target_insn: u64) -> Time {
    assert!(target_insn >= cur_insn, "instruction target behind current count");
    if cur_insn >= target_insn {
        return Time::zero();
    }

    let mut ttf = 0i64;
    let mut cur = cur_insn;
    let mut idx = phase_idx;
    loop {
        let phase = &phases[idx];
        assert!(phase.insn_rate > 0, "phase with zero instruction rate");
        debug_assert!(phase.insn_start <= cur && cur <= phase.insn_end);

        let span = phase.insn_end.min(target_insn) - cur;
        ttf += ns_for_insns(span, phase.insn_rate);

        cur = phase.insn_end + 1;
        if cur >= target_insn {
            break;
        }
        idx += 1;
        assert!(idx < phases.len(), "instruction target past the end of the phase table");
    }

    Time::nanos(ttf)
}

/// Dual of [`calc_ttf`]: how many instructions fit into `budget`, starting
/// from `cur_insn` inside phase `phase_idx`. Clamped to
/// `max_insn - cur_insn`.
pub fn calc_insn_in_range(
    phases: &[PhaseEntry],
    cur_insn: u64,
    phase_idx: usize,
    budget: Time,
    max_insn: u64,
) -> u64 {
    if cur_insn > max_insn {
        return 0;
    }

    let cap = max_insn - cur_insn;
    let mut budget = budget.as_nanos();
    let mut total = 0u64;
    let mut cur = cur_insn;
    let mut idx = phase_idx;

    loop {
        let phase = &phases[idx];
        let phase_time = calc_ttf(phases, cur, idx, phase.insn_end).as_nanos();

        if phase_time == budget {
            total += phase.insn_end - cur;
            return total.min(cap);
        } else if phase_time < budget {
            budget -= phase_time;
            total += phase.insn_end - cur;

            cur = phase.insn_end + 1;
            if cur >= max_insn {
                return total.min(cap);
            }
            idx += 1;
            assert!(idx < phases.len(), "ran past the phase table with budget left");
        } else {
            total += insns_for_ns(budget, phase.insn_rate);
            return total.min(cap);
        }
    }
}

fn ns_for_insns(insns: u64, rate_per_sec: u64) -> i64 {
    (insns as u128 * NANOS_PER_SEC).div_ceil(rate_per_sec as u128) as i64
}

fn insns_for_ns(time_ns: i64, rate_per_sec: u64) -> u64 {
    (rate_per_sec as u128 * time_ns as u128 / NANOS_PER_SEC) as u64
}

// =============================================================================

impl std::fmt::Display for PhaseLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Phase Table Error, ")?;
        match self {
            PhaseLoadError::IOError(error) =>
                write!(f, "IO: {error}")?,
            PhaseLoadError::JSONError(error) =>
                write!(f, "JSON: {error}")?,
            PhaseLoadError::MissingSlice { workload, cache, membw } =>
                write!(f, "no phase entries for ({workload}, c={cache}, bw={membw})")?,
            PhaseLoadError::NotContiguous { workload, cache, membw, phase_idx } =>
                write!(f, "({workload}, c={cache}, bw={membw}) phase {phase_idx} does not follow its predecessor")?,
            PhaseLoadError::ZeroRate { workload, cache, membw, phase_idx } =>
                write!(f, "({workload}, c={cache}, bw={membw}) phase {phase_idx} has a zero instruction rate")?,
            PhaseLoadError::ShortTable { workload, cache, membw, covered, needed } =>
                write!(f, "({workload}, c={cache}, bw={membw}) covers {covered} instructions, {needed} needed")?,
            PhaseLoadError::ThetaShape { workload, cache, membw, phase_idx } =>
                write!(f, "({workload}, c={cache}, bw={membw}) phase {phase_idx} has an undersized theta table")?,
        };

        Ok(())
    }
}

impl std::error::Error for PhaseLoadError {}

impl From<std::io::Error> for PhaseLoadError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<serde_json::Error> for PhaseLoadError {
    fn from(value: serde_json::Error) -> Self {
        Self::JSONError(value)
    }
}

// Tests -----------------------------------------------------------------------

#[cfg(test)]
fn two_phase_table() -> Vec<PhaseEntry> {
    let platform = Platform::new(2, 8, 8);
    let theta = Theta { value: 1, which: 0 };

    vec![
        // 1 insn/ns for the first thousand, then 2 insns/ns
        PhaseEntry::constant_rate(0, 2, 2, 1, 1000, 1_000_000_000, theta, &platform),
        PhaseEntry::constant_rate(0, 2, 2, 1001, 3000, 2_000_000_000, theta, &platform),
    ]
}

#[test]
fn find_phase_hit_and_miss() {
    let phases = two_phase_table();

    assert_eq!(find_phase(&phases, 1).unwrap().0, 0);
    assert_eq!(find_phase(&phases, 1000).unwrap().0, 0);
    assert_eq!(find_phase(&phases, 1001).unwrap().0, 1);
    assert_eq!(find_phase(&phases, 3000).unwrap().0, 1);
    assert!(find_phase(&phases, 3001).is_none());
}

#[test]
fn ttf_walks_phases() {
    let phases = two_phase_table();

    // 999 insns at 1/ns, then 2000 insns at 2/ns
    assert_eq!(calc_ttf(&phases, 1, 0, 3000), Time::nanos(999 + 1000));
    // partial target within the second phase
    assert_eq!(calc_ttf(&phases, 1, 0, 2001), Time::nanos(999 + 500));
    // same-phase target
    assert_eq!(calc_ttf(&phases, 500, 0, 1000), Time::nanos(500));
    assert_eq!(calc_ttf(&phases, 42, 0, 42), Time::zero());
}

#[test]
fn insn_in_range_is_the_dual() {
    let phases = two_phase_table();

    // exactly the first phase
    assert_eq!(calc_insn_in_range(&phases, 1, 0, Time::nanos(999), 3001), 999);
    // first phase and half of the second
    assert_eq!(calc_insn_in_range(&phases, 1, 0, Time::nanos(999 + 500), 3001), 999 + 1000);
    // partial first phase rounds down
    assert_eq!(calc_insn_in_range(&phases, 1, 0, Time::nanos(100), 3001), 100);
    // clamp against the job length
    assert_eq!(calc_insn_in_range(&phases, 1, 0, Time::nanos(10_000), 2001), 2000);
}

#[test]
fn db_insert_groups_and_validates() {
    let platform = Platform::new(2, 8, 8);
    let mut db = PhaseDb::new(&platform);
    let theta = Theta { value: 1, which: 0 };

    let mut entries = Vec::new();
    for cache in 2..=platform.max_cache {
        for membw in 2..=platform.max_membw {
            entries.push(PhaseEntry::constant_rate(
                0, cache, membw, 1, 5000, 1_000_000_000, theta, &platform,
            ));
        }
    }
    db.insert("canneal", entries).unwrap();

    assert!(db.validate_for("canneal", 5001).is_ok());
    assert!(matches!(
        db.validate_for("canneal", 5002),
        Err(PhaseLoadError::ShortTable { .. })
    ));
    assert!(matches!(
        db.try_slice("canneal", 1, 2),
        Err(PhaseLoadError::MissingSlice { .. })
    ));
    assert_eq!(db.slice("canneal", 3, 7).len(), 1);
}

#[test]
fn db_rejects_gapped_tables() {
    let platform = Platform::new(2, 8, 8);
    let mut db = PhaseDb::new(&platform);
    let theta = Theta { value: 1, which: 0 };

    let entries = vec![
        PhaseEntry::constant_rate(0, 2, 2, 1, 1000, 1_000_000_000, theta, &platform),
        PhaseEntry::constant_rate(0, 2, 2, 1500, 3000, 1_000_000_000, theta, &platform),
    ];

    assert!(matches!(
        db.insert("fft", entries),
        Err(PhaseLoadError::NotContiguous { .. })
    ));
}
