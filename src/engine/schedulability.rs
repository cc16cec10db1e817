use crate::prelude::*;

pub mod prelude {
    pub use super::{
        schedulable,
        baseline_schedulable,
    };
}

/// Simulation verdict: every sink job must finish by its DAG deadline.
pub fn schedulable(jobs: &JobSet) -> bool {
    jobs.jobs.iter()
        .filter(|job| job.is_sink())
        .all(|job| job.dag_deadline >= job.cur_finish)
}

/// Analytic verdict over the decomposition exports.
///
/// Schedulable iff `1/max Ω - max Γ > 0` and
/// `m >= (Σ U - max Γ) / (1/max Ω - max Γ)` (Jiang et al. 2020).
pub fn baseline_schedulable(stats: &[DecompStats], num_cpus: usize) -> bool {
    let sum_utils: f64 = stats.iter().map(|stat| stat.util).sum();
    let max_of = |field: fn(&DecompStats) -> f64| {
        stats.iter()
            .map(|stat| ordered_float::OrderedFloat(field(stat)))
            .max()
            .map(|max| *max)
            .unwrap_or(0.0)
    };
    let max_gamma = max_of(|stat| stat.gamma);
    let max_omega = max_of(|stat| stat.omega);

    let headroom = 1.0 / max_omega - max_gamma;
    headroom > 0.0 && num_cpus as f64 >= (sum_utils - max_gamma) / headroom
}

// Tests -----------------------------------------------------------------------

#[test]
fn analytic_verdict_matches_the_formula() {
    let stats = [
        DecompStats { util: 0.7, gamma: 0.5, omega: 1.25 },
        DecompStats { util: 0.6, gamma: 0.4, omega: 1.0 },
    ];

    // headroom = 1/1.25 - 0.5 = 0.3; (1.3 - 0.5) / 0.3 = 2.67
    assert!(baseline_schedulable(&stats, 3));
    assert!(!baseline_schedulable(&stats, 2));

    // a large omega kills the headroom regardless of the core count
    let cramped = [DecompStats { util: 0.1, gamma: 0.5, omega: 2.5 }];
    assert!(!baseline_schedulable(&cramped, 64));
}
