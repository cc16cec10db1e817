const DEFAULT_AFTER_HELP: &str = "Refer to the crate's documentation for further help";

pub mod prelude {
    pub use super::Args;
}

#[derive(clap::Parser, Debug)]
#[command(about, after_help = DEFAULT_AFTER_HELP)]
pub struct Args {
    /// Root of the data-multi-m{cpus}-u{util} task-set directories
    pub taskset_path: std::path::PathBuf,

    /// Number of task sets per utilization step
    pub max_idx: usize,

    /// Lowest utilization; also the sweep step size
    pub min_util: f64,

    /// Highest utilization (inclusive)
    pub max_util: f64,

    /// Worker threads for the (utilization, index) fan-out
    pub num_threads: usize,

    /// Algorithm: 0 = baseline-test, 1 = main algorithm, 2 = baseline-sim
    pub algo_type: u8,

    #[command(flatten, next_help_heading = "Platform Specification")]
    pub platform: PlatformArgs,

    #[command(flatten, next_help_heading = "Workload Data")]
    pub data: DataArgs,
}

#[derive(clap::Args, Debug)]
pub struct PlatformArgs {
    /// Number of CPU cores
    #[arg(long = "cpus", value_name = "# CPUs", default_value_t = 4)]
    pub num_cpus: usize,

    /// Partitionable last-level cache ways
    #[arg(long = "cache-ways", value_name = "WAYS", default_value_t = 20)]
    pub max_cache: u32,

    /// Partitionable memory bandwidth slots
    #[arg(long = "membw-slots", value_name = "SLOTS", default_value_t = 20)]
    pub max_membw: u32,
}

#[derive(clap::Args, Debug)]
pub struct DataArgs {
    /// WCET profile directory
    #[arg(long = "profiles", value_name = "DIR", default_value = "./profiles")]
    pub profile_dir: std::path::PathBuf,

    /// Phase table directory (one {workload}.json per workload)
    #[arg(long = "phase-tables", value_name = "DIR", default_value = "./phase-tables")]
    pub phase_dir: std::path::PathBuf,

    /// Where the per-algorithm output directories are created
    #[arg(long = "output", value_name = "DIR", default_value = ".")]
    pub output_root: std::path::PathBuf,
}
