//! WCET profile loading.
//!
//! Profiles live under `profiles/{workload}/{cache_mask}_{bandwidth}/wcet.txt`
//! where `cache_mask` is the way mask `(1 << ways) - 1` and `bandwidth` is the
//! slot count times 72 (the MBps granularity of the throttling hardware).
//! Each `wcet.txt` carries two lines: seconds, and the instruction count.

use crate::prelude::*;

pub mod prelude {
    pub use super::{
        ProfileStore,
        ProfileError,
        cell_dir_name,
    };
}

/// Loads and caches per-workload WCET matrices and instruction counts.
///
/// Each driver worker owns one store, so concurrently processed task sets
/// never share mutable state.
pub struct ProfileStore {
    dir: std::path::PathBuf,
    platform: Platform,
    cache: std::collections::HashMap<String, (WcetMatrix, u64)>,
}

#[derive(Debug)]
pub enum ProfileError {
    IOError(std::io::Error),
    ParseError(String),
    MissingWorkload(String),
    MissingCell { workload: String, cache: u32, membw: u32 },
}

// =============================================================================

/// Directory name of one profiled partition.
pub fn cell_dir_name(cache: u32, membw: u32) -> String {
    format!("{}_{}", (1u64 << cache) - 1, membw * 72)
}

impl ProfileStore {
    pub fn new(dir: impl Into<std::path::PathBuf>, platform: Platform) -> Self {
        Self {
            dir: dir.into(),
            platform,
            cache: std::collections::HashMap::new(),
        }
    }

    /// The WCET matrix and instruction count for a workload, loading it on
    /// first use.
    pub fn wcets(&mut self, workload: &str) -> Result<&(WcetMatrix, u64), ProfileError> {
        if !self.cache.contains_key(workload) {
            let loaded = self.load(workload)?;
            self.cache.insert(workload.to_string(), loaded);
        }

        Ok(&self.cache[workload])
    }

    fn load(&self, workload: &str) -> Result<(WcetMatrix, u64), ProfileError> {
        let mut wcets = WcetMatrix::new(&self.platform);
        let mut max_insn = 0u64;
        let mut found_any = false;

        for cache in Platform::MIN_PARTITION..=self.platform.max_cache {
            for membw in Platform::MIN_PARTITION..=self.platform.max_membw {
                let path = self.dir
                    .join(workload)
                    .join(cell_dir_name(cache, membw))
                    .join("wcet.txt");

                let data = match std::fs::read_to_string(&path) {
                    Ok(data) => data,
                    Err(_) => {
                        log::warn!("missing wcet.txt in {}", path.display());
                        continue;
                    },
                };

                let (wcet, insn) = parse_wcet_data(&data)
                    .map_err(|err| ProfileError::ParseError(
                        format!("{}: {err}", path.display())
                    ))?;

                wcets.set(cache, membw, wcet);
                max_insn = max_insn.max(insn);
                found_any = true;
            }
        }

        if !found_any {
            return Err(ProfileError::MissingWorkload(workload.to_string()));
        }

        // The even partition anchors the baseline rate, so it cannot be a hole.
        let (even_c, even_bw) = (self.platform.even_cache(), self.platform.even_membw());
        if wcets.get(even_c, even_bw) <= Time::zero() {
            return Err(ProfileError::MissingCell {
                workload: workload.to_string(),
                cache: even_c,
                membw: even_bw,
            });
        }

        Ok((wcets, max_insn))
    }
}

fn parse_wcet_data(data: &str) -> Result<(Time, u64), String> {
    let mut lines = data.lines();

    let seconds: f64 = lines.next()
        .ok_or("empty wcet file")?
        .trim()
        .parse()
        .map_err(|err| format!("bad wcet value: {err}"))?;

    let insns: f64 = lines.next()
        .ok_or("wcet file is missing the instruction count")?
        .trim()
        .parse()
        .map_err(|err| format!("bad instruction count: {err}"))?;

    Ok((Time::nanos((seconds * 1e9) as i64), insns as u64))
}

// =============================================================================

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Profile Error, ")?;
        match self {
            ProfileError::IOError(error) =>
                write!(f, "IO: {error}")?,
            ProfileError::ParseError(error) =>
                write!(f, "{error}")?,
            ProfileError::MissingWorkload(workload) =>
                write!(f, "no profile directory for workload {workload}")?,
            ProfileError::MissingCell { workload, cache, membw } =>
                write!(f, "workload {workload} has no wcet at (c={cache}, bw={membw})")?,
        };

        Ok(())
    }
}

impl std::error::Error for ProfileError {}

impl From<std::io::Error> for ProfileError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

// Tests -----------------------------------------------------------------------

#[test]
fn cell_names_follow_the_mask_convention() {
    assert_eq!(cell_dir_name(2, 2), "3_144");
    assert_eq!(cell_dir_name(4, 10), "15_720");
    assert_eq!(cell_dir_name(20, 20), "1048575_1440");
}

#[test]
fn wcet_data_converts_to_nanoseconds() {
    let (wcet, insns) = parse_wcet_data("0.002\n1500000\n").unwrap();

    assert_eq!(wcet, Time::nanos(2_000_000));
    assert_eq!(insns, 1_500_000);

    assert!(parse_wcet_data("").is_err());
    assert!(parse_wcet_data("0.002\n").is_err());
    assert!(parse_wcet_data("abc\n123\n").is_err());
}
