pub mod prelude {
    pub use super::phases::prelude::*;
    pub use super::{
        Time,
        Platform,
        ResVec
    };
}

pub mod phases;

/// Absolute or relative time in nanoseconds.
///
/// Signed on purpose: slack (`dag_deadline - cur_finish`) goes negative for
/// jobs that miss their deadline, and the scheduler keeps running to report
/// the full schedule anyway.
#[derive(Clone, Copy, Default)]
#[derive(Debug)]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Time {
    pub value_ns: i64
}

/// A resource partition or a resource budget: cache ways plus memory
/// bandwidth slots.
#[derive(Clone, Copy, Default)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct ResVec {
    pub c: u32,
    pub bw: u32,
}

/// The shared-resource platform the schedule is computed for.
#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Platform {
    pub num_cpus: usize,
    pub max_cache: u32,
    pub max_membw: u32,
}

// =============================================================================

impl Time {
    pub const MAX: Time = Time { value_ns: i64::MAX };

    pub fn zero() -> Self {
        Self { value_ns: 0 }
    }

    pub fn nanos(time_ns: i64) -> Self {
        Self { value_ns: time_ns }
    }

    pub fn as_nanos(&self) -> i64 {
        self.value_ns
    }

    /// Ratio of two durations, used for the decomposition quantities
    /// (utilization, Γ, Ω) which live in the reals.
    pub fn ratio(self, rhs: Self) -> f64 {
        self.value_ns as f64 / rhs.value_ns as f64
    }
}

impl std::ops::Add for Time {
    type Output = Time;

    fn add(self, rhs: Self) -> Self::Output {
        Self::Output { value_ns: (self.value_ns + rhs.value_ns) }
    }
}

impl std::ops::Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::Output { value_ns: (self.value_ns - rhs.value_ns) }
    }
}

impl std::ops::Mul<i64> for Time {
    type Output = Time;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::Output { value_ns: (self.value_ns * rhs) }
    }
}

impl std::ops::Mul<Time> for i64 {
    type Output = Time;

    fn mul(self, rhs: Time) -> Self::Output {
        rhs * self
    }
}

impl std::iter::Sum for Time {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Time::zero(), |acc, val| acc + val)
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value_ns)
    }
}

impl Platform {
    /// Smallest partition any running job may hold, per resource.
    pub const MIN_PARTITION: u32 = 2;

    pub fn new(num_cpus: usize, max_cache: u32, max_membw: u32) -> Self {
        assert!(num_cpus >= 1);
        assert!(max_cache >= Self::MIN_PARTITION * num_cpus as u32);
        assert!(max_membw >= Self::MIN_PARTITION * num_cpus as u32);

        Self { num_cpus, max_cache, max_membw }
    }

    /// Even split of the cache ways across all cores.
    pub fn even_cache(&self) -> u32 {
        self.max_cache / self.num_cpus as u32
    }

    /// Even split of the bandwidth slots across all cores.
    pub fn even_membw(&self) -> u32 {
        self.max_membw / self.num_cpus as u32
    }

    /// Largest cache partition one core can hold while every other core
    /// keeps the minimum.
    pub fn max_cache_one_core(&self) -> u32 {
        self.max_cache - Self::MIN_PARTITION * (self.num_cpus as u32 - 1)
    }

    /// Largest bandwidth partition one core can hold while every other core
    /// keeps the minimum.
    pub fn max_membw_one_core(&self) -> u32 {
        self.max_membw - Self::MIN_PARTITION * (self.num_cpus as u32 - 1)
    }

    pub fn full_budget(&self) -> ResVec {
        ResVec { c: self.max_cache, bw: self.max_membw }
    }
}

// Tests -----------------------------------------------------------------------

#[test]
fn time_arithmetic() {
    let a = Time::nanos(1500);
    let b = Time::nanos(500);

    assert_eq!(a + b, Time::nanos(2000));
    assert_eq!(a - b, Time::nanos(1000));
    assert_eq!(a * 3, Time::nanos(4500));
    assert_eq!(b.ratio(a), 1.0 / 3.0);
    assert!(b < a);
}

#[test]
fn platform_partitions() {
    let platform = Platform::new(4, 20, 20);

    assert_eq!(platform.even_cache(), 5);
    assert_eq!(platform.even_membw(), 5);
    assert_eq!(platform.max_cache_one_core(), 14);
    assert_eq!(platform.max_membw_one_core(), 14);

    let platform = Platform::new(2, 8, 8);

    assert_eq!(platform.even_cache(), 4);
    assert_eq!(platform.max_cache_one_core(), 6);
}
