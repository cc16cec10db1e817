pub mod prelude {
    pub use super::common::prelude::*;
    pub use super::taskset::prelude::*;
    pub use super::engine::prelude::*;
}

pub mod common;
pub mod taskset;
pub mod engine;
