//! Balance-diff bisection: finds the blocks in which an account's balance or
//! nonce changed using only historical state reads at range endpoints.

pub mod bisect;
pub mod error;
pub mod finder;
pub mod task_group;

#[cfg(test)]
mod test_utils;

pub use bisect::{check_ranges, LevelOutcome, RangeBisector};
pub use error::DiscoveryError;
pub use finder::{BlockFinder, Discovery};
pub use task_group::{GroupResults, TaskGroup, TaskSink};
