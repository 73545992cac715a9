//! Core engine: the evaluate → gate → execute loop and its execution
//! plumbing.

pub mod events;
pub mod identity;
pub mod keeper;
pub mod report;
pub mod settlement;
pub mod submission;

pub use keeper::{Keeper, KeeperComponents};
pub use report::{CycleOutcome, CycleReport};
