//! FLASHLOOP: flash-loan round-trip arbitrage keeper
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod venues;
pub mod market;
pub mod rpc;
pub mod strategy;
pub mod engine;
pub mod storage;
