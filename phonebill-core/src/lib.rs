//! Cluster coordination for the phone-bill benchmark.
//!
//! A single long-lived controller accepts connections from worker processes (online traffic
//! generators and the billing batch) and from one-shot control clients. Everything is spoken
//! over a small line-oriented protocol, see [protocol]. Besides tracking the lifecycle of every
//! worker the controller hands out contract blocks to data generators through the
//! [blocks::BlockAllocator].
pub mod blocks;
pub mod config;
pub mod controller;
pub mod protocol;
pub mod registry;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BenchConfig, ControllerConfig};
pub use controller::Controller;
