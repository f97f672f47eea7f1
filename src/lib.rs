// src/lib.rs

pub mod actions;
pub mod analyze;
pub mod client;
pub mod collector;
pub mod compare;
pub mod constants;
pub mod datagen;
pub mod driver;
pub mod endpoints;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod oplog;
pub mod ops;
pub mod segment;
pub mod sizes;

pub use error::BenchError;
pub use ops::{OpType, Operation, OperationLog};
