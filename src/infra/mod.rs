//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod engine;
pub mod error;
pub mod memory;
pub mod storage;
pub mod telemetry;
