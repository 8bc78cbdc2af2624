//! Durable document job dispatcher and template substitution engine.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
