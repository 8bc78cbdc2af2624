//! Domain layer types and invariants.

pub mod document;
pub mod entities;
pub mod error;
pub mod types;
