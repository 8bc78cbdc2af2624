//! Application services layer.

pub mod audit;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod repos;
pub mod scanner;
pub mod template;
pub mod templates;
