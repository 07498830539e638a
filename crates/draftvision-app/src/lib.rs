// Library crate for the draftvision batch job.
// Exposes modules for integration testing.

pub mod config;
pub mod db;
pub mod export;
pub mod import;
pub mod pipeline;
