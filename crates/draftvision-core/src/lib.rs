// Prospect valuation engine: per-position feature preparation, draft-outcome
// regression, cross-position ranking, and group-wise investment signals.

pub mod engine;
pub mod error;
pub mod evaluation;
pub mod investment;
pub mod model;
pub mod preprocess;
pub mod ranking;
pub mod record;
pub mod registry;

pub use error::{EngineError, Result};
