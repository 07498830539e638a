// Engine error taxonomy.

use thiserror::Error;

/// Errors raised by the valuation engine.
///
/// `UnknownPosition`, `NotFitted` and `ModelNotTrained` are pipeline ordering
/// or configuration faults and abort the call that raised them.
/// `InsufficientData` and `SingularSystem` are reported per position group by
/// the batch entry points, which skip that group and carry on with the others.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("unknown position `{0}`: no schema registered for it")]
    UnknownPosition(String),

    #[error("preprocessor has not been fitted for position group `{0}`")]
    NotFitted(String),

    #[error("no trained model for position group `{0}`")]
    ModelNotTrained(String),

    #[error("insufficient training data for `{group}`: {found} usable rows, need at least {required}")]
    InsufficientData {
        group: String,
        found: usize,
        required: usize,
    },

    #[error("feature matrix for `{group}` has {found} columns, model expects {expected}")]
    FeatureMismatch {
        group: String,
        expected: usize,
        found: usize,
    },

    #[error("{features} feature rows but {outcomes} outcomes")]
    LengthMismatch { features: usize, outcomes: usize },

    #[error("regression for `{0}` is singular; raise the ridge penalty")]
    SingularSystem(String),

    #[error("duplicate investment entry for `{entity}` in period {period}, role `{role}`")]
    DuplicateInvestmentEntry {
        entity: String,
        period: i32,
        role: String,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
