use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("unknown asset class '{0}', expected one of equities, bonds, cash")]
    UnknownAssetClass(String),

    #[error("simulation horizon is empty: retirement age {retirement_age} must be > current age {current_age}")]
    EmptyHorizon {
        current_age: u32,
        retirement_age: u32,
    },

    #[error("allocation weights must sum to 1, got {sum}")]
    AllocationNotNormalized { sum: f64 },

    #[error("allocation weights must be >= 0")]
    NegativeWeight,

    #[error("invalid return model for {class}: {reason}")]
    InvalidReturnModel { class: String, reason: String },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl EngineError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
