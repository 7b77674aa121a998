use thiserror::Error;

/// Failures raised by the ABI interaction core.
///
/// Catalog construction aborts on the first `MalformedDescriptor`. Every other
/// variant is per-call and ends up in the interaction log rather than
/// terminating the session.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("Malformed interface descriptor at entry #{index}: {reason}")]
    MalformedDescriptor { index: usize, reason: String },

    #[error("Function '{0}' not found in contract ABI")]
    FunctionNotFound(String),

    #[error("Event '{0}' not found in contract ABI")]
    UnknownEvent(String),

    #[error("Unsupported parameter type: {0}")]
    UnsupportedParameterType(String),

    #[error("Invalid numeric literal '{literal}' for type '{declared_type}'")]
    InvalidNumericLiteral {
        literal: String,
        declared_type: String,
    },

    #[error("Missing value for parameter '{parameter}' of function '{function}'")]
    MissingArgument { function: String, parameter: String },

    #[error("No account connected; state-changing calls need a sender")]
    AccountUnavailable,

    #[error("Artifact for contract '{contract}' unavailable: {reason}")]
    ArtifactUnavailable { contract: String, reason: String },

    #[error("{operation} failed: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
    },
}

impl InteractionError {
    pub fn transport(operation: &'static str, reason: impl ToString) -> Self {
        Self::Transport {
            operation,
            reason: reason.to_string(),
        }
    }

    pub fn malformed(index: usize, reason: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            index,
            reason: reason.into(),
        }
    }
}

pub type InteractionResult<T> = Result<T, InteractionError>;
