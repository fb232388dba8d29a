//! Engine error types.

use thiserror::Error;

use crate::models::ParseIntervalError;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid setup detected at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A collaborator returned a record missing required fields.
    #[error("data contract violation: {0}")]
    DataContract(String),

    /// A broker, streamer, or storage call failed.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }

    /// Fatal errors stop the run; collaborator failures only abandon the cycle.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Collaborator(_))
    }
}

impl From<ParseIntervalError> for EngineError {
    fn from(e: ParseIntervalError) -> Self {
        EngineError::Configuration(e.to_string())
    }
}

/// Failure of a single strategy decision step.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy returned an error: {0:#}")]
    Failed(anyhow::Error),

    #[error("strategy panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(EngineError::config("no algorithm").is_fatal());
        assert!(EngineError::DataContract("missing type".into()).is_fatal());
        assert!(!EngineError::from(anyhow::anyhow!("timeout")).is_fatal());
    }

    #[test]
    fn test_interval_parse_error_is_configuration() {
        let err: EngineError = "7MIN".parse::<crate::models::Interval>().unwrap_err().into();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
