//! Error taxonomy shared across the engine crates.

use thiserror::Error;

pub type NudgeResult<T> = Result<T, NudgeError>;

#[derive(Error, Debug)]
pub enum NudgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("state error: {0}")]
    State(String),

    #[error("numeric error: {0}")]
    Numeric(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl NudgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn numeric(msg: impl Into<String>) -> Self {
        Self::Numeric(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NudgeError::config("missing tau");
        assert_eq!(err.to_string(), "configuration error: missing tau");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: NudgeError = io.into();
        assert!(matches!(err, NudgeError::Io(_)));
    }

    #[test]
    fn test_serde_error_conversion() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: NudgeError = bad.unwrap_err().into();
        assert!(matches!(err, NudgeError::Serialization(_)));
    }
}
