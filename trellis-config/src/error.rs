// Configuration errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration key not found: {0}")]
    KeyNotFound(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// A value parsed but is outside what its section accepts
    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Environment variable error: {0}")]
    EnvError(#[from] std::env::VarError),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for trellis_core::Error {
    fn from(err: ConfigError) -> Self {
        trellis_core::Error::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_message() {
        let err = ConfigError::invalid("dispatch.fault_status", "204 is not a 4xx or 5xx status");
        assert_eq!(
            err.to_string(),
            "Invalid value for `dispatch.fault_status`: 204 is not a 4xx or 5xx status"
        );
        let core: trellis_core::Error = err.into();
        assert_eq!(core.status_code(), 500);
    }
}
