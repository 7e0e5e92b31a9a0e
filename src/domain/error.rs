use thiserror::Error;

/// Core domain errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Store unavailable: {message}")]
    Store { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the failure came from the shared store being unreachable or
    /// rejecting a command. These are the only errors eligible for failover.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let error = DomainError::not_found("Experiment 'color' not found");
        assert_eq!(error.to_string(), "Not found: Experiment 'color' not found");
    }

    #[test]
    fn test_configuration_error() {
        let error = DomainError::configuration("Unknown algorithm 'magic'");
        assert_eq!(
            error.to_string(),
            "Configuration error: Unknown algorithm 'magic'"
        );
    }

    #[test]
    fn test_store_error_is_failover_eligible() {
        assert!(DomainError::store("connection refused").is_store_unavailable());
        assert!(!DomainError::validation("bad").is_store_unavailable());
        assert!(!DomainError::not_found("missing").is_store_unavailable());
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let error: DomainError = err.into();
        assert!(matches!(error, DomainError::Serialization { .. }));
    }
}
