//! Error types for the finance SQL agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Pipeline Step Errors
    // =============================

    /// Referenced table/view does not exist, even after correction.
    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("SQL validation error: {0}")]
    SqlValidationError(String),

    #[error("Formatting error: {0}")]
    FormattingError(String),

    /// The text-generation capability returned nothing usable.
    #[error("Generation error: {0}")]
    GenerationError(String),

    // =============================
    // Infrastructure Errors
    // =============================

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Timed out: {0}")]
    TimeoutError(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Identifier registry conflict: {0}")]
    RegistryConflict(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sqlx::Error> for AgentError {
    fn from(e: sqlx::Error) -> Self {
        // Keep the driver message intact; tools inspect it for remediation.
        AgentError::DatabaseError(e.to_string())
    }
}

impl AgentError {
    /// Short machine-friendly category name, used in logs and run records.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::SchemaError(_) => "schema",
            AgentError::SqlValidationError(_) => "sql_validation",
            AgentError::FormattingError(_) => "formatting",
            AgentError::GenerationError(_) => "generation",
            AgentError::DatabaseError(_) => "database",
            AgentError::TimeoutError(_) => "timeout",
            AgentError::Cancelled => "cancelled",
            AgentError::ConfigError(_) => "config",
            AgentError::RegistryConflict(_) => "registry",
            AgentError::SerializationError(_) => "serialization",
            AgentError::HttpError(_) => "http",
            AgentError::IoError(_) => "io",
        }
    }
}
