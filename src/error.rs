// Error types for the route controller

use thiserror::Error;

/// Main error type for the controller
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Failed to connect to device at {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("Failed to write entry for {prefix}: {reason}")]
    Write { prefix: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No backend could install routes (rpc: {rpc}; script: {script})")]
    BackendsExhausted { rpc: String, script: String },
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Convert error to user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AppError::Format(msg) => {
                format!("Malformed address or prefix: {}.", msg)
            }
            AppError::Connection { address, .. } => {
                format!("Switch at {} is unreachable. Check that the device is running.", address)
            }
            AppError::Write { prefix, .. } => {
                format!("The switch rejected the route {}.", prefix)
            }
            AppError::Io(_) => {
                "File system error. Check permissions and disk space.".to_string()
            }
            AppError::Serialization(_) => {
                "Routing table file is not valid JSON.".to_string()
            }
            AppError::Config(_) => {
                "Configuration error. Check your config file or command-line arguments.".to_string()
            }
            AppError::BackendsExhausted { .. } => {
                "Routes could not be installed with any backend.".to_string()
            }
        }
    }

    /// Whether the installer should move on to the next backend
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, AppError::Connection { .. })
    }
}
