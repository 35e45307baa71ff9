//! Error types for Draftloom

use thiserror::Error;

/// Result type alias using Draftloom's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Draftloom error types with helpful messages
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Draft '{0}' not found")]
    DraftNotFound(String),

    #[error("Version {0} not found for this draft")]
    VersionNotFound(i64),

    // Transpiler errors (E100-E199)
    #[error("Transpiler unavailable: {0}")]
    TranspilerUnavailable(String),

    #[error("Transpilation failed: {0}")]
    TranspileFailed(String),

    // Sandbox errors (E200-E299)
    #[error("Sandbox boundary did not report ready within {0} ms")]
    SandboxNotReady(u64),

    #[error("Sandbox request {0} timed out after {1} ms")]
    SandboxTimeout(u64, u64),

    #[error("Code exceeds maximum sandbox payload size ({size} > {limit} bytes)")]
    CodeTooLarge { size: usize, limit: usize },

    #[error("Sandbox channel closed")]
    SandboxChannelClosed,

    // Execution errors (E300-E399)
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    // Network errors (E400-E499)
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    // Database errors (E500-E599)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E700-E799)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::DraftNotFound(_) => "E001",
            Self::VersionNotFound(_) => "E002",
            Self::TranspilerUnavailable(_) => "E100",
            Self::TranspileFailed(_) => "E101",
            Self::SandboxNotReady(_) => "E200",
            Self::SandboxTimeout(..) => "E201",
            Self::CodeTooLarge { .. } => "E202",
            Self::SandboxChannelClosed => "E203",
            Self::ExecutionFailed(_) => "E300",
            Self::NetworkError(_) => "E400",
            Self::DatabaseError(_) => "E500",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E700",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::DraftNotFound("x".into()).code(), "E001");
        assert_eq!(Error::VersionNotFound(3).code(), "E002");
        assert_eq!(Error::SandboxTimeout(1, 10_000).code(), "E201");
        assert_eq!(
            Error::CodeTooLarge {
                size: 2,
                limit: 1
            }
            .code(),
            "E202"
        );
        assert_eq!(Error::Other("x".into()).code(), "E9999");
    }

    #[test]
    fn test_error_display() {
        let err = Error::SandboxTimeout(7, 100);
        assert_eq!(err.to_string(), "Sandbox request 7 timed out after 100 ms");

        let err = Error::CodeTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert!(err.to_string().contains("2048 > 1024"));
    }
}
