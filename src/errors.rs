/// Domain-specific error types for the decision engine.
/// All external failures must be handled. The engine must:
/// - Continue running on recoverable errors
/// - Halt safely only on unrecoverable configuration/model-load/path errors at startup
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("model load error: {0}")]
    ModelLoad(String),

    #[error("imputation error: {0}")]
    Imputation(String),

    #[error("stream parse error: {0}")]
    StreamParse(String),

    #[error("stream validation error: {0}")]
    StreamValidation(String),

    #[error("stream replay suspected: {0}")]
    StreamReplay(String),

    #[error("connection error (transient): {0}")]
    ConnectionTransient(String),

    #[error("connection error (terminal): {0}")]
    ConnectionTerminal(String),

    #[error("persistence not initialized")]
    NotInitialized,

    #[error("persistence constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("market query error: {0}")]
    MarketQuery(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("scan error: {0}")]
    Scan(String),

    #[error("resolution error: unknown conditionId {0}")]
    UnknownCondition(String),

    #[error("resolution event error: {0}")]
    Resolution(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Truncate an error message to `n` chars, appending an ellipsis if it was cut.
/// Used by the structured logger per the 200-char error-field contract.
pub fn truncate_message(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(n).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_message_unchanged() {
        assert_eq!(truncate_message("hello", 200), "hello");
    }

    #[test]
    fn truncate_long_message_adds_ellipsis() {
        let long = "x".repeat(250);
        let truncated = truncate_message(&long, 200);
        assert_eq!(truncated.chars().count(), 201);
        assert!(truncated.ends_with('…'));
    }
}
