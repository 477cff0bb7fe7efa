/// Errors the engine itself can raise while driving a reconcile. Provider
/// errors never surface here directly — they are carried inside
/// [`crate::result::ActionResult`]/[`crate::result::CheckResult`] and
/// classified by the provider's own [`crate::operations::ErrorClassifier`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("control plane error: {source}")]
    Adapter {
        #[from]
        source: crate::adapter::AdapterError,
    },

    #[error("invalid Component: {0}")]
    UserInputError(String),

    #[error("failed to parse DateTime: {source}")]
    ChronoError {
        #[from]
        source: chrono::ParseError,
    },

    #[error("out of range: {source}")]
    OutOfRangeError {
        #[from]
        source: chrono::OutOfRangeError,
    },

    #[error("json error: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    #[error("parse duration: {source}")]
    ParseDurationError {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("status parse error: {0}")]
    StatusParseError(String),
}
