use thiserror::Error;

/// Errors raised by the wire and JSON codecs.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed RFC 5424 message: {0}")]
    MalformedWire(String),

    #[error("malformed structured data: {0}")]
    MalformedStructuredData(String),

    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("invalid {kind} value: {value}")]
    InvalidEnumValue { kind: &'static str, value: i64 },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;
