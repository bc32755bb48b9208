/// Errors raised while consuming one event stream.
///
/// `Parse` and `Protocol` are recovered locally by skipping the offending frame
/// or event; `Transport` closes the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Connection failure, non-success status, or a failed mid-stream read.
    #[error("transport error ({endpoint}): {message}")]
    Transport {
        endpoint: String,
        message: String,
        status_code: Option<u16>,
    },
    /// A single frame payload was not valid JSON.
    #[error("parse error: {message}")]
    Parse { message: String },
    /// A well-formed payload with an unrecognized discriminant or shape.
    #[error("protocol violation: {message}")]
    Protocol { message: String },
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(
        endpoint: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a frame parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// True for errors that only cost one frame or event.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Protocol { .. })
    }
}

/// Top-level error type for adapters and client configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (empty question, zero cardinality, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// The stream failed in a way the session could not recover from.
    #[error(transparent)]
    Stream(StreamError),
}

impl From<StreamError> for ClientError {
    fn from(value: StreamError) -> Self {
        ClientError::Stream(value)
    }
}
