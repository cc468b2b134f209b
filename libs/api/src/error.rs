/// Category of a relay error. Lets callers decide whether to report,
/// skip or give up without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad client input, recovered on the offending connection.
    Input,
    /// The broker is not connected right now.
    Unavailable,
    /// A single feed event could not be decoded, skip it.
    Format,
    /// Transport failure, ends the current stream or request.
    Io,
    /// Storage backend failure.
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Input => f.write_str("input"),
            ErrorKind::Unavailable => f.write_str("unavailable"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Storage => f.write_str("storage"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("broker not connected")]
    NotConnected,

    #[error("broker: {0}")]
    Broker(String),

    #[error("stream decode: {0}")]
    StreamDecode(String),

    #[error("stream terminated: {0}")]
    StreamTerminated(String),

    #[error("persistence: {0}")]
    Persistence(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::MalformedCommand(_) => ErrorKind::Input,
            RelayError::NotConnected => ErrorKind::Unavailable,
            RelayError::StreamDecode(_) => ErrorKind::Format,
            RelayError::Broker(_) | RelayError::StreamTerminated(_) => ErrorKind::Io,
            RelayError::Persistence(_) => ErrorKind::Storage,
        }
    }

    pub fn persistence(e: impl std::fmt::Display) -> Self {
        RelayError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Persistence(e.to_string())
    }
}
