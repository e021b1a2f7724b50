use thiserror::Error;

use crate::command::Command;

/// type alias for all operations in this crate that could fail with a [`PrimeError`]
pub type Result<T> = std::result::Result<T, PrimeError>;

/// The Error variants used by the server, the client and the worker pool.
/// Lower level errors from third party crates are wrapped by the `From` conversions
/// that `thiserror` generates.
#[derive(Error, Debug)]
pub enum PrimeError {
    /// errors caused by socket, pipe or process IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// errors raised while serializing or de-serializing JSON
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// a request line could not be turned into a [`Request`](crate::Request)
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// command line options that could not be parsed
    #[error("parsing error: {0}")]
    Parsing(String),

    /// an `error` response sent back by the server
    #[error("server error: {0}")]
    Server(String),

    /// the worker pool could not be built
    #[error("worker pool error: {0}")]
    Pool(String),
}

/// Errors for a single request. They are reported back to the client as an `error`
/// response, and only [`ProtocolError::LineTooLong`] closes the session.
///
/// The `Display` text of each variant is the `message` field sent over the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// the first token of the line is not a known command
    #[error("unknown command")]
    UnknownCommand(String),

    /// an argument is not an integer, or does not fit in 64 bits
    #[error("invalid argument")]
    InvalidArgument(Command),

    /// too few or too many arguments for the command
    #[error("wrong number of arguments: expected {expected}, got {found}")]
    WrongArity {
        /// the command that was sent
        command: Command,
        /// arguments the command takes
        expected: usize,
        /// arguments that were sent
        found: usize,
    },

    /// `start > end` for a `range` or `count` request
    #[error("invalid range")]
    InvalidRange(Command),

    /// the interval holds more integers than the server is willing to scan
    #[error("range too large: at most {max} values")]
    RangeTooLarge {
        /// the command that was sent
        command: Command,
        /// the configured limit
        max: u64,
    },

    /// the line was not valid UTF-8
    #[error("invalid encoding")]
    InvalidEncoding,

    /// no line terminator within the first `max` bytes. The session is closed after the
    /// error response, since the rest of the line cannot be skipped safely.
    #[error("line too long: at most {max} bytes")]
    LineTooLong {
        /// the longest accepted line
        max: usize,
    },
}

impl ProtocolError {
    /// the command token that is echoed back in the error response
    pub fn command(&self) -> String {
        match self {
            ProtocolError::UnknownCommand(token) => token.clone(),
            ProtocolError::InvalidArgument(cmd)
            | ProtocolError::InvalidRange(cmd)
            | ProtocolError::WrongArity { command: cmd, .. }
            | ProtocolError::RangeTooLarge { command: cmd, .. } => cmd.to_string(),
            ProtocolError::InvalidEncoding | ProtocolError::LineTooLong { .. } => String::new(),
        }
    }
}
