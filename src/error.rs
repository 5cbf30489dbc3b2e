//! FTP error types

use thiserror::Error;

/// Errors surfaced to a client connection's caller
#[derive(Error, Debug)]
pub enum FtpError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The control channel could not be opened, or was lost mid-session
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed reply, or a PASV reply with no parseable address tuple
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Login was rejected
    #[error("authentication failed ({code}): {text}")]
    Auth {
        /// Reply code the server sent
        code: u16,
        /// Reply text
        text: String,
    },

    /// A non-transfer command returned 4xx/5xx
    #[error("command failed ({code}): {text}")]
    Command {
        /// Reply code the server sent
        code: u16,
        /// Reply text
        text: String,
    },

    /// A data-phase command failed: PASV/LIST/RETR/STOR
    #[error("transfer failed ({code}): {text}")]
    Transfer {
        /// Reply code the server sent
        code: u16,
        /// Reply text
        text: String,
    },
}

/// Result type alias using [`FtpError`]
pub type Result<T> = std::result::Result<T, FtpError>;

/// Errors internal to a server session handler
///
/// Unlike [`FtpError`], these never cross the wire as-is: every command
/// outcome the session handler can anticipate is translated into a
/// [`crate::reply::Reply`] instead. `ServerError` exists only for the
/// unrecoverable case -- the control channel itself failing -- which
/// ends the session rather than producing a reply.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Control-channel I/O failed or hit EOF
    #[error("control channel error: {0}")]
    Io(#[from] std::io::Error),

    /// The control connection was closed by the peer
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using [`ServerError`]
pub type ServerResult<T> = std::result::Result<T, ServerError>;
