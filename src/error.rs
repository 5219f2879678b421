//! Relay error types

use thiserror::Error;

/// Errors shared by the spool components and the upstream NNTP client
#[derive(Error, Debug)]
pub enum SpoolError {
    /// IO error during network or spool operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure connection
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection timeout
    #[error("Connection timeout")]
    Timeout,

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// NNTP protocol error with response code
    #[error("NNTP error {code}: {message}")]
    Protocol {
        /// NNTP response code (e.g., 411, 430, 502)
        code: u16,
        /// Error message from server
        message: String,
    },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No such newsgroup
    #[error("No such newsgroup: {0}")]
    NoSuchGroup(String),

    /// No such article
    #[error("No such article: {0}")]
    NoSuchArticle(String),

    /// Posting not permitted
    #[error("Posting not permitted")]
    PostingNotPermitted,

    /// Posting failed
    #[error("Posting failed: {0}")]
    PostingFailed(String),

    /// Spool lock is held by another process
    #[error("Spool lock held by pid {pid} on {host}")]
    LockHeld {
        /// Owner pid recorded in the lock file
        pid: u32,
        /// Owner hostname recorded in the lock file
        host: String,
    },

    /// Structurally invalid overview line
    #[error("Bad overview line: {0}")]
    BadOverviewLine(String),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias using SpoolError
pub type Result<T> = std::result::Result<T, SpoolError>;
