//! NNTP command builders and response parsers
//!
//! Covers the upstream command surface the relay consumes: GROUP, LIST,
//! LIST NEWSGROUPS, NEWGROUPS, XOVER, XHDR, ARTICLE, POST, AUTHINFO, DATE.

pub mod article;
pub mod group;
pub mod hdr;
pub mod list;
pub mod over;
pub mod response;

pub use article::*;
pub use group::*;
pub use hdr::*;
pub use list::*;
pub use over::*;
pub use response::*;

use crate::error::{Result, SpoolError};
use chrono::NaiveDateTime;

// Authentication and connection management commands

/// Build AUTHINFO USER command
pub fn authinfo_user(username: &str) -> String {
    format!("AUTHINFO USER {}\r\n", username)
}

/// Build AUTHINFO PASS command
pub fn authinfo_pass(password: &str) -> String {
    format!("AUTHINFO PASS {}\r\n", password)
}

/// Build MODE READER command (RFC 3977 §5.3)
///
/// Switches a transit server into reader mode. Many upstream feeds answer
/// GROUP/ARTICLE only after this.
pub fn mode_reader() -> &'static str {
    "MODE READER\r\n"
}

/// Build QUIT command
pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// Build DATE command (RFC 3977 §7.1)
///
/// Requests the server's current date and time.
/// Response: 111 yyyymmddhhmmss
pub fn date() -> &'static str {
    "DATE\r\n"
}

/// Parse DATE response payload into a UTC timestamp
///
/// The message is "yyyymmddhhmmss" per RFC 3977 §7.1. The relay records
/// this at the start of a sync run so the next NEWGROUPS query uses the
/// server's clock, not the local one.
pub fn parse_date_response(message: &str) -> Result<NaiveDateTime> {
    let stamp = message.split_whitespace().next().unwrap_or("");
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .map_err(|_| SpoolError::InvalidResponse(message.to_string()))
}
