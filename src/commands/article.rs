//! Article retrieval and posting commands

use crate::error::{Result, SpoolError};
use crate::response::NntpResponse;

/// Build ARTICLE command
///
/// `id` is either an article number within the selected group or a
/// bracketed Message-ID.
pub fn article(id: &str) -> String {
    format!("ARTICLE {}\r\n", id)
}

/// Build HEAD command
pub fn head(id: &str) -> String {
    format!("HEAD {}\r\n", id)
}

/// Build BODY command
pub fn body(id: &str) -> String {
    format!("BODY {}\r\n", id)
}

/// Build POST command (RFC 3977 §6.3.1)
///
/// The server answers 340 to request the article, which is then sent
/// dot-stuffed and terminated with a lone dot.
pub fn post() -> &'static str {
    "POST\r\n"
}

/// Dot-stuff an article for transmission (RFC 3977 §3.1.1)
///
/// Prefixes a dot to every line that starts with one and appends the
/// terminating lone-dot line. Input lines may be separated by LF or CRLF;
/// output is strict CRLF.
pub fn dot_stuff(text: &str) -> String {
    let mut wire = String::with_capacity(text.len() + 16);
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            wire.push('.');
        }
        wire.push_str(line);
        wire.push_str("\r\n");
    }
    // A trailing newline in the input produces one empty split tail; drop it
    if text.ends_with('\n') {
        wire.truncate(wire.len() - 2);
    }
    wire.push_str(".\r\n");
    wire
}

/// Parse the single-line POST completion response
///
/// 240 means the article was accepted; 441 is a permanent rejection.
pub fn parse_post_response(response: NntpResponse) -> Result<()> {
    match response.code {
        240 => Ok(()),
        440 => Err(SpoolError::PostingNotPermitted),
        _ => Err(SpoolError::PostingFailed(format!(
            "{} {}",
            response.code, response.message
        ))),
    }
}
