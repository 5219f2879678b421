//! XHDR command and header field retrieval
//!
//! XHDR is the fallback harvest path for servers without a usable XOVER;
//! it can only be used when no filter chain and no delay-body mode applies,
//! since those need the full overview tuple.

use crate::error::{Result, SpoolError};
use crate::response::NntpResponse;

/// Build XHDR command
///
/// Retrieves a single header field for a range of articles.
/// Format: XHDR header-name range
pub fn xhdr(header: &str, range: &str) -> String {
    format!("XHDR {} {}\r\n", header, range)
}

/// XHDR entry containing article number and header value
#[derive(Debug, Clone)]
pub struct HdrEntry {
    /// Article number within the newsgroup
    pub article_number: u64,
    /// Header field value for this article
    pub value: String,
}

/// Parse XHDR response line into HdrEntry
///
/// Format: "article-number header-value". Header values may contain spaces,
/// so everything after the first space is the value.
pub fn parse_xhdr_line(line: &str) -> Result<HdrEntry> {
    let parts: Vec<&str> = line.splitn(2, ' ').collect();
    if parts.len() < 2 {
        return Err(SpoolError::InvalidResponse(line.to_string()));
    }

    let article_number = parts[0]
        .parse()
        .map_err(|_| SpoolError::InvalidResponse(line.to_string()))?;

    Ok(HdrEntry {
        article_number,
        value: parts[1].to_string(),
    })
}

/// Parse XHDR response into HdrEntry list, skipping malformed lines
pub fn parse_xhdr_response(response: NntpResponse) -> Result<Vec<HdrEntry>> {
    if !response.is_success() {
        return Err(SpoolError::Protocol {
            code: response.code,
            message: response.message,
        });
    }

    let mut entries = Vec::new();
    for line in &response.lines {
        match parse_xhdr_line(line) {
            Ok(entry) => entries.push(entry),
            Err(_) => continue,
        }
    }

    Ok(entries)
}
