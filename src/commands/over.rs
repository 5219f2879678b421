//! XOVER command and overview data parsing

use crate::error::{Result, SpoolError};
use crate::response::NntpResponse;

/// Build XOVER command for fetching article overview data
pub fn xover(range: &str) -> String {
    format!("XOVER {}\r\n", range)
}

/// XOVER entry structure containing article metadata
///
/// The same tuple the per-group overview index stores; upstream XOVER lines
/// feed the filter chain and delay-body pseudo-article synthesis.
#[derive(Debug, Clone)]
pub struct XoverEntry {
    /// Article number within the newsgroup
    pub article_number: u64,
    /// Article subject line
    pub subject: String,
    /// Article author (From header)
    pub author: String,
    /// Article date string
    pub date: String,
    /// Unique message ID
    pub message_id: String,
    /// References to parent articles (for threading)
    pub references: String,
    /// Article size in bytes
    pub bytes: usize,
    /// Number of lines in the article
    pub lines: usize,
}

/// Parse XOVER response line into components
///
/// Format: "article-number\tsubject\tauthor\tdate\tmessage-id\treferences\tbytes\tlines\txref"
pub fn parse_xover_line(line: &str) -> Result<XoverEntry> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 8 {
        return Err(SpoolError::InvalidResponse(line.to_string()));
    }

    Ok(XoverEntry {
        article_number: parts[0].parse().unwrap_or(0),
        subject: parts[1].to_string(),
        author: parts[2].to_string(),
        date: parts[3].to_string(),
        message_id: parts[4].to_string(),
        references: parts[5].to_string(),
        bytes: parts[6].parse().unwrap_or(0),
        lines: parts[7].parse().unwrap_or(0),
    })
}

/// Parse a full XOVER response, skipping malformed lines
pub fn parse_xover_response(response: NntpResponse) -> Result<Vec<XoverEntry>> {
    if !response.is_success() {
        return Err(SpoolError::Protocol {
            code: response.code,
            message: response.message,
        });
    }

    let mut entries = Vec::with_capacity(response.lines.len());
    for line in &response.lines {
        match parse_xover_line(line) {
            Ok(entry) => entries.push(entry),
            Err(_) => continue,
        }
    }
    Ok(entries)
}
