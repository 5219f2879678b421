//! Core NNTP response parsing utilities

use crate::error::{Result, SpoolError};
use crate::response::NntpResponse;

/// Parse NNTP response line into code and message
pub fn parse_response_line(line: &str) -> Result<(u16, String)> {
    // Strip UTF-8 BOM if present (some broken servers/proxies add it)
    let line = line.trim_start_matches('\u{FEFF}');

    // Check minimum length and that first 3 chars are ASCII digits
    let bytes = line.as_bytes();
    if bytes.len() < 3
        || !bytes[0].is_ascii_digit()
        || !bytes[1].is_ascii_digit()
        || !bytes[2].is_ascii_digit()
    {
        return Err(SpoolError::InvalidResponse(line.chars().take(100).collect()));
    }

    // A fourth digit means a malformed code like "99999", not "999" plus message
    if bytes.len() > 3 && bytes[3].is_ascii_digit() {
        return Err(SpoolError::InvalidResponse(line.chars().take(100).collect()));
    }

    // Safe to slice since we verified ASCII
    let code = line[0..3]
        .parse::<u16>()
        .map_err(|_| SpoolError::InvalidResponse(line.chars().take(100).collect()))?;

    // Extract message: if char 3 is space, start at 4; otherwise start at 3
    let message = if line.len() > 3 {
        if bytes[3] == b' ' {
            line[4..].to_string()
        } else {
            // Missing space after the code; keep the full remainder
            line[3..].to_string()
        }
    } else {
        String::new()
    };

    Ok((code, message))
}

/// Parse single-line NNTP response
pub fn parse_single_response(line: &str) -> Result<NntpResponse> {
    let (code, message) = parse_response_line(line)?;

    Ok(NntpResponse {
        code,
        message,
        lines: vec![],
    })
}
