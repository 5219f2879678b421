//! Article header utilities
//!
//! Shared by the store (required-header checks, Newsgroups fan-out), the
//! overview cache (tuple re-derivation) and the filter chain. Works on the
//! raw header block as received; values are kept as-is apart from RFC 5322
//! unfolding.

use std::collections::HashMap;

/// Split raw article text into header block and body
///
/// Splits at the first blank line (CRLF CRLF or LF LF).
pub fn split_article(raw: &str) -> (&str, &str) {
    // Try CRLF first (standard)
    if let Some(pos) = raw.find("\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }

    // Fallback to LF (non-standard but common)
    if let Some(pos) = raw.find("\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }

    // No separator found - entire text is headers
    (raw, "")
}

/// Parse comma-separated list (for Newsgroups, Followup-To, etc.)
///
/// RFC 5536: values are comma-separated, whitespace around commas is optional
pub fn parse_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parse space-separated message-id list (for References)
///
/// RFC 5536: Message-IDs are separated by CFWS (whitespace/comments);
/// basic whitespace separation is handled here
pub fn parse_message_id_list(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Extract the first bracketed Message-ID token from a header value
pub fn extract_message_id(value: &str) -> Option<&str> {
    let start = value.find('<')?;
    let end = value[start..].find('>')?;
    Some(&value[start..start + end + 1])
}

/// Unfold header value by removing continuation line breaks
///
/// RFC 5536/5322: Continuation lines start with whitespace (space or tab).
/// Replace CRLF or LF followed by whitespace with a single space.
pub fn unfold_header(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    let mut prev_was_newline = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                // Skip CR, wait for LF
                if chars.peek() == Some(&'\n') {
                    prev_was_newline = true;
                }
            }
            '\n' => {
                prev_was_newline = true;
            }
            ' ' | '\t' if prev_was_newline => {
                // Continuation line - replace newline+whitespace with space
                if !result.ends_with(' ') {
                    result.push(' ');
                }
                prev_was_newline = false;
            }
            _ => {
                if prev_was_newline {
                    // Newline not followed by whitespace is not a fold;
                    // shouldn't happen in valid headers, but handle it
                    result.push(' ');
                }
                result.push(ch);
                prev_was_newline = false;
            }
        }
    }

    result.trim().to_string()
}

/// Scanned header block with per-name occurrence tracking
///
/// Names are matched case-insensitively. Every occurrence is kept in order
/// so callers can enforce cardinality rules (an article with two Message-ID
/// headers is malformed, not merely ambiguous).
#[derive(Debug, Default)]
pub struct HeaderScan {
    fields: HashMap<String, Vec<String>>,
}

impl HeaderScan {
    /// Parse a raw header block, handling folded continuation lines
    pub fn parse(headers_text: &str) -> Self {
        let mut fields: HashMap<String, Vec<String>> = HashMap::new();
        let mut current_name: Option<String> = None;
        let mut current_value = String::new();

        let mut flush = |name: &mut Option<String>, value: &mut String,
                         fields: &mut HashMap<String, Vec<String>>| {
            if let Some(n) = name.take() {
                let unfolded = unfold_header(value);
                fields.entry(n.to_ascii_lowercase()).or_default().push(unfolded);
                value.clear();
            }
        };

        for line in headers_text.lines() {
            if line.is_empty() {
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                // Continuation of previous header
                current_value.push('\n');
                current_value.push_str(line);
            } else {
                flush(&mut current_name, &mut current_value, &mut fields);

                if let Some(colon_pos) = line.find(':') {
                    let name = line[..colon_pos].trim();
                    let value = line[colon_pos + 1..].trim_start();
                    current_name = Some(name.to_string());
                    current_value = value.to_string();
                }
            }
        }
        flush(&mut current_name, &mut current_value, &mut fields);

        Self { fields }
    }

    /// First value of the named header, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// Number of occurrences of the named header
    pub fn count(&self, name: &str) -> usize {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map_or(0, |v| v.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_article_crlf() {
        let (head, body) = split_article("Subject: x\r\nFrom: y\r\n\r\nbody text");
        assert_eq!(head, "Subject: x\r\nFrom: y");
        assert_eq!(body, "body text");
    }

    #[test]
    fn test_split_article_lf() {
        let (head, body) = split_article("Subject: x\n\nbody");
        assert_eq!(head, "Subject: x");
        assert_eq!(body, "body");
    }

    #[test]
    fn test_split_article_headers_only() {
        let (head, body) = split_article("Subject: x\r\nFrom: y");
        assert_eq!(head, "Subject: x\r\nFrom: y");
        assert_eq!(body, "");
    }

    #[test]
    fn test_parse_comma_list() {
        let groups = parse_comma_list("alt.test, comp.lang.rust ,news.admin");
        assert_eq!(groups, vec!["alt.test", "comp.lang.rust", "news.admin"]);
    }

    #[test]
    fn test_parse_comma_list_empty_entries() {
        let groups = parse_comma_list("alt.test,,comp.misc,");
        assert_eq!(groups, vec!["alt.test", "comp.misc"]);
    }

    #[test]
    fn test_parse_message_id_list() {
        let refs = parse_message_id_list("<a@x>  <b@y>\t<c@z>");
        assert_eq!(refs, vec!["<a@x>", "<b@y>", "<c@z>"]);
    }

    #[test]
    fn test_extract_message_id() {
        assert_eq!(extract_message_id("<a@x>"), Some("<a@x>"));
        assert_eq!(extract_message_id("cancel <a@x> now"), Some("<a@x>"));
        assert_eq!(extract_message_id("no id here"), None);
        assert_eq!(extract_message_id("<unterminated"), None);
    }

    #[test]
    fn test_unfold_header() {
        assert_eq!(unfold_header("plain value"), "plain value");
        assert_eq!(unfold_header("first\n second"), "first second");
        assert_eq!(unfold_header("first\r\n\tsecond"), "first second");
    }

    #[test]
    fn test_header_scan_basic() {
        let scan = HeaderScan::parse("Subject: hello\r\nFrom: a@b\r\nX-Thing: 1");
        assert_eq!(scan.get("subject"), Some("hello"));
        assert_eq!(scan.get("SUBJECT"), Some("hello"));
        assert_eq!(scan.get("from"), Some("a@b"));
        assert_eq!(scan.count("x-thing"), 1);
        assert_eq!(scan.count("missing"), 0);
    }

    #[test]
    fn test_header_scan_folded() {
        let scan = HeaderScan::parse("References: <a@x>\r\n <b@y>\r\nSubject: s");
        assert_eq!(scan.get("references"), Some("<a@x> <b@y>"));
    }

    #[test]
    fn test_header_scan_duplicates_counted() {
        let scan = HeaderScan::parse("Message-ID: <1@x>\r\nMessage-ID: <2@x>");
        assert_eq!(scan.count("message-id"), 2);
        // First occurrence wins for get()
        assert_eq!(scan.get("message-id"), Some("<1@x>"));
    }
}
