//! Group selection and newsgroup-discovery commands

use crate::error::{Result, SpoolError};
use crate::response::NntpResponse;

/// Build GROUP command
pub fn group(newsgroup: &str) -> String {
    format!("GROUP {}\r\n", newsgroup)
}

/// Build NEWGROUPS command (RFC 3977 §7.3)
///
/// Lists newsgroups created since the specified date/time.
/// Format: `NEWGROUPS yyyymmdd hhmmss GMT`
pub fn newgroups(date: &str, time: &str) -> String {
    format!("NEWGROUPS {} {} GMT\r\n", date, time)
}

/// Group information returned by the GROUP command
///
/// Contains article count and range information for a newsgroup. The
/// `first`/`last` bounds drive the fetch range reconciliation against the
/// recorded watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    /// Number of articles in the group
    pub count: u64,
    /// Number of the first article
    pub first: u64,
    /// Number of the last article
    pub last: u64,
}

/// Parse GROUP response to extract article count and range
///
/// Response format: "211 count first last group-name"
pub fn parse_group_response(response: NntpResponse) -> Result<GroupInfo> {
    if !response.is_success() {
        return Err(SpoolError::Protocol {
            code: response.code,
            message: response.message,
        });
    }

    let parts: Vec<&str> = response.message.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(SpoolError::InvalidResponse(response.message));
    }

    let count = parts[0]
        .parse()
        .map_err(|_| SpoolError::InvalidResponse(response.message.clone()))?;
    let first = parts[1]
        .parse()
        .map_err(|_| SpoolError::InvalidResponse(response.message.clone()))?;
    let last = parts[2]
        .parse()
        .map_err(|_| SpoolError::InvalidResponse(response.message.clone()))?;

    Ok(GroupInfo { count, first, last })
}

/// Active newsgroup entry from LIST ACTIVE or NEWGROUPS (RFC 3977 §7.6.3)
#[derive(Debug, Clone)]
pub struct ActiveGroup {
    /// Newsgroup name
    pub name: String,
    /// Highest article number
    pub high: u64,
    /// Lowest article number
    pub low: u64,
    /// Posting status:
    /// - "y" = posting allowed
    /// - "n" = posting not allowed
    /// - "m" = moderated
    /// - "=group.name" = alias to another group (RFC 6048)
    pub status: String,
}

impl ActiveGroup {
    /// Whether the status flag marks the group as moderated
    pub fn is_moderated(&self) -> bool {
        self.status == "m"
    }
}

/// Parse NEWGROUPS response into ActiveGroup entries (RFC 3977 §7.3)
///
/// NEWGROUPS returns the same format as LIST ACTIVE: "group high low status"
/// Example: "comp.lang.rust 12345 1000 y"
pub fn parse_newgroups_response(response: NntpResponse) -> Result<Vec<ActiveGroup>> {
    if !response.is_success() {
        return Err(SpoolError::Protocol {
            code: response.code,
            message: response.message,
        });
    }

    let mut groups = Vec::new();
    for line in &response.lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue; // Skip malformed lines
        }

        let high = parts[1].parse().unwrap_or(0);
        let low = parts[2].parse().unwrap_or(0);
        // Status can be multi-character (e.g., "=group.name" alias)
        let status = parts[3].to_string();

        groups.push(ActiveGroup {
            name: parts[0].to_string(),
            high,
            low,
            status,
        });
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_response() {
        let response = NntpResponse {
            code: 211,
            message: "3000 1 3000 alt.test".to_string(),
            lines: vec![],
        };

        let info = parse_group_response(response).unwrap();
        assert_eq!(info.count, 3000);
        assert_eq!(info.first, 1);
        assert_eq!(info.last, 3000);
    }

    #[test]
    fn test_parse_group_response_no_such_group() {
        let response = NntpResponse {
            code: 411,
            message: "no such newsgroup".to_string(),
            lines: vec![],
        };
        assert!(parse_group_response(response).is_err());
    }

    #[test]
    fn test_parse_newgroups_response() {
        let response = NntpResponse {
            code: 231,
            message: "list of new newsgroups follows".to_string(),
            lines: vec![
                "alt.test 3000 1 y".to_string(),
                "comp.moderated 500 10 m".to_string(),
                "broken-line".to_string(),
            ],
        };

        let groups = parse_newgroups_response(response).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "alt.test");
        assert_eq!(groups[0].high, 3000);
        assert_eq!(groups[0].low, 1);
        assert!(!groups[0].is_moderated());
        assert!(groups[1].is_moderated());
    }

    #[test]
    fn test_newgroups_command_format() {
        assert_eq!(
            newgroups("20240301", "123456"),
            "NEWGROUPS 20240301 123456 GMT\r\n"
        );
    }
}
