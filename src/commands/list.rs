//! LIST family commands and parsers

use crate::commands::group::ActiveGroup;
use crate::error::{Result, SpoolError};
use crate::response::NntpResponse;

/// Build LIST ACTIVE command (RFC 3977 §7.6.3)
///
/// Lists all newsgroups carried by the server with their watermarks.
pub fn list_active() -> &'static str {
    "LIST ACTIVE\r\n"
}

/// Build LIST ACTIVE command with a wildmat pattern (RFC 3977 §7.6.3)
pub fn list_active_pattern(pattern: &str) -> String {
    format!("LIST ACTIVE {}\r\n", pattern)
}

/// Build LIST NEWSGROUPS command (RFC 3977 §7.6.6)
///
/// Lists newsgroup descriptions, one "name description" line per group.
pub fn list_newsgroups() -> &'static str {
    "LIST NEWSGROUPS\r\n"
}

/// Parse LIST ACTIVE response into ActiveGroup entries
///
/// Same line format as NEWGROUPS: "group high low status".
pub fn parse_list_active_response(response: NntpResponse) -> Result<Vec<ActiveGroup>> {
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

        groups.push(ActiveGroup {
            name: parts[0].to_string(),
            high: parts[1].parse().unwrap_or(0),
            low: parts[2].parse().unwrap_or(0),
            status: parts[3].to_string(),
        });
    }

    Ok(groups)
}

/// Newsgroup description from LIST NEWSGROUPS
#[derive(Debug, Clone)]
pub struct GroupDescription {
    /// Newsgroup name
    pub name: String,
    /// Free-text description (may be empty)
    pub description: String,
}

/// Parse LIST NEWSGROUPS response into descriptions
///
/// Line format: "name<whitespace>description", description runs to end of
/// line and may itself contain whitespace.
pub fn parse_list_newsgroups_response(response: NntpResponse) -> Result<Vec<GroupDescription>> {
    if !response.is_success() {
        return Err(SpoolError::Protocol {
            code: response.code,
            message: response.message,
        });
    }

    let mut descriptions = Vec::new();
    for line in &response.lines {
        let mut split = line.splitn(2, char::is_whitespace);
        let Some(name) = split.next() else { continue };
        if name.is_empty() {
            continue;
        }
        let description = split.next().unwrap_or("").trim().to_string();
        descriptions.push(GroupDescription {
            name: name.to_string(),
            description,
        });
    }

    Ok(descriptions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_commands() {
        assert_eq!(list_active(), "LIST ACTIVE\r\n");
        assert_eq!(list_active_pattern("comp.*"), "LIST ACTIVE comp.*\r\n");
        assert_eq!(list_newsgroups(), "LIST NEWSGROUPS\r\n");
    }

    #[test]
    fn test_parse_list_active() {
        let response = NntpResponse {
            code: 215,
            message: "list of newsgroups follows".to_string(),
            lines: vec![
                "alt.test 3000 1 y".to_string(),
                "news.admin 99 10 m".to_string(),
            ],
        };

        let groups = parse_list_active_response(response).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "alt.test");
        assert_eq!(groups[1].status, "m");
    }

    #[test]
    fn test_parse_list_newsgroups() {
        let response = NntpResponse {
            code: 215,
            message: "descriptions follow".to_string(),
            lines: vec![
                "alt.test\tTest postings go here".to_string(),
                "news.admin General administrivia".to_string(),
                "lonely.group".to_string(),
            ],
        };

        let descs = parse_list_newsgroups_response(response).unwrap();
        assert_eq!(descs.len(), 3);
        assert_eq!(descs[0].name, "alt.test");
        assert_eq!(descs[0].description, "Test postings go here");
        assert_eq!(descs[1].description, "General administrivia");
        assert_eq!(descs[2].description, "");
    }

    #[test]
    fn test_parse_list_active_error() {
        let response = NntpResponse {
            code: 502,
            message: "access denied".to_string(),
            lines: vec![],
        };
        assert!(parse_list_active_response(response).is_err());
    }
}
