//! Header filter chain
//!
//! Kill patterns applied to the captured header block before an article is
//! accepted. A match rejects the article as killed; that is a policy
//! outcome, not an error. Patterns are plain regular expressions, one per
//! line in the filter file, `#` starting a comment.

use crate::error::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Compiled kill patterns
#[derive(Debug, Default)]
pub struct FilterChain {
    patterns: Vec<Regex>,
}

impl FilterChain {
    /// Empty chain (kills nothing)
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a list of patterns
    ///
    /// Invalid patterns are logged and skipped; one bad line must not
    /// disable filtering altogether.
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chain = Self::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match Regex::new(pattern) {
                Ok(re) => chain.patterns.push(re),
                Err(e) => warn!("Skipping invalid filter pattern {:?}: {}", pattern, e),
            }
        }
        chain
    }

    /// Load a filter file: one pattern per line, `#` comments, blank lines
    /// ignored
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let chain = Self::from_patterns(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        );
        debug!(
            "Loaded {} filter pattern(s) from {}",
            chain.patterns.len(),
            path.display()
        );
        Ok(chain)
    }

    /// Whether any pattern matches the header block
    pub fn kills(&self, header_block: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(header_block))
    }

    /// Whether the chain has no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chain_kills_nothing() {
        let chain = FilterChain::new();
        assert!(chain.is_empty());
        assert!(!chain.kills("Subject: anything\nFrom: anyone\n"));
    }

    #[test]
    fn test_matching_pattern_kills() {
        let chain = FilterChain::from_patterns(["(?i)^subject:.*viagra"]);
        assert!(chain.kills("From: spammer\nSubject: CHEAP VIAGRA\n"));
        assert!(!chain.kills("From: friend\nSubject: lunch?\n"));
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let chain = FilterChain::from_patterns(["[unclosed", "^From: bad@"]);
        assert!(!chain.is_empty());
        assert!(chain.kills("From: bad@spam.example\nSubject: x\n"));
    }

    #[test]
    fn test_load_filter_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("filters");
        fs::write(&path, "# kill test-postings crossposted everywhere\n^Newsgroups:.*,.*,.*,.*,\n\n^Subject: \\$\\$\\$\n").unwrap();

        let chain = FilterChain::load(&path).unwrap();
        assert!(chain.kills("Subject: $$$ make money\n"));
        assert!(!chain.kills("Subject: regular post\n"));
    }
}
