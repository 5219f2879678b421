//! Per-server watermark journal
//!
//! One file per upstream server (`journals/<host[:port]>`) of
//! `groupname articlenumber` lines: the last successfully processed
//! upstream article number per group. Updates accumulate in memory and in
//! a sibling `.new` file; the new journal is promoted over the old one
//! only once every group of the server has been attempted, so a mid-run
//! crash leaves the previous journal valid.

use crate::error::Result;
use crate::spool::Spool;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Loaded journal plus this run's pending updates
#[derive(Debug)]
pub struct WatermarkJournal {
    path: PathBuf,
    marks: HashMap<String, u64>,
    updates: BTreeMap<String, u64>,
}

impl WatermarkJournal {
    /// Load the journal for an upstream server (missing file = empty)
    pub fn load(spool: &Spool, server_key: &str) -> Result<Self> {
        let path = spool.journal_path(server_key);
        let mut marks = HashMap::new();

        match fs::read_to_string(&path) {
            Ok(contents) => {
                for line in contents.lines() {
                    let mut fields = line.split_whitespace();
                    let (Some(group), Some(number)) = (fields.next(), fields.next()) else {
                        warn!("Skipping malformed journal line: {:?}", line);
                        continue;
                    };
                    match number.parse::<u64>() {
                        Ok(n) => {
                            marks.insert(group.to_string(), n);
                        }
                        Err(_) => warn!("Skipping malformed journal line: {:?}", line),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!("Loaded {} watermark(s) from {}", marks.len(), path.display());
        Ok(Self {
            path,
            marks,
            updates: BTreeMap::new(),
        })
    }

    /// Last successfully processed upstream article number for a group
    pub fn mark(&self, group: &str) -> Option<u64> {
        self.updates
            .get(group)
            .or_else(|| self.marks.get(group))
            .copied()
    }

    /// Record a new (or retry) watermark for a group processed this run
    pub fn record(&mut self, group: &str, number: u64) {
        self.updates.insert(group.to_string(), number);
    }

    /// Promote the new journal over the old one
    ///
    /// Groups untouched this run pass through with their old watermarks.
    /// Call only after every group of this server has been attempted; an
    /// interrupted run simply never promotes and the old journal stays
    /// authoritative.
    pub fn promote(&self) -> Result<()> {
        let tmp = self.path.with_extension("new");

        let mut merged: BTreeMap<&str, u64> = self
            .marks
            .iter()
            .map(|(g, &n)| (g.as_str(), n))
            .collect();
        for (group, &number) in &self.updates {
            merged.insert(group.as_str(), number);
        }

        let write_result = (|| -> Result<()> {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for (group, number) in &merged {
                writeln!(out, "{} {}", group, number)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &self.path)?;
        debug!(
            "Promoted journal {} ({} group(s))",
            self.path.display(),
            merged.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn open_spool(dir: &tempfile::TempDir) -> Spool {
        Spool::open(
            dir.path(),
            Arc::new(RelayConfig::new("relay.example.com")),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_journal() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        let journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        assert_eq!(journal.mark("alt.test"), None);
        spool.close().unwrap();
    }

    #[test]
    fn test_record_promote_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        let mut journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        journal.record("alt.test", 120);
        journal.record("comp.misc", 88);
        // Recording is visible before promotion
        assert_eq!(journal.mark("alt.test"), Some(120));
        journal.promote().unwrap();

        let journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        assert_eq!(journal.mark("alt.test"), Some(120));
        assert_eq!(journal.mark("comp.misc"), Some(88));
        spool.close().unwrap();
    }

    #[test]
    fn test_unpromoted_updates_are_lost() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        let mut journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        journal.record("alt.test", 50);
        journal.promote().unwrap();

        // A run that records but never promotes leaves the old journal valid
        let mut journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        journal.record("alt.test", 999);
        drop(journal);

        let journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        assert_eq!(journal.mark("alt.test"), Some(50));
        spool.close().unwrap();
    }

    #[test]
    fn test_untouched_groups_pass_through() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        let mut journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        journal.record("alt.test", 50);
        journal.record("comp.misc", 10);
        journal.promote().unwrap();

        let mut journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        journal.record("alt.test", 70);
        journal.promote().unwrap();

        let journal = WatermarkJournal::load(&spool, "news.example.com").unwrap();
        assert_eq!(journal.mark("alt.test"), Some(70));
        assert_eq!(journal.mark("comp.misc"), Some(10));
        spool.close().unwrap();
    }

    #[test]
    fn test_journals_are_per_server() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        let mut journal = WatermarkJournal::load(&spool, "serverA").unwrap();
        journal.record("alt.test", 11);
        journal.promote().unwrap();

        let journal = WatermarkJournal::load(&spool, "serverB").unwrap();
        assert_eq!(journal.mark("alt.test"), None);
        spool.close().unwrap();
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        fs::write(
            spool.journal_path("srv"),
            "alt.test 42\nbroken\ncomp.misc notanumber\nnews.admin 7\n",
        )
        .unwrap();

        let journal = WatermarkJournal::load(&spool, "srv").unwrap();
        assert_eq!(journal.mark("alt.test"), Some(42));
        assert_eq!(journal.mark("news.admin"), Some(7));
        assert_eq!(journal.mark("comp.misc"), None);
        spool.close().unwrap();
    }
}
