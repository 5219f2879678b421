//! Newsgroup registry (active table)
//!
//! Sorted, case-insensitively keyed table of every known newsgroup with its
//! article-number watermarks. Persisted as the flat "active" file:
//! one `name last first age description` line per group, description
//! running to end of line, `-x-` standing in for "no description". The
//! on-disk field order (`last` before `first`) is the reverse of the
//! in-memory pair; existing spools depend on it.

use crate::error::{Result, SpoolError};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Placeholder stored when a group has no description
pub const NO_DESCRIPTION: &str = "-x-";

/// Article numbers below this are reserved; watermarks are clamped here on
/// load so a corrupt zero never propagates into allocation.
const MIN_ARTICLE: u64 = 1;

/// One registered newsgroup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Unique case-insensitive newsgroup name
    pub name: String,
    /// Lowest occupied article number
    pub first: u64,
    /// Highest occupied article number
    pub last: u64,
    /// Discovery time (unix epoch seconds); drives NEWGROUPS queries
    pub age: u64,
    /// Free-text description (empty = unknown)
    pub desc: String,
    /// Moderation flag for local groups; supplied by the local-groups
    /// collaborator each run, not persisted in the active file
    pub moderated: bool,
}

impl GroupEntry {
    /// Cached article count; 0 means unknown and is recomputed lazily from
    /// the watermarks
    pub fn count(&self) -> u64 {
        if self.last >= self.first {
            self.last - self.first + 1
        } else {
            0
        }
    }
}

/// ASCII case-insensitive name ordering used for the sorted table
fn cmp_names(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|b| b.to_ascii_lowercase())
        .cmp(b.bytes().map(|b| b.to_ascii_lowercase()))
}

/// Number of uppercase ASCII letters in a name (case-conflict tie-break)
fn uppercase_count(name: &str) -> usize {
    name.bytes().filter(|b| b.is_ascii_uppercase()).count()
}

/// The newsgroup registry
///
/// Inserts are queued and only become visible after [`merge`](Self::merge)
/// re-sorts the table; `find` runs a binary search over the sorted array.
#[derive(Debug, Default)]
pub struct ActiveTable {
    groups: Vec<GroupEntry>,
    pending: Vec<GroupEntry>,
}

impl ActiveTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of merged entries
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the merged table is empty
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterate merged entries in name order
    pub fn iter(&self) -> impl Iterator<Item = &GroupEntry> {
        self.groups.iter()
    }

    /// Queue a newly discovered group
    ///
    /// No-op if a group of that name (case-insensitive) is already merged
    /// or queued. [`merge`](Self::merge) must run before the entry becomes
    /// findable.
    pub fn insert(
        &mut self,
        name: &str,
        first: u64,
        last: u64,
        age: u64,
        desc: impl Into<String>,
    ) {
        if self.find(name).is_some() {
            return;
        }
        if self
            .pending
            .iter()
            .any(|g| cmp_names(&g.name, name) == Ordering::Equal)
        {
            return;
        }
        self.pending.push(GroupEntry {
            name: name.to_string(),
            first: first.max(MIN_ARTICLE),
            last: last.max(MIN_ARTICLE),
            age,
            desc: desc.into(),
            moderated: false,
        });
    }

    /// Append all queued inserts and re-sort the table
    pub fn merge(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.groups.append(&mut self.pending);
        self.groups.sort_by(|a, b| cmp_names(&a.name, &b.name));
    }

    /// Binary search by case-insensitive name
    pub fn find(&self, name: &str) -> Option<&GroupEntry> {
        self.groups
            .binary_search_by(|g| cmp_names(&g.name, name))
            .ok()
            .map(|i| &self.groups[i])
    }

    /// Mutable lookup, for watermark updates during store and expire
    pub fn find_mut(&mut self, name: &str) -> Option<&mut GroupEntry> {
        self.groups
            .binary_search_by(|g| cmp_names(&g.name, name))
            .ok()
            .map(move |i| &mut self.groups[i])
    }

    /// Drop case-insensitive duplicates
    ///
    /// When two entries differ only in letter case, the variant with fewer
    /// uppercase letters survives (deterministic tie-break; equal counts
    /// keep the first in sort order).
    pub fn validate(&mut self) {
        self.groups.dedup_by(|b, a| {
            // dedup_by sees (next, kept); true removes `b`
            if cmp_names(&a.name, &b.name) != Ordering::Equal {
                return false;
            }
            if uppercase_count(&b.name) < uppercase_count(&a.name) {
                warn!(
                    "Duplicate newsgroup {} / {}: keeping {}",
                    a.name, b.name, b.name
                );
                std::mem::swap(a, b);
            } else {
                warn!(
                    "Duplicate newsgroup {} / {}: keeping {}",
                    a.name, b.name, a.name
                );
            }
            true
        });
    }

    /// Load the persisted active file
    ///
    /// A truncated or unparsable trailing line is logged and parsing stops
    /// there; everything read so far stays valid. Watermarks are clamped to
    /// a minimum of 1.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut table = Self::new();

        for line in contents.lines() {
            let mut fields = line.splitn(5, ' ');
            let (Some(name), Some(last), Some(first), Some(age)) = (
                fields.next(),
                fields.next(),
                fields.next(),
                fields.next(),
            ) else {
                warn!("Truncated active file line, stopping: {:?}", line);
                break;
            };

            let (Ok(last), Ok(first), Ok(age)) =
                (last.parse::<u64>(), first.parse::<u64>(), age.parse::<u64>())
            else {
                warn!("Unparsable active file line, stopping: {:?}", line);
                break;
            };

            let desc = match fields.next() {
                None | Some(NO_DESCRIPTION) => String::new(),
                Some(d) => d.to_string(),
            };

            table.groups.push(GroupEntry {
                name: name.to_string(),
                first: first.max(MIN_ARTICLE),
                last: last.max(MIN_ARTICLE),
                age,
                desc,
                moderated: false,
            });
        }

        // The file is written sorted, but guard against hand edits
        table.groups.sort_by(|a, b| cmp_names(&a.name, &b.name));
        table.validate();

        debug!("Loaded {} newsgroups from {}", table.len(), path.display());
        Ok(table)
    }

    /// Persist the table
    ///
    /// Writes a sibling temp file in full and renames it over the active
    /// file. On any write error the temp file is discarded and the old
    /// file remains untouched; a partial active file is never visible.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");

        let write_result = (|| -> Result<()> {
            let file = File::create(&tmp)?;
            let mut out = BufWriter::new(file);
            for g in &self.groups {
                let desc = if g.desc.is_empty() {
                    NO_DESCRIPTION
                } else {
                    g.desc.as_str()
                };
                writeln!(out, "{} {} {} {} {}", g.name, g.last, g.first, g.age, desc)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SpoolError::Io(e)
        })?;

        debug!("Persisted {} newsgroups to {}", self.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_with(names: &[&str]) -> ActiveTable {
        let mut t = ActiveTable::new();
        for (i, n) in names.iter().enumerate() {
            t.insert(n, 1, 1 + i as u64, 1000 + i as u64, "");
        }
        t.merge();
        t
    }

    #[test]
    fn test_insert_requires_merge() {
        let mut t = ActiveTable::new();
        t.insert("alt.test", 1, 10, 99, "testing");
        assert!(t.find("alt.test").is_none());
        t.merge();
        assert!(t.find("alt.test").is_some());
    }

    #[test]
    fn test_insert_case_insensitive_noop() {
        let mut t = table_with(&["alt.test"]);
        t.insert("Alt.TEST", 1, 50, 0, "");
        t.merge();
        assert_eq!(t.len(), 1);
        assert_eq!(t.find("ALT.test").unwrap().name, "alt.test");
    }

    #[test]
    fn test_insert_pending_duplicate_noop() {
        let mut t = ActiveTable::new();
        t.insert("alt.test", 1, 1, 0, "");
        t.insert("Alt.Test", 1, 1, 0, "");
        t.merge();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_find_binary_search_order() {
        let t = table_with(&["news.admin", "alt.test", "comp.lang.rust"]);
        assert!(t.find("alt.test").is_some());
        assert!(t.find("comp.lang.rust").is_some());
        assert!(t.find("news.admin").is_some());
        assert!(t.find("news.unknown").is_none());

        let names: Vec<_> = t.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["alt.test", "comp.lang.rust", "news.admin"]);
    }

    #[test]
    fn test_validate_keeps_fewer_uppercase() {
        let mut t = ActiveTable::new();
        t.groups.push(GroupEntry {
            name: "Alt.Test".to_string(),
            first: 1,
            last: 5,
            age: 0,
            desc: String::new(),
            moderated: false,
        });
        t.groups.push(GroupEntry {
            name: "alt.test".to_string(),
            first: 1,
            last: 9,
            age: 0,
            desc: String::new(),
            moderated: false,
        });
        t.groups.sort_by(|a, b| cmp_names(&a.name, &b.name));
        t.validate();

        assert_eq!(t.len(), 1);
        assert_eq!(t.iter().next().unwrap().name, "alt.test");
    }

    #[test]
    fn test_persist_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active");

        let mut t = ActiveTable::new();
        t.insert("alt.test", 3, 17, 1234, "test postings");
        t.insert("comp.lang.rust", 1, 500, 5678, "");
        t.merge();
        t.persist(&path).unwrap();

        let loaded = ActiveTable::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);

        let g = loaded.find("alt.test").unwrap();
        assert_eq!((g.first, g.last, g.age), (3, 17, 1234));
        assert_eq!(g.desc, "test postings");

        let g = loaded.find("comp.lang.rust").unwrap();
        assert_eq!((g.first, g.last, g.age), (1, 500, 5678));
        assert_eq!(g.desc, "");
    }

    #[test]
    fn test_on_disk_field_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active");

        let mut t = ActiveTable::new();
        t.insert("alt.test", 3, 17, 1234, "");
        t.merge();
        t.persist(&path).unwrap();

        // name last first age desc - last precedes first on disk
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "alt.test 17 3 1234 -x-\n");
    }

    #[test]
    fn test_load_tolerates_truncated_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active");
        fs::write(&path, "alt.test 17 3 1234 -x-\ncomp.misc 9 1").unwrap();

        let t = ActiveTable::load(&path).unwrap();
        assert_eq!(t.len(), 1);
        assert!(t.find("alt.test").is_some());
        assert!(t.find("comp.misc").is_none());
    }

    #[test]
    fn test_load_clamps_watermarks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active");
        fs::write(&path, "alt.test 0 0 99 -x-\n").unwrap();

        let t = ActiveTable::load(&path).unwrap();
        let g = t.find("alt.test").unwrap();
        assert_eq!(g.first, 1);
        assert_eq!(g.last, 1);
    }

    #[test]
    fn test_count_from_watermarks() {
        let mut t = table_with(&[]);
        t.insert("alt.test", 3, 7, 0, "");
        t.merge();
        assert_eq!(t.find("alt.test").unwrap().count(), 5);
    }

    #[test]
    fn test_persist_failure_leaves_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active");

        let t = table_with(&["alt.test"]);
        t.persist(&path).unwrap();
        let original = fs::read_to_string(&path).unwrap();

        // Persisting into a directory that vanished must fail cleanly
        let gone = dir.path().join("missing").join("active");
        assert!(t.persist(&gone).is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }
}
