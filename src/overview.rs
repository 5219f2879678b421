//! Per-group overview cache
//!
//! One `.overview` file per group directory: tab-separated
//! `artno subject from date msgid references bytes lines [Xref: ...]`
//! records sorted by article number. The index is derived data, never a
//! source of truth; every record can be rebuilt from the article file,
//! and any drift against the directory triggers reconciliation.

use crate::article::{self, HeaderScan};
use crate::error::{Result, SpoolError};
use std::collections::BTreeMap;
use std::fs::{self, File, FileTimes};
use std::io::{IoSlice, Write};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Index file name inside a group directory
pub const OVERVIEW_FILE: &str = ".overview";

/// One overview record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewLine {
    /// Article number (the file name in the group directory)
    pub number: u64,
    /// Subject header
    pub subject: String,
    /// From header
    pub from: String,
    /// Date header, as received
    pub date: String,
    /// Bracketed Message-ID
    pub message_id: String,
    /// References header (space-separated bracketed ids, may be empty)
    pub references: String,
    /// Article size in bytes
    pub bytes: u64,
    /// Body line count
    pub lines: u64,
    /// Xref value without the `Xref: ` prefix, when present
    pub xref: Option<String>,
}

/// Header values are embedded tab-separated, so stray separators must go
fn scrub(value: &str) -> String {
    value.replace(['\t', '\r', '\n'], " ")
}

impl OverviewLine {
    /// Serialize to the on-disk tab-separated form (no trailing newline)
    pub fn format(&self) -> String {
        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.number,
            self.subject,
            self.from,
            self.date,
            self.message_id,
            self.references,
            self.bytes,
            self.lines
        );
        if let Some(xref) = &self.xref {
            line.push_str("\tXref: ");
            line.push_str(xref);
        }
        line
    }

    /// Parse an on-disk overview line
    pub fn parse(line: &str) -> Result<Self> {
        if !validate_line(line) {
            return Err(SpoolError::BadOverviewLine(
                line.chars().take(120).collect(),
            ));
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let bad = || SpoolError::BadOverviewLine(line.chars().take(120).collect());
        Ok(Self {
            number: fields[0].parse().map_err(|_| bad())?,
            subject: fields[1].to_string(),
            from: fields[2].to_string(),
            date: fields[3].to_string(),
            message_id: fields[4].to_string(),
            references: fields[5].to_string(),
            bytes: fields[6].parse().map_err(|_| bad())?,
            lines: fields[7].parse().map_err(|_| bad())?,
            xref: fields
                .get(8)
                .and_then(|f| f.strip_prefix("Xref: "))
                .map(str::to_string),
        })
    }
}

/// Strict structural check of an overview line
///
/// Fixed tab-delimited field order, all-digit numeric fields, bracketed
/// Message-ID and References tokens, optional trailing `Xref: ` field.
/// The expiration engine runs this before trusting any cached record.
pub fn validate_line(line: &str) -> bool {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 || fields.len() > 9 {
        return false;
    }

    let all_digits =
        |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(fields[0]) || !all_digits(fields[6]) || !all_digits(fields[7]) {
        return false;
    }

    let msgid = fields[4];
    if !msgid.starts_with('<') || !msgid.ends_with('>') || msgid.len() < 3 {
        return false;
    }

    for token in fields[5].split_whitespace() {
        if !token.starts_with('<') || !token.ends_with('>') {
            return false;
        }
    }

    if let Some(extra) = fields.get(8) {
        if !extra.starts_with("Xref: ") {
            return false;
        }
    }

    true
}

/// Re-derive the overview record for one article file
///
/// Reads the folded headers out of the article and restores the file's
/// original access and modification times afterwards: building the index
/// must not disturb the timestamps expiry decides by.
pub fn build_line(path: &Path, number: u64) -> Result<OverviewLine> {
    let meta = fs::metadata(path)?;
    let accessed = meta.accessed().ok();
    let modified = meta.modified().ok();

    let contents = fs::read_to_string(path).or_else(|_| {
        // Non-UTF8 bodies still have parseable headers
        fs::read(path).map(|b| String::from_utf8_lossy(&b).into_owned())
    })?;
    let (headers, body) = article::split_article(&contents);
    let scan = HeaderScan::parse(headers);

    let line = OverviewLine {
        number,
        subject: scrub(scan.get("subject").unwrap_or("")),
        from: scrub(scan.get("from").unwrap_or("")),
        date: scrub(scan.get("date").unwrap_or("")),
        message_id: scan
            .get("message-id")
            .and_then(article::extract_message_id)
            .unwrap_or("<invalid@unknown>")
            .to_string(),
        references: scrub(scan.get("references").unwrap_or("")),
        bytes: meta.len(),
        lines: body.lines().count() as u64,
        xref: scan.get("xref").map(scrub),
    };

    // Reading bumped atime; put both stamps back
    if let (Some(accessed), Some(modified)) = (accessed, modified) {
        let times = FileTimes::new().set_accessed(accessed).set_modified(modified);
        match File::open(path).and_then(|f| f.set_times(times)) {
            Ok(()) => {}
            Err(e) => trace!("Cannot restore times on {}: {}", path.display(), e),
        }
    }

    Ok(line)
}

/// Loaded per-group overview index, sorted by article number
#[derive(Debug, Default)]
pub struct Overview {
    entries: Vec<OverviewLine>,
}

impl Overview {
    /// Load the index for a group directory, reconciling against reality
    ///
    /// Articles missing from the index are indexed on the fly; index
    /// entries whose file no longer exists are dropped; corrupt lines are
    /// discarded. If any drift was found (or the index was absent) the
    /// reconciled index is rewritten.
    pub fn load(group_dir: &Path) -> Result<Self> {
        let index_path = group_dir.join(OVERVIEW_FILE);
        let mut records: BTreeMap<u64, OverviewLine> = BTreeMap::new();
        let mut drift = !index_path.is_file();

        if let Ok(contents) = fs::read_to_string(&index_path) {
            for line in contents.lines() {
                match OverviewLine::parse(line) {
                    Ok(record) => {
                        records.insert(record.number, record);
                    }
                    Err(_) => {
                        warn!("Dropping corrupt overview line in {}", index_path.display());
                        drift = true;
                    }
                }
            }
        }

        // The directory is the truth the index must match
        let mut present: Vec<u64> = Vec::new();
        for entry in fs::read_dir(group_dir)? {
            let entry = entry?;
            let Some(number) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            if entry.file_type()?.is_file() {
                present.push(number);
            }
        }
        present.sort_unstable();

        for &number in &present {
            if !records.contains_key(&number) {
                trace!("Indexing {} on the fly", number);
                match build_line(&group_dir.join(number.to_string()), number) {
                    Ok(record) => {
                        records.insert(number, record);
                        drift = true;
                    }
                    Err(e) => warn!("Cannot index article {}: {}", number, e),
                }
            }
        }

        let stale: Vec<u64> = records
            .keys()
            .copied()
            .filter(|n| present.binary_search(n).is_err())
            .collect();
        for number in stale {
            trace!("Dropping overview entry for vanished article {}", number);
            records.remove(&number);
            drift = true;
        }

        let overview = Self {
            entries: records.into_values().collect(),
        };

        if drift {
            debug!("Overview drift in {}, rewriting index", group_dir.display());
            overview.persist(group_dir)?;
        }

        Ok(overview)
    }

    /// All records in ascending article-number order
    pub fn entries(&self) -> &[OverviewLine] {
        &self.entries
    }

    /// Binary search by article number
    pub fn find_by_number(&self, number: u64) -> Option<&OverviewLine> {
        self.entries
            .binary_search_by_key(&number, |e| e.number)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Lowest indexed article number
    pub fn low(&self) -> Option<u64> {
        self.entries.first().map(|e| e.number)
    }

    /// Highest indexed article number
    pub fn high(&self) -> Option<u64> {
        self.entries.last().map(|e| e.number)
    }

    /// Append a freshly stored article's record (kept sorted)
    pub fn push(&mut self, record: OverviewLine) {
        let pos = self
            .entries
            .partition_point(|e| e.number < record.number);
        self.entries.insert(pos, record);
    }

    /// Write the index: vectored write to a temp file, atomic rename
    ///
    /// Any write failure discards the temp file and leaves the previous
    /// index intact.
    pub fn persist(&self, group_dir: &Path) -> Result<()> {
        let index_path = group_dir.join(OVERVIEW_FILE);
        let tmp = group_dir.join(".overview.tmp");

        let write_result = (|| -> Result<()> {
            let mut file = File::create(&tmp)?;

            let lines: Vec<String> =
                self.entries.iter().map(|e| e.format() + "\n").collect();
            let mut slices: Vec<IoSlice<'_>> =
                lines.iter().map(|l| IoSlice::new(l.as_bytes())).collect();
            let mut remaining: &mut [IoSlice<'_>] = &mut slices;

            while !remaining.is_empty() {
                let n = file.write_vectored(remaining)?;
                if n == 0 {
                    return Err(SpoolError::Io(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "vectored overview write stalled",
                    )));
                }
                IoSlice::advance_slices(&mut remaining, n);
            }

            file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &index_path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            SpoolError::Io(e)
        })?;

        Ok(())
    }
}
