//! Content-addressed article store with hardlink fan-out
//!
//! Every article has exactly one physical copy on disk. It is reachable
//! through its Message-ID bucket path (`message.id/NNN/<sanitized-id>`)
//! and through one numeric path per newsgroup it was accepted into, all
//! hardlinks to the same inode. The filesystem link count is the reference
//! counter: when the last link goes, the bytes go.
//!
//! The bucket hash and the sanitized Message-ID determine on-disk
//! placement and must stay stable forever; existing spools depend on them.

use crate::article::{self, HeaderScan};
use crate::error::{Result, SpoolError};
use crate::filter::FilterChain;
use crate::queue;
use crate::spool::Spool;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Number of Message-ID store buckets; folded into `[1, 999]`
pub const BUCKET_COUNT: u32 = 999;

/// Closed result set of a store operation
///
/// Policy rejections are normal branches with their own counters, not
/// errors; only OS failures surface as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Article accepted; lists the synthesized Xref pairs
    Stored {
        /// Canonical Message-ID of the stored article
        message_id: String,
        /// (group, article number) pairs the article was filed under
        xref: Vec<(String, u64)>,
    },
    /// The Message-ID already exists in the store
    Duplicate,
    /// Required headers missing or duplicated; article discarded
    Malformed(String),
    /// Rejected by the filter chain, the size cap, or lack of any
    /// eligible newsgroup
    Killed,
}

/// Sanitize a Message-ID for use as a file name
///
/// Truncates after the first `>` and maps path-hostile bytes away:
/// `/` becomes `@`, control bytes are dropped. The result is the on-disk
/// file name, so this mapping is as placement-critical as the hash.
pub fn sanitize_message_id(msgid: &str) -> String {
    let mut out = String::with_capacity(msgid.len());
    for c in msgid.chars() {
        match c {
            '/' => out.push('@'),
            c if c.is_control() => {}
            c => out.push(c),
        }
        if c == '>' {
            break;
        }
    }
    out
}

/// Hash a sanitized Message-ID into its store bucket
///
/// Running sum of byte values plus position-weighted increments, folded
/// into `[1, 999]`. Reproduced exactly from the historical spool format:
/// the result decides where an article lives, so it must never change.
pub fn message_id_hash(sanitized: &str) -> u32 {
    let mut hash: u32 = 0;
    for (i, b) in sanitized.bytes().enumerate() {
        hash = hash.wrapping_add(b as u32);
        hash = hash.wrapping_add(i as u32 + 1);
    }
    (hash % BUCKET_COUNT) + 1
}

/// Canonical path of a Message-ID inside the spool
pub fn canonical_path(spool: &Spool, msgid: &str) -> PathBuf {
    let sanitized = sanitize_message_id(msgid);
    let bucket = message_id_hash(&sanitized);
    spool
        .message_id_root()
        .join(format!("{:03}", bucket))
        .join(sanitized)
}

/// Whether the Message-ID exists in the store as a regular file
pub fn exists(spool: &Spool, msgid: &str) -> bool {
    canonical_path(spool, msgid).is_file()
}

/// Resolve a Message-ID to its canonical path, if stored
pub fn lookup(spool: &Spool, msgid: &str) -> Option<PathBuf> {
    let path = canonical_path(spool, msgid);
    path.is_file().then_some(path)
}

/// Atomically claim a Message-ID by hardlinking `source` into the store
///
/// First link wins: a concurrent duplicate fails with `Ok(false)`.
pub fn allocate(spool: &Spool, msgid: &str, source: &Path) -> Result<bool> {
    let canonical = canonical_path(spool, msgid);
    if let Some(parent) = canonical.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::hard_link(source, &canonical) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(SpoolError::Io(e)),
    }
}

/// Remove a Message-ID from the store
///
/// Returns whether an entry was removed. The article's bytes survive as
/// long as per-group links remain.
pub fn deallocate(spool: &Spool, msgid: &str) -> Result<bool> {
    let canonical = canonical_path(spool, msgid);
    match fs::remove_file(&canonical) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SpoolError::Io(e)),
    }
}

/// Staged article file, removed on drop unless the temp name was already
/// unlinked after a successful store
struct StagedArticle {
    path: PathBuf,
    file: File,
}

impl StagedArticle {
    fn create(spool: &Spool) -> Result<Self> {
        let path = spool.root().join(format!(
            ".in.{}.{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self { path, file })
    }
}

impl Drop for StagedArticle {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Strip the line terminator from a raw line
fn trim_line_ending(line: &mut Vec<u8>) {
    if line.ends_with(b"\r\n") {
        line.truncate(line.len() - 2);
    } else if line.ends_with(b"\n") {
        line.truncate(line.len() - 1);
    }
}

/// Highest numeric file name in a group directory; recovers the true
/// watermark when the active table has gone stale
fn scan_group_high(dir: &Path) -> u64 {
    let mut high = 0;
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Some(n) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u64>().ok())
            {
                high = high.max(n);
            }
        }
    }
    high
}

/// Store an article read from `reader`
///
/// The reader yields a complete article (headers, blank line, body). With
/// `wire_format` the body is dot-stuffed and terminated by a lone dot,
/// which is undone here; otherwise the article runs to EOF.
///
/// Every exit path cleans up the staging file; on abort all per-group
/// links created so far are unlinked too.
pub fn store_article<R: BufRead>(
    spool: &mut Spool,
    mut reader: R,
    wire_format: bool,
    filters: Option<&FilterChain>,
    max_bytes: Option<u64>,
) -> Result<StoreOutcome> {
    let mut staged = StagedArticle::create(spool)?;
    let mut header_block = String::new();
    let mut bytes_written: u64 = 0;
    let mut skipping_xref = false;

    // Step 1: copy header lines to the staging file, stripping any
    // existing Xref (with its continuation lines) and capturing the block
    // for inspection
    loop {
        let mut line = Vec::with_capacity(256);
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break; // headers ran into EOF; cardinality checks decide below
        }
        trim_line_ending(&mut line);

        if wire_format && line == b"." {
            break;
        }
        if wire_format && line.starts_with(b"..") {
            line.remove(0);
        }

        if line.is_empty() {
            break; // end of headers
        }

        let is_continuation = line[0] == b' ' || line[0] == b'\t';
        if is_continuation && skipping_xref {
            continue;
        }
        if !is_continuation {
            skipping_xref = line
                .to_ascii_lowercase()
                .starts_with(b"xref:");
            if skipping_xref {
                continue;
            }
        }

        staged.file.write_all(&line)?;
        staged.file.write_all(b"\n")?;
        bytes_written += line.len() as u64 + 1;

        header_block.push_str(&String::from_utf8_lossy(&line));
        header_block.push('\n');
    }

    let scan = HeaderScan::parse(&header_block);

    // Capture identity headers; duplication is as fatal as absence
    if scan.count("message-id") != 1 {
        return Ok(StoreOutcome::Malformed("Message-ID".to_string()));
    }
    if scan.count("newsgroups") != 1 {
        return Ok(StoreOutcome::Malformed("Newsgroups".to_string()));
    }
    let Some(message_id) =
        scan.get("message-id").and_then(article::extract_message_id)
    else {
        return Ok(StoreOutcome::Malformed("Message-ID".to_string()));
    };
    let message_id = message_id.to_string();
    let newsgroups = scan.get("newsgroups").unwrap_or("").to_string();

    // Step 2: require exactly one occurrence of each mandatory header
    for header in ["From", "Date", "Subject", "Path"] {
        if scan.count(header) != 1 {
            return Ok(StoreOutcome::Malformed(header.to_string()));
        }
    }

    // A cancel or supersede also removes the referenced older article
    let mut cancel_target: Option<String> = None;
    if let Some(control) = scan.get("control") {
        let mut words = control.split_whitespace();
        if words.next().is_some_and(|w| w.eq_ignore_ascii_case("cancel")) {
            cancel_target = words
                .next()
                .and_then(article::extract_message_id)
                .map(str::to_string);
        }
    }
    if cancel_target.is_none() {
        if let Some(superseded) = scan.get("supersedes") {
            cancel_target = article::extract_message_id(superseded).map(str::to_string);
        }
    }

    // Step 3: duplicate check against the store
    if exists(spool, &message_id) {
        trace!("Duplicate article {}", message_id);
        return Ok(StoreOutcome::Duplicate);
    }

    // Step 4: filter chain over the captured header block
    if let Some(chain) = filters {
        if chain.kills(&header_block) {
            debug!("Article {} killed by filter", message_id);
            return Ok(StoreOutcome::Killed);
        }
    }

    // Step 5: hardlink the staged article into each eligible group under
    // the next article number
    let mut groups: Vec<String> = Vec::new();
    for g in article::parse_comma_list(&newsgroups) {
        if !groups.iter().any(|seen| seen.eq_ignore_ascii_case(&g)) {
            groups.push(g);
        }
    }

    let mut links: Vec<PathBuf> = Vec::new();
    let mut xref: Vec<(String, u64)> = Vec::new();

    let rollback = |links: &[PathBuf]| {
        for link in links {
            let _ = fs::remove_file(link);
        }
    };

    for group in &groups {
        if !spool.is_eligible(group) || spool.active.find(group).is_none() {
            continue;
        }
        let Some(group_dir) = spool.group_dir(group) else {
            continue;
        };
        if let Err(e) = fs::create_dir_all(&group_dir) {
            rollback(&links);
            return Err(SpoolError::Io(e));
        }

        loop {
            let Some(entry) = spool.active.find_mut(group) else {
                break;
            };
            let number = entry.last + 1;
            let target = group_dir.join(number.to_string());

            match fs::hard_link(&staged.path, &target) {
                Ok(()) => {
                    entry.last = number;
                    xref.push((group.clone(), number));
                    links.push(target);
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    // Stale watermark: somebody already used this number.
                    // Re-derive from the directory and retry. The occupied
                    // number is skipped even if the rescan sees nothing, so
                    // the retry always advances.
                    let high = scan_group_high(&group_dir);
                    warn!(
                        "Stale watermark for {}: recorded {}, directory has {}",
                        group, entry.last, high
                    );
                    entry.last = entry.last.max(high).max(number);
                }
                Err(e) => {
                    rollback(&links);
                    return Err(SpoolError::Io(e));
                }
            }
        }
    }

    if xref.is_empty() {
        debug!("Article {} matches no eligible group", message_id);
        return Ok(StoreOutcome::Killed);
    }

    // Step 6: synthesize Xref, then stream the body
    let body_result = (|| -> Result<StoreOutcome> {
        let mut xref_line = format!("Xref: {}", spool.config().hostname);
        for (group, number) in &xref {
            xref_line.push_str(&format!(" {}:{}", group, number));
        }
        xref_line.push('\n');
        staged.file.write_all(xref_line.as_bytes())?;
        staged.file.write_all(b"\n")?;
        bytes_written += xref_line.len() as u64 + 1;

        loop {
            let mut line = Vec::with_capacity(256);
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            trim_line_ending(&mut line);

            if wire_format {
                if line == b"." {
                    break;
                }
                if line.starts_with(b"..") {
                    line.remove(0);
                }
            }

            staged.file.write_all(&line)?;
            staged.file.write_all(b"\n")?;
            bytes_written += line.len() as u64 + 1;

            if let Some(cap) = max_bytes {
                if bytes_written > cap {
                    debug!("Article {} exceeds {} byte cap", message_id, cap);
                    return Ok(StoreOutcome::Killed);
                }
            }
        }

        // Step 7: claim the Message-ID, make the bytes durable, drop the
        // temp name; content survives via the remaining links
        staged.file.sync_all()?;
        if !allocate(spool, &message_id, &staged.path)? {
            return Ok(StoreOutcome::Duplicate);
        }
        Ok(StoreOutcome::Stored {
            message_id: message_id.clone(),
            xref: xref.clone(),
        })
    })();

    match body_result {
        Ok(StoreOutcome::Stored { message_id, xref }) => {
            drop(staged); // removes only the temp name

            if let Some(target) = cancel_target {
                // Cancels may reference articles we never had; not an error
                if let Err(e) = supersede_or_cancel(spool, &target) {
                    warn!("Cancel of {} failed: {}", target, e);
                }
            }

            debug!("Stored {} into {} group(s)", message_id, xref.len());
            Ok(StoreOutcome::Stored { message_id, xref })
        }
        Ok(other) => {
            rollback(&links);
            Ok(other)
        }
        Err(e) => {
            rollback(&links);
            Err(e)
        }
    }
}

/// Remove every reference to a cancelled or superseded article
///
/// Resolves the stored copy's Xref to unlink each per-group hardlink, then
/// the canonical Message-ID path, and finally purges any not-yet-posted
/// copy with the same Message-ID from the outgoing queue.
pub fn supersede_or_cancel(spool: &Spool, msgid: &str) -> Result<()> {
    // The queue may hold a copy even when the store does not
    let purged = queue::purge_message(spool, msgid)?;
    if purged > 0 {
        debug!("Purged {} queued cop(ies) of {}", purged, msgid);
    }

    let Some(canonical) = lookup(spool, msgid) else {
        return Ok(());
    };

    let contents = fs::read_to_string(&canonical).unwrap_or_default();
    let (headers, _) = article::split_article(&contents);
    let scan = HeaderScan::parse(headers);

    if let Some(xref) = scan.get("xref") {
        // "Xref: host group:number group:number ..."
        for pair in xref.split_whitespace().skip(1) {
            let Some((group, number)) = pair.rsplit_once(':') else {
                continue;
            };
            if number.parse::<u64>().is_err() {
                continue;
            }
            let Some(group_dir) = spool.group_dir(group) else {
                continue;
            };
            let link = group_dir.join(number);
            match fs::remove_file(&link) {
                Ok(()) => trace!("Unlinked {}", link.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Cannot unlink {}: {}", link.display(), e),
            }
        }
    }

    #[cfg(unix)]
    {
        if let Ok(meta) = fs::metadata(&canonical) {
            if meta.nlink() > 1 {
                warn!(
                    "{} still has {} references after cancel",
                    msgid,
                    meta.nlink() - 1
                );
            }
        }
    }

    fs::remove_file(&canonical)?;
    debug!("Cancelled {}", msgid);
    Ok(())
}
