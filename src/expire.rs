//! Thread-aware expiration sweep
//!
//! Per group: every article is condemned by default, then rescued when
//! its access/modification time beats the group's retention threshold.
//! A rescue walks the article's References chain (bounded depth) and
//! keeps every present ancestor, so live discussions never lose their
//! context. A separate sweep reclaims Message-ID store entries once no
//! newsgroup references them (link count down to 1).

use crate::error::Result;
use crate::overview::Overview;
use crate::spool::Spool;
use crate::store;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Bound on References-chain traversal during thread rescue
pub const MAX_THREAD_DEPTH: usize = 20;

/// End-of-sweep counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpireSummary {
    /// Articles deleted
    pub deleted: u64,
    /// Articles kept
    pub kept: u64,
    /// Articles kept only because a live thread references them
    pub rescued: u64,
    /// Message-ID store entries reclaimed (no group referenced them)
    pub swept: u64,
    /// Groups scanned
    pub groups: usize,
}

/// Run the expiration sweep over the whole spool
///
/// Per-group failures are logged and skipped (a damaged group must not
/// stop retention everywhere else); only spool-wide I/O failures abort.
pub fn run(spool: &mut Spool) -> Result<ExpireSummary> {
    let mut summary = ExpireSummary::default();

    let groups: Vec<String> = spool.active.iter().map(|g| g.name.clone()).collect();
    for group in &groups {
        match expire_group(spool, group, &mut summary) {
            Ok(()) => summary.groups += 1,
            Err(e) => warn!("Expire failed for {}: {}", group, e),
        }
    }

    summary.swept = sweep_message_ids(spool)?;

    info!(
        "Expire: {} deleted, {} kept ({} thread-rescued), {} store entr(ies) swept, {} group(s)",
        summary.deleted, summary.kept, summary.rescued, summary.swept, summary.groups
    );
    Ok(summary)
}

/// Newest of atime/mtime; the liveliness signal retention decides by
fn newest_time(meta: &fs::Metadata) -> Option<SystemTime> {
    match (meta.accessed().ok(), meta.modified().ok()) {
        (Some(a), Some(m)) => Some(a.max(m)),
        (Some(t), None) | (None, Some(t)) => Some(t),
        (None, None) => None,
    }
}

/// Rescue an article and walk its References chain (bounded depth),
/// keeping every referenced article still present in the group
fn rescue(
    start: u64,
    overview: &Overview,
    by_msgid: &HashMap<&str, u64>,
    keep: &mut HashSet<u64>,
    rescued: &mut u64,
) {
    let mut stack = vec![(start, 0usize)];
    while let Some((number, depth)) = stack.pop() {
        if !keep.insert(number) {
            continue;
        }
        if depth > 0 {
            *rescued += 1;
        }
        if depth >= MAX_THREAD_DEPTH {
            trace!("References chain truncated at depth {}", depth);
            continue;
        }
        let Some(entry) = overview.find_by_number(number) else {
            continue;
        };
        for msgid in entry.references.split_whitespace() {
            if let Some(&other) = by_msgid.get(msgid) {
                stack.push((other, depth + 1));
            }
        }
    }
}

fn expire_group(spool: &mut Spool, group: &str, summary: &mut ExpireSummary) -> Result<()> {
    let Some(dir) = spool.group_dir(group) else {
        return Ok(());
    };
    if !dir.is_dir() {
        return Ok(());
    }

    let overview = Overview::load(&dir)?;
    let days = spool.config().expire_days_for(group);
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(days) * 86_400);

    let by_msgid: HashMap<&str, u64> = overview
        .entries()
        .iter()
        .map(|e| (e.message_id.as_str(), e.number))
        .collect();

    // Kill by default; fresh timestamps rescue, and rescues fan out along
    // the thread
    let mut keep: HashSet<u64> = HashSet::new();
    for entry in overview.entries() {
        let path = dir.join(entry.number.to_string());
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if newest_time(&meta).is_some_and(|t| t > cutoff) {
            rescue(entry.number, &overview, &by_msgid, &mut keep, &mut summary.rescued);
        }
    }

    // Self-heal the Message-ID store while we are here: relink missing
    // entries, condemn group files whose store entry is a different
    // article
    for entry in overview.entries() {
        let article = dir.join(entry.number.to_string());
        if !article.is_file() {
            continue;
        }
        let canonical = store::canonical_path(spool, &entry.message_id);
        if !canonical.is_file() {
            debug!("Relinking missing store entry for {}", entry.message_id);
            if let Some(parent) = canonical.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(e) = fs::hard_link(&article, &canonical) {
                warn!("Cannot relink {}: {}", entry.message_id, e);
            }
            continue;
        }
        #[cfg(unix)]
        {
            let same_inode = match (fs::metadata(&article), fs::metadata(&canonical)) {
                (Ok(a), Ok(c)) => a.ino() == c.ino() && a.dev() == c.dev(),
                _ => true,
            };
            if !same_inode {
                warn!(
                    "{} in {} is not the article the store holds, condemning",
                    entry.message_id, group
                );
                keep.remove(&entry.number);
            }
        }
    }

    // Delete the condemned, recompute the low watermark from survivors
    let mut new_low: Option<u64> = None;
    for entry in overview.entries() {
        if keep.contains(&entry.number) {
            summary.kept += 1;
            new_low = Some(new_low.map_or(entry.number, |l: u64| l.min(entry.number)));
        } else {
            match fs::remove_file(dir.join(entry.number.to_string())) {
                Ok(()) => summary.deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Cannot delete {}:{}: {}", group, entry.number, e),
            }
        }
    }

    if let Some(active_entry) = spool.active.find_mut(group) {
        match new_low {
            Some(low) => active_entry.first = low,
            // Empty group: first = last + 1 signals no occupied numbers
            None => active_entry.first = active_entry.last + 1,
        }
    }

    // Reconcile the index against what survived
    let _ = Overview::load(&dir)?;

    // An emptied group nobody reads loses its directory chain
    if new_low.is_none() && !spool.is_interesting(group) && !spool.is_local(group) {
        prune_group_dir(spool.root(), &dir);
    }

    Ok(())
}

/// Remove an empty group directory and any emptied parents, stopping at
/// the spool root
fn prune_group_dir(root: &Path, dir: &Path) {
    let overview_file = dir.join(crate::overview::OVERVIEW_FILE);
    let _ = fs::remove_file(overview_file);

    let mut current = Some(dir.to_path_buf());
    while let Some(d) = current {
        if d == root {
            break;
        }
        match fs::remove_dir(&d) {
            Ok(()) => {
                trace!("Pruned {}", d.display());
                current = d.parent().map(Path::to_path_buf);
            }
            // Not empty or already gone: stop climbing
            Err(_) => break,
        }
    }
}

/// Sweep the Message-ID store, deleting entries no group links to
#[cfg(unix)]
fn sweep_message_ids(spool: &Spool) -> Result<u64> {
    let mut swept = 0;
    let root = spool.message_id_root();

    for bucket in fs::read_dir(&root)? {
        let bucket = bucket?;
        if !bucket.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(bucket.path())? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() && meta.nlink() == 1 {
                match fs::remove_file(entry.path()) {
                    Ok(()) => swept += 1,
                    Err(e) => warn!("Cannot sweep {}: {}", entry.path().display(), e),
                }
            }
        }
    }
    Ok(swept)
}

/// Sweep requires hardlink counts; without them nothing is reclaimed
#[cfg(not(unix))]
fn sweep_message_ids(_spool: &Spool) -> Result<u64> {
    Ok(0)
}
