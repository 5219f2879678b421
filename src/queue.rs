//! Outgoing article queue
//!
//! Locally submitted articles wait in `out.going/` until a fetch run
//! flushes them to a posting-capable upstream. Files are named by
//! sanitized Message-ID so a cancel or supersede can purge a queued copy
//! before it ever leaves the machine.

use crate::article::{self, HeaderScan};
use crate::error::Result;
use crate::spool::Spool;
use crate::store;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

/// Queue a locally composed article for posting
///
/// The text must contain a header block; a missing Message-ID is
/// synthesized from a v4 uuid and the relay hostname. Returns the
/// Message-ID the article was queued under.
pub fn enqueue_post(spool: &Spool, text: &str) -> Result<String> {
    let (headers, _) = article::split_article(text);
    let scan = HeaderScan::parse(headers);

    let (message_id, text) = match scan.get("message-id").and_then(article::extract_message_id)
    {
        Some(id) => (id.to_string(), text.to_string()),
        None => {
            let id = format!("<{}@{}>", Uuid::new_v4(), spool.config().hostname);
            (id.clone(), format!("Message-ID: {}\n{}", id, text))
        }
    };

    let path = spool
        .out_going_dir()
        .join(store::sanitize_message_id(&message_id));
    fs::write(&path, text)?;
    debug!("Queued {} for posting", message_id);
    Ok(message_id)
}

/// Queued articles, oldest file name first
pub fn queued_posts(spool: &Spool) -> Result<Vec<PathBuf>> {
    let mut posts = Vec::new();
    for entry in fs::read_dir(spool.out_going_dir())? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            posts.push(entry.path());
        }
    }
    posts.sort();
    Ok(posts)
}

/// Remove queued copies of a Message-ID (cancel/supersede purge)
///
/// Returns the number of entries removed. The common case is a direct hit
/// on the sanitized file name; entries that fail to parse are left alone.
pub fn purge_message(spool: &Spool, msgid: &str) -> Result<usize> {
    let mut removed = 0;

    let direct = spool
        .out_going_dir()
        .join(store::sanitize_message_id(msgid));
    if direct.is_file() {
        fs::remove_file(&direct)?;
        removed += 1;
    }

    // Defensive sweep for entries queued under an unexpected name
    for path in queued_posts(spool)? {
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        let (headers, _) = article::split_article(&contents);
        let scan = HeaderScan::parse(headers);
        if scan.get("message-id").and_then(article::extract_message_id) == Some(msgid) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Cannot purge {}: {}", path.display(), e),
            }
        }
    }

    Ok(removed)
}

/// Move a rejected article out of the queue into `failed.postings/`
pub fn mark_failed(spool: &Spool, path: &PathBuf) -> Result<()> {
    let failed_dir = spool.root().join("failed.postings");
    fs::create_dir_all(&failed_dir)?;
    let name = path
        .file_name()
        .map(|n| n.to_owned())
        .unwrap_or_else(|| "unnamed".into());
    fs::rename(path, failed_dir.join(name))?;
    Ok(())
}
