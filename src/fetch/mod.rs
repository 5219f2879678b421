//! Upstream synchronization pipeline
//!
//! Per (server, group) state machine: select the group, reconcile the
//! fetch range against the recorded watermark, harvest headers (XOVER, or
//! XHDR as a permanent per-server fallback), then pull article bodies
//! through a pipelined window bounded by the kernel send-buffer estimate.
//! Watermarks go into a per-server journal that is promoted only after
//! every group was attempted, so interruption never corrupts resume state.

pub mod journal;

use crate::client::UpstreamClient;
use crate::commands::XoverEntry;
use crate::config::{RelayConfig, ServerConfig};
use crate::error::{Result, SpoolError};
use crate::filter::FilterChain;
use crate::queue;
use crate::spool::{Spool, now_epoch};
use crate::store::{self, StoreOutcome};
use chrono::NaiveDateTime;
use journal::WatermarkJournal;
use std::collections::VecDeque;
use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

/// Recorded watermarks may run ahead of the upstream high mark by this
/// much before the drift heuristics fire (renumbering slack).
pub const WATERMARK_SLACK: u64 = 5;

/// A high-mark drop beyond this many articles means the upstream was
/// swapped for a different server; resync from the low mark. Smaller
/// drops are treated as a cancel storm. Changing this re-fetches or
/// skips articles on existing spools.
pub const SERVER_SWAP_THRESHOLD: u64 = 100;

/// Articles to re-examine after a cancel storm
pub const CANCEL_STORM_BACKSTEP: u64 = 25;

/// Cooperative shutdown token
///
/// Set by a signal handler or the embedding caller; the fetch loop checks
/// it between groups and between pipelined replies, stops cleanly, and
/// marks the run incomplete so the next run resynchronizes in full.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Fresh, unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown was requested
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Request shutdown
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Trip this flag on Ctrl-C / SIGINT
    pub fn install_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing current article batch");
                flag.trigger();
            }
        });
    }
}

/// End-of-run counters for one upstream server
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    /// Articles stored
    pub fetched: u64,
    /// Delay-body placeholders synthesized
    pub pseudo: u64,
    /// Articles already present
    pub duplicate: u64,
    /// Articles rejected by filters, size cap or eligibility
    pub killed: u64,
    /// Articles with broken mandatory headers
    pub malformed: u64,
    /// Per-article or per-group failures tallied and skipped
    pub failed: u64,
    /// Locally queued articles posted upstream
    pub posted: u64,
    /// Groups fully processed
    pub groups: usize,
}

/// Per-server state that survives across groups within one run
#[derive(Debug, Default)]
struct ServerSession {
    /// XOVER failed on this server; use XHDR for the rest of the run
    no_xover: bool,
}

/// Reconcile the resume point against the upstream GROUP watermarks
///
/// `from` is the first article we would fetch (recorded watermark + 1),
/// zero meaning the group was never fetched from this server. Returns the
/// inclusive range to fetch, or None when the group is up to date.
///
/// Drift heuristics when `from` runs past `high + WATERMARK_SLACK`:
/// a drop larger than [`SERVER_SWAP_THRESHOLD`] restarts from the low
/// mark (bounded by the initial-fetch cap); smaller drops step back
/// [`CANCEL_STORM_BACKSTEP`] articles. The initial-fetch and per-run caps
/// only ever advance the lower bound, never past the upper.
pub fn reconcile_range(
    from: u64,
    low: u64,
    high: u64,
    initial_limit: u64,
    max_per_run: u64,
) -> Option<(u64, u64)> {
    if high == 0 {
        return None;
    }

    let initial_start = |low: u64, high: u64| -> u64 {
        if initial_limit > 0 {
            high.saturating_sub(initial_limit - 1).max(low)
        } else {
            low
        }
    };

    let mut from = if from == 0 {
        initial_start(low, high)
    } else if from > high.saturating_add(WATERMARK_SLACK) {
        let drop = from - high;
        if drop > SERVER_SWAP_THRESHOLD {
            debug!(
                "Watermark {} far beyond upstream high {}, assuming server swap",
                from - 1,
                high
            );
            initial_start(low, high)
        } else {
            debug!(
                "Watermark {} beyond upstream high {}, assuming cancel storm",
                from - 1,
                high
            );
            high.saturating_sub(CANCEL_STORM_BACKSTEP).max(low)
        }
    } else {
        from.max(low)
    };

    if max_per_run > 0 && high >= from && high - from + 1 > max_per_run {
        from = high - max_per_run + 1;
    }

    from = from.max(1);
    if from > high {
        return None;
    }
    Some((from, high))
}

/// Header block reconstructed from an XOVER entry, fed to the filter
/// chain before the article is ever requested
fn xover_header_block(entry: &XoverEntry, group: &str) -> String {
    format!(
        "From: {}\nNewsgroups: {}\nSubject: {}\nDate: {}\nMessage-ID: {}\nReferences: {}\n",
        entry.author, group, entry.subject, entry.date, entry.message_id, entry.references
    )
}

/// Synthesize a delay-body placeholder article from an XOVER entry
///
/// The placeholder carries the real headers; the body is a stub fetched
/// on first read.
fn pseudo_article(hostname: &str, group: &str, entry: &XoverEntry) -> String {
    let mut text = format!(
        "Path: {}!not-for-mail\nFrom: {}\nNewsgroups: {}\nSubject: {}\nDate: {}\nMessage-ID: {}\n",
        hostname, entry.author, group, entry.subject, entry.date, entry.message_id
    );
    if !entry.references.is_empty() {
        text.push_str(&format!("References: {}\n", entry.references));
    }
    text.push_str("X-Body-Deferred: yes\n");
    text.push('\n');
    text.push_str("\t[ Article body not fetched yet; it is retrieved on first read. ]\n");
    text
}

/// Run a full synchronization pass against one upstream server
///
/// Connects, flushes the outgoing queue, synchronizes group metadata,
/// then fetches every subscribed group. Transport failures abort the
/// server (the journal is left unpromoted); per-group protocol errors are
/// tallied and the run advances to the next group.
pub async fn run_server(
    spool: &mut Spool,
    server: &ServerConfig,
    filters: Option<&FilterChain>,
    shutdown: &ShutdownFlag,
) -> Result<FetchSummary> {
    let mut summary = FetchSummary::default();
    let key = server.journal_key();
    let cfg = spool.config().clone();

    let mut client = UpstreamClient::connect(Arc::new(server.clone())).await?;
    client.mode_reader().await?;
    client.authenticate().await?;

    post_pending(spool, &mut client, server, &mut summary).await?;

    let server_now = sync_active(spool, &mut client, &key).await?;

    let mut journal = WatermarkJournal::load(spool, &key)?;
    let mut session = ServerSession::default();
    let groups = spool.interesting_groups();
    let mut completed = true;

    for group in &groups {
        if shutdown.is_set() {
            completed = false;
            break;
        }

        match fetch_group(
            spool,
            &mut client,
            &mut session,
            group,
            &cfg,
            &mut journal,
            filters,
            shutdown,
            &mut summary,
        )
        .await
        {
            Ok(interrupted) => {
                summary.groups += 1;
                if interrupted {
                    completed = false;
                    break;
                }
            }
            Err(SpoolError::NoSuchGroup(g)) => {
                debug!("{} does not carry {}", server.host, g);
                summary.failed += 1;
            }
            Err(SpoolError::Protocol { code, message }) => {
                warn!("{}: protocol error on {}: {} {}", server.host, group, code, message);
                summary.failed += 1;
            }
            Err(e) => {
                // Transport gone: abort this server, keep the old journal
                warn!("{}: aborting server: {}", server.host, e);
                summary.failed += 1;
                completed = false;
                break;
            }
        }

        if client.is_broken() {
            warn!("{}: connection is broken, aborting server", server.host);
            completed = false;
            break;
        }
    }

    if completed {
        journal.promote()?;
        if let Some(stamp) = server_now {
            write_sync_stamp(spool, &key, stamp)?;
        }
    } else {
        // Incomplete run: force a full metadata resync next time and keep
        // the previous journal authoritative
        spool.mark_active_refetch()?;
        info!("{}: run incomplete, journal not promoted", server.host);
    }

    client.quit().await;

    info!(
        "{}: fetched {} (+{} pseudo), {} duplicate, {} killed, {} malformed, {} failed, {} posted, {} group(s)",
        server.host,
        summary.fetched,
        summary.pseudo,
        summary.duplicate,
        summary.killed,
        summary.malformed,
        summary.failed,
        summary.posted,
        summary.groups
    );
    Ok(summary)
}

/// Flush the outgoing queue to a posting-capable server
async fn post_pending(
    spool: &Spool,
    client: &mut UpstreamClient,
    server: &ServerConfig,
    summary: &mut FetchSummary,
) -> Result<()> {
    if !server.post_allowed || !client.posting_allowed() {
        return Ok(());
    }

    for path in queue::queued_posts(spool)? {
        let Ok(text) = fs::read_to_string(&path) else {
            warn!("Unreadable queue entry {}", path.display());
            continue;
        };
        match client.post_article(&text).await {
            Ok(()) => {
                fs::remove_file(&path)?;
                summary.posted += 1;
            }
            Err(SpoolError::PostingFailed(msg)) => {
                warn!("Posting {} rejected: {}", path.display(), msg);
                queue::mark_failed(spool, &path)?;
                summary.failed += 1;
            }
            Err(SpoolError::PostingNotPermitted) => {
                // Leave the queue for a server that accepts posts
                debug!("{} stopped accepting posts", server.host);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Path of the per-server metadata sync stamp
fn sync_stamp_path(spool: &Spool, key: &str) -> std::path::PathBuf {
    spool.journal_path(&format!("{}.stamp", key))
}

fn read_sync_stamp(spool: &Spool, key: &str) -> Option<NaiveDateTime> {
    let contents = fs::read_to_string(sync_stamp_path(spool, key)).ok()?;
    NaiveDateTime::parse_from_str(contents.trim(), "%Y%m%d%H%M%S").ok()
}

fn write_sync_stamp(spool: &Spool, key: &str, stamp: NaiveDateTime) -> Result<()> {
    fs::write(
        sync_stamp_path(spool, key),
        format!("{}\n", stamp.format("%Y%m%d%H%M%S")),
    )?;
    Ok(())
}

/// Register discovered groups in the active table
///
/// New groups start at the reserved watermark pair (1, 1) in the local
/// spool numbering; upstream numbers never enter the table.
fn register_groups(spool: &mut Spool, groups: &[crate::commands::ActiveGroup]) {
    let now = now_epoch();
    let mut moderated = Vec::new();
    for g in groups {
        if g.is_moderated() {
            moderated.push(g.name.clone());
        }
        spool.active.insert(&g.name, 1, 1, now, "");
    }
    spool.active.merge();
    for name in moderated {
        if let Some(entry) = spool.active.find_mut(&name) {
            entry.moderated = true;
        }
    }
}

/// Synchronize group metadata: full LIST on first contact or after an
/// incomplete run, incremental NEWGROUPS otherwise
///
/// Returns the server clock reading to stamp after a completed run, so
/// the next NEWGROUPS uses upstream time and ignores local clock skew.
async fn sync_active(
    spool: &mut Spool,
    client: &mut UpstreamClient,
    key: &str,
) -> Result<Option<NaiveDateTime>> {
    let server_now = client.server_date().await.ok();
    let since = read_sync_stamp(spool, key);
    let full = spool.active.is_empty() || spool.needs_active_refetch();

    let discovered = match since {
        Some(since) if !full => {
            trace!("NEWGROUPS since {}", since);
            let groups = match client.new_groups_since(since).await {
                Ok(g) => g,
                // Some feeds disable NEWGROUPS; the next full sync catches up
                Err(SpoolError::Protocol { .. }) => Vec::new(),
                Err(e) => return Err(e),
            };
            register_groups(spool, &groups);
            groups.len()
        }
        _ => {
            debug!("Fetching full active list");
            let groups = client.fetch_active().await?;

            // Descriptions are optional; a server without LIST NEWSGROUPS
            // still yields a usable table
            let descriptions = match client.fetch_descriptions().await {
                Ok(d) => d,
                Err(SpoolError::Protocol { .. }) => Vec::new(),
                Err(e) => return Err(e),
            };

            register_groups(spool, &groups);
            for d in descriptions {
                if let Some(entry) = spool.active.find_mut(&d.name) {
                    if entry.desc.is_empty() {
                        entry.desc = d.description;
                    }
                }
            }
            spool.clear_active_refetch()?;
            groups.len()
        }
    };

    if discovered > 0 {
        debug!("{} group(s) discovered", discovered);
    }
    Ok(server_now)
}

/// Fetch one group from the selected server
///
/// Returns Ok(true) when a shutdown request interrupted the window; the
/// watermark then records the last drained article so the next run
/// resumes exactly there.
#[allow(clippy::too_many_arguments)]
async fn fetch_group(
    spool: &mut Spool,
    client: &mut UpstreamClient,
    session: &mut ServerSession,
    group: &str,
    cfg: &RelayConfig,
    journal: &mut WatermarkJournal,
    filters: Option<&FilterChain>,
    shutdown: &ShutdownFlag,
    summary: &mut FetchSummary,
) -> Result<bool> {
    let info = client.select_group(group).await?;

    let from = journal.mark(group).map(|m| m + 1).unwrap_or(0);
    let Some((lo, hi)) = reconcile_range(
        from,
        info.first,
        info.last,
        cfg.initial_fetch_limit,
        cfg.max_fetch_per_run,
    ) else {
        trace!("{} is up to date", group);
        return Ok(false);
    };
    debug!(
        "{}: fetching {}-{} (upstream carries {}-{})",
        group, lo, hi, info.first, info.last
    );

    let delaybody = cfg.is_delaybody(group);
    let have_filters = filters.is_some_and(|f| !f.is_empty());

    // Header harvest: XOVER preferred, and required whenever the richer
    // fields feed filtering or delay-body synthesis
    let mut wanted: Vec<u64> = Vec::new();
    let mut harvested = false;

    if have_filters || delaybody || !session.no_xover {
        match client.xover_range(lo, hi).await {
            Ok(entries) => {
                harvested = true;
                for entry in entries {
                    if entry.article_number < lo || entry.article_number > hi {
                        continue;
                    }
                    if store::exists(spool, &entry.message_id) {
                        summary.duplicate += 1;
                        continue;
                    }
                    if let Some(chain) = filters {
                        if chain.kills(&xover_header_block(&entry, group)) {
                            summary.killed += 1;
                            continue;
                        }
                    }
                    if delaybody {
                        let text = pseudo_article(&cfg.hostname, group, &entry);
                        match store::store_article(
                            spool,
                            Cursor::new(text.as_bytes()),
                            false,
                            None,
                            None,
                        )? {
                            StoreOutcome::Stored { .. } => summary.pseudo += 1,
                            StoreOutcome::Duplicate => summary.duplicate += 1,
                            _ => summary.failed += 1,
                        }
                    } else {
                        wanted.push(entry.article_number);
                    }
                }
            }
            Err(e @ SpoolError::Protocol { .. }) => {
                if have_filters || delaybody {
                    // XOVER is mandatory here; the group cannot be fetched
                    return Err(e);
                }
                debug!("XOVER unavailable, using XHDR for the rest of this server");
                session.no_xover = true;
            }
            Err(e) => return Err(e),
        }
    }

    if !harvested && !delaybody {
        let ids = client.xhdr_range("Message-ID", lo, hi).await?;
        for entry in ids {
            if entry.article_number < lo || entry.article_number > hi {
                continue;
            }
            let Some(msgid) = crate::article::extract_message_id(&entry.value) else {
                continue;
            };
            if store::exists(spool, msgid) {
                summary.duplicate += 1;
                continue;
            }
            wanted.push(entry.article_number);
        }
    }

    // Article window: pipeline requests, bounded by the configured window
    // and the kernel send-buffer estimate; drain one reply per new request
    let window = cfg.window_size.min(client.send_window_estimate()).max(1);
    let mut next_idx = 0usize;
    let mut in_flight: VecDeque<u64> = VecDeque::with_capacity(window);

    while in_flight.len() < window && next_idx < wanted.len() {
        let number = wanted[next_idx];
        client.queue_article_request(&number.to_string()).await?;
        in_flight.push_back(number);
        next_idx += 1;
    }
    client.flush_requests().await?;

    let mut last_drained: Option<u64> = None;
    let mut stop_feeding = false;

    while let Some(number) = in_flight.pop_front() {
        let reply = match client.read_article_reply().await {
            Ok(reply) => reply,
            Err(e) => {
                // Fatal: abort the group, but keep the resume point
                if let Some(n) = last_drained {
                    journal.record(group, n);
                }
                return Err(e);
            }
        };

        if reply.is_success() {
            let outcome = store::store_article(
                spool,
                Cursor::new(reply.data.as_slice()),
                false,
                filters,
                cfg.max_article_bytes,
            );
            match outcome {
                Ok(StoreOutcome::Stored { .. }) => summary.fetched += 1,
                Ok(StoreOutcome::Duplicate) => summary.duplicate += 1,
                Ok(StoreOutcome::Malformed(header)) => {
                    debug!("{} article {} malformed ({})", group, number, header);
                    summary.malformed += 1;
                }
                Ok(StoreOutcome::Killed) => summary.killed += 1,
                Err(e) => {
                    if let Some(n) = last_drained {
                        journal.record(group, n);
                    }
                    return Err(e);
                }
            }
        } else {
            // Bad per-article reply (expired upstream, 423/430): tally
            // and keep draining
            trace!("{} article {}: {} {}", group, number, reply.code, reply.message);
            summary.failed += 1;
        }
        last_drained = Some(number);

        if shutdown.is_set() {
            stop_feeding = true;
        }
        if !stop_feeding && next_idx < wanted.len() {
            let next = wanted[next_idx];
            client.queue_article_request(&next.to_string()).await?;
            client.flush_requests().await?;
            in_flight.push_back(next);
            next_idx += 1;
        }
    }

    let interrupted = stop_feeding && next_idx < wanted.len();
    if interrupted {
        if let Some(n) = last_drained {
            journal.record(group, n);
        }
    } else {
        // Everything up to the upstream high mark was attempted
        journal.record(group, hi);
    }

    Ok(interrupted)
}
