//! Shared fixtures for spool integration tests
#![allow(dead_code)]

use newspool::{FilterChain, RelayConfig, Spool, StoreOutcome, store};
use std::fs::{File, FileTimes};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Route component logs through the test harness (RUST_LOG=debug)
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Relay config used by the fixtures
pub fn relay_config() -> RelayConfig {
    RelayConfig::new("relay.example.com")
}

/// Open a spool over a temp directory with the default test config
pub fn open_spool(dir: &TempDir) -> Spool {
    open_spool_with(dir, relay_config())
}

/// Open a spool over a temp directory with a custom config
pub fn open_spool_with(dir: &TempDir, config: RelayConfig) -> Spool {
    init_tracing();
    Spool::open(dir.path(), Arc::new(config), Duration::from_secs(5)).unwrap()
}

/// Register a group in the active table and subscribe to it
pub fn add_group(spool: &mut Spool, name: &str) {
    spool.active.insert(name, 1, 1, 0, "");
    spool.active.merge();
    spool.mark_interesting(name).unwrap();
}

/// Register a group without subscribing (present but not eligible)
pub fn add_unsubscribed_group(spool: &mut Spool, name: &str) {
    spool.active.insert(name, 1, 1, 0, "");
    spool.active.merge();
}

/// Complete article text with all mandatory headers
pub fn article_text(msgid: &str, newsgroups: &str, subject: &str, references: &str) -> String {
    let mut text = format!(
        "Path: upstream!not-for-mail\nFrom: poster@example.com\nNewsgroups: {}\nSubject: {}\nDate: Mon, 01 Jan 2024 00:00:00 GMT\nMessage-ID: {}\n",
        newsgroups, subject, msgid
    );
    if !references.is_empty() {
        text.push_str(&format!("References: {}\n", references));
    }
    text.push('\n');
    text.push_str("test body\n");
    text
}

/// Store an article without filters or caps
pub fn store_text(spool: &mut Spool, text: &str) -> StoreOutcome {
    store::store_article(spool, Cursor::new(text.as_bytes()), false, None, None).unwrap()
}

/// Store an article through a filter chain
pub fn store_filtered(spool: &mut Spool, text: &str, chain: &FilterChain) -> StoreOutcome {
    store::store_article(spool, Cursor::new(text.as_bytes()), false, Some(chain), None).unwrap()
}

/// Backdate a file's access and modification times by `secs` seconds
pub fn age_file(path: &Path, secs: u64) {
    let old = SystemTime::now() - Duration::from_secs(secs);
    let times = FileTimes::new().set_accessed(old).set_modified(old);
    File::open(path).unwrap().set_times(times).unwrap();
}

/// Hardlink count of a file (unix only)
#[cfg(unix)]
pub fn nlink(path: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).unwrap().nlink()
}
