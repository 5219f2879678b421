//! Spool context: directory layout, interest tracking, open/close lifecycle
//!
//! `Spool` is the explicit context passed into every component operation;
//! there is no global registry. Opening a spool acquires the exclusive
//! lock and loads the active table; closing persists the table and
//! releases the lock.
//!
//! Layout under the spool root:
//!
//! ```text
//! active              newsgroup registry (flat file)
//! lock.file           exclusive-access token
//! message.id/NNN/     content-addressed article store (3-digit buckets)
//! out.going/          locally posted articles awaiting upstream POST
//! journals/<server>   per-server watermark journals
//! interesting.groups/ one marker file per subscribed group
//! active.refetch      marker: active file must be refetched next run
//! local.groups        locally carried groups (name [m] description)
//! <group/as/dirs>/N   per-group article hardlinks, numeric names
//! ```

use crate::active::ActiveTable;
use crate::config::RelayConfig;
use crate::error::Result;
use crate::lock::SpoolLock;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Open spool with held lock and loaded registry
#[derive(Debug)]
pub struct Spool {
    config: Arc<RelayConfig>,
    root: PathBuf,
    /// The newsgroup registry; merged and persisted on close
    pub active: ActiveTable,
    lock: SpoolLock,
    /// Lowercased names of locally carried groups
    local: HashSet<String>,
}

/// Whether a newsgroup name is safe to map onto a directory chain
///
/// Dots become path separators, so every dot-separated component must be a
/// plain name: no empty components, no separators, nothing outside the
/// newsgroup-name alphabet.
pub fn valid_group_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 512 {
        return false;
    }
    name.split('.').all(|part| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'_'))
    })
}

impl Spool {
    /// Open the spool: create the layout, take the exclusive lock, load
    /// the active table and the local-groups file
    ///
    /// `lock_timeout` of zero retries the lock forever.
    pub fn open(
        root: impl Into<PathBuf>,
        config: Arc<RelayConfig>,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let lock = SpoolLock::acquire(&root.join("lock.file"), lock_timeout)?;

        for dir in ["message.id", "out.going", "journals", "interesting.groups"] {
            fs::create_dir_all(root.join(dir))?;
        }

        let active_path = root.join("active");
        let mut active = if active_path.exists() {
            ActiveTable::load(&active_path)?
        } else {
            debug!("No active file at {}, starting empty", active_path.display());
            ActiveTable::new()
        };

        let local = Self::load_local_groups(&root, &mut active);

        Ok(Self {
            config,
            root,
            active,
            lock,
            local,
        })
    }

    /// Parse `local.groups` (lines: `name [m] description`), registering
    /// each group and returning the lowercased name set
    fn load_local_groups(root: &Path, active: &mut ActiveTable) -> HashSet<String> {
        let mut local = HashSet::new();
        let path = root.join("local.groups");
        let Ok(contents) = fs::read_to_string(&path) else {
            return local;
        };

        let now = now_epoch();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(name) = fields.next() else { continue };
            if !valid_group_name(name) {
                warn!("Ignoring invalid local group name {:?}", name);
                continue;
            }
            let rest: Vec<&str> = fields.collect();
            let (moderated, desc) = match rest.split_first() {
                Some((&"m", desc)) => (true, desc.join(" ")),
                _ => (false, rest.join(" ")),
            };
            active.insert(name, 1, 1, now, desc);
            active.merge();
            if let Some(entry) = active.find_mut(name) {
                entry.moderated = moderated;
            }
            local.insert(name.to_ascii_lowercase());
        }
        debug!("{} local groups registered", local.len());
        local
    }

    /// Relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Spool root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the persisted active file
    pub fn active_path(&self) -> PathBuf {
        self.root.join("active")
    }

    /// Root of the content-addressed Message-ID store
    pub fn message_id_root(&self) -> PathBuf {
        self.root.join("message.id")
    }

    /// Directory of queued outgoing articles
    pub fn out_going_dir(&self) -> PathBuf {
        self.root.join("out.going")
    }

    /// Watermark journal path for an upstream server key
    pub fn journal_path(&self, server_key: &str) -> PathBuf {
        self.root.join("journals").join(server_key)
    }

    /// Directory chain for a newsgroup (`alt.test` → `<root>/alt/test`)
    ///
    /// Returns None for names that cannot be mapped safely. Single-component
    /// names that would shadow spool metadata directories are refused.
    pub fn group_dir(&self, group: &str) -> Option<PathBuf> {
        if !valid_group_name(group) {
            return None;
        }
        if matches!(group.to_ascii_lowercase().as_str(), "active" | "journals") {
            return None;
        }
        let mut dir = self.root.clone();
        for part in group.split('.') {
            dir.push(part.to_ascii_lowercase());
        }
        Some(dir)
    }

    /// Whether the group is subscribed locally (marker file present)
    pub fn is_interesting(&self, group: &str) -> bool {
        valid_group_name(group)
            && self
                .root
                .join("interesting.groups")
                .join(group.to_ascii_lowercase())
                .is_file()
    }

    /// Subscribe a group (create its interest marker)
    pub fn mark_interesting(&self, group: &str) -> Result<()> {
        if valid_group_name(group) {
            fs::File::create(
                self.root
                    .join("interesting.groups")
                    .join(group.to_ascii_lowercase()),
            )?;
        }
        Ok(())
    }

    /// Unsubscribe a group (remove its interest marker)
    pub fn unmark_interesting(&self, group: &str) -> Result<()> {
        let marker = self
            .root
            .join("interesting.groups")
            .join(group.to_ascii_lowercase());
        if marker.is_file() {
            fs::remove_file(marker)?;
        }
        Ok(())
    }

    /// All subscribed groups, sorted
    pub fn interesting_groups(&self) -> Vec<String> {
        let mut groups = Vec::new();
        if let Ok(entries) = fs::read_dir(self.root.join("interesting.groups")) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    groups.push(name.to_string());
                }
            }
        }
        groups.sort();
        groups
    }

    /// Whether the group is carried locally (local.groups file)
    pub fn is_local(&self, group: &str) -> bool {
        self.local.contains(&group.to_ascii_lowercase())
    }

    /// Whether an incoming article may be filed into this group
    ///
    /// Eligible means subscribed, local, or globally forced; the caller
    /// additionally requires presence in the active table.
    pub fn is_eligible(&self, group: &str) -> bool {
        self.config.is_forced(group) || self.is_local(group) || self.is_interesting(group)
    }

    /// Whether the last run left the active file in need of a refetch
    pub fn needs_active_refetch(&self) -> bool {
        self.root.join("active.refetch").is_file()
    }

    /// Mark the active file for refetch on the next run
    pub fn mark_active_refetch(&self) -> Result<()> {
        fs::File::create(self.root.join("active.refetch"))?;
        Ok(())
    }

    /// Clear the refetch marker after a completed active sync
    pub fn clear_active_refetch(&self) -> Result<()> {
        let marker = self.root.join("active.refetch");
        if marker.is_file() {
            fs::remove_file(marker)?;
        }
        Ok(())
    }

    /// Persist the active table and release the lock
    pub fn close(mut self) -> Result<()> {
        self.active.merge();
        self.active.persist(&self.active_path())?;
        self.lock.release()?;
        Ok(())
    }

    /// Persist the active table, then hand the lock to another pid
    ///
    /// The spool stays exclusively locked throughout; only the recorded
    /// owner changes.
    pub fn handover(mut self, pid: u32) -> Result<()> {
        self.active.merge();
        self.active.persist(&self.active_path())?;
        let Spool { lock, .. } = self;
        lock.handover(pid)
    }
}

/// Current unix time in seconds
pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<RelayConfig> {
        Arc::new(RelayConfig::new("relay.example.com"))
    }

    fn open_spool(dir: &tempfile::TempDir) -> Spool {
        Spool::open(dir.path(), test_config(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_valid_group_name() {
        assert!(valid_group_name("alt.test"));
        assert!(valid_group_name("comp.lang.rust"));
        assert!(valid_group_name("alt.binaries.x-y_z+w"));
        assert!(!valid_group_name(""));
        assert!(!valid_group_name(".hidden"));
        assert!(!valid_group_name("alt..test"));
        assert!(!valid_group_name("alt.test."));
        assert!(!valid_group_name("alt/test"));
        assert!(!valid_group_name("alt.\u{0}evil"));
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        assert!(spool.message_id_root().is_dir());
        assert!(spool.out_going_dir().is_dir());
        assert!(dir.path().join("interesting.groups").is_dir());
        assert!(dir.path().join("lock.file").is_file());

        spool.close().unwrap();
        assert!(!dir.path().join("lock.file").exists());
        assert!(dir.path().join("active").is_file());
    }

    #[test]
    fn test_group_dir_mapping() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        let gd = spool.group_dir("Comp.Lang.Rust").unwrap();
        assert_eq!(gd, dir.path().join("comp").join("lang").join("rust"));
        assert!(spool.group_dir("bad..name").is_none());
        spool.close().unwrap();
    }

    #[test]
    fn test_interest_markers() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        assert!(!spool.is_interesting("alt.test"));
        spool.mark_interesting("alt.test").unwrap();
        assert!(spool.is_interesting("alt.test"));
        assert!(spool.is_interesting("ALT.TEST"));
        assert_eq!(spool.interesting_groups(), vec!["alt.test"]);

        spool.unmark_interesting("alt.test").unwrap();
        assert!(!spool.is_interesting("alt.test"));
        spool.close().unwrap();
    }

    #[test]
    fn test_local_groups_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("local.groups"),
            "# comment\nlocal.general Local chatter\nlocal.announce m Moderated announcements\n",
        )
        .unwrap();

        let spool = open_spool(&dir);
        assert!(spool.is_local("local.general"));
        assert!(spool.is_local("LOCAL.GENERAL"));
        assert!(!spool.is_local("alt.test"));

        let entry = spool.active.find("local.announce").unwrap();
        assert!(entry.moderated);
        assert_eq!(entry.desc, "Moderated announcements");

        let entry = spool.active.find("local.general").unwrap();
        assert!(!entry.moderated);
        assert_eq!(entry.desc, "Local chatter");
        spool.close().unwrap();
    }

    #[test]
    fn test_eligibility() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = RelayConfig::new("relay.example.com");
        config.force_accept = vec!["news.announce".to_string()];
        let spool =
            Spool::open(dir.path(), Arc::new(config), Duration::from_secs(2)).unwrap();

        spool.mark_interesting("alt.test").unwrap();

        assert!(spool.is_eligible("alt.test"));
        assert!(spool.is_eligible("news.announce"));
        assert!(!spool.is_eligible("alt.other"));
        spool.close().unwrap();
    }

    #[test]
    fn test_refetch_marker() {
        let dir = tempfile::TempDir::new().unwrap();
        let spool = open_spool(&dir);

        assert!(!spool.needs_active_refetch());
        spool.mark_active_refetch().unwrap();
        assert!(spool.needs_active_refetch());
        spool.clear_active_refetch().unwrap();
        assert!(!spool.needs_active_refetch());
        spool.close().unwrap();
    }
}
