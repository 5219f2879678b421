//! Exclusive spool lock
//!
//! One token per spool, holding `pid\nhostname\n`. Created via an atomic
//! hardlink so two processes can never both think they own the spool;
//! reclaimed only when the lock names the local host and a dead pid.

use crate::error::{Result, SpoolError};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Retry cadence while the lock is held elsewhere
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Held exclusive lock over a spool directory
///
/// Released on [`release`](Self::release) or drop. The process that holds
/// this token is the single writer for the whole spool tree.
#[derive(Debug)]
pub struct SpoolLock {
    path: PathBuf,
    held: bool,
}

/// Identity recorded in a lock file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    /// Owning process id
    pub pid: u32,
    /// Owning hostname
    pub host: String,
}

/// Local hostname as recorded into lock files
#[cfg(unix)]
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len() - 1) };
    if rc == 0 {
        if let Ok(cstr) = std::ffi::CStr::from_bytes_until_nul(&buf) {
            if let Ok(s) = cstr.to_str() {
                if !s.is_empty() {
                    return s.to_string();
                }
            }
        }
    }
    "localhost".to_string()
}

/// Local hostname as recorded into lock files
#[cfg(not(unix))]
pub fn local_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

/// Whether a pid refers to a live process
///
/// `kill(pid, 0)` probes without signalling; EPERM still means the process
/// exists.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // A pid that does not fit pid_t could never have been assigned here;
    // the cast below must not turn it into a process-group probe
    if pid > i32::MAX as u32 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Without a liveness probe, never reclaim
    true
}

/// Parse `pid\nhostname\n` lock contents
fn read_owner(path: &Path) -> Result<LockOwner> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines();
    let pid = lines
        .next()
        .and_then(|l| l.trim().parse::<u32>().ok())
        .ok_or_else(|| SpoolError::Other(format!("unparsable lock file {}", path.display())))?;
    let host = lines.next().unwrap_or("").trim().to_string();
    Ok(LockOwner { pid, host })
}

impl SpoolLock {
    /// Acquire the exclusive lock at `path`
    ///
    /// Writes a uniquely-named temp file containing `pid\nhostname\n` and
    /// attempts an atomic hardlink to the lock path. On contention, a lock
    /// naming the local host and a dead pid is removed and the attempt
    /// retried immediately; otherwise the acquisition retries once per
    /// second until `timeout` (zero = retry forever).
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::LockHeld`] when the timeout expires with the
    /// lock still owned elsewhere.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let start = Instant::now();
        let pid = std::process::id();
        let host = local_hostname();
        let parent = path.parent().unwrap_or_else(|| Path::new("."));

        loop {
            let tmp = parent.join(format!(
                ".lock.{}.{}.{:08x}",
                host,
                pid,
                rand::random::<u32>()
            ));

            let attempt = Self::try_link(&tmp, path, pid, &host);
            // The temp name is only a vehicle for the link; never leave it behind
            let _ = fs::remove_file(&tmp);

            match attempt {
                Ok(true) => {
                    debug!("Acquired spool lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                        held: true,
                    });
                }
                Ok(false) => {}
                Err(e) => return Err(e),
            }

            // Contended: reclaim if stale, otherwise wait and retry
            match read_owner(path) {
                Ok(owner) => {
                    if owner.host == host && !pid_alive(owner.pid) {
                        warn!(
                            "Removing stale lock {} (dead pid {} on this host)",
                            path.display(),
                            owner.pid
                        );
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    if timeout != Duration::ZERO && start.elapsed() >= timeout {
                        return Err(SpoolError::LockHeld {
                            pid: owner.pid,
                            host: owner.host,
                        });
                    }
                }
                Err(_) => {
                    // Unreadable or vanished between attempts; retry
                    if timeout != Duration::ZERO && start.elapsed() >= timeout {
                        return Err(SpoolError::LockHeld {
                            pid: 0,
                            host: String::from("unknown"),
                        });
                    }
                }
            }

            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    /// One temp-write + link attempt; Ok(true) = lock obtained
    fn try_link(tmp: &Path, lock: &Path, pid: u32, host: &str) -> Result<bool> {
        let mut file = File::create(tmp)?;
        write!(file, "{}\n{}\n", pid, host)?;
        file.sync_all()?;

        match fs::hard_link(tmp, lock) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Filesystems without atomic link semantics can report
                // failure even though the link was created; a link count of
                // 2 on our own file means the race was won after all.
                #[cfg(unix)]
                if file.metadata()?.nlink() == 2 {
                    return Ok(true);
                }
                Ok(false)
            }
            Err(e) => Err(SpoolError::Io(e)),
        }
    }

    /// Release the lock
    pub fn release(&mut self) -> Result<()> {
        if self.held {
            fs::remove_file(&self.path)?;
            self.held = false;
            debug!("Released spool lock {}", self.path.display());
        }
        Ok(())
    }

    /// Rewrite the lock to a new owning pid without releasing exclusivity
    ///
    /// Used when the run hands the spool to another process (e.g. a
    /// spawned posting task): the lock file is atomically replaced with
    /// the new owner's identity, and this token stops tracking it.
    pub fn handover(mut self, pid: u32) -> Result<()> {
        let host = local_hostname();
        let tmp = self.path.with_extension("handover");
        let mut file = File::create(&tmp)?;
        write!(file, "{}\n{}\n", pid, host)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        debug!("Handed spool lock {} to pid {}", self.path.display(), pid);
        self.held = false;
        Ok(())
    }

    /// Read the current owner of a lock file, if any
    pub fn owner(path: &Path) -> Option<LockOwner> {
        read_owner(path).ok()
    }
}

impl Drop for SpoolLock {
    fn drop(&mut self) {
        if self.held {
            let _ = fs::remove_file(&self.path);
        }
    }
}
