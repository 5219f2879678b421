//! Upstream NNTP client used by the fetch pipeline

mod articles;
mod auth;
mod connection;
mod group_ops;
mod io;

use crate::config::ServerConfig;
use std::sync::Arc;
use tracing::debug;

pub use connection::Transport;

/// Async NNTP client for one upstream server
///
/// One connection per server per run; the exclusive spool lock serializes
/// everything behind it, so no pooling is needed.
///
/// # Example
///
/// ```no_run
/// use newspool::{ServerConfig, UpstreamClient};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServerConfig::plain("news.example.com");
/// let mut client = UpstreamClient::connect(Arc::new(config)).await?;
/// client.authenticate().await?;
///
/// let info = client.select_group("alt.test").await?;
/// println!("alt.test carries {} articles", info.count);
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct UpstreamClient {
    /// Plain or TLS stream (both reader and writer)
    stream: Transport,
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Currently selected newsgroup
    current_group: Option<String>,
    /// Whether the greeting advertised posting (200 vs 201)
    posting_allowed: bool,
    /// Actual kernel send-buffer size, bounds the pipeline window
    send_buffer: usize,
    /// Whether this connection is broken (received garbage/invalid data)
    is_broken: bool,
}

/// Sent-but-unread pipelined commands must never exceed what the kernel
/// send buffer can absorb, or a write could block while replies back up.
/// An ARTICLE command with a long Message-ID stays well under this.
pub(crate) const PIPELINE_COMMAND_ESTIMATE: usize = 128;

impl UpstreamClient {
    /// Check if this connection is broken and should be discarded
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Mark this connection as broken
    fn mark_broken(&mut self) {
        self.is_broken = true;
    }

    /// Get the currently selected newsgroup, if any
    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    /// Whether the server greeting allowed posting
    pub fn posting_allowed(&self) -> bool {
        self.posting_allowed
    }

    /// Estimated number of requests the send buffer can absorb unflushed
    pub fn send_window_estimate(&self) -> usize {
        (self.send_buffer / PIPELINE_COMMAND_ESTIMATE).max(1)
    }
}

impl Drop for UpstreamClient {
    fn drop(&mut self) {
        debug!("UpstreamClient dropped");
    }
}
