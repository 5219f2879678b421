//! Upstream server and relay configuration
//!
//! These structs are the parsed form of whatever configuration frontend
//! drives the relay; file parsing and option handling live outside this
//! crate. Both types optionally derive serde behind the `serde` feature.

use std::time::Duration;

/// Upstream NNTP server configuration
///
/// # Example
///
/// ```
/// use newspool::ServerConfig;
///
/// // Anonymous plain-text feed on the standard port
/// let config = ServerConfig::plain("news.example.com");
///
/// // Authenticated TLS feed
/// let config = ServerConfig::tls("news.example.com")
///     .with_credentials("user", "pass");
/// ```
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    /// Server hostname (e.g., "news.example.com")
    pub host: String,

    /// Server port (typically 119 for plain, 563 for TLS)
    pub port: u16,

    /// Use TLS/SSL encryption
    #[cfg_attr(feature = "serde", serde(default))]
    pub tls: bool,

    /// Allow insecure TLS connections (self-signed certificates, expired
    /// certificates)
    ///
    /// **Security Warning:** Setting this to `true` disables certificate
    /// validation, making the connection vulnerable to man-in-the-middle
    /// attacks. Only use this for testing or with servers you trust on a
    /// secure network.
    #[cfg_attr(feature = "serde", serde(default))]
    pub allow_insecure_tls: bool,

    /// Username for AUTHINFO (None = anonymous)
    #[cfg_attr(feature = "serde", serde(default))]
    pub username: Option<String>,

    /// Password for AUTHINFO
    #[cfg_attr(feature = "serde", serde(default))]
    pub password: Option<String>,

    /// Whether locally queued articles may be posted to this server
    #[cfg_attr(feature = "serde", serde(default = "default_post"))]
    pub post_allowed: bool,

    /// Per-operation network deadline in seconds
    #[cfg_attr(feature = "serde", serde(default = "default_timeout"))]
    pub timeout_secs: u64,
}

#[cfg(feature = "serde")]
fn default_post() -> bool {
    true
}

#[cfg(feature = "serde")]
fn default_timeout() -> u64 {
    90
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
            allow_insecure_tls: false,
            username: None,
            password: None,
            post_allowed: true,
            timeout_secs: 90,
        }
    }

    /// Create a configuration for a plain connection on the standard port (119)
    pub fn plain(host: impl Into<String>) -> Self {
        Self::new(host, 119, false)
    }

    /// Create a configuration for a TLS connection on the standard secure port (563)
    pub fn tls(host: impl Into<String>) -> Self {
        Self::new(host, 563, true)
    }

    /// Attach AUTHINFO credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Key identifying this server in the watermark journal directory
    ///
    /// `host` for the standard port, `host:port` otherwise, matching the
    /// on-disk journal naming.
    pub fn journal_key(&self) -> String {
        let default_port = if self.tls { 563 } else { 119 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Per-operation network deadline
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-group expiry override: groups whose name starts with `prefix` keep
/// articles for `days` days instead of the global default.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExpireOverride {
    /// Newsgroup name prefix (e.g., "comp.lang")
    pub prefix: String,
    /// Retention in days for matching groups
    pub days: u32,
}

/// Relay-wide configuration
///
/// Everything the spool components need beyond the per-server connection
/// settings: retention policy, fetch caps, pipelining window, delay-body
/// group selection and the local host identity stamped into Xref headers.
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayConfig {
    /// Fully qualified name of this relay, used in synthesized Xref headers
    pub hostname: String,

    /// Default article retention in days
    pub expire_days: u32,

    /// Per-group retention overrides, first matching prefix wins
    #[cfg_attr(feature = "serde", serde(default))]
    pub expire_overrides: Vec<ExpireOverride>,

    /// Cap on the number of articles fetched from a group never seen before
    /// (0 = unlimited)
    pub initial_fetch_limit: u64,

    /// Cap on the number of articles fetched per group per run
    /// (0 = unlimited)
    pub max_fetch_per_run: u64,

    /// Maximum number of pipelined ARTICLE requests in flight
    pub window_size: usize,

    /// Reject articles larger than this many bytes (None = unlimited)
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_article_bytes: Option<u64>,

    /// Group name prefixes fetched in delay-body mode (headers now, body on
    /// demand)
    #[cfg_attr(feature = "serde", serde(default))]
    pub delaybody_prefixes: Vec<String>,

    /// Groups always accepted on crosspost even without local interest
    #[cfg_attr(feature = "serde", serde(default))]
    pub force_accept: Vec<String>,
}

impl RelayConfig {
    /// Create a configuration with conventional defaults
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            expire_days: 20,
            expire_overrides: Vec::new(),
            initial_fetch_limit: 500,
            max_fetch_per_run: 0,
            window_size: 64,
            max_article_bytes: None,
            delaybody_prefixes: Vec::new(),
            force_accept: Vec::new(),
        }
    }

    /// Effective retention in days for a group
    pub fn expire_days_for(&self, group: &str) -> u32 {
        for o in &self.expire_overrides {
            if group.starts_with(o.prefix.as_str()) {
                return o.days;
            }
        }
        self.expire_days
    }

    /// Whether the group is fetched in delay-body mode
    pub fn is_delaybody(&self, group: &str) -> bool {
        self.delaybody_prefixes
            .iter()
            .any(|p| group.starts_with(p.as_str()))
    }

    /// Whether the group is accepted regardless of local interest
    pub fn is_forced(&self, group: &str) -> bool {
        self.force_accept.iter().any(|g| g == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_helper() {
        let config = ServerConfig::plain("news.example.com");
        assert_eq!(config.port, 119);
        assert!(!config.tls);
        assert!(config.username.is_none());
    }

    #[test]
    fn test_tls_helper() {
        let config = ServerConfig::tls("news.example.com");
        assert_eq!(config.port, 563);
        assert!(config.tls);
        assert!(!config.allow_insecure_tls);
    }

    #[test]
    fn test_with_credentials() {
        let config = ServerConfig::plain("news.example.com").with_credentials("user", "pass");
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_journal_key_default_port() {
        assert_eq!(
            ServerConfig::plain("news.example.com").journal_key(),
            "news.example.com"
        );
        assert_eq!(
            ServerConfig::tls("news.example.com").journal_key(),
            "news.example.com"
        );
    }

    #[test]
    fn test_journal_key_custom_port() {
        let config = ServerConfig::new("news.example.com", 1119, false);
        assert_eq!(config.journal_key(), "news.example.com:1119");
    }

    #[test]
    fn test_expire_override_precedence() {
        let mut config = RelayConfig::new("relay.example.com");
        config.expire_days = 20;
        config.expire_overrides = vec![
            ExpireOverride {
                prefix: "comp.lang".to_string(),
                days: 90,
            },
            ExpireOverride {
                prefix: "comp".to_string(),
                days: 45,
            },
        ];

        assert_eq!(config.expire_days_for("comp.lang.rust"), 90);
        assert_eq!(config.expire_days_for("comp.misc"), 45);
        assert_eq!(config.expire_days_for("alt.test"), 20);
    }

    #[test]
    fn test_delaybody_prefixes() {
        let mut config = RelayConfig::new("relay.example.com");
        config.delaybody_prefixes = vec!["alt.binaries".to_string()];
        assert!(config.is_delaybody("alt.binaries.pictures"));
        assert!(!config.is_delaybody("alt.test"));
    }
}
