#![doc = include_str!("../README.md")]

/// Newsgroup registry (active table)
pub mod active;
/// Article header utilities
pub mod article;
mod client;
/// NNTP command builders and response parsers
pub mod commands;
mod config;
mod error;
/// Thread-aware expiration sweep
pub mod expire;
/// Upstream synchronization pipeline
pub mod fetch;
/// Header filter chain
pub mod filter;
/// Exclusive spool lock
pub mod lock;
/// Per-group overview cache
pub mod overview;
/// Outgoing article queue
pub mod queue;
mod response;
/// Spool context and directory layout
pub mod spool;
/// Content-addressed article store
pub mod store;

pub use active::{ActiveTable, GroupEntry};
pub use client::UpstreamClient;
pub use commands::{ActiveGroup, GroupDescription, GroupInfo, HdrEntry, XoverEntry};
pub use config::{ExpireOverride, RelayConfig, ServerConfig};
pub use error::{Result, SpoolError};
pub use expire::ExpireSummary;
pub use fetch::{FetchSummary, ShutdownFlag};
pub use filter::FilterChain;
pub use lock::{LockOwner, SpoolLock};
pub use overview::{Overview, OverviewLine};
pub use response::{NntpBinaryResponse, NntpResponse, codes};
pub use spool::Spool;
pub use store::StoreOutcome;
