//! Low-level I/O operations for the upstream protocol
//!
//! Command transmission (immediate and pipelined), single-line and
//! multi-line response parsing, binary article reads, and deadline
//! management. Every read and write runs under the per-server deadline
//! from the configuration; on expiry the whole server is abandoned.

use super::UpstreamClient;
use crate::commands;
use crate::error::{Result, SpoolError};
use crate::response::NntpResponse;
use std::time::Duration;
use tokio::time::timeout;
use tracing::trace;

/// Multi-line responses (XOVER over a large range, big article bodies) get
/// a multiple of the single-line deadline.
const MULTILINE_DEADLINE_FACTOR: u32 = 3;

/// Initial buffer capacity for binary article bodies
const BINARY_DATA_INITIAL_CAPACITY: usize = 128 * 1024;

/// Strip NNTP byte-stuffing from a line (leading ".." becomes ".").
fn strip_byte_stuffing(line: &str) -> &str {
    if line.starts_with("..") { &line[1..] } else { line }
}

impl UpstreamClient {
    fn single_line_deadline(&self) -> Duration {
        self.config.deadline()
    }

    fn multiline_deadline(&self) -> Duration {
        self.config.deadline() * MULTILINE_DEADLINE_FACTOR
    }

    /// Send a command and flush it to the wire
    pub(super) async fn send_command(&mut self, command: &str) -> Result<()> {
        trace!("Sending command: {}", command.trim());
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Queue a command without flushing (pipelining)
    ///
    /// The caller batches queued commands with [`flush_commands`]
    /// (Self::flush_commands) once the burst is assembled. The fetch window
    /// keeps bursts below the kernel send-buffer estimate so this write
    /// never blocks on a full buffer.
    pub(super) async fn queue_command(&mut self, command: &str) -> Result<()> {
        trace!("Queueing command: {}", command.trim());
        self.stream.write_all(command.as_bytes()).await?;
        Ok(())
    }

    /// Flush all queued commands to the wire
    pub(super) async fn flush_commands(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Read a single-line response
    pub(super) async fn read_response(&mut self) -> Result<NntpResponse> {
        let deadline = self.single_line_deadline();
        let result = self.read_response_with_deadline(deadline).await;
        // Mark connection as broken if we got invalid/garbage data
        if let Err(SpoolError::InvalidResponse(_)) = &result {
            self.mark_broken();
        }
        result
    }

    /// Read a single-line response with a custom deadline
    pub(super) async fn read_response_with_deadline(
        &mut self,
        deadline: Duration,
    ) -> Result<NntpResponse> {
        let read_future = async {
            let mut line_bytes = Vec::with_capacity(512);
            self.stream.read_until(b'\n', &mut line_bytes).await?;

            if line_bytes.is_empty() {
                return Err(SpoolError::ConnectionClosed);
            }

            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end();
            trace!("Received: {}", line);

            commands::parse_single_response(line)
        };

        timeout(deadline, read_future)
            .await
            .map_err(|_| SpoolError::Timeout)?
    }

    /// Read a multi-line response (ending with ".\r\n")
    pub(super) async fn read_multiline_response(&mut self) -> Result<NntpResponse> {
        let deadline = self.multiline_deadline();
        let result = async {
            // Read first line (status)
            let mut first_line_bytes = Vec::with_capacity(512);
            self.stream.read_until(b'\n', &mut first_line_bytes).await?;

            if first_line_bytes.is_empty() {
                return Err(SpoolError::ConnectionClosed);
            }

            let first_line = String::from_utf8_lossy(&first_line_bytes);
            let first_line = first_line.trim_end();
            trace!("Received: {}", first_line);

            let (code, message) = commands::parse_response_line(first_line)?;

            // If error response, no multi-line data follows
            if code >= 400 {
                return Ok(NntpResponse {
                    code,
                    message,
                    lines: vec![],
                });
            }

            // Most multiline responses here are XOVER/LIST output
            let mut lines = Vec::with_capacity(64);
            loop {
                let mut line_bytes = Vec::with_capacity(512);
                self.stream.read_until(b'\n', &mut line_bytes).await?;

                if line_bytes.is_empty() {
                    return Err(SpoolError::ConnectionClosed);
                }

                let line = String::from_utf8_lossy(&line_bytes);
                let line = line.trim_end();

                // Check for terminator
                if line == "." {
                    break;
                }

                lines.push(strip_byte_stuffing(line).to_string());
            }

            Ok(NntpResponse {
                code,
                message,
                lines,
            })
        };

        let result = timeout(deadline, result)
            .await
            .map_err(|_| SpoolError::Timeout)?;

        if let Err(SpoolError::InvalidResponse(_)) = &result {
            self.mark_broken();
        }
        result
    }

    /// Read a multi-line response as raw binary data (optimized for articles)
    ///
    /// Returns raw bytes as LF-terminated lines with dot-stuffing removed
    /// and the lone-dot terminator consumed; avoids per-line string
    /// allocations on large bodies.
    pub(super) async fn read_multiline_response_binary(
        &mut self,
    ) -> Result<crate::response::NntpBinaryResponse> {
        let deadline = self.multiline_deadline();
        let read_future = async {
            // Read first line (status) - this is always text
            let mut first_line_bytes = Vec::with_capacity(256);
            self.stream.read_until(b'\n', &mut first_line_bytes).await?;

            if first_line_bytes.is_empty() {
                return Err(SpoolError::ConnectionClosed);
            }

            let first_line = String::from_utf8_lossy(&first_line_bytes);
            let first_line = first_line.trim_end();
            trace!("Received: {}", first_line);

            let (code, message) = commands::parse_response_line(first_line)?;

            // If error response, no multi-line data follows
            if code >= 400 {
                return Ok(crate::response::NntpBinaryResponse {
                    code,
                    message,
                    data: vec![],
                });
            }

            let mut data = Vec::with_capacity(BINARY_DATA_INITIAL_CAPACITY);

            loop {
                let mut line_bytes = Vec::with_capacity(512);
                self.stream.read_until(b'\n', &mut line_bytes).await?;

                if line_bytes.is_empty() {
                    return Err(SpoolError::ConnectionClosed);
                }

                // Check for terminator: line containing only "." (plus CRLF/LF)
                if line_bytes == b".\r\n" || line_bytes == b".\n" {
                    break;
                }

                // Strip trailing \r\n (NNTP line terminator, not part of payload)
                let content_end = if line_bytes.ends_with(b"\r\n") {
                    line_bytes.len() - 2
                } else if line_bytes.ends_with(b"\n") {
                    line_bytes.len() - 1
                } else {
                    line_bytes.len()
                };
                let line_content = &line_bytes[..content_end];

                // Handle dot-stuffing: lines starting with ".." become "."
                if line_content.starts_with(b"..") {
                    data.extend_from_slice(&line_content[1..]);
                } else {
                    data.extend_from_slice(line_content);
                }
                data.push(b'\n');
            }

            Ok(crate::response::NntpBinaryResponse {
                code,
                message,
                data,
            })
        };

        let result = timeout(deadline, read_future)
            .await
            .map_err(|_| SpoolError::Timeout)?;

        if let Err(SpoolError::InvalidResponse(_)) = &result {
            self.mark_broken();
        }

        result
    }
}
