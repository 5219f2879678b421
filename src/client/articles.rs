//! Article fetching (immediate and pipelined) and posting

use super::UpstreamClient;
use crate::commands;
use crate::error::{Result, SpoolError};
use crate::response::{NntpBinaryResponse, codes};
use tracing::trace;

impl UpstreamClient {
    /// Fetch an article as raw binary data
    ///
    /// `id` is an article number in the selected group or a bracketed
    /// Message-ID. The returned data has dot-stuffing removed and
    /// LF-terminated lines.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - [`SpoolError::NoSuchArticle`] - The article does not exist
    /// - [`SpoolError::Protocol`] - Server returned an unexpected error
    /// - [`SpoolError::Timeout`] - Server did not respond in time
    pub async fn fetch_article(&mut self, id: &str) -> Result<NntpBinaryResponse> {
        trace!("Fetching article: {}", id);

        let cmd = commands::article(id);
        self.send_command(&cmd).await?;
        let response = self.read_multiline_response_binary().await?;

        if response.code == codes::NO_SUCH_ARTICLE_ID
            || response.code == codes::NO_SUCH_ARTICLE_NUMBER
        {
            return Err(SpoolError::NoSuchArticle(id.to_string()));
        }

        if !response.is_success() {
            return Err(SpoolError::Protocol {
                code: response.code,
                message: response.message,
            });
        }

        Ok(response)
    }

    /// Fetch an article body as raw binary data (delay-body completion)
    pub async fn fetch_body(&mut self, id: &str) -> Result<NntpBinaryResponse> {
        trace!("Fetching body: {}", id);

        let cmd = commands::body(id);
        self.send_command(&cmd).await?;
        let response = self.read_multiline_response_binary().await?;

        if !response.is_success() {
            return Err(SpoolError::Protocol {
                code: response.code,
                message: response.message,
            });
        }

        Ok(response)
    }

    /// Queue a pipelined ARTICLE request without waiting for the reply
    ///
    /// Used by the fetch window: requests are queued up to the window
    /// bound, flushed with [`flush_requests`](Self::flush_requests), then
    /// replies are drained with
    /// [`read_article_reply`](Self::read_article_reply) in send order.
    pub async fn queue_article_request(&mut self, id: &str) -> Result<()> {
        let cmd = commands::article(id);
        self.queue_command(&cmd).await
    }

    /// Flush queued pipelined requests to the wire
    pub async fn flush_requests(&mut self) -> Result<()> {
        self.flush_commands().await
    }

    /// Read one pipelined ARTICLE reply
    ///
    /// Per-article failure codes (423/430) are returned as a response, not
    /// an error; the caller tallies them and keeps draining. Only transport
    /// problems surface as errors.
    pub async fn read_article_reply(&mut self) -> Result<NntpBinaryResponse> {
        self.read_multiline_response_binary().await
    }

    /// Post an article (POST)
    ///
    /// The text must be a complete article (headers, blank line, body)
    /// without dot-stuffing; stuffing and the terminating lone dot are
    /// applied here.
    ///
    /// # Errors
    ///
    /// - [`SpoolError::PostingNotPermitted`] - Server answered 440
    /// - [`SpoolError::PostingFailed`] - Article was rejected (441)
    pub async fn post_article(&mut self, text: &str) -> Result<()> {
        self.send_command(commands::post()).await?;
        let response = self.read_response().await?;

        if response.code != codes::SEND_ARTICLE {
            return match response.code {
                codes::POSTING_NOT_PERMITTED => Err(SpoolError::PostingNotPermitted),
                _ => Err(SpoolError::PostingFailed(format!(
                    "{} {}",
                    response.code, response.message
                ))),
            };
        }

        let wire = commands::dot_stuff(text);
        self.send_command(&wire).await?;

        let response = self.read_response().await?;
        commands::parse_post_response(response)
    }

    /// Close the connection politely (QUIT)
    ///
    /// Errors are ignored; the server may have dropped the link already.
    pub async fn quit(mut self) {
        let _ = self.send_command(commands::quit()).await;
        let _ = self.read_response().await;
    }
}
