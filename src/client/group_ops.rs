//! Group selection, listing and overview operations

use super::UpstreamClient;
use crate::commands::{self, ActiveGroup, GroupDescription, GroupInfo, HdrEntry, XoverEntry};
use crate::error::{Result, SpoolError};
use crate::response::codes;
use chrono::NaiveDateTime;
use tracing::{debug, trace};

impl UpstreamClient {
    /// Switch the server into reader mode (MODE READER)
    ///
    /// Best-effort: transit servers answer 200/201, others reject the
    /// command entirely. Failure is not fatal; the follow-up commands
    /// decide whether the server is usable.
    pub async fn mode_reader(&mut self) -> Result<()> {
        self.send_command(commands::mode_reader()).await?;
        let response = self.read_response().await?;
        debug!("MODE READER: {} {}", response.code, response.message);
        if response.is_success() {
            self.posting_allowed = response.code == codes::READY_POSTING_ALLOWED;
        }
        Ok(())
    }

    /// Select a newsgroup (GROUP command)
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::NoSuchGroup`] if the server does not carry the
    /// group (411).
    pub async fn select_group(&mut self, name: &str) -> Result<GroupInfo> {
        trace!("Selecting group: {}", name);

        let cmd = commands::group(name);
        self.send_command(&cmd).await?;
        let response = self.read_response().await?;

        if response.code == codes::NO_SUCH_GROUP {
            return Err(SpoolError::NoSuchGroup(name.to_string()));
        }

        let info = commands::parse_group_response(response)?;
        self.current_group = Some(name.to_string());
        Ok(info)
    }

    /// Fetch the full active list (LIST ACTIVE)
    pub async fn fetch_active(&mut self) -> Result<Vec<ActiveGroup>> {
        self.send_command(commands::list_active()).await?;
        let response = self.read_multiline_response().await?;
        commands::parse_list_active_response(response)
    }

    /// Fetch newsgroup descriptions (LIST NEWSGROUPS)
    pub async fn fetch_descriptions(&mut self) -> Result<Vec<GroupDescription>> {
        self.send_command(commands::list_newsgroups()).await?;
        let response = self.read_multiline_response().await?;
        commands::parse_list_newsgroups_response(response)
    }

    /// Fetch newsgroups created since the given UTC timestamp (NEWGROUPS)
    pub async fn new_groups_since(&mut self, since: NaiveDateTime) -> Result<Vec<ActiveGroup>> {
        let date = since.format("%Y%m%d").to_string();
        let time = since.format("%H%M%S").to_string();
        let cmd = commands::newgroups(&date, &time);
        self.send_command(&cmd).await?;
        let response = self.read_multiline_response().await?;
        commands::parse_newgroups_response(response)
    }

    /// Query the server clock (DATE)
    pub async fn server_date(&mut self) -> Result<NaiveDateTime> {
        self.send_command(commands::date()).await?;
        let response = self.read_response().await?;
        if response.code != codes::SERVER_DATE {
            return Err(SpoolError::Protocol {
                code: response.code,
                message: response.message,
            });
        }
        commands::parse_date_response(&response.message)
    }

    /// Fetch overview data for an article range (XOVER)
    ///
    /// Requires a selected group. Malformed overview lines are skipped.
    pub async fn xover_range(&mut self, first: u64, last: u64) -> Result<Vec<XoverEntry>> {
        let cmd = commands::xover(&format!("{}-{}", first, last));
        self.send_command(&cmd).await?;
        let response = self.read_multiline_response().await?;
        commands::parse_xover_response(response)
    }

    /// Fetch one header for an article range (XHDR)
    ///
    /// The permanent fallback when a server has no usable XOVER.
    pub async fn xhdr_range(
        &mut self,
        header: &str,
        first: u64,
        last: u64,
    ) -> Result<Vec<HdrEntry>> {
        let cmd = commands::xhdr(header, &format!("{}-{}", first, last));
        self.send_command(&cmd).await?;
        let response = self.read_multiline_response().await?;
        commands::parse_xhdr_response(response)
    }
}
