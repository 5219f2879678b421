//! AUTHINFO USER/PASS authentication (RFC 4643)

use super::UpstreamClient;
use crate::commands;
use crate::error::{Result, SpoolError};
use crate::response::codes;
use tracing::debug;

impl UpstreamClient {
    /// Authenticate with AUTHINFO USER/PASS if credentials are configured
    ///
    /// A server without configured credentials is used anonymously; calling
    /// this is then a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::AuthFailed`] when the server rejects the
    /// credentials, or the usual I/O and protocol errors.
    pub async fn authenticate(&mut self) -> Result<()> {
        let (Some(username), Some(password)) = (
            self.config.username.clone(),
            self.config.password.clone(),
        ) else {
            debug!("No credentials configured for {}, skipping AUTHINFO", self.config.host);
            return Ok(());
        };

        let cmd = commands::authinfo_user(&username);
        self.send_command(&cmd).await?;
        let response = self.read_response().await?;

        match response.code {
            codes::AUTH_ACCEPTED => return Ok(()),
            codes::AUTH_CONTINUE => {}
            _ => {
                return Err(SpoolError::AuthFailed(format!(
                    "{} {}",
                    response.code, response.message
                )));
            }
        }

        let cmd = commands::authinfo_pass(&password);
        self.send_command(&cmd).await?;
        let response = self.read_response().await?;

        if response.code != codes::AUTH_ACCEPTED {
            return Err(SpoolError::AuthFailed(format!(
                "{} {}",
                response.code, response.message
            )));
        }

        debug!("Authenticated against {}", self.config.host);
        Ok(())
    }
}
