use crate::error::ProvisionError;
use crate::types::NetworkSettings;
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// HTTP GET client with bounded connect and read time.
pub struct HttpFetcher {
    client: Client,
    read_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &NetworkSettings) -> Result<Self, ProvisionError> {
        let mut builder = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.connect_timeout());

        if !settings.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            read_timeout: settings.read_timeout(),
        })
    }

    /// Streams the body of `url` into `out` chunk by chunk, returning the byte count.
    ///
    /// `path` names the destination for error reporting only. Every wait on the
    /// server (response headers, each body chunk) is bounded by the read timeout.
    pub async fn download_to<W>(
        &self,
        url: &str,
        out: &mut W,
        path: &Path,
    ) -> Result<u64, ProvisionError>
    where
        W: AsyncWrite + Unpin,
    {
        tracing::debug!("Fetching: {}", url);

        let response = tokio::time::timeout(self.read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| self.timed_out(url))?
            .map_err(|e| ProvisionError::DownloadFailed {
                url: url.to_string(),
                status: e.status().map(|s| s.as_u16()),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::DownloadFailed {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("server returned {}", status),
            });
        }

        let mut body = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let next = tokio::time::timeout(self.read_timeout, body.next())
                .await
                .map_err(|_| self.timed_out(url))?;

            let Some(chunk) = next else {
                break;
            };

            let chunk = chunk.map_err(|e| ProvisionError::DownloadFailed {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("body read failed: {}", e),
            })?;

            out.write_all(&chunk)
                .await
                .map_err(|e| ProvisionError::write(path, e))?;
            written += chunk.len() as u64;
        }

        out.flush()
            .await
            .map_err(|e| ProvisionError::write(path, e))?;

        tracing::debug!(url = %url, bytes = written, "Download complete");
        Ok(written)
    }

    fn timed_out(&self, url: &str) -> ProvisionError {
        ProvisionError::DownloadFailed {
            url: url.to_string(),
            status: None,
            reason: format!("timed out after {:?}", self.read_timeout),
        }
    }
}
