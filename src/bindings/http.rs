use async_trait::async_trait;
use tracing::trace;
use url::Url;

use super::{FetchError, FetchResponse, Fetcher};

/// [`Fetcher`] performing plain HTTP(S) GET requests.
///
/// Timeouts are enforced by the caller, not here.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an `HttpFetcher` sharing an already-configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        trace!(url = %url, "Req: GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(to_fetch_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let final_url = response.url().clone();
        let data = response.bytes().await.map_err(to_fetch_error)?;
        Ok(FetchResponse { data, final_url })
    }
}

fn to_fetch_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = err.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Transport(err.to_string())
    }
}
