use crate::error::{KuraError, Result};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrying GET client used to pull published vulnerability databases.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retries: u32,
    backoff: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KuraError::Transport {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_secs(1),
        })
    }

    pub async fn get_json<T>(&self, url: &str) -> Result<T>
    where
        T: for<'a> Deserialize<'a>,
    {
        let body = self.get_bytes(url).await?;
        serde_json::from_slice(&body).map_err(|e| KuraError::Transport {
            message: format!("invalid JSON from {}: {}", url, e),
        })
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            let failure = match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| transport_error(url, &e));
                }
                Ok(response) if response.status().is_client_error() => {
                    return Err(KuraError::Transport {
                        message: format!("GET {} returned {}", url, response.status()),
                    });
                }
                Ok(response) => format!("GET {} returned {}", url, response.status()),
                Err(e) => transport_error(url, &e).to_string(),
            };

            if attempt >= self.retries {
                return Err(KuraError::Transport { message: failure });
            }

            let delay = self.backoff * 2u32.pow(attempt);
            tracing::debug!(url, attempt, ?delay, "retrying after failure: {}", failure);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Flattens the reqwest error chain so the root cause (refused, TLS) is visible.
pub(crate) fn transport_error(url: &str, err: &reqwest::Error) -> KuraError {
    let mut message = format!("{}: {}", url, err);
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    KuraError::Transport { message }
}
