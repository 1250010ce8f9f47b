use super::{ErrorBody, ScanRequest, ScanResponse, SCAN_PATH};
use crate::auth::INVALID_TOKEN;
use crate::config::AuthToken;
use crate::error::{KuraError, Result};
use crate::http::transport_error;
use crate::scanner::ScanOptions;
use crate::types::Digest;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub url: String,
    pub token: Option<AuthToken>,
    pub timeout: Duration,
}

impl RemoteOptions {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            token: None,
            timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_token(mut self, token: AuthToken) -> Self {
        self.token = Some(token);
        self
    }
}

pub struct ScanClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<AuthToken>,
}

impl ScanClient {
    pub fn new(options: RemoteOptions) -> Result<Self> {
        let base = options.url.trim_end_matches('/');
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(KuraError::config(format!(
                "remote server URL must start with http:// or https://: {}",
                options.url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| KuraError::Transport {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            endpoint: format!("{}{}", base, SCAN_PATH),
            token: options.token,
        })
    }

    /// Scans `blob` on the server, uploading it only if the server has not
    /// analyzed this digest before.
    pub async fn scan(&self, target: &str, blob: Vec<u8>, options: &ScanOptions) -> Result<ScanResponse> {
        let mut request = ScanRequest {
            target: target.to_string(),
            digest: Digest::of(&blob),
            blob: None,
            options: *options,
        };

        let response = match self.send(&request).await {
            Err(KuraError::MissingBlob { .. }) => {
                tracing::debug!(digest = %request.digest, size = blob.len(), "server cache is cold; uploading artifact");
                request.blob = Some(blob);
                self.send(&request).await?
            }
            other => other?,
        };

        for warning in &response.warnings {
            tracing::warn!("server: {}", warning);
        }
        Ok(response)
    }

    async fn send(&self, request: &ScanRequest) -> Result<ScanResponse> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            builder = builder.header(token.header(), token.value());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&self.endpoint, &e))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<ScanResponse>()
                .await
                .map_err(|e| transport_error(&self.endpoint, &e));
        }

        // A 401 may come from a proxy in front of the server, so its body is
        // not trusted to carry the invalid-token message.
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(KuraError::Unauthenticated {
                message: INVALID_TOKEN.to_string(),
            });
        }

        let body = response.json::<ErrorBody>().await.unwrap_or_else(|_| ErrorBody {
            code: super::CODE_INTERNAL.to_string(),
            msg: format!("server returned {}", status),
        });
        Err(body.into_error(&request.digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_url() {
        assert!(ScanClient::new(RemoteOptions::new("localhost:4954")).is_err());
        assert!(ScanClient::new(RemoteOptions::new("http://localhost:4954/")).is_ok());
    }

    #[tokio::test]
    async fn test_bare_unauthorized_reports_invalid_token() {
        use axum::{http::StatusCode, routing::post, Router};

        let app = Router::new().route(
            SCAN_PATH,
            post(|| async { (StatusCode::UNAUTHORIZED, "401 Authorization Required") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let err = ScanClient::new(RemoteOptions::new(&url))
            .unwrap()
            .scan("app.json", b"{}".to_vec(), &ScanOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, KuraError::Unauthenticated { .. }), "unexpected: {err}");
        assert!(err.to_string().contains(INVALID_TOKEN));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = ScanClient::new(RemoteOptions::new(&format!("http://127.0.0.1:{}", port))).unwrap();

        let err = client
            .scan("app.json", b"{}".to_vec(), &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KuraError::Transport { .. }), "unexpected: {err}");
    }
}
