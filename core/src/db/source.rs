use crate::error::Result;
use crate::http::HttpClient;
use crate::types::Digest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Description of the most recent DB a repository publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedDb {
    pub schema_version: u32,
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_update_at: Option<DateTime<Utc>>,
}

/// Where fresh vulnerability DBs come from.
#[async_trait]
pub trait DbSource: Send + Sync {
    async fn fetch_metadata(&self) -> Result<PublishedDb>;

    async fn fetch(&self, published: &PublishedDb) -> Result<Vec<u8>>;
}

/// Repository layout: `<base>/metadata.json` describing `<base>/db.json`.
pub struct HttpDbSource {
    client: HttpClient,
    repository: String,
}

impl HttpDbSource {
    pub fn new(repository: &str) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new()?,
            repository: repository.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DbSource for HttpDbSource {
    async fn fetch_metadata(&self) -> Result<PublishedDb> {
        self.client
            .get_json(&format!("{}/metadata.json", self.repository))
            .await
    }

    async fn fetch(&self, published: &PublishedDb) -> Result<Vec<u8>> {
        tracing::info!(digest = %published.digest, "downloading vulnerability DB");
        self.client
            .get_bytes(&format!("{}/db.json", self.repository))
            .await
    }
}
