use crate::error::{KuraError, Result};
use crate::types::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping for the installed vulnerability DB.
///
/// `downloaded_at` is when the fetch began, `updated_at` when the new copy
/// was committed, `next_update_at` when it is considered stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMetadata {
    pub schema_version: u32,
    pub digest: Digest,
    pub downloaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_update_at: DateTime<Utc>,
}

impl DbMetadata {
    pub fn new(
        schema_version: u32,
        digest: Digest,
        downloaded_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        next_update_at: DateTime<Utc>,
    ) -> Result<Self> {
        if downloaded_at > updated_at || updated_at > next_update_at {
            return Err(KuraError::database(format!(
                "inconsistent DB metadata: downloaded {} / updated {} / next update {}",
                downloaded_at, updated_at, next_update_at
            )));
        }

        Ok(Self {
            schema_version,
            digest,
            downloaded_at,
            updated_at,
            next_update_at,
        })
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_update_at
    }
}
