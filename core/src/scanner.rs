use crate::cache::{CacheManager, Origin, Resolution};
use crate::db::VulnDbCache;
use crate::error::{KuraError, Result};
use crate::plugin::{Analyzer, Matcher};
use crate::report::{Report, ReportMetadata};
use crate::types::{ArtifactInfo, Digest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub list_all_packages: bool,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub report: Report,
    pub origin: Origin,
    /// Non-fatal problems, such as analyzed facts that could not be cached.
    pub warnings: Vec<String>,
}

/// Analyze-then-match pipeline shared by the server and the local scan.
///
/// Analyzed facts are cached under the artifact digest; matching always runs
/// against the current DB.
#[derive(Clone)]
pub struct Scanner {
    analyzer: Arc<dyn Analyzer>,
    matcher: Arc<dyn Matcher>,
    cache: CacheManager,
    db: Arc<VulnDbCache>,
}

impl Scanner {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        matcher: Arc<dyn Matcher>,
        cache: CacheManager,
        db: Arc<VulnDbCache>,
    ) -> Self {
        Self {
            analyzer,
            matcher,
            cache,
            db,
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Analyzed facts for `digest`.
    ///
    /// Without a blob only a cache hit can answer ([`KuraError::MissingBlob`]
    /// otherwise). With a blob, it must hash to `digest` and is analyzed at
    /// most once per digest however many callers race on it. A cached entry
    /// that no longer decodes is discarded and treated as a miss.
    pub async fn resolve(
        &self,
        digest: &Digest,
        blob: Option<Arc<Vec<u8>>>,
        warnings: &mut Vec<String>,
    ) -> Result<(ArtifactInfo, Origin)> {
        let Some(blob) = blob else {
            let missing = || KuraError::MissingBlob {
                digest: digest.to_string(),
            };
            let value = self.cache.lookup(digest.as_str()).await?.ok_or_else(missing)?;
            return match serde_json::from_slice(&value) {
                Ok(info) => Ok((info, Origin::Hit)),
                Err(e) => {
                    self.discard_unreadable(digest, &e).await;
                    Err(missing())
                }
            };
        };

        if !digest.matches(&blob) {
            return Err(KuraError::InvalidRequest {
                message: format!("uploaded content does not match digest {}", digest),
            });
        }

        let mut resolution = self.populate(digest, blob.clone()).await?;
        if resolution.origin == Origin::Hit {
            if let Err(e) = serde_json::from_slice::<ArtifactInfo>(&resolution.value) {
                self.discard_unreadable(digest, &e).await;
                resolution = self.populate(digest, blob).await?;
            }
        }

        if let Some(e) = &resolution.store_error {
            warnings.push(format!("analysis of {} was not cached: {}", digest, e));
        }

        Ok((serde_json::from_slice(&resolution.value)?, resolution.origin))
    }

    async fn populate(&self, digest: &Digest, blob: Arc<Vec<u8>>) -> Result<Resolution> {
        let analyzer = self.analyzer.clone();
        self.cache
            .get_or_populate(digest.as_str(), move || async move {
                let info = analyzer.analyze(&blob).await?;
                Ok(serde_json::to_vec(&info)?)
            })
            .await
    }

    async fn discard_unreadable(&self, digest: &Digest, err: &serde_json::Error) {
        tracing::warn!(%digest, "discarding unreadable cached analysis: {}", err);
        if let Err(e) = self.cache.invalidate(digest.as_str()).await {
            tracing::warn!(%digest, "failed to discard cached analysis: {}", e);
        }
    }

    /// Matches `info` against the current DB.
    pub async fn matched(
        &self,
        target: &str,
        digest: &Digest,
        info: ArtifactInfo,
        options: &ScanOptions,
    ) -> Result<Report> {
        let db = self.db.read().await?;
        let db_digest = Some(Digest::of(&db));

        let mut vulnerabilities = self.matcher.detect(&info, &db).await?;
        vulnerabilities.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.package_name.cmp(&b.package_name))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(Report {
            target: target.to_string(),
            artifact_digest: digest.clone(),
            metadata: ReportMetadata {
                os: info.os,
                package_count: info.packages.len(),
                db_digest,
            },
            vulnerabilities,
            packages: if options.list_all_packages {
                info.packages
            } else {
                Vec::new()
            },
        })
    }

    pub async fn scan(
        &self,
        target: &str,
        digest: &Digest,
        blob: Option<Arc<Vec<u8>>>,
        options: &ScanOptions,
    ) -> Result<ScanOutcome> {
        let mut warnings = Vec::new();
        let (info, origin) = self.resolve(digest, blob, &mut warnings).await?;
        let report = self.matched(target, digest, info, options).await?;

        Ok(ScanOutcome {
            report,
            origin,
            warnings,
        })
    }

    /// Scans content that is already in hand.
    pub async fn scan_blob(
        &self,
        target: &str,
        blob: Vec<u8>,
        options: &ScanOptions,
    ) -> Result<ScanOutcome> {
        let digest = Digest::of(&blob);
        self.scan(target, &digest, Some(Arc::new(blob)), options).await
    }
}
