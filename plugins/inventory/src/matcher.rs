use crate::version::is_affected;
use async_trait::async_trait;
use kura_core::db::SCHEMA_VERSION;
use kura_core::types::{ArtifactInfo, DetectedVulnerability, Digest, Severity};
use kura_core::{KuraError, Matcher, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub package: String,
    pub severity: Severity,
    #[serde(default)]
    pub title: String,
    /// Semver requirements, e.g. `>=1.0, <1.4.2`.
    #[serde(default)]
    pub affected_versions: Vec<String>,
    #[serde(default)]
    pub fixed_version: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryDb {
    pub schema_version: u32,
    pub advisories: Vec<Advisory>,
}

type Index = HashMap<String, Vec<Advisory>>;

/// Matches packages by name against an [`AdvisoryDb`].
///
/// The parsed index is kept for the last DB seen and rebuilt when the DB
/// content changes.
pub struct InventoryMatcher {
    index: Mutex<Option<(Digest, Arc<Index>)>>,
}

impl InventoryMatcher {
    pub fn new() -> Self {
        Self {
            index: Mutex::new(None),
        }
    }

    fn index_for(&self, db: &[u8]) -> Result<Arc<Index>> {
        let digest = Digest::of(db);
        let mut cached = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((seen, index)) = cached.as_ref() {
            if *seen == digest {
                return Ok(index.clone());
            }
        }

        let parsed: AdvisoryDb = serde_json::from_slice(db)
            .map_err(|e| KuraError::database(format!("unreadable advisory DB: {}", e)))?;
        if parsed.schema_version != SCHEMA_VERSION {
            return Err(KuraError::database(format!(
                "advisory DB schema {} is not supported (expected {})",
                parsed.schema_version, SCHEMA_VERSION
            )));
        }

        let mut index = Index::new();
        for advisory in parsed.advisories {
            index.entry(advisory.package.clone()).or_default().push(advisory);
        }
        tracing::debug!(packages = index.len(), db = %digest, "indexed advisory DB");

        let index = Arc::new(index);
        *cached = Some((digest, index.clone()));
        Ok(index)
    }
}

impl Default for InventoryMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Matcher for InventoryMatcher {
    fn name(&self) -> &'static str {
        "inventory"
    }

    async fn detect(&self, artifact: &ArtifactInfo, db: &[u8]) -> Result<Vec<DetectedVulnerability>> {
        let index = self.index_for(db)?;
        let mut found = Vec::new();

        for package in &artifact.packages {
            let Some(advisories) = index.get(&package.name) else {
                continue;
            };
            for advisory in advisories {
                if !is_affected(
                    &package.version,
                    &advisory.affected_versions,
                    advisory.fixed_version.as_deref(),
                ) {
                    continue;
                }
                found.push(DetectedVulnerability {
                    id: advisory.id.clone(),
                    package_name: package.name.clone(),
                    installed_version: package.version.clone(),
                    fixed_version: advisory.fixed_version.clone(),
                    severity: advisory.severity,
                    title: advisory.title.clone(),
                    references: advisory.references.clone(),
                });
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kura_core::types::Package;

    fn db(advisories: Vec<Advisory>) -> Vec<u8> {
        serde_json::to_vec(&AdvisoryDb {
            schema_version: SCHEMA_VERSION,
            advisories,
        })
        .unwrap()
    }

    fn advisory(id: &str, package: &str, affected: &[&str], fixed: Option<&str>) -> Advisory {
        Advisory {
            id: id.to_string(),
            package: package.to_string(),
            severity: Severity::High,
            title: format!("{} in {}", id, package),
            affected_versions: affected.iter().map(|s| s.to_string()).collect(),
            fixed_version: fixed.map(str::to_string),
            references: Vec::new(),
        }
    }

    fn artifact(packages: &[(&str, &str)]) -> ArtifactInfo {
        ArtifactInfo {
            os: None,
            packages: packages
                .iter()
                .map(|(name, version)| Package {
                    name: name.to_string(),
                    version: version.to_string(),
                    source: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_detects_affected_packages_only() {
        let db = db(vec![
            advisory("CVE-1", "openssl", &["<3.1.5"], Some("3.1.5")),
            advisory("CVE-2", "openssl", &["<3.0.0"], Some("3.0.0")),
            advisory("CVE-3", "zlib", &[], Some("1.3.1")),
        ]);
        let matcher = InventoryMatcher::new();

        let found = matcher
            .detect(&artifact(&[("openssl", "3.1.4"), ("zlib", "1.3"), ("curl", "8.0")]), &db)
            .await
            .unwrap();

        let ids: Vec<_> = found.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["CVE-1", "CVE-3"]);
        assert_eq!(found[0].fixed_version.as_deref(), Some("3.1.5"));
    }

    #[tokio::test]
    async fn test_rejects_other_schema() {
        let db = serde_json::to_vec(&AdvisoryDb {
            schema_version: SCHEMA_VERSION + 1,
            advisories: Vec::new(),
        })
        .unwrap();

        let err = InventoryMatcher::new()
            .detect(&artifact(&[]), &db)
            .await
            .unwrap_err();
        assert!(matches!(err, KuraError::Database { .. }));
    }

    #[tokio::test]
    async fn test_reindexes_when_db_changes() {
        let matcher = InventoryMatcher::new();
        let pkgs = artifact(&[("zlib", "1.3")]);

        let old = db(Vec::new());
        assert!(matcher.detect(&pkgs, &old).await.unwrap().is_empty());

        let new = db(vec![advisory("CVE-3", "zlib", &["<1.3.1"], None)]);
        assert_eq!(matcher.detect(&pkgs, &new).await.unwrap().len(), 1);
    }
}
