use async_trait::async_trait;
use kura_core::types::{ArtifactInfo, OsInfo, Package};
use kura_core::{Analyzer, KuraError, Result};
use serde::Deserialize;

/// On-disk inventory format:
///
/// ```json
/// {"os": {"family": "alpine", "name": "3.19"},
///  "packages": [{"name": "openssl", "version": "3.1.4"}]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub os: Option<OsInfo>,
    #[serde(default)]
    pub packages: Vec<Package>,
}

pub struct InventoryAnalyzer;

impl InventoryAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InventoryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for InventoryAnalyzer {
    fn name(&self) -> &'static str {
        "inventory"
    }

    async fn analyze(&self, blob: &[u8]) -> Result<ArtifactInfo> {
        let inventory: Inventory = serde_json::from_slice(blob)
            .map_err(|e| KuraError::analysis(format!("invalid package inventory: {}", e)))?;

        let mut packages = Vec::with_capacity(inventory.packages.len());
        for package in inventory.packages {
            if package.name.trim().is_empty() {
                return Err(KuraError::analysis("package with empty name in inventory"));
            }
            if package.version.trim().is_empty() {
                return Err(KuraError::analysis(format!(
                    "package {} has no version",
                    package.name
                )));
            }
            packages.push(package);
        }

        // Canonical order so equal inventories produce equal cache values.
        packages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        packages.dedup();

        tracing::debug!(packages = packages.len(), "analyzed inventory");
        Ok(ArtifactInfo {
            os: inventory.os,
            packages,
        })
    }
}
