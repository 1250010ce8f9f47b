use crate::types::{DetectedVulnerability, Digest, OsInfo, Package, Severity};
use serde::{Deserialize, Serialize};

/// Canonical, unfiltered result of matching one artifact.
///
/// Carries no timestamps, so scanning the same artifact against the same DB
/// serializes to identical bytes whether it ran locally or on a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub target: String,
    pub artifact_digest: Digest,
    pub metadata: ReportMetadata,
    pub vulnerabilities: Vec<DetectedVulnerability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsInfo>,
    pub package_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_digest: Option<Digest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
    pub fixable: usize,
}

impl Report {
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.vulnerabilities.len(),
            ..Default::default()
        };

        for vuln in &self.vulnerabilities {
            match vuln.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Unknown => summary.unknown += 1,
            }
            if vuln.is_fixable() {
                summary.fixable += 1;
            }
        }

        summary
    }
}
