//! Client-side projections over a canonical [`Report`].

use crate::error::{KuraError, Result};
use crate::report::Report;
use crate::types::{DetectedVulnerability, Severity};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_IGNOREFILE: &str = ".kuraignore";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Severities to keep; empty keeps everything.
    pub severities: Vec<Severity>,
    pub ignored_ids: HashSet<String>,
    pub ignore_unfixed: bool,
}

impl FilterOptions {
    /// Keeps the vulnerabilities that pass, in their original order.
    ///
    /// Applied as ignore-ID, then ignore-unfixed, then severity.
    pub fn apply(&self, report: &Report) -> Report {
        Report {
            vulnerabilities: self.filter(&report.vulnerabilities),
            ..report.clone()
        }
    }

    pub fn filter(&self, vulnerabilities: &[DetectedVulnerability]) -> Vec<DetectedVulnerability> {
        vulnerabilities
            .iter()
            .filter(|v| !self.ignored_ids.contains(&v.id))
            .filter(|v| !self.ignore_unfixed || v.is_fixable())
            .filter(|v| self.severities.is_empty() || self.severities.contains(&v.severity))
            .cloned()
            .collect()
    }
}

/// Parses a comma separated severity list such as `HIGH,critical`.
pub fn parse_severities(raw: &str) -> Result<Vec<Severity>> {
    let mut severities = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let severity: Severity = part.parse()?;
        if !severities.contains(&severity) {
            severities.push(severity);
        }
    }
    Ok(severities)
}

/// Reads an ignore file: one vulnerability ID per line, `#` starts a comment.
///
/// A missing file is only an error when it was explicitly requested.
pub fn load_ignore_file(path: &Path, required: bool) -> Result<HashSet<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(HashSet::new());
        }
        Err(e) => return Err(KuraError::io(path, e)),
    };

    Ok(parse_ignore_list(&content))
}

pub fn parse_ignore_list(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
