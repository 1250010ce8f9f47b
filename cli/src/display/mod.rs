mod template;

pub use template::TemplateFuncs;

use clap::ValueEnum;
use colored::Colorize;
use kura_core::{Report, Severity};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Table,
    Json,
    Template,
}

pub fn render(
    report: &Report,
    format: Format,
    template: Option<&str>,
    funcs: &TemplateFuncs,
) -> anyhow::Result<String> {
    match (format, template) {
        (_, Some(source)) => template::render(source, report, funcs),
        (Format::Json, None) => Ok(format!("{}\n", print_json(report)?)),
        (Format::Table, None) => Ok(render_table(report)),
        (Format::Template, None) => anyhow::bail!("--format template requires --template"),
    }
}

pub fn print_json(report: &Report) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn severity_label(severity: Severity) -> String {
    let label = severity.as_str();
    match severity {
        Severity::Critical => label.red().bold().to_string(),
        Severity::High => label.red().to_string(),
        Severity::Medium => label.yellow().to_string(),
        Severity::Low => label.blue().to_string(),
        Severity::Unknown => label.dimmed().to_string(),
    }
}

pub fn render_table(report: &Report) -> String {
    let mut out = String::new();
    let summary = report.summary();

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", report.target.bold());
    let _ = writeln!(out, "{}", "=".repeat(report.target.len().max(20)));
    if let Some(os) = &report.metadata.os {
        let _ = writeln!(out, "OS: {} {}", os.family, os.name);
    }
    let _ = writeln!(out, "Packages: {}", report.metadata.package_count);
    let _ = writeln!(
        out,
        "Total: {} (CRITICAL: {}, HIGH: {}, MEDIUM: {}, LOW: {}, UNKNOWN: {})",
        summary.total, summary.critical, summary.high, summary.medium, summary.low, summary.unknown
    );
    let _ = writeln!(out);

    if report.vulnerabilities.is_empty() {
        let _ = writeln!(out, "{}", "No vulnerabilities found".green());
        return out;
    }

    let width = |f: fn(&kura_core::DetectedVulnerability) -> usize, header: &str| {
        report
            .vulnerabilities
            .iter()
            .map(f)
            .max()
            .unwrap_or(0)
            .max(header.len())
    };
    let pkg_w = width(|v| v.package_name.len(), "PACKAGE");
    let id_w = width(|v| v.id.len(), "VULNERABILITY");
    let inst_w = width(|v| v.installed_version.len(), "INSTALLED");
    let fixed_w = width(|v| v.fixed_version.as_deref().unwrap_or("").len(), "FIXED");

    let _ = writeln!(
        out,
        "{:pkg_w$}  {:id_w$}  {:8}  {:inst_w$}  {:fixed_w$}  TITLE",
        "PACKAGE", "VULNERABILITY", "SEVERITY", "INSTALLED", "FIXED",
    );
    for vuln in &report.vulnerabilities {
        // Pad before colouring; escape codes would skew the width.
        let severity = format!("{:8}", vuln.severity.as_str());
        let _ = writeln!(
            out,
            "{:pkg_w$}  {:id_w$}  {}  {:inst_w$}  {:fixed_w$}  {}",
            vuln.package_name,
            vuln.id,
            severity.replace(vuln.severity.as_str(), &severity_label(vuln.severity)),
            vuln.installed_version,
            vuln.fixed_version.as_deref().unwrap_or(""),
            vuln.title,
        );
    }

    if !report.packages.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Packages:");
        for package in &report.packages {
            let _ = writeln!(out, "  - {} {}", package.name, package.version);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kura_core::{DetectedVulnerability, Digest, ReportMetadata};

    pub(super) fn sample() -> Report {
        Report {
            target: "alpine.json".to_string(),
            artifact_digest: Digest::of(b"alpine"),
            metadata: ReportMetadata {
                os: None,
                package_count: 2,
                db_digest: None,
            },
            vulnerabilities: vec![DetectedVulnerability {
                id: "CVE-2024-0727".to_string(),
                package_name: "openssl".to_string(),
                installed_version: "3.1.4".to_string(),
                fixed_version: Some("3.1.5".to_string()),
                severity: Severity::Medium,
                title: "PKCS12 <NULL> deref".to_string(),
                references: Vec::new(),
            }],
            packages: Vec::new(),
        }
    }

    #[test]
    fn test_table_lists_vulnerabilities() {
        colored::control::set_override(false);
        let table = render_table(&sample());

        assert!(table.contains("Total: 1 (CRITICAL: 0, HIGH: 0, MEDIUM: 1"));
        assert!(table.contains("CVE-2024-0727"));
        assert!(table.contains("3.1.5"));
    }

    #[test]
    fn test_json_round_trips() {
        let json = render(&sample(), Format::Json, None, &TemplateFuncs::builtin()).unwrap();
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_template_format_needs_template() {
        assert!(render(&sample(), Format::Template, None, &TemplateFuncs::builtin()).is_err());
    }
}
