//! Minimal report templates.
//!
//! `{{ field }}` inserts a report field and `{{ field | func }}` passes it
//! through a named function first. `{{ range vulnerabilities }} ... {{ end }}`
//! repeats its body once per vulnerability, where the per-vulnerability
//! fields `id`, `package`, `installed`, `fixed`, `severity`, `title` and
//! `references` are also available.

use anyhow::{bail, Result};
use kura_core::{DetectedVulnerability, Report};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

type TemplateFn = fn(&str) -> String;

/// Functions a template may call by name.
///
/// Passed to the renderer explicitly; there is no global registry.
/// Built-ins: `upper`, `lower`, `trim` and `escape_xml`.
#[derive(Clone)]
pub struct TemplateFuncs {
    funcs: BTreeMap<String, TemplateFn>,
}

impl TemplateFuncs {
    pub fn empty() -> Self {
        Self {
            funcs: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        Self::empty()
            .with("upper", |s| s.to_uppercase())
            .with("lower", |s| s.to_lowercase())
            .with("trim", |s| s.trim().to_string())
            .with("escape_xml", escape_xml)
    }

    pub fn with(mut self, name: &str, func: TemplateFn) -> Self {
        self.funcs.insert(name.to_string(), func);
        self
    }

    pub fn get(&self, name: &str) -> Option<TemplateFn> {
        self.funcs.get(name).copied()
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn render(template: &str, report: &Report, funcs: &TemplateFuncs) -> Result<String> {
    let range = Regex::new(r"(?s)\{\{\s*range\s+vulnerabilities\s*\}\}(.*?)\{\{\s*end\s*\}\}")?;
    let placeholder = Regex::new(r"\{\{\s*([a-z_]+)\s*(?:\|\s*([a-z_]+)\s*)?\}\}")?;

    let top = report_fields(report);
    let mut out = String::new();
    let mut last = 0;

    for caps in range.captures_iter(template) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&substitute(&template[last..whole.start()], &placeholder, &[&top], funcs)?);
        for vuln in &report.vulnerabilities {
            let row = vulnerability_fields(vuln);
            out.push_str(&substitute(body.as_str(), &placeholder, &[&row, &top], funcs)?);
        }
        last = whole.end();
    }
    out.push_str(&substitute(&template[last..], &placeholder, &[&top], funcs)?);

    Ok(out)
}

type Fields = HashMap<&'static str, String>;

fn substitute(text: &str, placeholder: &Regex, scopes: &[&Fields], funcs: &TemplateFuncs) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in placeholder.captures_iter(text) {
        let (Some(whole), Some(field)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(value) = scopes.iter().find_map(|scope| scope.get(field.as_str())) else {
            bail!("unknown template field: {}", field.as_str());
        };
        let value = match caps.get(2) {
            Some(name) => match funcs.get(name.as_str()) {
                Some(func) => func(value),
                None => bail!("unknown template function: {}", name.as_str()),
            },
            None => value.clone(),
        };

        out.push_str(&text[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&text[last..]);

    Ok(out)
}

fn report_fields(report: &Report) -> Fields {
    let summary = report.summary();
    let mut fields = Fields::new();
    fields.insert("target", report.target.clone());
    fields.insert("digest", report.artifact_digest.to_string());
    fields.insert("package_count", report.metadata.package_count.to_string());
    fields.insert(
        "os",
        report
            .metadata
            .os
            .as_ref()
            .map(|os| format!("{} {}", os.family, os.name))
            .unwrap_or_default(),
    );
    fields.insert("total", summary.total.to_string());
    fields.insert("critical", summary.critical.to_string());
    fields.insert("high", summary.high.to_string());
    fields.insert("medium", summary.medium.to_string());
    fields.insert("low", summary.low.to_string());
    fields.insert("unknown", summary.unknown.to_string());
    fields
}

fn vulnerability_fields(vuln: &DetectedVulnerability) -> Fields {
    let mut fields = Fields::new();
    fields.insert("id", vuln.id.clone());
    fields.insert("package", vuln.package_name.clone());
    fields.insert("installed", vuln.installed_version.clone());
    fields.insert("fixed", vuln.fixed_version.clone().unwrap_or_default());
    fields.insert("severity", vuln.severity.to_string());
    fields.insert("title", vuln.title.clone());
    fields.insert("references", vuln.references.join(","));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::tests::sample;

    #[test]
    fn test_fields_and_range() {
        let out = render(
            "{{ target }}: {{ total }}\n{{ range vulnerabilities }}{{ id }} {{ severity | lower }} in {{ package }}\n{{ end }}",
            &sample(),
            &TemplateFuncs::builtin(),
        )
        .unwrap();

        assert_eq!(out, "alpine.json: 1\nCVE-2024-0727 medium in openssl\n");
    }

    #[test]
    fn test_escape_xml() {
        let out = render(
            "{{ range vulnerabilities }}<title>{{ title | escape_xml }}</title>{{ end }}",
            &sample(),
            &TemplateFuncs::builtin(),
        )
        .unwrap();

        assert_eq!(out, "<title>PKCS12 &lt;NULL&gt; deref</title>");
    }

    #[test]
    fn test_functions_come_from_the_passed_value() {
        let funcs = TemplateFuncs::empty().with("shout", |s| format!("{}!", s.to_uppercase()));

        assert_eq!(render("{{ target | shout }}", &sample(), &funcs).unwrap(), "ALPINE.JSON!");
        assert!(render("{{ target | upper }}", &sample(), &funcs).is_err());
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        assert!(render("{{ nope }}", &sample(), &TemplateFuncs::builtin()).is_err());
        // Row fields only exist inside a range.
        assert!(render("{{ id }}", &sample(), &TemplateFuncs::builtin()).is_err());
    }
}
