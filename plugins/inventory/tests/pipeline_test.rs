use chrono::Utc;
use kura_core::cache::FilesystemStore;
use kura_core::db::{PublishedDb, SCHEMA_VERSION};
use kura_core::{CacheManager, Digest, FilterOptions, PluginRegistry, ScanOptions, Scanner, Severity, VulnDbCache};
use kura_plugin_inventory::InventoryPlugin;
use std::sync::Arc;
use tempfile::TempDir;

const DB: &str = r#"{
  "schema_version": 2,
  "advisories": [
    {"id": "CVE-2024-0727", "package": "openssl", "severity": "MEDIUM",
     "affected_versions": [">=3.0.0, <3.1.5"], "fixed_version": "3.1.5"},
    {"id": "CVE-2023-42366", "package": "busybox", "severity": "HIGH",
     "affected_versions": ["<=1.36.1"]},
    {"id": "CVE-2022-37434", "package": "zlib", "severity": "CRITICAL",
     "affected_versions": ["<1.2.13"], "fixed_version": "1.2.13"}
  ]
}"#;

const INVENTORY: &str = r#"{
  "os": {"family": "alpine", "name": "3.19.0"},
  "packages": [
    {"name": "busybox", "version": "1.36.1"},
    {"name": "openssl", "version": "3.1.4"},
    {"name": "zlib", "version": "1.3.1"}
  ]
}"#;

async fn scanner(dir: &TempDir) -> Scanner {
    let db = VulnDbCache::open(dir.path(), None).unwrap();
    db.install(
        DB.as_bytes(),
        &PublishedDb {
            schema_version: SCHEMA_VERSION,
            digest: Digest::of(DB.as_bytes()),
            next_update_at: None,
        },
        Utc::now(),
    )
    .await
    .unwrap();

    let mut registry = PluginRegistry::new();
    registry.register_plugin(InventoryPlugin::new());
    let store = Arc::new(FilesystemStore::new(dir.path().join("fanal")).unwrap());

    Scanner::new(
        registry.analyzer(None).unwrap(),
        registry.matcher(None).unwrap(),
        CacheManager::new(store),
        Arc::new(db),
    )
}

#[tokio::test]
async fn test_inventory_scan_end_to_end() {
    let dir = TempDir::new().unwrap();
    let scanner = scanner(&dir).await;

    let outcome = scanner
        .scan_blob("rootfs.json", INVENTORY.as_bytes().to_vec(), &ScanOptions::default())
        .await
        .unwrap();
    let report = outcome.report;

    let ids: Vec<_> = report.vulnerabilities.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["CVE-2023-42366", "CVE-2024-0727"]);
    assert_eq!(report.metadata.package_count, 3);
    assert_eq!(report.metadata.os.as_ref().unwrap().family, "alpine");
    assert_eq!(report.metadata.db_digest, Some(Digest::of(DB.as_bytes())));

    let summary = report.summary();
    assert_eq!(summary.high, 1);
    assert_eq!(summary.medium, 1);
    assert_eq!(summary.fixable, 1);
}

#[tokio::test]
async fn test_filters_apply_to_inventory_report() {
    let dir = TempDir::new().unwrap();
    let scanner = scanner(&dir).await;
    let report = scanner
        .scan_blob("rootfs.json", INVENTORY.as_bytes().to_vec(), &ScanOptions::default())
        .await
        .unwrap()
        .report;

    let high_only = FilterOptions {
        severities: vec![Severity::High],
        ..Default::default()
    };
    assert_eq!(high_only.apply(&report).vulnerabilities.len(), 1);

    let fixable = FilterOptions {
        ignore_unfixed: true,
        ..Default::default()
    };
    assert_eq!(fixable.apply(&report).vulnerabilities[0].id, "CVE-2024-0727");
}
