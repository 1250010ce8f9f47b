#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use kura_core::cache::FilesystemStore;
use kura_core::config::AuthToken;
use kura_core::db::{PublishedDb, SCHEMA_VERSION};
use kura_core::{
    Analyzer, ArtifactInfo, AuthGuard, CacheManager, CacheStore, DetectedVulnerability, Digest,
    KuraError, Matcher, Result, ScanServer, Scanner, Severity, VulnDbCache,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const ARTIFACT: &str = r#"{
  "os": {"family": "alpine", "name": "3.19"},
  "packages": [
    {"name": "openssl", "version": "3.1.4"},
    {"name": "zlib", "version": "1.3"},
    {"name": "busybox", "version": "1.36.1"}
  ]
}"#;

/// Package name to (advisory id, severity, fixed version).
pub const ADVISORIES: &str = r#"{
  "openssl": ["CVE-2024-0727", "MEDIUM", "3.1.5"],
  "busybox": ["CVE-2023-42366", "HIGH", null]
}"#;

/// Reads the artifact as an `ArtifactInfo` JSON document and counts calls.
#[derive(Default)]
pub struct CountingAnalyzer {
    pub calls: AtomicUsize,
    pub failures_left: AtomicUsize,
}

impl CountingAnalyzer {
    pub fn failing_first(times: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(times),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for CountingAnalyzer {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn analyze(&self, blob: &[u8]) -> Result<ArtifactInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(KuraError::analysis("layer could not be unpacked"));
        }

        serde_json::from_slice(blob).map_err(|e| KuraError::analysis(e.to_string()))
    }
}

pub struct TableMatcher;

#[async_trait]
impl Matcher for TableMatcher {
    fn name(&self) -> &'static str {
        "table"
    }

    async fn detect(&self, artifact: &ArtifactInfo, db: &[u8]) -> Result<Vec<DetectedVulnerability>> {
        let table: HashMap<String, (String, Severity, Option<String>)> = serde_json::from_slice(db)?;

        Ok(artifact
            .packages
            .iter()
            .filter_map(|pkg| {
                table.get(&pkg.name).map(|(id, severity, fixed)| DetectedVulnerability {
                    id: id.clone(),
                    package_name: pkg.name.clone(),
                    installed_version: pkg.version.clone(),
                    fixed_version: fixed.clone(),
                    severity: *severity,
                    title: String::new(),
                    references: Vec::new(),
                })
            })
            .collect())
    }
}

pub async fn install_db(dir: &Path) -> Arc<VulnDbCache> {
    let db = VulnDbCache::open(dir, None).unwrap();
    let published = PublishedDb {
        schema_version: SCHEMA_VERSION,
        digest: Digest::of(ADVISORIES.as_bytes()),
        next_update_at: None,
    };
    db.install(ADVISORIES.as_bytes(), &published, Utc::now())
        .await
        .unwrap();
    Arc::new(db)
}

pub fn scanner_with(analyzer: Arc<CountingAnalyzer>, store: Arc<dyn CacheStore>, db: Arc<VulnDbCache>) -> Scanner {
    Scanner::new(analyzer, Arc::new(TableMatcher), CacheManager::new(store), db)
}

pub struct Harness {
    pub dir: TempDir,
    pub analyzer: Arc<CountingAnalyzer>,
    pub scanner: Scanner,
}

pub async fn harness() -> Harness {
    harness_with(CountingAnalyzer::default()).await
}

pub async fn harness_with(analyzer: CountingAnalyzer) -> Harness {
    let dir = TempDir::new().unwrap();
    let analyzer = Arc::new(analyzer);
    let store = Arc::new(FilesystemStore::new(dir.path().join("fanal")).unwrap());
    let db = install_db(dir.path()).await;
    let scanner = scanner_with(analyzer.clone(), store, db);

    Harness {
        dir,
        analyzer,
        scanner,
    }
}

pub struct RunningServer {
    pub url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<()>>,
}

impl RunningServer {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

pub async fn start_server(scanner: Scanner, token: Option<AuthToken>) -> RunningServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel::<()>();

    let server = ScanServer::new(scanner, AuthGuard::new(token.as_ref()));
    let handle = tokio::spawn(server.serve(listener, async move {
        let _ = rx.await;
    }));

    RunningServer {
        url,
        shutdown: Some(tx),
        handle,
    }
}
