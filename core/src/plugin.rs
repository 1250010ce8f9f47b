use crate::error::{KuraError, Result};
use crate::types::{ArtifactInfo, DetectedVulnerability};
use async_trait::async_trait;
use std::sync::Arc;

/// Extracts package facts from a raw artifact.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, blob: &[u8]) -> Result<ArtifactInfo>;
}

/// Matches analyzed facts against the vulnerability DB.
#[async_trait]
pub trait Matcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(&self, artifact: &ArtifactInfo, db: &[u8]) -> Result<Vec<DetectedVulnerability>>;
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_analyzer(&self) -> Option<Arc<dyn Analyzer>> { None }
    fn create_matcher(&self) -> Option<Arc<dyn Matcher>> { None }
}

pub struct PluginRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
    matchers: Vec<Arc<dyn Matcher>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            analyzers: Vec::new(),
            matchers: Vec::new(),
        }
    }

    pub fn register_analyzer(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.push(analyzer);
    }

    pub fn register_matcher(&mut self, matcher: Arc<dyn Matcher>) {
        self.matchers.push(matcher);
    }

    pub fn register_plugin<P: Plugin + 'static>(&mut self, plugin: P) {
        if let Some(analyzer) = plugin.create_analyzer() {
            self.register_analyzer(analyzer);
        }
        if let Some(matcher) = plugin.create_matcher() {
            self.register_matcher(matcher);
        }
    }

    /// The analyzer called `name`, or the first registered one.
    pub fn analyzer(&self, name: Option<&str>) -> Result<Arc<dyn Analyzer>> {
        select(&self.analyzers, name, |a| a.name(), "analyzer")
    }

    /// The matcher called `name`, or the first registered one.
    pub fn matcher(&self, name: Option<&str>) -> Result<Arc<dyn Matcher>> {
        select(&self.matchers, name, |m| m.name(), "matcher")
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn select<T: ?Sized>(
    candidates: &[Arc<T>],
    name: Option<&str>,
    name_of: impl Fn(&T) -> &'static str,
    kind: &str,
) -> Result<Arc<T>> {
    let found = match name {
        Some(name) => candidates.iter().find(|c| name_of(Arc::as_ref(c)) == name),
        None => candidates.first(),
    };

    found.cloned().ok_or_else(|| match name {
        Some(name) => KuraError::config(format!("no {} named {}", kind, name)),
        None => KuraError::config(format!("no {} registered", kind)),
    })
}
