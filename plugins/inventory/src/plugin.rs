use kura_core::{Analyzer, Matcher};
use std::sync::Arc;

pub struct InventoryPlugin;

impl InventoryPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InventoryPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl kura_core::Plugin for InventoryPlugin {
    fn name(&self) -> &'static str {
        "inventory"
    }

    fn create_analyzer(&self) -> Option<Arc<dyn Analyzer>> {
        Some(Arc::new(super::analyzer::InventoryAnalyzer::new()))
    }

    fn create_matcher(&self) -> Option<Arc<dyn Matcher>> {
        Some(Arc::new(super::matcher::InventoryMatcher::new()))
    }
}
