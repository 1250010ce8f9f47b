//! Reference analyzer and matcher for kura.
//!
//! Artifacts are neutral JSON package inventories; the vulnerability DB is a
//! JSON list of advisories keyed by package name.

pub mod analyzer;
pub mod matcher;
pub mod plugin;
pub mod version;

pub use analyzer::{Inventory, InventoryAnalyzer};
pub use matcher::{Advisory, AdvisoryDb, InventoryMatcher};
pub use plugin::InventoryPlugin;
