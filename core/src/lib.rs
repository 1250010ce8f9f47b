//! Kura Core Library
//!
//! Content-addressed scan cache, vulnerability DB cache and the remote scan
//! protocol shared by the kura server, client and local scanner.

pub mod types;
pub mod plugin;
pub mod error;
pub mod http;
pub mod cache;
pub mod config;
pub mod db;
pub mod report;
pub mod filter;
pub mod scanner;
pub mod auth;
pub mod rpc;

pub use types::*;
pub use error::{KuraError, Result};
pub use plugin::{Analyzer, Matcher, Plugin, PluginRegistry};
pub use report::{Report, ReportMetadata, ReportSummary};
pub use filter::FilterOptions;
pub use scanner::{ScanOptions, ScanOutcome, Scanner};
pub use http::HttpClient;
pub use cache::{open_store, CacheEntry, CacheManager, CacheStore, Origin, Resolution};
pub use config::{CacheBackend, CacheConfig, Config, DbOptions, ServerConfig};
pub use db::{DbMetadata, DbSource, HttpDbSource, VulnDbCache};
pub use auth::AuthGuard;
pub use rpc::{RemoteOptions, ScanClient, ScanServer};
