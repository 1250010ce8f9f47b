pub mod artifact;
pub mod bytes;
pub mod digest;
pub mod vulnerability;

pub use artifact::{ArtifactInfo, OsInfo, Package};
pub use digest::Digest;
pub use vulnerability::{DetectedVulnerability, Severity};
