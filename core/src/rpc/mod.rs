//! JSON-over-HTTP scan protocol.
//!
//! A client first sends only the artifact digest. If the server has no
//! analyzed facts for it, the server answers `not_found` and the client
//! repeats the request with the artifact attached.

pub mod client;
pub mod server;

pub use client::{RemoteOptions, ScanClient};
pub use server::ScanServer;

use crate::error::KuraError;
use crate::report::Report;
use crate::scanner::ScanOptions;
use crate::types::bytes::base64_option;
use crate::types::Digest;
use serde::{Deserialize, Serialize};

pub const SCAN_PATH: &str = "/rpc/v1/scan";
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub target: String,
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_option")]
    pub blob: Option<Vec<u8>>,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub report: Report,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub msg: String,
}

pub const CODE_UNAUTHENTICATED: &str = "unauthenticated";
pub const CODE_NOT_FOUND: &str = "not_found";
pub const CODE_INVALID_ARGUMENT: &str = "invalid_argument";
pub const CODE_INTERNAL: &str = "internal";

impl ErrorBody {
    pub fn from_error(err: &KuraError) -> Self {
        let (code, msg) = match err {
            KuraError::Unauthenticated { message } => (CODE_UNAUTHENTICATED, message.clone()),
            KuraError::MissingBlob { .. } => (CODE_NOT_FOUND, err.to_string()),
            KuraError::InvalidRequest { message } => (CODE_INVALID_ARGUMENT, message.clone()),
            _ => (CODE_INTERNAL, err.to_string()),
        };
        Self {
            code: code.to_string(),
            msg,
        }
    }

    /// Inverse of [`from_error`](Self::from_error) on the client side.
    pub fn into_error(self, digest: &Digest) -> KuraError {
        match self.code.as_str() {
            CODE_UNAUTHENTICATED => KuraError::Unauthenticated { message: self.msg },
            CODE_NOT_FOUND => KuraError::MissingBlob {
                digest: digest.to_string(),
            },
            CODE_INVALID_ARGUMENT => KuraError::InvalidRequest { message: self.msg },
            _ => KuraError::Remote {
                code: self.code,
                message: self.msg,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_blob_is_base64_and_optional() {
        let request = ScanRequest {
            target: "app.json".to_string(),
            digest: Digest::of(b"hello"),
            blob: Some(b"hello".to_vec()),
            options: ScanOptions::default(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["blob"], "aGVsbG8=");

        let by_reference: ScanRequest = serde_json::from_str(&format!(
            r#"{{"target":"app.json","digest":"{}"}}"#,
            request.digest
        ))
        .unwrap();
        assert!(by_reference.blob.is_none());
        assert!(!by_reference.options.list_all_packages);
    }

    #[test]
    fn test_error_codes() {
        let digest = Digest::of(b"x");
        let cases = [
            (
                KuraError::Unauthenticated {
                    message: "invalid token".to_string(),
                },
                CODE_UNAUTHENTICATED,
            ),
            (
                KuraError::MissingBlob {
                    digest: digest.to_string(),
                },
                CODE_NOT_FOUND,
            ),
            (
                KuraError::InvalidRequest {
                    message: "bad".to_string(),
                },
                CODE_INVALID_ARGUMENT,
            ),
            (KuraError::analysis("boom"), CODE_INTERNAL),
        ];

        for (err, code) in cases {
            let body = ErrorBody::from_error(&err);
            assert_eq!(body.code, code);
            let back = body.into_error(&digest);
            if code == CODE_INTERNAL {
                assert!(matches!(back, KuraError::Remote { .. }));
            } else {
                assert_eq!(std::mem::discriminant(&back), std::mem::discriminant(&err));
            }
        }
    }
}
