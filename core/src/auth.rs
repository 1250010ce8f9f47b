use crate::config::AuthToken;
use crate::error::{KuraError, Result};
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const INVALID_TOKEN: &str = "invalid token";

/// Server-side token check.
///
/// Without a token the server is in open mode and every request passes.
/// Both sides are hashed before the constant-time compare, so the time taken
/// depends on neither the content nor the length of the supplied value.
#[derive(Clone)]
pub struct AuthGuard {
    expected: Option<(String, [u8; 32])>,
}

impl AuthGuard {
    pub fn new(token: Option<&AuthToken>) -> Self {
        Self {
            expected: token.map(|t| (t.header().to_string(), hash(t.value().as_bytes()))),
        }
    }

    pub fn is_open(&self) -> bool {
        self.expected.is_none()
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<()> {
        let Some((header, expected)) = &self.expected else {
            return Ok(());
        };

        let supplied = headers
            .get(header.as_str())
            .map(|v| hash(v.as_bytes()))
            .unwrap_or_default();
        let present = headers.contains_key(header.as_str());

        if present && bool::from(supplied.ct_eq(expected)) {
            Ok(())
        } else {
            Err(KuraError::Unauthenticated {
                message: INVALID_TOKEN.to_string(),
            })
        }
    }
}

fn hash(value: &[u8]) -> [u8; 32] {
    Sha256::digest(value).into()
}
