//! Cache key derivation.

use http::header::HOST;
use http::request;
use sha2::{Digest, Sha256};

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Identity of a cached resource: scheme, host, path and query of the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: Option<String>,
}

impl CacheKey {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            path: path.into(),
            query,
        }
    }

    /// Build a key from request parts. `None` if scheme or host can't be determined.
    ///
    /// The scheme comes from the URI, falling back to `x-forwarded-proto`; the host from the
    /// URI authority, falling back to the `Host` header.
    pub fn from_request(parts: &request::Parts) -> Option<Self> {
        let scheme = match parts.uri.scheme_str() {
            Some(scheme) => scheme.to_ascii_lowercase(),
            None => parts
                .headers
                .get(FORWARDED_PROTO)?
                .to_str()
                .ok()?
                .trim()
                .to_ascii_lowercase(),
        };
        let host = match parts.uri.authority() {
            Some(authority) => authority.as_str().to_string(),
            None => parts.headers.get(HOST)?.to_str().ok()?.to_string(),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self {
            scheme,
            host,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
        })
    }

    /// A 64-bit hash that is stable across processes and builds.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.path)?;
        if let Some(ref query) = self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}
