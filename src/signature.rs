//! Server URL verification for Official Accounts
//!
//! When a developer saves the server configuration, WeChat sends
//! `GET ?signature=..&timestamp=..&nonce=..&echostr=..` to the configured URL.
//! The server proves it owns the Token by checking
//!
//! ```text
//! signature == hex(sha1(sort([token, timestamp, nonce]).join("")))
//! ```
//!
//! and replying with `echostr` unchanged.

use sha1::{Digest, Sha1};
use tracing::{debug, instrument, warn};
use url::form_urlencoded;

use crate::{Error, Result};

/// Compute SHA1 signature by sorting parts lexicographically and concatenating.
///
/// Sorting is by raw bytes (not case-insensitive, not numeric).
pub fn sha1_signature(parts: &[&str]) -> String {
    let mut v = parts.to_vec();
    v.sort_unstable();
    let mut hasher = Sha1::new();
    for p in v {
        hasher.update(p.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Validates server verification requests against the configured Token.
#[derive(Clone)]
pub struct SignatureVerifier {
    token: String,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("token", &"[redacted]")
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Signature WeChat is expected to send for this timestamp/nonce pair.
    pub fn sign(&self, timestamp: &str, nonce: &str) -> String {
        sha1_signature(&[&self.token, timestamp, nonce])
    }

    /// Returns `echostr` unchanged when `signature` matches, else `InvalidSignature`.
    #[instrument(level = "debug", skip(self, signature, echostr))]
    pub fn verify(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        echostr: &str,
    ) -> Result<String> {
        if self.sign(timestamp, nonce) != signature {
            warn!("server verification signature mismatch");
            return Err(Error::InvalidSignature);
        }
        debug!("server verification signature ok");
        Ok(echostr.to_string())
    }

    /// Same as [`verify`](Self::verify), reading `signature`, `timestamp`,
    /// `nonce` and `echostr` from a raw query string (`a=1&b=2`; a leading `?` is ignored).
    ///
    /// Missing parameters are treated as empty strings.
    pub fn verify_query(&self, query: &str) -> Result<String> {
        let mut signature = String::new();
        let mut timestamp = String::new();
        let mut nonce = String::new();
        let mut echostr = String::new();
        for (k, v) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match k.as_ref() {
                "signature" => signature = v.into_owned(),
                "timestamp" => timestamp = v.into_owned(),
                "nonce" => nonce = v.into_owned(),
                "echostr" => echostr = v.into_owned(),
                _ => {}
            }
        }
        self.verify(&signature, &timestamp, &nonce, &echostr)
    }
}
