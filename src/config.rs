//! Official Account credentials.
//!
//! `Credentials` is built once and shared read-only by the signature verifier
//! and the OAuth client.
//!
//! Environment variables read by [`Credentials::from_env`]:
//! - `WX_APPID`: Official Account appid
//! - `WX_APPSECRET`: Official Account appsecret
//! - `WX_TOKEN`: server configuration Token (used for URL verification)

use std::env;
use std::fmt;

use thiserror::Error;

pub const ENV_APPID: &str = "WX_APPID";
pub const ENV_APPSECRET: &str = "WX_APPSECRET";
pub const ENV_TOKEN: &str = "WX_TOKEN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVar(&'static str),
}

/// appid + appsecret + server Token
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub appid: String,
    pub appsecret: String,
    pub token: String,
}

impl Credentials {
    pub fn new(
        appid: impl Into<String>,
        appsecret: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            appid: appid.into(),
            appsecret: appsecret.into(),
            token: token.into(),
        }
    }

    /// Read credentials from `WX_APPID`, `WX_APPSECRET` and `WX_TOKEN`.
    ///
    /// Loading a `.env` file is left to the application (e.g. `dotenvy::dotenv()`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            appid: require(ENV_APPID)?,
            appsecret: require(ENV_APPSECRET)?,
            token: require(ENV_TOKEN)?,
        })
    }

    /// Masked appid suitable for logs, e.g. `wx***ef`.
    pub fn appid_hint(&self) -> String {
        mask(&self.appid)
    }
}

// Never print the secret or the Token.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("appid", &self.appid_hint())
            .field("appsecret", &"[redacted]")
            .field("token", &"[redacted]")
            .finish()
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

pub(crate) fn mask(id: &str) -> String {
    if id.len() <= 4 || !id.is_ascii() {
        format!("{}***", id.chars().take(2).collect::<String>())
    } else {
        format!("{}***{}", &id[..2], &id[id.len().saturating_sub(2)..])
    }
}
