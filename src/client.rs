//! Official Account OAuth2 client: HTTP plumbing and error type.
//!
//! Design:
//! - `OAuthClient` wraps a `reqwest::Client` plus the shared, read-only `Credentials`.
//! - No token caching/refresh and no retries; every call is one request.
//! - Errors are unified via `Error`.
//!
//! WeChat reuses a single JSON envelope for success and failure:
//! a failed call returns `{"errcode": 40029, "errmsg": "invalid code"}`,
//! a successful one returns the payload (sometimes alongside `errcode: 0`).
//! Bodies are therefore decoded twice: first into the envelope, then, only if
//! no error code is set, into the target type.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Credentials;
use crate::errors::{self, ErrorHelp};
use crate::signature::SignatureVerifier;

pub const AUTHORIZE_URL: &str = "https://open.weixin.qq.com/connect/oauth2/authorize";
pub const ACCESS_TOKEN_URL: &str = "https://api.weixin.qq.com/sns/oauth2/access_token";
pub const USERINFO_URL: &str = "https://api.weixin.qq.com/sns/userinfo";

/// Per-request timeout applied unless overridden with [`OAuthClient::with_timeout`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ERROR_BODY: usize = 2048;

/// Unified error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid state")]
    InvalidState,

    #[error("invalid code")]
    InvalidCode,

    #[error("invalid access token")]
    InvalidAccessToken,

    #[error("invalid openid")]
    InvalidOpenId,

    #[error("scope denied: snsapi_userinfo not granted")]
    ScopeDenied,

    #[error("invalid lang: {0}")]
    InvalidLang(String),

    #[error("weixin error {code}: {message}")]
    Provider { code: i64, message: String },

    /// The request URL is stripped: it carries `secret` or `access_token`.
    #[error("http error: {0}")]
    Transport(reqwest::Error),

    #[error("unexpected response (status {status}): {error}; body: {body}")]
    Decode {
        status: u16,
        error: String,
        body: String,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// Guidance for provider errors (`None` for every other variant).
    pub fn help(&self) -> Option<ErrorHelp> {
        match self {
            Error::Provider { code, .. } => Some(errors::lookup(*code)),
            _ => None,
        }
    }

    /// True for errors detected locally, before any request was sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidSignature
                | Error::InvalidScope(_)
                | Error::InvalidState
                | Error::InvalidCode
                | Error::InvalidAccessToken
                | Error::InvalidOpenId
                | Error::ScopeDenied
                | Error::InvalidLang(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.without_url())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Endpoint URLs; overridable to point the client at a proxy or a mock server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub access_token: String,
    pub userinfo: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize: AUTHORIZE_URL.to_string(),
            access_token: ACCESS_TOKEN_URL.to_string(),
            userinfo: USERINFO_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Replace the `https://api.weixin.qq.com` host of the two API endpoints.
    /// The authorization page URL is left untouched.
    pub fn with_api_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            access_token: format!("{base}/sns/oauth2/access_token"),
            userinfo: format!("{base}/sns/userinfo"),
            ..Self::default()
        }
    }
}

/// Client for the Official Account web authorization (网页授权) APIs
///
/// - Cheap to clone; clones share the HTTP connection pool and credentials
/// - Stateless between calls
#[derive(Clone, Debug)]
pub struct OAuthClient {
    http: reqwest::Client,
    pub(crate) credentials: Arc<Credentials>,
    pub(crate) endpoints: Endpoints,
    timeout: Option<Duration>,
}

impl OAuthClient {
    /// Build a client with a gzip-enabled `reqwest::Client` and [`DEFAULT_TIMEOUT`].
    pub fn new(credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder().gzip(true).build()?;
        Ok(Self::with_http(credentials, http))
    }

    /// Use a custom `reqwest::Client`
    pub fn with_http(credentials: Credentials, http: reqwest::Client) -> Self {
        if credentials.appid.starts_with("ww") {
            warn!(
                "Detected appid starting with 'ww' (likely a WeCom corpid). Official Account web authorization requires the Official Account appid (starts with 'wx')."
            );
        }
        debug!(appid = %credentials.appid_hint(), "oauth client created");
        Self {
            http,
            credentials: Arc::new(credentials),
            endpoints: Endpoints::default(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Per-request timeout; `None` disables it.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Signature verifier bound to the same server Token.
    pub fn verifier(&self) -> SignatureVerifier {
        SignatureVerifier::new(self.credentials.token.clone())
    }

    pub(crate) fn endpoint_url(raw: &str) -> Result<Url> {
        Url::parse(raw).map_err(|e| Error::InvalidUrl(e.to_string()))
    }

    /// GET `url` and decode the body as `T` using the shared envelope rules.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let mut req = self.http.get(url);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let status_err = resp.error_for_status_ref().err();
        let bytes = resp.bytes().await?;
        debug!(status = status.as_u16(), len = bytes.len(), "weixin response");
        decode_body(status.as_u16(), status_err, &bytes)
    }
}

/// `errcode` arrives as a number from the live API but as a string from some
/// proxies and older gateways.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrCode {
    Num(i64),
    Text(String),
}

/// WeChat API error envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    errcode: Option<ErrCode>,
    #[serde(default)]
    errmsg: Option<String>,
}

impl Envelope {
    /// `Ok(None)` when no error is signalled.
    fn error(self) -> std::result::Result<Option<Error>, String> {
        let code = match self.errcode {
            None | Some(ErrCode::Num(0)) => return Ok(None),
            Some(ErrCode::Num(code)) => code,
            Some(ErrCode::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(None);
                }
                text.parse::<i64>()
                    .map_err(|_| format!("non-numeric errcode {text:?}"))?
            }
        };
        if code == 0 {
            return Ok(None);
        }
        Ok(Some(Error::Provider {
            code,
            message: self.errmsg.unwrap_or_default(),
        }))
    }
}

/// Two-pass decode: envelope first, target type second.
///
/// - envelope with a non-zero errcode -> `Provider` (target never decoded)
/// - non-success status otherwise -> `Transport`
/// - target decode failure -> `Decode`
pub(crate) fn decode_body<T: DeserializeOwned>(
    status: u16,
    status_err: Option<reqwest::Error>,
    bytes: &[u8],
) -> Result<T> {
    let envelope = match serde_json::from_slice::<Envelope>(bytes) {
        Ok(env) => env,
        Err(de_err) => {
            return Err(match status_err {
                Some(err) => Error::from(err),
                None => decode_error(status, de_err.to_string(), bytes),
            });
        }
    };

    match envelope.error() {
        Ok(Some(err)) => {
            warn!(error = %err, "weixin returned an error envelope");
            return Err(err);
        }
        Ok(None) => {}
        Err(reason) => return Err(decode_error(status, reason, bytes)),
    }

    if let Some(err) = status_err {
        return Err(Error::from(err));
    }

    serde_json::from_slice::<T>(bytes).map_err(|e| decode_error(status, e.to_string(), bytes))
}

// Redact tokens and truncate the body to avoid leaking credentials into logs.
fn decode_error(status: u16, error: String, bytes: &[u8]) -> Error {
    let mut body = String::from_utf8_lossy(bytes).to_string();
    if let Ok(mut v) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(obj) = v.as_object_mut() {
            for key in ["access_token", "refresh_token"] {
                if obj.contains_key(key) {
                    obj.insert(
                        key.to_string(),
                        serde_json::Value::String("[redacted]".into()),
                    );
                }
            }
        }
        if let Ok(s) = serde_json::to_string(&v) {
            body = s;
        }
    }
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    Error::Decode {
        status,
        error,
        body,
    }
}
