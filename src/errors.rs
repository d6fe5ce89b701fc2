//! Web authorization (sns) errcode helpers
//!
//! Purpose
//! - Map the errcode values returned by `sns/oauth2/access_token` and
//!   `sns/userinfo` to categories and hints
//! - Recommend whether to retry, or send the user through authorization again
//!
//! Notes
//! - Always make program logic depend on `errcode` rather than `errmsg`.
//!   `errmsg` carries a changing `rid` suffix and is diagnostic text only.
//! - An authorization `code` is single-use and expires after 5 minutes; every
//!   code-related failure is resolved by redirecting the user again, never by
//!   retrying the same code.
//! - Unknown codes are categorized as `Unknown` with a conservative policy:
//!   no retry, no re-authorization recommendation.

/// High-level classification for an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// errcode = 0
    Success,
    /// System busy (retryable)
    TemporarySystem,
    /// appid/appsecret/access_token problems (fix configuration)
    Credential,
    /// The authorization code is invalid, used or expired
    AuthorizationCode,
    /// Missing or malformed parameter
    InvalidParam,
    /// The granted scope does not allow this API
    Permission,
    Unknown,
}

/// Recommendation for retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdvice {
    pub retry: bool,
    /// First backoff in milliseconds (if retry)
    pub initial_backoff_ms: Option<u64>,
    pub max_retries: Option<u8>,
    pub reason: &'static str,
}

impl RetryAdvice {
    pub const NO: RetryAdvice = RetryAdvice {
        retry: false,
        initial_backoff_ms: None,
        max_retries: None,
        reason: "do not retry",
    };
    pub const TRANSIENT_3: RetryAdvice = RetryAdvice {
        retry: true,
        initial_backoff_ms: Some(300),
        max_retries: Some(3),
        reason: "system busy; retry with backoff",
    };
}

/// A compact, friendly explanation for an errcode.
#[derive(Debug, Clone)]
pub struct ErrorHelp {
    pub code: i64,
    pub category: ErrorCategory,
    pub summary: &'static str,
    pub hint: &'static str,
    pub retry: RetryAdvice,
    /// Whether the user must go through the authorization page again
    pub reauthorize: bool,
}

/// Classify errcode into a category.
pub fn category_for(code: i64) -> ErrorCategory {
    match code {
        0 => ErrorCategory::Success,
        -1 => ErrorCategory::TemporarySystem,
        40001 | 40013 | 40014 | 40125 | 42001 => ErrorCategory::Credential,
        40029 | 40030 | 40163 | 42002 | 42003 => ErrorCategory::AuthorizationCode,
        40003 | 41001 | 41002 | 41004 | 41008 | 41009 => ErrorCategory::InvalidParam,
        48001 | 50001 => ErrorCategory::Permission,
        _ => ErrorCategory::Unknown,
    }
}

/// Short, stable summary for the code.
pub fn summary_for(code: i64) -> &'static str {
    match code {
        -1 => "System busy",
        0 => "Success",
        40001 => "Invalid credential",
        40003 => "Invalid openid",
        40013 => "Invalid appid",
        40014 => "Invalid access_token",
        40029 => "Invalid code",
        40030 => "Invalid refresh_token",
        40125 => "Invalid appsecret",
        40163 => "Code been used",
        41001 => "Missing access_token",
        41002 => "Missing appid",
        41004 => "Missing appsecret",
        41008 => "Missing code",
        41009 => "Missing openid",
        42001 => "access_token expired",
        42002 => "refresh_token expired",
        42003 => "Code expired",
        48001 => "API unauthorized",
        50001 => "User not authorized for this API",
        _ => "Unknown error",
    }
}

/// Returns a friendly hint for a known errcode.
pub fn hint_for(code: i64) -> &'static str {
    match code {
        -1 => "System busy; retry with backoff (<=3 attempts).",
        0 => "Success.",
        40001 | 40125 => {
            "appsecret is wrong or was reset; copy the current AppSecret from the Official Account platform (Settings > Basic Configuration)."
        }
        40013 => "Invalid appid; use the Official Account appid (starts with 'wx'), not a WeCom corpid.",
        40014 | 41001 => {
            "The sns access_token is missing or invalid; use the token returned by sns/oauth2/access_token, not the global cgi-bin token."
        }
        40029 => {
            "The code is invalid; make sure it comes from this appid's authorization redirect and is passed unmodified."
        }
        40163 => "The code was already exchanged; codes are single-use, redirect the user to authorize again.",
        42003 => "The code expired (valid for 5 minutes); redirect the user to authorize again.",
        40030 | 42002 => "refresh_token is invalid or expired (30 days); redirect the user to authorize again.",
        40003 | 41009 => "openid is missing or does not belong to this appid.",
        41002 | 41004 | 41008 => "A required parameter is missing; check the request query string.",
        42001 => "The sns access_token expired (2 hours); exchange a fresh code.",
        48001 => {
            "This API is not authorized for the account; web authorization requires a verified service account (or the test account)."
        }
        50001 => "The user did not grant snsapi_userinfo; request the userinfo scope on the authorization page.",
        _ => "Unknown code; refer to official docs and logs for details.",
    }
}

/// Whether to retry, and how.
pub fn should_retry(code: i64) -> RetryAdvice {
    match category_for(code) {
        ErrorCategory::TemporarySystem => RetryAdvice::TRANSIENT_3,
        ErrorCategory::Credential => RetryAdvice {
            reason: "invalid credential; fix configuration before retry",
            ..RetryAdvice::NO
        },
        ErrorCategory::AuthorizationCode => RetryAdvice {
            reason: "code cannot be reused; start a new authorization",
            ..RetryAdvice::NO
        },
        ErrorCategory::InvalidParam => RetryAdvice {
            reason: "invalid parameter; correct request and resend",
            ..RetryAdvice::NO
        },
        _ => RetryAdvice::NO,
    }
}

/// Whether the user has to be redirected through authorization again.
pub fn should_reauthorize(code: i64) -> bool {
    matches!(
        category_for(code),
        ErrorCategory::AuthorizationCode | ErrorCategory::Permission
    ) || code == 42001
}

/// Build a structured help object for a given errcode.
pub fn lookup(code: i64) -> ErrorHelp {
    ErrorHelp {
        code,
        category: category_for(code),
        summary: summary_for(code),
        hint: hint_for(code),
        retry: should_retry(code),
        reauthorize: should_reauthorize(code),
    }
}

/// Produce a concise, human-readable explanation string.
pub fn explain(errcode: i64, errmsg: &str) -> String {
    let help = lookup(errcode);
    let mut parts = vec![
        format!("errcode={} ({:?})", help.code, help.category),
        help.summary.to_string(),
        format!("hint: {}", help.hint),
    ];

    if help.retry.retry {
        let mut retry_line = String::from("retry: yes");
        if let Some(ms) = help.retry.initial_backoff_ms {
            retry_line.push_str(&format!(", initial_backoff_ms={}", ms));
        }
        if let Some(n) = help.retry.max_retries {
            retry_line.push_str(&format!(", max_retries={}", n));
        }
        retry_line.push_str(&format!(" ({})", help.retry.reason));
        parts.push(retry_line);
    } else {
        parts.push(format!("retry: no ({})", help.retry.reason));
    }

    parts.push(format!(
        "reauthorize: {}",
        if help.reauthorize { "yes" } else { "no" }
    ));

    if let Some(rid) = request_id(errmsg) {
        parts.push(format!("rid: {rid}"));
    }

    parts.join(" | ")
}

/// Extract the `rid` WeChat appends to errmsg (`"invalid code, rid: 6523..."`).
pub fn request_id(errmsg: &str) -> Option<&str> {
    let (_, tail) = errmsg.split_once("rid:")?;
    let rid = tail.trim();
    (!rid.is_empty()).then_some(rid)
}
