#![doc = r#"
wxmp-oauth-rs

WeChat Official Account (公众号) web authorization and server verification.

Included:
- signature: server URL verification (`signature`/`timestamp`/`nonce`/`echostr`).
- oauth: authorization URL, callback parsing, code -> access_token -> user profile.
- errors: errcode classification and hints for the sns APIs.

No token caching, refresh or retries; every call maps to at most one request.

Quick usage:

```ignore
use wxmp_oauth_rs::{Credentials, Lang, OAuthClient, Scope};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = OAuthClient::new(Credentials::new("your_appid", "your_appsecret", "your_token"))?;

    // Server configuration check (GET from WeChat)
    let echostr = client.verifier().verify_query("signature=...&timestamp=...&nonce=...&echostr=...")?;

    // Step 1: redirect the user
    let url = client.authorize_url("https://example.com/oauth2/callback", Scope::UserInfo, "state1")?;

    // Step 2: on the callback
    let code = client.parse_callback("code=CODE&state=state1")?;
    let token = client.exchange_code(&code.code).await?;
    let user = client.user_profile(&token, Lang::ZhCn).await?;
    println!("openid: {}, nickname: {}", user.openid, user.nickname);

    Ok(())
}
```
"#]

pub mod client;
pub mod config;
pub mod errors;
pub mod oauth;
pub mod signature;

pub use client::*;
pub use config::{ConfigError, Credentials};
pub use oauth::*;
pub use signature::{SignatureVerifier, sha1_signature};
