//! Official Account web authorization (网页授权)
//!
//! Flow:
//! 1. Redirect the user to [`OAuthClient::authorize_url`].
//! 2. WeChat redirects back to `redirect_uri?code=CODE&state=STATE`;
//!    read it with [`OAuthClient::parse_callback`].
//! 3. Exchange the code: GET https://api.weixin.qq.com/sns/oauth2/access_token
//!    params: appid, secret, code, grant_type=authorization_code (do not log secrets)
//! 4. With the `snsapi_userinfo` scope, fetch the profile:
//!    GET https://api.weixin.qq.com/sns/userinfo
//!    params: access_token, openid, lang
//!
//! Example (pseudo usage):
//! ```ignore
//! use wxmp_oauth_rs::{Credentials, OAuthClient, Scope};
//!
//! let client = OAuthClient::new(Credentials::from_env()?)?;
//! let url = client.authorize_url("https://example.com/oauth2/callback", Scope::UserInfo, "xyz")?;
//! // ... user comes back ...
//! let code = client.parse_callback("code=CODE&state=xyz")?;
//! let user = client.user_profile_by_code(&code.code).await?;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::form_urlencoded;

use crate::config::mask;
use crate::{Error, OAuthClient, Result};

const MAX_STATE_LEN: usize = 128;

/// Authorization scope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// `snsapi_base`: silent authorization, openid only
    #[serde(rename = "snsapi_base")]
    Base,
    /// `snsapi_userinfo`: consent page, grants access to the user profile
    #[serde(rename = "snsapi_userinfo")]
    UserInfo,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Base => "snsapi_base",
            Scope::UserInfo => "snsapi_userinfo",
        }
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "snsapi_base" => Ok(Scope::Base),
            "snsapi_userinfo" => Ok(Scope::UserInfo),
            other => Err(Error::InvalidScope(other.to_string())),
        }
    }
}

impl AsRef<str> for Scope {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language of the localized profile fields (province, city, country)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lang {
    #[default]
    #[serde(rename = "zh_CN")]
    ZhCn,
    #[serde(rename = "zh_TW")]
    ZhTw,
    #[serde(rename = "en")]
    En,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::ZhCn => "zh_CN",
            Lang::ZhTw => "zh_TW",
            Lang::En => "en",
        }
    }
}

impl FromStr for Lang {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zh_CN" => Ok(Lang::ZhCn),
            "zh_TW" => Ok(Lang::ZhTw),
            "en" => Ok(Lang::En),
            other => Err(Error::InvalidLang(other.to_string())),
        }
    }
}

impl AsRef<str> for Lang {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `code` and `state` from the authorization redirect
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: String,
}

/// sns/oauth2/access_token response
///
/// This is the web-authorization token; it is unrelated to the global
/// `cgi-bin/token` access_token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Expiration in seconds
    #[serde(default)]
    pub expires_in: u32,
    #[serde(default)]
    pub openid: String,
    /// Only present when the account is bound to an Open Platform account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unionid: Option<String>,
    /// Granted scopes, comma separated
    #[serde(default)]
    pub scope: String,
    /// 1 when the user is browsing a snapshot page (virtual identity)
    #[serde(default)]
    pub is_snapshotuser: u8,
}

impl AccessToken {
    /// Individual scopes granted with this token.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes().any(|s| s == scope.as_str())
    }

    pub fn contains_scope_base(&self) -> bool {
        self.has_scope(Scope::Base)
    }

    pub fn contains_scope_userinfo(&self) -> bool {
        self.has_scope(Scope::UserInfo)
    }

    pub fn is_snapshot_user(&self) -> bool {
        self.is_snapshotuser == 1
    }
}

/// sns/userinfo response
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub openid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unionid: Option<String>,
    #[serde(default)]
    pub nickname: String,
    /// Avatar URL; empty when the user has no avatar
    #[serde(default)]
    pub headimgurl: String,
    /// 0 unknown, 1 male, 2 female
    #[serde(default)]
    pub sex: u8,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    /// Privilege list, e.g. `["chinaunicom"]`
    #[serde(default)]
    pub privilege: Vec<String>,
}

fn is_valid_state(state: &str) -> bool {
    state.len() <= MAX_STATE_LEN && state.bytes().all(|b| b.is_ascii_alphanumeric())
}

impl AuthorizationCode {
    /// Read `code` and `state` from a raw callback query string.
    ///
    /// An empty or missing `code` is rejected: it can never be exchanged.
    pub fn from_query(query: &str) -> Result<Self> {
        let mut out = AuthorizationCode::default();
        for (k, v) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match k.as_ref() {
                "code" => out.code = v.into_owned(),
                "state" => out.state = v.into_owned(),
                _ => {}
            }
        }
        if out.code.is_empty() {
            return Err(Error::InvalidCode);
        }
        Ok(out)
    }
}

impl OAuthClient {
    /// Build the authorization page URL the user is redirected to.
    ///
    /// - redirect_uri: callback URL; its domain must be registered as the
    ///   web authorization domain
    /// - scope: `snsapi_base` or `snsapi_userinfo` (a [`Scope`] or its string form)
    /// - state: `[A-Za-z0-9]{0,128}`, returned unchanged on the callback
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        scope: impl AsRef<str>,
        state: &str,
    ) -> Result<String> {
        let scope: Scope = scope.as_ref().parse()?;
        if !is_valid_state(state) {
            return Err(Error::InvalidState);
        }

        let mut url = Self::endpoint_url(&self.endpoints.authorize)?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("appid", &self.credentials.appid);
            qp.append_pair("redirect_uri", redirect_uri);
            qp.append_pair("response_type", "code");
            qp.append_pair("scope", scope.as_str());
            qp.append_pair("state", state);
        }
        url.set_fragment(Some("wechat_redirect"));
        Ok(url.into())
    }

    /// Parse the authorization callback query (`code=..&state=..`).
    pub fn parse_callback(&self, query: &str) -> Result<AuthorizationCode> {
        AuthorizationCode::from_query(query)
    }

    /// Exchange an authorization code for a web-authorization access_token.
    #[instrument(level = "debug", skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<AccessToken> {
        if code.is_empty() {
            return Err(Error::InvalidCode);
        }

        let mut url = Self::endpoint_url(&self.endpoints.access_token)?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("appid", &self.credentials.appid);
            qp.append_pair("secret", &self.credentials.appsecret);
            qp.append_pair("code", code);
            qp.append_pair("grant_type", "authorization_code");
        }
        debug!(
            appid = %self.credentials.appid_hint(),
            "Requesting web authorization access_token (no secrets)"
        );

        let token: AccessToken = self.get_json(url).await?;
        debug!(
            openid = %mask(&token.openid),
            scope = %token.scope,
            expires_in = token.expires_in,
            "web authorization access_token issued"
        );
        Ok(token)
    }

    /// Fetch the user profile. Requires the `snsapi_userinfo` scope.
    ///
    /// - lang: `zh_CN`, `zh_TW` or `en` (a [`Lang`] or its string form)
    #[instrument(level = "debug", skip(self, token, lang))]
    pub async fn user_profile(
        &self,
        token: &AccessToken,
        lang: impl AsRef<str>,
    ) -> Result<UserProfile> {
        if token.access_token.is_empty() {
            return Err(Error::InvalidAccessToken);
        }
        if token.openid.is_empty() {
            return Err(Error::InvalidOpenId);
        }
        if !token.contains_scope_userinfo() {
            return Err(Error::ScopeDenied);
        }
        let lang: Lang = lang.as_ref().parse()?;

        let mut url = Self::endpoint_url(&self.endpoints.userinfo)?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("access_token", &token.access_token);
            qp.append_pair("openid", &token.openid);
            qp.append_pair("lang", lang.as_str());
        }
        debug!(openid = %mask(&token.openid), %lang, "Requesting sns/userinfo");

        self.get_json(url).await
    }

    /// `exchange_code` followed by `user_profile` in the default language.
    pub async fn user_profile_by_code(&self, code: &str) -> Result<UserProfile> {
        let token = self.exchange_code(code).await?;
        self.user_profile(&token, Lang::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Credentials, Endpoints};
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn client() -> OAuthClient {
        OAuthClient::new(Credentials::new("wxappid1234", "appsecret", "tok")).unwrap()
    }

    fn mock_client(server: &Server) -> OAuthClient {
        client().with_endpoints(Endpoints::with_api_base(&server.url()))
    }

    fn userinfo_token() -> AccessToken {
        AccessToken {
            access_token: "ACCESS_TOKEN".into(),
            refresh_token: "REFRESH_TOKEN".into(),
            expires_in: 7200,
            openid: "OPENID".into(),
            scope: "snsapi_userinfo".into(),
            ..Default::default()
        }
    }

    #[test]
    fn authorize_url_layout() {
        let url = client()
            .authorize_url("https://example.com/oauth2/callback", Scope::UserInfo, "abc123")
            .unwrap();
        assert_eq!(
            url,
            "https://open.weixin.qq.com/connect/oauth2/authorize?appid=wxappid1234\
             &redirect_uri=https%3A%2F%2Fexample.com%2Foauth2%2Fcallback\
             &response_type=code&scope=snsapi_userinfo&state=abc123#wechat_redirect"
        );
    }

    #[test]
    fn authorize_url_accepts_scope_strings() {
        let url = client()
            .authorize_url("https://example.com/cb", "snsapi_base", "")
            .unwrap();
        assert!(url.contains("scope=snsapi_base&state=#wechat_redirect"));
    }

    #[test]
    fn authorize_url_validation() {
        let c = client();
        assert!(matches!(
            c.authorize_url("https://example.com/cb", Scope::Base, "abc def"),
            Err(Error::InvalidState)
        ));
        assert!(matches!(
            c.authorize_url("https://example.com/cb", "invalid_scope", "abc123"),
            Err(Error::InvalidScope(s)) if s == "invalid_scope"
        ));
        assert!(
            c.authorize_url("https://example.com/cb", Scope::Base, &"a".repeat(128))
                .is_ok()
        );
        assert!(matches!(
            c.authorize_url("https://example.com/cb", Scope::Base, &"a".repeat(129)),
            Err(Error::InvalidState)
        ));
        assert!(matches!(
            c.authorize_url("https://example.com/cb", Scope::Base, "状态"),
            Err(Error::InvalidState)
        ));
    }

    #[test]
    fn callback_parsing() {
        let c = client();
        let code = c.parse_callback("code=081abc&state=xyz").unwrap();
        assert_eq!(code.code, "081abc");
        assert_eq!(code.state, "xyz");

        let code = c.parse_callback("?code=a%2Bb").unwrap();
        assert_eq!(code.code, "a+b");
        assert_eq!(code.state, "");

        assert!(matches!(c.parse_callback("state=xyz"), Err(Error::InvalidCode)));
        assert!(matches!(
            c.parse_callback("code=&state=xyz"),
            Err(Error::InvalidCode)
        ));
    }

    #[test]
    fn scope_and_lang_parsing() {
        assert_eq!("snsapi_userinfo".parse::<Scope>().unwrap(), Scope::UserInfo);
        assert!(matches!("SNSAPI_BASE".parse::<Scope>(), Err(Error::InvalidScope(_))));
        assert_eq!("zh_TW".parse::<Lang>().unwrap(), Lang::ZhTw);
        assert_eq!(Lang::default().as_str(), "zh_CN");
        assert!(matches!("fr".parse::<Lang>(), Err(Error::InvalidLang(_))));
    }

    #[test]
    fn scope_set_membership() {
        let mut t = userinfo_token();
        t.scope = "snsapi_base,snsapi_userinfo".into();
        assert!(t.contains_scope_base());
        assert!(t.contains_scope_userinfo());

        t.scope = "snsapi_base snsapi_login".into();
        assert!(t.contains_scope_base());
        assert!(!t.contains_scope_userinfo());

        t.scope = "snsapi_userinfo_extra".into();
        assert!(!t.contains_scope_userinfo());
    }

    #[test]
    fn access_token_decodes_wire_shape() {
        let body = r#"{
            "access_token":"ACCESS_TOKEN","expires_in":7200,"refresh_token":"REFRESH_TOKEN",
            "openid":"OPENID","scope":"snsapi_userinfo","is_snapshotuser":1,"unionid":"UNIONID"
        }"#;
        let t: AccessToken = serde_json::from_str(body).unwrap();
        assert_eq!(t.expires_in, 7200);
        assert_eq!(t.unionid.as_deref(), Some("UNIONID"));
        assert!(t.is_snapshot_user());
        assert!(t.contains_scope_userinfo());
    }

    #[tokio::test]
    async fn empty_code_sends_no_request() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/sns/oauth2/access_token")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = mock_client(&server).exchange_code("").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCode));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn exchange_code_success() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/sns/oauth2/access_token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("appid".into(), "wxappid1234".into()),
                Matcher::UrlEncoded("secret".into(), "appsecret".into()),
                Matcher::UrlEncoded("code".into(), "CODE".into()),
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"AT","expires_in":7200,"refresh_token":"RT","openid":"OID","scope":"snsapi_base","is_snapshotuser":0}"#,
            )
            .create_async()
            .await;

        let token = mock_client(&server).exchange_code("CODE").await.unwrap();
        assert_eq!(token.access_token, "AT");
        assert_eq!(token.openid, "OID");
        assert_eq!(token.unionid, None);
        assert!(token.contains_scope_base());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn exchange_code_provider_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/sns/oauth2/access_token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"errcode":"40029","errmsg":"invalid code"}"#)
            .create_async()
            .await;

        match mock_client(&server).exchange_code("BAD").await {
            Err(Error::Provider { code, message }) => {
                assert_eq!(code, 40029);
                assert_eq!(message, "invalid code");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_success_status_without_envelope_is_transport() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/sns/oauth2/access_token")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("<html>Bad Gateway</html>")
            .create_async()
            .await;

        let err = mock_client(&server).exchange_code("CODE").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got {err:?}");
        let text = err.to_string();
        assert!(!text.contains("secret="), "{text}");
        assert!(!text.contains("appsecret"), "{text}");
    }

    /// Accepts connections and never answers.
    async fn silent_api_base() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn exchange_code_times_out_without_leaking_secret() {
        let c = client()
            .with_endpoints(Endpoints::with_api_base(&silent_api_base().await))
            .with_timeout(Some(Duration::from_millis(100)));

        match c.exchange_code("CODE").await {
            Err(err @ Error::Transport(_)) => {
                if let Error::Transport(e) = &err {
                    assert!(e.is_timeout(), "got {e:?}");
                    assert!(e.url().is_none());
                }
                let text = err.to_string();
                assert!(!text.contains("secret="), "{text}");
                assert!(!text.contains("appsecret"), "{text}");
                assert!(!text.contains("CODE"), "{text}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn user_profile_times_out_without_leaking_token() {
        let c = client()
            .with_endpoints(Endpoints::with_api_base(&silent_api_base().await))
            .with_timeout(Some(Duration::from_millis(100)));

        let err = c.user_profile(&userinfo_token(), Lang::En).await.unwrap_err();
        assert!(matches!(&err, Error::Transport(e) if e.is_timeout()), "got {err:?}");
        let text = err.to_string();
        assert!(!text.contains("access_token="), "{text}");
        assert!(!text.contains("ACCESS_TOKEN"), "{text}");
    }

    #[tokio::test]
    async fn user_profile_preconditions_send_no_request() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/sns/userinfo")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let c = mock_client(&server);

        let mut t = userinfo_token();
        t.access_token.clear();
        assert!(matches!(
            c.user_profile(&t, Lang::ZhCn).await,
            Err(Error::InvalidAccessToken)
        ));

        let mut t = userinfo_token();
        t.openid.clear();
        assert!(matches!(
            c.user_profile(&t, Lang::ZhCn).await,
            Err(Error::InvalidOpenId)
        ));

        let mut t = userinfo_token();
        t.scope = "snsapi_base".into();
        assert!(matches!(
            c.user_profile(&t, Lang::ZhCn).await,
            Err(Error::ScopeDenied)
        ));

        assert!(matches!(
            c.user_profile(&userinfo_token(), "de_DE").await,
            Err(Error::InvalidLang(_))
        ));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn user_profile_by_code_end_to_end() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("GET", "/sns/oauth2/access_token")
            .match_query(Matcher::UrlEncoded("code".into(), "CODE".into()))
            .with_status(200)
            .with_body(
                r#"{"access_token":"AT","expires_in":7200,"refresh_token":"RT","openid":"OID","scope":"snsapi_userinfo"}"#,
            )
            .create_async()
            .await;
        let user_mock = server
            .mock("GET", "/sns/userinfo")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("access_token".into(), "AT".into()),
                Matcher::UrlEncoded("openid".into(), "OID".into()),
                Matcher::UrlEncoded("lang".into(), "zh_CN".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"openid":"OID","nickname":"NICKNAME","sex":1,"province":"PROVINCE","city":"CITY","country":"COUNTRY","headimgurl":"https://thirdwx.qlogo.cn/mmopen/x/46","privilege":["PRIVILEGE1","PRIVILEGE2"],"unionid":"UID"}"#,
            )
            .create_async()
            .await;

        let user = mock_client(&server)
            .user_profile_by_code("CODE")
            .await
            .unwrap();
        assert_eq!(user.openid, "OID");
        assert_eq!(user.nickname, "NICKNAME");
        assert_eq!(user.sex, 1);
        assert_eq!(user.unionid.as_deref(), Some("UID"));
        assert_eq!(user.privilege, vec!["PRIVILEGE1", "PRIVILEGE2"]);
        token_mock.assert_async().await;
        user_mock.assert_async().await;
    }

    #[tokio::test]
    async fn user_profile_by_code_stops_on_scope() {
        let mut server = Server::new_async().await;
        let _token_mock = server
            .mock("GET", "/sns/oauth2/access_token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"access_token":"AT","expires_in":7200,"openid":"OID","scope":"snsapi_base"}"#)
            .create_async()
            .await;
        let user_mock = server
            .mock("GET", "/sns/userinfo")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = mock_client(&server)
            .user_profile_by_code("CODE")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ScopeDenied));
        user_mock.assert_async().await;
    }
}
