//! Example: Official Account server verification + web authorization server
//!
//! Routes:
//! - GET /                 welcome text
//! - GET /configure        server URL verification (set this URL as the server address)
//! - GET /oauth2           returns the authorization URL (JSON string)
//! - GET /oauth2/callback  code -> access_token -> user profile (JSON)
//!
//! Any failure replies `400 FAILED:<message>`.
//!
//! Running this example:
//! ```bash
//! WX_APPID=wx... WX_APPSECRET=... WX_TOKEN=... \
//! OAUTH_DOMAIN=https://your.domain PORT=10001 \
//! cargo run --example oauth_server
//! ```
//!
//! Variables may also be placed in a `.env` file.

use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{error, info};
use wxmp_oauth_rs::{Credentials, Lang, OAuthClient, Scope};

/// Application state
#[derive(Clone)]
struct AppState {
    client: OAuthClient,
    /// Full callback URL registered under the web authorization domain
    redirect_uri: String,
}

/// `400 FAILED:<message>`
struct Failed(wxmp_oauth_rs::Error);

impl From<wxmp_oauth_rs::Error> for Failed {
    fn from(e: wxmp_oauth_rs::Error) -> Self {
        Failed(e)
    }
}

impl IntoResponse for Failed {
    fn into_response(self) -> Response {
        if let Some(help) = self.0.help() {
            error!("request failed: {} (hint: {})", self.0, help.hint);
        } else {
            error!("request failed: {}", self.0);
        }
        (StatusCode::BAD_REQUEST, format!("FAILED:{}", self.0)).into_response()
    }
}

async fn index() -> &'static str {
    "Welcome 10001!"
}

/// Server URL verification sent by WeChat when saving the server configuration
async fn configure(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<String, Failed> {
    let echostr = state
        .client
        .verifier()
        .verify_query(query.as_deref().unwrap_or_default())?;
    info!("server verification succeeded");
    Ok(echostr)
}

async fn oauth2(State(state): State<AppState>) -> Result<Json<String>, Failed> {
    let url = state
        .client
        .authorize_url(&state.redirect_uri, Scope::UserInfo, "")?;
    info!(%url, "authorization url");
    Ok(Json(url))
}

async fn oauth2_callback(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<impl IntoResponse, Failed> {
    let code = state
        .client
        .parse_callback(query.as_deref().unwrap_or_default())?;
    info!(state = %code.state, "authorization callback received");

    let token = state.client.exchange_code(&code.code).await?;
    info!(
        scope = %token.scope,
        expires_in = token.expires_in,
        snapshot = token.is_snapshot_user(),
        "access_token obtained"
    );

    let user = state.client.user_profile(&token, Lang::ZhTw).await?;
    info!(nickname = %user.nickname, "user profile fetched");
    Ok(Json(user))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wxmp_oauth_rs=debug".into()),
        )
        .init();

    let credentials = Credentials::from_env()?;
    let domain = std::env::var("OAUTH_DOMAIN").unwrap_or_else(|_| "http://127.0.0.1:10001".into());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(10001);

    info!("Initializing client with {:?}", credentials);
    let state = AppState {
        client: OAuthClient::new(credentials)?,
        redirect_uri: format!("{}/oauth2/callback", domain.trim_end_matches('/')),
    };

    let app = Router::new()
        .route("/", get(index))
        .route("/configure", get(configure))
        .route("/oauth2", get(oauth2))
        .route("/oauth2/callback", get(oauth2_callback))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let addr = listener.local_addr()?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
