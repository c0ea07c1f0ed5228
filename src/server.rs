//!
//! inogr HTTP server
//! -----------------
//! Axum router for the site with the session gate layered over every route.
//!
//! Responsibilities:
//! - Session gate middleware (see [`gate`]) in front of all requests.
//! - Login endpoint: exchange an identity-provider token for a signed session cookie.
//! - Logout endpoint: expire the cookie and send the user to the login page.
//! - Session endpoint: report the identity the gate forwarded, for the site's client code.
//! - Startup: configuration summary, identity provider selection, listener bind.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Extension, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde_json::json;
use tracing::{error, info};

use crate::config::GateConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{
    self, provider_from_config, IdentityProvider, LoginRequest, RequestContext, SessionCodec, SessionVerifier,
};

pub mod cookie;
pub mod gate;
pub mod site;

pub const SESSION_ENDPOINT: &str = "/api/session";

/// Shared server state injected into the gate and all handlers. Built once at startup;
/// nothing in it changes while the server runs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GateConfig>,
    /// Signs new session cookies on login.
    pub issuer: Arc<SessionCodec>,
    /// Checks cookies in the gate. Normally the same codec as `issuer`.
    pub verifier: Arc<dyn SessionVerifier>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Validate the configuration and build the session codec from its key ring.
    pub fn new(config: GateConfig, identity: Arc<dyn IdentityProvider>) -> AppResult<Self> {
        config.validate()?;
        let codec = Arc::new(SessionCodec::from_config(&config)?);
        Ok(Self { config: Arc::new(config), issuer: codec.clone(), verifier: codec, identity })
    }

    /// Replace the cookie verifier, keeping the issuing codec.
    pub fn with_verifier(mut self, verifier: Arc<dyn SessionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }
}

/// Mount the auth endpoints next to `site`, with the gate wrapping both.
pub fn router(state: AppState, site: Router) -> Router {
    let paths = &state.config.paths;
    let api = Router::new()
        .route(&paths.login_endpoint, get(login))
        .route(&paths.logout_endpoint, get(logout).post(logout))
        .route(SESSION_ENDPOINT, get(session_info))
        .with_state(state.clone());
    api.merge(site).layer(middleware::from_fn_with_state(state, gate::session_gate))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn login(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match login_inner(&state, &headers) {
        Ok(resp) => resp,
        Err(e) => {
            if e.http_status() >= 500 {
                error!(target: "auth", code = e.code_str(), "login failed: {}", e.message());
            }
            let mut resp = e.into_response();
            resp.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            resp
        }
    }
}

fn login_inner(state: &AppState, headers: &HeaderMap) -> AppResult<Response> {
    let bearer = bearer_token(headers)
        .ok_or_else(|| AppError::auth("missing_bearer", "Authorization: Bearer <id token> required"))?;
    let req = LoginRequest { bearer, ip: client_ip(headers) };
    let ok = identity::login(state.identity.as_ref(), &state.issuer, &req)?;
    let session = ok.session;

    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, cookie::set_session_cookie(&state.config.cookie, &session.token)?);
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    let body = json!({
        "status": "ok",
        "uid": session.claims.subject,
        "admin": session.claims.is_admin,
        "expires_at": session.expires_at.to_rfc3339(),
    });
    Ok((StatusCode::OK, h, Json(body)).into_response())
}

async fn logout(State(state): State<AppState>, ctx: Option<Extension<RequestContext>>) -> Response {
    let request_id = ctx.and_then(|Extension(c)| c.request_id);
    info!(target: "auth", request_id = ?request_id, "logout");
    let mut resp = Redirect::temporary(&state.config.paths.login_page).into_response();
    match cookie::clear_session_cookie(&state.config.cookie) {
        Ok(v) => {
            resp.headers_mut().insert(header::SET_COOKIE, v);
        }
        Err(e) => return e.into_response(),
    }
    resp.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

async fn session_info(ctx: Option<Extension<RequestContext>>) -> Response {
    let identity = ctx.and_then(|Extension(c)| c.identity);
    let mut resp = match identity {
        Some(c) => (StatusCode::OK, Json(json!({"status": "ok", "identity": c}))).into_response(),
        None => (StatusCode::UNAUTHORIZED, Json(json!({"status": "unauthorized"}))).into_response(),
    };
    resp.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

fn log_startup(config: &GateConfig) {
    let p = &config.paths;
    info!(
        target: "startup",
        "inogr starting. bind={}:{} cookie={} secure={} max_age_secs={} keys={}",
        config.bind,
        config.http_port,
        config.cookie.name,
        config.cookie.secure,
        config.cookie.max_age_secs,
        config.signing_keys.len()
    );
    info!(
        target: "startup",
        "Path policy: protected={:?} public={:?} assets={:?} login={} unauthorized={}",
        p.protected_prefixes, p.public_paths, p.asset_prefixes, p.login_page, p.unauthorized_page
    );
}

/// Start the gate and the placeholder site on the configured address.
pub async fn run(config: GateConfig) -> anyhow::Result<()> {
    log_startup(&config);
    let identity = provider_from_config(&config.identity).context("While configuring the identity provider")?;
    let addr: SocketAddr = format!("{}:{}", config.bind, config.http_port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind, config.http_port))?;
    let state = AppState::new(config, identity).context("Invalid gate configuration")?;
    let app = router(state, site::router());

    info!(target: "startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
