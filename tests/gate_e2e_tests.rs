//! End-to-end gate tests: a real server on an ephemeral localhost port, driven with
//! reqwest (redirects disabled so the gate's 307s are visible).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use reqwest::header::{CACHE_CONTROL, COOKIE, LOCATION, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use inogr_gate::config::{GateConfig, SigningKey};
use inogr_gate::identity::{
    ClaimSet, DisabledIdentityProvider, IdentityProvider, InvalidReason, Role, SessionCodec, SessionVerifier,
    StaticIdentityProvider, Verification, HEADER_ADMIN, HEADER_UID,
};
use inogr_gate::server::{router, site, AppState};

const KEY_A: &[u8] = b"inogr-test-key-a-0123456789abcdef";
const KEY_B: &[u8] = b"inogr-test-key-b-0123456789abcdef";

struct TestServer {
    addr: SocketAddr,
    base: String,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

fn keys(raw: &[&[u8]]) -> Vec<SigningKey> {
    raw.iter().map(|k| SigningKey::from_bytes(k.to_vec())).collect()
}

fn identities() -> Arc<dyn IdentityProvider> {
    Arc::new(
        StaticIdentityProvider::new()
            .with("id-token-admin", ClaimSet::new("uid-admin").with_email("owner@inogr.example").with_role(Role::SuperAdmin))
            .with("id-token-user", ClaimSet::new("uid-user").with_role(Role::User)),
    )
}

fn state_with(ring: &[&[u8]], identity: Arc<dyn IdentityProvider>) -> AppState {
    AppState::new(GateConfig::with_keys(keys(ring)), identity).expect("valid test config")
}

async fn start(state: AppState, site: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind 127.0.0.1:0");
    let addr = listener.local_addr().expect("local addr");
    let app = router(state, site);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("test server error: {e:?}");
        }
    });
    TestServer { addr, base: format!("http://{}", addr), handle }
}

async fn start_default() -> TestServer {
    start(state_with(&[KEY_A], identities()), site::router()).await
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client")
}

fn mint(ring: &[&[u8]], claims: ClaimSet) -> String {
    SessionCodec::new(&keys(ring), 3600).unwrap().issue(claims).unwrap().token
}

fn admin_claims() -> ClaimSet {
    ClaimSet::new("uid-admin").with_role(Role::Admin)
}

fn user_claims() -> ClaimSet {
    ClaimSet::new("uid-user").with_role(Role::User)
}

async fn get_with_cookie(c: &reqwest::Client, url: &str, token: Option<&str>) -> reqwest::Response {
    let mut req = c.get(url);
    if let Some(t) = token {
        req = req.header(COOKIE, format!("AuthToken={}", t));
    }
    req.send().await.expect("request")
}

fn location(resp: &reqwest::Response) -> String {
    resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()).unwrap_or("").to_string()
}

fn set_cookie(resp: &reqwest::Response) -> Option<String> {
    resp.headers().get(SET_COOKIE).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

#[tokio::test]
async fn protected_path_without_cookie_redirects_to_login() -> Result<()> {
    let srv = start_default().await;
    let resp = get_with_cookie(&client(), &srv.url("/admin"), None).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&resp), "/login?redirect=%2Fadmin");
    Ok(())
}

#[tokio::test]
async fn unprivileged_cookie_redirects_to_unauthorized() -> Result<()> {
    let srv = start_default().await;
    let token = mint(&[KEY_A], user_claims());
    let resp = get_with_cookie(&client(), &srv.url("/admin"), Some(&token)).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&resp), "/unauthorized");
    Ok(())
}

#[tokio::test]
async fn admin_cookie_is_served_with_identity() -> Result<()> {
    let srv = start_default().await;
    let token = mint(&[KEY_A], admin_claims());
    let resp = get_with_cookie(&client(), &srv.url("/admin/blog"), Some(&token)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let request_id = resp.headers().get("x-request-id").and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    assert!(request_id.is_some());
    let body: Value = resp.json().await?;
    assert_eq!(body["page"], "/admin/blog");
    assert_eq!(body["viewer"], "uid-admin");
    assert_eq!(body["admin"], true);
    assert_eq!(body["request_id"].as_str(), request_id.as_deref());
    Ok(())
}

#[tokio::test]
async fn site_reads_only_gate_forwarded_identity() -> Result<()> {
    let srv = start_default().await;
    let resp = client()
        .get(srv.url("/contact"))
        .header(HEADER_UID, "uid-admin")
        .header(HEADER_ADMIN, "true")
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["viewer"], Value::Null);
    assert_eq!(body["admin"], false);
    Ok(())
}

#[tokio::test]
async fn public_path_is_served_without_cookie() -> Result<()> {
    let srv = start_default().await;
    let c = client();
    let resp = get_with_cookie(&c, &srv.url("/contact"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["viewer"], Value::Null);

    let resp = get_with_cookie(&c, &srv.url("/contact"), Some("garbage")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn expired_cookie_is_treated_as_absent() -> Result<()> {
    let srv = start_default().await;
    let codec = SessionCodec::new(&keys(&[KEY_A]), 3600)?;
    let stale = codec.issue_at(admin_claims(), Utc::now() - Duration::hours(2))?.token;
    let resp = get_with_cookie(&client(), &srv.url("/admin"), Some(&stale)).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&resp), "/login?redirect=%2Fadmin");
    Ok(())
}

#[tokio::test]
async fn malformed_and_foreign_cookies_fail_closed() -> Result<()> {
    let srv = start_default().await;
    let c = client();
    let foreign = mint(&[KEY_B], admin_claims());
    for token in ["garbage", "a.b.c", foreign.as_str()] {
        let resp = get_with_cookie(&c, &srv.url("/admin/users"), Some(token)).await;
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT, "token {:?}", token);
        assert!(location(&resp).starts_with("/login?redirect="), "token {:?}", token);
    }
    Ok(())
}

#[tokio::test]
async fn assets_pass_but_not_under_protected_prefix() -> Result<()> {
    let srv = start_default().await;
    let c = client();
    assert_eq!(get_with_cookie(&c, &srv.url("/_next/static/app.js"), None).await.status(), StatusCode::OK);
    assert_eq!(get_with_cookie(&c, &srv.url("/favicon.ico"), None).await.status(), StatusCode::OK);
    let resp = get_with_cookie(&c, &srv.url("/admin/logo.png"), None).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    Ok(())
}

#[tokio::test]
async fn encoded_and_doubled_slashes_do_not_bypass_gate() -> Result<()> {
    let srv = start_default().await;
    let c = client();
    for path in ["/%61dmin", "//admin", "/ADMIN/blog"] {
        let resp = get_with_cookie(&c, &srv.url(path), None).await;
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT, "path {}", path);
    }
    Ok(())
}

/// Send a request line exactly as given; reqwest would resolve dot segments first.
async fn raw_get(addr: SocketAddr, target: &str) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(addr).await?;
    let req = format!("GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", target, addr);
    stream.write_all(req.as_bytes()).await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf).to_string();
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    Ok((status, text))
}

fn admin_area() -> Router {
    Router::new()
        .route("/admin", get(|| async { "ADMIN-AREA" }))
        .route("/admin/{*rest}", get(|| async { "ADMIN-AREA" }))
        .fallback(|| async { "site page" })
}

#[tokio::test]
async fn dot_segments_on_the_wire_do_not_reach_admin_routes() -> Result<()> {
    let srv = start(state_with(&[KEY_A], identities()), admin_area()).await;
    for target in [
        "/admin/users",
        "/admin/..",
        "/admin/%2e%2e/contact",
        "/admin/users/../../contact",
        "/admin/./users",
        "/admin/../favicon.ico",
        "/admin/../api/login",
        "/contact/../admin",
    ] {
        let (status, text) = raw_get(srv.addr, target).await?;
        assert_eq!(status, 307, "{} answered {}", target, status);
        assert!(!text.contains("ADMIN-AREA"), "{} leaked the admin area", target);
    }

    let (status, text) = raw_get(srv.addr, "/contact").await?;
    assert_eq!(status, 200);
    assert!(text.contains("site page"));

    // an admin session still gets through the same raw paths
    let token = mint(&[KEY_A], admin_claims());
    let mut stream = TcpStream::connect(srv.addr).await?;
    let req = format!(
        "GET /admin/users/../settings HTTP/1.1\r\nHost: {}\r\nCookie: AuthToken={}\r\nConnection: close\r\n\r\n",
        srv.addr, token
    );
    stream.write_all(req.as_bytes()).await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf).to_string();
    assert!(text.starts_with("HTTP/1.1 200"), "{}", text);
    assert!(text.contains("ADMIN-AREA"));
    Ok(())
}

#[tokio::test]
async fn login_sets_cookie_with_contract_attributes() -> Result<()> {
    let srv = start_default().await;
    let c = client();
    let resp = c.get(srv.url("/api/login")).bearer_auth("id-token-admin").send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(CACHE_CONTROL).unwrap(), "no-store");
    let cookie = set_cookie(&resp).expect("Set-Cookie on login");
    assert!(cookie.starts_with("AuthToken="));
    for attr in ["Max-Age=1036800", "Path=/", "HttpOnly", "SameSite=Lax"] {
        assert!(cookie.contains(attr), "missing {} in {}", attr, cookie);
    }
    assert!(!cookie.contains("Secure"));
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["uid"], "uid-admin");
    assert_eq!(body["admin"], true);

    // the issued cookie opens the admin area
    let pair = cookie.split(';').next().unwrap().to_string();
    let resp = c.get(srv.url("/admin")).header(COOKIE, pair.clone()).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = c.get(srv.url("/api/session")).header(COOKIE, pair).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["identity"]["subject"], "uid-admin");
    assert_eq!(body["identity"]["role"], "Super Admin");
    Ok(())
}

#[tokio::test]
async fn non_admin_login_succeeds_but_admin_area_is_unauthorized() -> Result<()> {
    let srv = start_default().await;
    let c = client();
    let resp = c.get(srv.url("/api/login")).bearer_auth("id-token-user").send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let pair = set_cookie(&resp).unwrap().split(';').next().unwrap().to_string();
    let resp = c.get(srv.url("/admin")).header(COOKIE, pair).send().await?;
    assert_eq!(location(&resp), "/unauthorized");
    Ok(())
}

#[tokio::test]
async fn login_rejections_set_no_cookie() -> Result<()> {
    let srv = start_default().await;
    let c = client();

    let resp = c.get(srv.url("/api/login")).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&resp).is_none());
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "unauthorized");
    assert_eq!(body["error"], "missing_bearer");

    let resp = c.get(srv.url("/api/login")).bearer_auth("forged").send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&resp).is_none());

    let resp = c.get(srv.url("/api/login")).header("authorization", "Basic abc").send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn login_without_identity_provider_is_unavailable() -> Result<()> {
    let srv = start(state_with(&[KEY_A], Arc::new(DisabledIdentityProvider)), site::router()).await;
    let resp = client().get(srv.url("/api/login")).bearer_auth("anything").send().await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(set_cookie(&resp).is_none());
    Ok(())
}

#[tokio::test]
async fn logout_is_idempotent_and_always_clears() -> Result<()> {
    let srv = start_default().await;
    let c = client();
    let token = mint(&[KEY_A], admin_claims());
    let attempts = vec![
        c.get(srv.url("/api/logout")).header(COOKIE, format!("AuthToken={}", token)),
        c.get(srv.url("/api/logout")),
        c.post(srv.url("/api/logout")),
        c.get(srv.url("/api/logout")).header(COOKIE, "AuthToken=garbage"),
    ];
    for req in attempts {
        let resp = req.send().await?;
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&resp), "/login");
        let cookie = set_cookie(&resp).expect("clearing Set-Cookie");
        assert!(cookie.starts_with("AuthToken=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
    Ok(())
}

#[tokio::test]
async fn session_endpoint_without_cookie_is_unauthorized() -> Result<()> {
    let srv = start_default().await;
    let resp = client().get(srv.url("/api/session")).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await?;
    assert_eq!(body, json!({"status": "unauthorized"}));
    Ok(())
}

async fn echo_forwarded(headers: HeaderMap) -> Json<Value> {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    Json(json!({"uid": text(HEADER_UID), "admin": text(HEADER_ADMIN)}))
}

#[tokio::test]
async fn client_supplied_identity_headers_are_stripped() -> Result<()> {
    let site = Router::new().fallback(echo_forwarded);
    let srv = start(state_with(&[KEY_A], identities()), site).await;
    let c = client();

    let resp = c
        .get(srv.url("/contact"))
        .header(HEADER_UID, "uid-admin")
        .header(HEADER_ADMIN, "true")
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body, json!({"uid": null, "admin": null}));

    // a real unprivileged session cannot be upgraded by header
    let token = mint(&[KEY_A], user_claims());
    let resp = c
        .get(srv.url("/admin"))
        .header(COOKIE, format!("AuthToken={}", token))
        .header(HEADER_ADMIN, "true")
        .send()
        .await?;
    assert_eq!(location(&resp), "/unauthorized");

    // downstream sees the gate's own headers
    let resp = c
        .get(srv.url("/contact"))
        .header(COOKIE, format!("AuthToken={}", token))
        .header(HEADER_ADMIN, "true")
        .send()
        .await?;
    let body: Value = resp.json().await?;
    assert_eq!(body, json!({"uid": "uid-user", "admin": "false"}));
    Ok(())
}

#[tokio::test]
async fn rotated_key_ring_accepts_old_cookies_until_key_is_dropped() -> Result<()> {
    let old_cookie = mint(&[KEY_A], admin_claims());
    let c = client();

    let rotated = start(state_with(&[KEY_B, KEY_A], identities()), site::router()).await;
    let resp = get_with_cookie(&c, &rotated.url("/admin"), Some(&old_cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // logins on the rotated server are signed with the new first key
    let resp = c.get(rotated.url("/api/login")).bearer_auth("id-token-admin").send().await?;
    let pair = set_cookie(&resp).unwrap().split(';').next().unwrap().to_string();
    let new_only = start(state_with(&[KEY_B], identities()), site::router()).await;
    let resp = c.get(new_only.url("/admin")).header(COOKIE, pair).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = get_with_cookie(&c, &new_only.url("/admin"), Some(&old_cookie)).await;
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&resp).starts_with("/login"));
    Ok(())
}

struct Unavailable;

impl SessionVerifier for Unavailable {
    fn verify(&self, _token: &str) -> Verification {
        Verification::Invalid(InvalidReason::Unavailable("key store offline".to_string()))
    }
}

struct Exploding;

impl SessionVerifier for Exploding {
    fn verify(&self, _token: &str) -> Verification {
        panic!("verifier crashed")
    }
}

#[tokio::test]
async fn verifier_failures_fail_closed() -> Result<()> {
    let token = mint(&[KEY_A], admin_claims());
    let c = client();
    let verifiers: Vec<Arc<dyn SessionVerifier>> = vec![Arc::new(Unavailable), Arc::new(Exploding)];
    for verifier in verifiers {
        let state = state_with(&[KEY_A], identities()).with_verifier(verifier);
        let srv = start(state, site::router()).await;
        let resp = get_with_cookie(&c, &srv.url("/admin"), Some(&token)).await;
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        assert!(location(&resp).starts_with("/login"));
        // public pages keep working, anonymously
        let resp = get_with_cookie(&c, &srv.url("/about"), Some(&token)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await?;
        assert_eq!(body["viewer"], Value::Null);
    }
    Ok(())
}
