//! Placeholder for the site's content routes. Pages themselves are rendered elsewhere;
//! this only reports which page was asked for and who is viewing it, so the gate can
//! be run and exercised on its own. Like any downstream handler it reads the viewer
//! from the headers the gate forwards rather than from request extensions.

use axum::http::{HeaderMap, Uri};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::identity::RequestContext;

pub fn router() -> Router {
    Router::new().route("/", get(page)).fallback(page)
}

async fn page(uri: Uri, headers: HeaderMap) -> Json<Value> {
    let ctx = RequestContext::from_forwarded(&headers);
    Json(json!({
        "page": uri.path(),
        "viewer": ctx.identity.as_ref().map(|c| c.subject.clone()),
        "admin": ctx.is_admin(),
        "request_id": ctx.request_id,
    }))
}
