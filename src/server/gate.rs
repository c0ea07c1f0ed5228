//!
//! Session gate
//! ------------
//! Runs once per request before any page or endpoint logic. Outcomes:
//! - pass through (optionally carrying the verified identity),
//! - redirect to the login page (no usable session on a protected path),
//! - redirect to the unauthorized page (known user without the admin flag).
//!
//! Any verification failure, including a failing or panicking verifier, counts as
//! "no session". The decision itself is the pure [`decide`] function; the axum
//! middleware only gathers inputs and applies the result.

use std::panic::{catch_unwind, AssertUnwindSafe};

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cookie::parse_cookie;
use super::AppState;
use crate::identity::{
    return_target, ClaimSet, InvalidReason, PathClass, PathPolicy, RequestContext, SessionVerifier, Verification,
    HEADER_REQUEST_ID,
};

/// What the gate learned about the request's session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No cookie, or the path class does not look at cookies.
    Absent,
    Verified(Verification),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Pass { identity: Option<ClaimSet> },
    RedirectToLogin { location: String },
    RedirectUnauthorized { location: String },
}

impl GateDecision {
    pub fn outcome(&self) -> &'static str {
        match self {
            GateDecision::Pass { .. } => "pass",
            GateDecision::RedirectToLogin { .. } => "login",
            GateDecision::RedirectUnauthorized { .. } => "unauthorized",
        }
    }
}

/// Decide the outcome for one request. `return_to` is the original path and query,
/// handed to the login page so it can send the user back.
pub fn decide(policy: &PathPolicy, class: PathClass, return_to: &str, session: SessionState) -> GateDecision {
    let identity = match session {
        SessionState::Verified(Verification::Valid(claims)) => Some(claims),
        SessionState::Verified(Verification::Invalid(_)) | SessionState::Absent => None,
    };
    match class {
        PathClass::AuthEndpoint | PathClass::Asset => GateDecision::Pass { identity: None },
        PathClass::Public | PathClass::Unlisted => GateDecision::Pass { identity },
        PathClass::Protected => match identity {
            None => GateDecision::RedirectToLogin { location: policy.login_redirect(return_to) },
            Some(claims) if !claims.is_admin => {
                GateDecision::RedirectUnauthorized { location: policy.unauthorized_page.clone() }
            }
            Some(claims) => GateDecision::Pass { identity: Some(claims) },
        },
    }
}

/// Run the verifier, turning a panic into an invalid session instead of a crashed request.
pub fn verify_guarded(verifier: &dyn SessionVerifier, token: &str) -> Verification {
    match catch_unwind(AssertUnwindSafe(|| verifier.verify(token))) {
        Ok(v) => v,
        Err(_) => {
            warn!(target: "gate", "session verifier panicked; treating cookie as invalid");
            Verification::Invalid(InvalidReason::Unavailable("verifier panicked".to_string()))
        }
    }
}

/// axum middleware wrapping the whole router.
pub async fn session_gate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    RequestContext::strip_forwarded(req.headers_mut());

    let policy = &state.config.paths;
    let path = req.uri().path().to_string();
    let return_to = return_target(&path, req.uri().query());
    let class = policy.classify(&path);

    let session = if class.needs_session() {
        match parse_cookie(req.headers(), &state.config.cookie.name) {
            None => SessionState::Absent,
            Some(token) => {
                let verdict = verify_guarded(state.verifier.as_ref(), &token);
                if let Verification::Invalid(reason) = &verdict {
                    debug!(target: "gate", request_id = %request_id, reason = reason.as_str(), "session cookie rejected");
                }
                SessionState::Verified(verdict)
            }
        }
    } else {
        SessionState::Absent
    };

    let decision = decide(policy, class, &return_to, session);
    let outcome = decision.outcome();
    match decision {
        GateDecision::Pass { identity } => {
            debug!(
                target: "gate",
                request_id = %request_id,
                path = %path,
                class = class.as_str(),
                sub = identity.as_ref().map(|c| c.subject.as_str()).unwrap_or("-"),
                "pass"
            );
            let ctx = RequestContext { identity, request_id: Some(request_id.clone()) };
            ctx.forward_into(req.headers_mut());
            req.extensions_mut().insert(ctx);
            let mut resp = next.run(req).await;
            if let Ok(v) = HeaderValue::from_str(&request_id) {
                resp.headers_mut().insert(HEADER_REQUEST_ID, v);
            }
            resp
        }
        GateDecision::RedirectToLogin { location } | GateDecision::RedirectUnauthorized { location } => {
            info!(
                target: "gate",
                request_id = %request_id,
                path = %path,
                outcome = outcome,
                "redirect"
            );
            let mut resp = Redirect::temporary(&location).into_response();
            if let Ok(v) = HeaderValue::from_str(&request_id) {
                resp.headers_mut().insert(HEADER_REQUEST_ID, v);
            }
            resp
        }
    }
}
