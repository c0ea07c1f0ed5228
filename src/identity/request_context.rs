use axum::http::{HeaderMap, HeaderName, HeaderValue};

use super::claims::{ClaimSet, Role};

/// Headers the gate sets for downstream handlers. Anything a client sends with this
/// prefix is removed before the request goes further.
pub const FORWARDED_PREFIX: &str = "x-inogr-";
pub const HEADER_UID: &str = "x-inogr-uid";
pub const HEADER_EMAIL: &str = "x-inogr-email";
pub const HEADER_ROLE: &str = "x-inogr-role";
pub const HEADER_ADMIN: &str = "x-inogr-admin";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Per-request identity as decided by the gate. Inserted into request extensions.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Option<ClaimSet>,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.identity.as_ref().map(|c| c.is_admin).unwrap_or(false)
    }

    /// Remove every client-supplied forwarded-identity header.
    pub fn strip_forwarded(headers: &mut HeaderMap) {
        let spoofed: Vec<HeaderName> = headers
            .keys()
            .filter(|k| k.as_str().starts_with(FORWARDED_PREFIX))
            .cloned()
            .collect();
        for k in spoofed {
            headers.remove(&k);
        }
    }

    /// Write the identity as trusted headers for handlers that do not read extensions.
    pub fn forward_into(&self, headers: &mut HeaderMap) {
        if let Some(id) = &self.request_id {
            if let Ok(v) = HeaderValue::from_str(id) {
                headers.insert(HEADER_REQUEST_ID, v);
            }
        }
        let Some(c) = &self.identity else { return };
        if let Ok(v) = HeaderValue::from_str(&c.subject) {
            headers.insert(HEADER_UID, v);
        }
        if let Some(email) = c.email.as_deref().and_then(|e| HeaderValue::from_str(e).ok()) {
            headers.insert(HEADER_EMAIL, email);
        }
        headers.insert(HEADER_ROLE, HeaderValue::from_static(c.role.as_str()));
        headers.insert(HEADER_ADMIN, HeaderValue::from_static(if c.is_admin { "true" } else { "false" }));
    }

    /// Rebuild the context from trusted headers. Only meaningful behind the gate.
    pub fn from_forwarded(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
        let identity = text(HEADER_UID).map(|subject| ClaimSet {
            subject,
            email: text(HEADER_EMAIL),
            role: Role::from_claim(text(HEADER_ROLE).as_deref()),
            is_admin: text(HEADER_ADMIN).as_deref() == Some("true"),
        });
        Self { identity, request_id: text(HEADER_REQUEST_ID) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_removes_only_prefixed_headers() {
        let mut h = HeaderMap::new();
        h.insert(HEADER_ADMIN, HeaderValue::from_static("true"));
        h.insert("x-inogr-anything", HeaderValue::from_static("1"));
        h.insert("accept", HeaderValue::from_static("text/html"));
        RequestContext::strip_forwarded(&mut h);
        assert!(h.get(HEADER_ADMIN).is_none());
        assert!(h.get("x-inogr-anything").is_none());
        assert_eq!(h.get("accept").unwrap(), "text/html");
    }

    #[test]
    fn forward_and_rebuild() {
        let ctx = RequestContext {
            identity: Some(ClaimSet::new("uid-1").with_email("a@inogr.example").with_role(Role::Admin)),
            request_id: Some("req-1".into()),
        };
        let mut h = HeaderMap::new();
        ctx.forward_into(&mut h);
        assert_eq!(h.get(HEADER_UID).unwrap(), "uid-1");
        assert_eq!(h.get(HEADER_ROLE).unwrap(), "Admin");
        assert_eq!(h.get(HEADER_ADMIN).unwrap(), "true");
        let back = RequestContext::from_forwarded(&h);
        assert_eq!(back.identity, ctx.identity);
        assert_eq!(back.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn anonymous_context_forwards_no_identity() {
        let ctx = RequestContext { identity: None, request_id: Some("r".into()) };
        let mut h = HeaderMap::new();
        ctx.forward_into(&mut h);
        assert!(h.get(HEADER_UID).is_none());
        assert!(!RequestContext::from_forwarded(&h).is_authenticated());
    }
}
