//! Path policy: which request paths need a privileged session, which are public,
//! and which bypass the gate entirely (auth endpoints, static assets).

/// Classification of a request path, in the order the gate checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathClass {
    /// Login/logout endpoints: always reachable, never verified.
    AuthEndpoint,
    /// Under a protected prefix: requires a verified admin session.
    Protected,
    /// Explicitly public content: served regardless of session state.
    Public,
    /// Static assets outside protected prefixes: never verified.
    Asset,
    /// Everything else: served, identity forwarded when present.
    Unlisted,
}

impl PathClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathClass::AuthEndpoint => "auth_endpoint",
            PathClass::Protected => "protected",
            PathClass::Public => "public",
            PathClass::Asset => "asset",
            PathClass::Unlisted => "unlisted",
        }
    }

    /// Whether the gate reads and verifies the session cookie for this class.
    pub fn needs_session(&self) -> bool {
        matches!(self, PathClass::Protected | PathClass::Public | PathClass::Unlisted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPolicy {
    pub protected_prefixes: Vec<String>,
    pub public_paths: Vec<String>,
    pub asset_prefixes: Vec<String>,
    pub login_page: String,
    pub unauthorized_page: String,
    pub login_endpoint: String,
    pub logout_endpoint: String,
    /// Query parameter carrying the original destination on login redirects.
    pub redirect_param: String,
}

pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    "/login",
    "/register",
    "/contact",
    "/about",
    "/software",
    "/cafe",
    "/portfolio",
];

impl Default for PathPolicy {
    fn default() -> Self {
        Self {
            protected_prefixes: vec!["/admin".to_string()],
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|s| s.to_string()).collect(),
            asset_prefixes: vec!["/_next".to_string(), "/static".to_string()],
            login_page: "/login".to_string(),
            unauthorized_page: "/unauthorized".to_string(),
            login_endpoint: "/api/login".to_string(),
            logout_endpoint: "/api/logout".to_string(),
            redirect_param: "redirect".to_string(),
        }
    }
}

impl PathPolicy {
    /// Classify a raw request path (as received, before any decoding).
    ///
    /// The router matches the raw path, dot segments included, so a path is protected
    /// when either its resolved form or its unresolved form falls under a protected
    /// prefix: `/admin/..` is routed to the admin area even though it resolves to `/`.
    pub fn classify(&self, raw_path: &str) -> PathClass {
        let p = normalize_path(raw_path);
        if self.is_protected(&p) || self.is_protected(&collapse_path(raw_path)) {
            return PathClass::Protected;
        }
        if same_path(&p, &self.login_endpoint) || same_path(&p, &self.logout_endpoint) {
            return PathClass::AuthEndpoint;
        }
        if self.public_paths.iter().any(|pp| under_segment(&p, pp)) {
            return PathClass::Public;
        }
        if is_asset(&p, &self.asset_prefixes) {
            return PathClass::Asset;
        }
        PathClass::Unlisted
    }

    /// Plain prefix test against the protected prefixes, on a normalized path.
    /// `/admin` therefore also covers `/administrator` and `/admin-tools`.
    pub fn is_protected(&self, normalized: &str) -> bool {
        self.protected_prefixes
            .iter()
            .map(|pre| normalize_path(pre))
            .any(|pre| normalized.starts_with(&pre))
    }

    /// Location for the "please log in" redirect, carrying the original destination.
    pub fn login_redirect(&self, return_to: &str) -> String {
        format!("{}?{}={}", self.login_page, self.redirect_param, urlencoding::encode(return_to))
    }
}

/// Build the return-to target (path plus query) for a login redirect. Leading slashes
/// are collapsed so the value can never be read as a protocol-relative URL.
pub fn return_target(path: &str, query: Option<&str>) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    out.push_str(path.trim_start_matches(['/', '\\']));
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(q);
    }
    out
}

fn decode_path(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(s) => s.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn join_segments(segs: &[&str], capacity: usize) -> String {
    let mut out = String::with_capacity(capacity + 1);
    for s in segs {
        out.push('/');
        out.push_str(s);
    }
    if out.is_empty() {
        out.push('/');
    }
    out.to_ascii_lowercase()
}

/// Percent-decode, drop empty and `.` segments, resolve `..`, lowercase.
/// On invalid UTF-8 after decoding the raw path is used as-is.
pub fn normalize_path(raw: &str) -> String {
    let decoded = decode_path(raw);
    let mut segs: Vec<&str> = Vec::new();
    for seg in decoded.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                segs.pop();
            }
            s => segs.push(s),
        }
    }
    join_segments(&segs, decoded.len())
}

/// Like [`normalize_path`] but keeps `.` and `..` segments as they are.
fn collapse_path(raw: &str) -> String {
    let decoded = decode_path(raw);
    let segs: Vec<&str> = decoded.split(['/', '\\']).filter(|s| !s.is_empty()).collect();
    join_segments(&segs, decoded.len())
}

fn same_path(normalized: &str, configured: &str) -> bool {
    normalized == normalize_path(configured)
}

fn under_segment(normalized: &str, configured: &str) -> bool {
    let base = normalize_path(configured);
    if base == "/" {
        return normalized == "/";
    }
    normalized == base
        || (normalized.starts_with(&base) && normalized.as_bytes().get(base.len()) == Some(&b'/'))
}

fn is_asset(normalized: &str, asset_prefixes: &[String]) -> bool {
    if asset_prefixes.iter().any(|pre| under_segment(normalized, pre)) {
        return true;
    }
    normalized.rsplit('/').next().map(|last| last.contains('.')).unwrap_or(false)
}
