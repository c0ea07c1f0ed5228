//!
//! Gate configuration
//! ------------------
//! Everything the gate needs is loaded once at process start from environment
//! variables (optionally a secrets file for the signing keys), validated, and then
//! treated as immutable. Rotating signing keys means restarting the process.

use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

use base64::Engine;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::identity::{normalize_path, PathPolicy};

pub const DEFAULT_COOKIE_NAME: &str = "AuthToken";
/// 12 days, as the site has always issued.
pub const DEFAULT_MAX_AGE_SECS: i64 = 12 * 60 * 60 * 24;
/// Upper bound on cookie and session lifetime: 400 days, the most browsers honour.
pub const MAX_MAX_AGE_SECS: i64 = 400 * 24 * 60 * 60;
pub const DEFAULT_HTTP_PORT: u16 = 3000;
/// Keys shorter than this still work but are logged as weak.
pub const MIN_KEY_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub path: String,
    pub max_age_secs: i64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            path: "/".to_string(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

/// HMAC key used to sign session cookies. Debug output never shows the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        SigningKey(bytes.into())
    }

    /// Parse a configured key: `base64:<standard or url-safe base64>` or raw text.
    pub fn parse(s: &str) -> AppResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AppError::config("empty_signing_key", "signing key must not be empty"));
        }
        if let Some(b64) = s.strip_prefix("base64:") {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(b64))
                .map_err(|e| AppError::config("bad_signing_key".to_string(), format!("invalid base64 signing key: {}", e)))?;
            if bytes.is_empty() {
                return Err(AppError::config("empty_signing_key", "signing key must not be empty"));
            }
            return Ok(SigningKey(bytes));
        }
        Ok(SigningKey(s.as_bytes().to_vec()))
    }

    /// Fresh random 32-byte key.
    pub fn generate() -> AppResult<Self> {
        let mut buf = [0u8; 32];
        getrandom::getrandom(&mut buf)
            .map_err(|e| AppError::internal("rng_failed".to_string(), e.to_string()))?;
        Ok(SigningKey(buf.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Form accepted by [`SigningKey::parse`].
    pub fn to_config_string(&self) -> String {
        format!("base64:{}", base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl Debug for SigningKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey(<{} bytes>)", self.0.len())
    }
}

/// External identity provider settings used by the login endpoint.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IdentityConfig {
    pub project_id: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// JSON object `{ "<kid>": "<RSA public key PEM>" }`.
    pub keys_file: Option<PathBuf>,
    /// HS256 shared secret, for self-hosted identity tokens.
    pub shared_secret: Option<String>,
}

impl IdentityConfig {
    pub fn is_configured(&self) -> bool {
        self.keys_file.is_some() || self.shared_secret.is_some()
    }

    pub fn issuer(&self) -> Option<String> {
        self.issuer
            .clone()
            .or_else(|| self.project_id.as_ref().map(|p| format!("https://securetoken.google.com/{}", p)))
    }

    pub fn audience(&self) -> Option<String> {
        self.audience.clone().or_else(|| self.project_id.clone())
    }
}

impl Debug for IdentityConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("project_id", &self.project_id)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("keys_file", &self.keys_file)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub bind: String,
    pub http_port: u16,
    pub cookie: CookieSettings,
    /// Ordered: the first key signs new cookies, all keys are tried on verification.
    pub signing_keys: Vec<SigningKey>,
    pub paths: PathPolicy,
    pub identity: IdentityConfig,
}

impl GateConfig {
    /// Defaults with the given key ring. Mostly for tests and tooling.
    pub fn with_keys(signing_keys: Vec<SigningKey>) -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            cookie: CookieSettings::default(),
            signing_keys,
            paths: PathPolicy::default(),
            identity: IdentityConfig::default(),
        }
    }

    /// Load from the process environment. Does not validate; call [`GateConfig::validate`].
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Load using an arbitrary variable lookup (the environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let production = get("INOGR_ENV").map(|v| v.eq_ignore_ascii_case("production")).unwrap_or(false);

        let mut cookie = CookieSettings::default();
        if let Some(name) = get("INOGR_COOKIE_NAME") {
            cookie.name = name;
        }
        if let Some(v) = get("INOGR_COOKIE_MAX_AGE_SECS") {
            cookie.max_age_secs = v.parse::<i64>().map_err(|e| {
                AppError::config("bad_max_age".to_string(), format!("INOGR_COOKIE_MAX_AGE_SECS='{}': {}", v, e))
            })?;
        }
        cookie.secure = match get("INOGR_COOKIE_SECURE") {
            Some(v) => parse_bool(&v).ok_or_else(|| {
                AppError::config("bad_bool".to_string(), format!("INOGR_COOKIE_SECURE='{}' is not a boolean", v))
            })?,
            None => production,
        };

        let signing_keys = match (get("INOGR_COOKIE_KEYS"), get("INOGR_COOKIE_KEYS_FILE")) {
            (Some(list), file) => {
                if file.is_some() {
                    info!(target: "config", "INOGR_COOKIE_KEYS set; ignoring INOGR_COOKIE_KEYS_FILE");
                }
                parse_key_list(&list)?
            }
            (None, Some(file)) => read_key_file(Path::new(&file))?,
            (None, None) => Vec::new(),
        };

        let mut paths = PathPolicy::default();
        if let Some(v) = get("INOGR_PROTECTED_PREFIXES") {
            paths.protected_prefixes = split_list(&v);
        }
        if let Some(v) = get("INOGR_PUBLIC_PATHS") {
            paths.public_paths = split_list(&v);
        }
        if let Some(v) = get("INOGR_ASSET_PREFIXES") {
            paths.asset_prefixes = split_list(&v);
        }
        if let Some(v) = get("INOGR_LOGIN_PAGE") {
            paths.login_page = v;
        }
        if let Some(v) = get("INOGR_UNAUTHORIZED_PAGE") {
            paths.unauthorized_page = v;
        }

        let identity = IdentityConfig {
            project_id: get("INOGR_IDP_PROJECT_ID"),
            issuer: get("INOGR_IDP_ISSUER"),
            audience: get("INOGR_IDP_AUDIENCE"),
            keys_file: get("INOGR_IDP_KEYS_FILE").map(PathBuf::from),
            shared_secret: get("INOGR_IDP_SECRET"),
        };

        let http_port = match get("INOGR_HTTP_PORT") {
            Some(v) => v.parse::<u16>().map_err(|e| {
                AppError::config("bad_port".to_string(), format!("INOGR_HTTP_PORT='{}': {}", v, e))
            })?,
            None => DEFAULT_HTTP_PORT,
        };

        Ok(Self {
            bind: get("INOGR_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port,
            cookie,
            signing_keys,
            paths,
            identity,
        })
    }

    /// Reject configurations that would break the cookie contract or let the gate
    /// lock users out of the login flow.
    pub fn validate(&self) -> AppResult<()> {
        if self.signing_keys.is_empty() {
            return Err(AppError::config(
                "no_signing_keys",
                "at least one cookie signing key is required (INOGR_COOKIE_KEYS or INOGR_COOKIE_KEYS_FILE)",
            ));
        }
        for (i, k) in self.signing_keys.iter().enumerate() {
            if k.is_empty() {
                return Err(AppError::config("empty_signing_key".to_string(), format!("signing key #{} is empty", i + 1)));
            }
            if k.len() < MIN_KEY_BYTES {
                warn!(target: "config", key_index = i, bytes = k.len(), "cookie signing key is shorter than {} bytes", MIN_KEY_BYTES);
            }
        }
        if !is_cookie_token(&self.cookie.name) {
            return Err(AppError::config(
                "bad_cookie_name".to_string(),
                format!("'{}' is not a valid cookie name", self.cookie.name),
            ));
        }
        if self.cookie.max_age_secs <= 0 {
            return Err(AppError::config("bad_max_age", "cookie max-age must be positive"));
        }
        if self.cookie.max_age_secs > MAX_MAX_AGE_SECS {
            return Err(AppError::config(
                "bad_max_age".to_string(),
                format!("cookie max-age {} exceeds {} seconds", self.cookie.max_age_secs, MAX_MAX_AGE_SECS),
            ));
        }
        if !self.cookie.path.starts_with('/') {
            return Err(AppError::config("bad_cookie_path", "cookie path must start with '/'"));
        }

        let p = &self.paths;
        if p.protected_prefixes.is_empty() {
            warn!(target: "config", "no protected prefixes configured; the gate will never redirect");
        }
        let singles = [
            ("login page", &p.login_page),
            ("unauthorized page", &p.unauthorized_page),
            ("login endpoint", &p.login_endpoint),
            ("logout endpoint", &p.logout_endpoint),
        ];
        let lists = p
            .protected_prefixes
            .iter()
            .map(|s| ("protected prefix", s))
            .chain(p.public_paths.iter().map(|s| ("public path", s)))
            .chain(p.asset_prefixes.iter().map(|s| ("asset prefix", s)));
        for (what, path) in singles.iter().map(|(w, s)| (*w, *s)).chain(lists) {
            if !path.starts_with('/') {
                return Err(AppError::config("bad_path".to_string(), format!("{} '{}' must start with '/'", what, path)));
            }
        }
        for (what, path) in singles.iter().map(|(w, s)| (*w, *s)).chain(p.public_paths.iter().map(|s| ("public path", s))) {
            if p.is_protected(&normalize_path(path)) {
                return Err(AppError::config(
                    "path_overlap".to_string(),
                    format!("{} '{}' falls under a protected prefix", what, path),
                ));
            }
        }
        if p.redirect_param.is_empty() {
            return Err(AppError::config("bad_redirect_param", "redirect parameter name must not be empty"));
        }
        Ok(())
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()).map(|p| p.to_string()).collect()
}

fn parse_key_list(s: &str) -> AppResult<Vec<SigningKey>> {
    split_list(s).iter().map(|k| SigningKey::parse(k)).collect()
}

/// One key per line; blank lines and `#` comments skipped. Order is preserved.
pub fn read_key_file(path: &Path) -> AppResult<Vec<SigningKey>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::config("key_file_unreadable".to_string(), format!("{}: {}", path.display(), e))
    })?;
    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(SigningKey::parse)
        .collect()
}

/// RFC 6265 cookie-name token: visible ASCII without separators.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(b, b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}')
        })
}
