use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::IdentityConfig;
use crate::error::{AppError, AppResult};

use super::claims::{ClaimSet, Role};
use super::session::{Session, SessionCodec};

/// Clock skew tolerated on identity tokens from the external provider.
const ID_TOKEN_LEEWAY_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("missing bearer credential")]
    MissingCredential,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("credential expired")]
    Expired,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("identity provider misconfigured: {0}")]
    Configuration(String),
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::MissingCredential => {
                AppError::auth("missing_bearer", "Authorization: Bearer <id token> required")
            }
            IdentityError::InvalidCredential(_) | IdentityError::Expired => {
                // reason stays in the server log
                AppError::auth("invalid_credential", "identity could not be verified")
            }
            IdentityError::Unavailable(_) | IdentityError::Configuration(_) => {
                AppError::unavailable("idp_unavailable", "identity provider unavailable")
            }
        }
    }
}

/// Verifies the credential presented to the login endpoint. This is the proof of
/// identity that precedes issuing a session cookie.
pub trait IdentityProvider: Send + Sync {
    fn verify_credential(&self, bearer: &str) -> Result<ClaimSet, IdentityError>;
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub bearer: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
}

/// Prove identity with the provider, then issue a session for the resulting claims.
pub fn login(provider: &dyn IdentityProvider, codec: &SessionCodec, req: &LoginRequest) -> AppResult<LoginResponse> {
    let claims = provider.verify_credential(&req.bearer).map_err(|e| {
        warn!(target: "auth", ip = ?req.ip, error = %e, "login rejected");
        AppError::from(e)
    })?;
    let session = codec.issue(claims)?;
    info!(
        target: "auth",
        sub = %session.claims.subject,
        admin = session.claims.is_admin,
        ip = ?req.ip,
        "login ok"
    );
    Ok(LoginResponse { session })
}

/// Custom claims the admin console sets on accounts, read from the identity token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    admin: Option<bool>,
}

/// Verifies JWT identity tokens against static keys: RS256 public keys (optionally
/// keyed by `kid`) or a single HS256 shared secret.
pub struct IdTokenProvider {
    keys: Vec<(Option<String>, DecodingKey)>,
    validation: Validation,
}

impl IdTokenProvider {
    fn validation(algorithm: Algorithm, issuer: &str, audience: &str) -> Validation {
        let mut v = Validation::new(algorithm);
        v.leeway = ID_TOKEN_LEEWAY_SECS;
        v.set_issuer(&[issuer]);
        v.set_audience(&[audience]);
        v.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        v
    }

    pub fn with_shared_secret(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self {
            keys: vec![(None, DecodingKey::from_secret(secret))],
            validation: Self::validation(Algorithm::HS256, issuer, audience),
        }
    }

    pub fn with_rsa_keys(pems: &[(Option<String>, String)], issuer: &str, audience: &str) -> Result<Self, IdentityError> {
        if pems.is_empty() {
            return Err(IdentityError::Configuration("no RSA public keys given".to_string()));
        }
        let mut keys = Vec::with_capacity(pems.len());
        for (kid, pem) in pems {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
                IdentityError::Configuration(format!("invalid public key {}: {}", kid.as_deref().unwrap_or("<unnamed>"), e))
            })?;
            keys.push((kid.clone(), key));
        }
        Ok(Self { keys, validation: Self::validation(Algorithm::RS256, issuer, audience) })
    }

    /// `None` when no identity keys are configured at all.
    pub fn from_config(cfg: &IdentityConfig) -> Result<Option<Self>, IdentityError> {
        if !cfg.is_configured() {
            return Ok(None);
        }
        let issuer = cfg
            .issuer()
            .ok_or_else(|| IdentityError::Configuration("set INOGR_IDP_PROJECT_ID or INOGR_IDP_ISSUER".to_string()))?;
        let audience = cfg
            .audience()
            .ok_or_else(|| IdentityError::Configuration("set INOGR_IDP_PROJECT_ID or INOGR_IDP_AUDIENCE".to_string()))?;
        if let Some(path) = &cfg.keys_file {
            let pems = read_public_keys(path)?;
            return Self::with_rsa_keys(&pems, &issuer, &audience).map(Some);
        }
        match &cfg.shared_secret {
            Some(secret) => Ok(Some(Self::with_shared_secret(secret.as_bytes(), &issuer, &audience))),
            None => Ok(None),
        }
    }

    fn candidate_keys<'a>(&'a self, kid: Option<&str>) -> Vec<&'a DecodingKey> {
        if let Some(kid) = kid {
            let matching: Vec<&DecodingKey> =
                self.keys.iter().filter(|(k, _)| k.as_deref() == Some(kid)).map(|(_, key)| key).collect();
            if !matching.is_empty() {
                return matching;
            }
        }
        self.keys.iter().map(|(_, key)| key).collect()
    }
}

impl IdentityProvider for IdTokenProvider {
    fn verify_credential(&self, bearer: &str) -> Result<ClaimSet, IdentityError> {
        if bearer.trim().is_empty() {
            return Err(IdentityError::MissingCredential);
        }
        let header = decode_header(bearer).map_err(|e| IdentityError::InvalidCredential(e.to_string()))?;
        for key in self.candidate_keys(header.kid.as_deref()) {
            match decode::<IdTokenClaims>(bearer, key, &self.validation) {
                Ok(data) => {
                    let c = data.claims;
                    if c.sub.is_empty() {
                        return Err(IdentityError::InvalidCredential("empty subject".to_string()));
                    }
                    let role = Role::from_claim(c.role.as_deref());
                    return Ok(ClaimSet {
                        subject: c.sub,
                        email: c.email,
                        role,
                        is_admin: c.admin.unwrap_or_else(|| role.grants_admin()),
                    });
                }
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature => continue,
                    ErrorKind::ExpiredSignature => return Err(IdentityError::Expired),
                    _ => return Err(IdentityError::InvalidCredential(e.to_string())),
                },
            }
        }
        Err(IdentityError::InvalidCredential("signature matched no configured key".to_string()))
    }
}

/// Fixed credential table for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    entries: HashMap<String, ClaimSet>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential: impl Into<String>, claims: ClaimSet) -> Self {
        self.entries.insert(credential.into(), claims);
        self
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn verify_credential(&self, bearer: &str) -> Result<ClaimSet, IdentityError> {
        if bearer.is_empty() {
            return Err(IdentityError::MissingCredential);
        }
        self.entries
            .get(bearer)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidCredential("unknown credential".to_string()))
    }
}

/// Used when the server runs without identity configuration: every login is refused
/// as unavailable, while the gate keeps verifying existing cookies.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledIdentityProvider;

impl IdentityProvider for DisabledIdentityProvider {
    fn verify_credential(&self, _bearer: &str) -> Result<ClaimSet, IdentityError> {
        Err(IdentityError::Unavailable("no identity provider configured".to_string()))
    }
}

pub fn provider_from_config(cfg: &IdentityConfig) -> Result<Arc<dyn IdentityProvider>, IdentityError> {
    match IdTokenProvider::from_config(cfg)? {
        Some(p) => {
            info!(target: "startup", issuer = ?cfg.issuer(), keys = p.keys.len(), "identity token verification enabled");
            Ok(Arc::new(p))
        }
        None => {
            warn!(target: "startup", "no identity provider configured; /api/login will answer 503");
            Ok(Arc::new(DisabledIdentityProvider))
        }
    }
}

fn read_public_keys(path: &Path) -> Result<Vec<(Option<String>, String)>, IdentityError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| IdentityError::Configuration(format!("{}: {}", path.display(), e)))?;
    let map: HashMap<String, String> = serde_json::from_str(&text)
        .map_err(|e| IdentityError::Configuration(format!("{}: expected {{kid: pem}} JSON: {}", path.display(), e)))?;
    let mut keys: Vec<(Option<String>, String)> = map.into_iter().map(|(kid, pem)| (Some(kid), pem)).collect();
    keys.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keys)
}
