use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{GateConfig, SigningKey, MAX_MAX_AGE_SECS};
use crate::error::{AppError, AppResult};
use crate::tprintln;

use super::claims::{ClaimSet, Role};

pub type SessionToken = String;

/// Fixed `iss` value of session cookies; tokens minted for any other purpose are rejected.
pub const SESSION_ISSUER: &str = "inogr-session";
/// Anything longer cannot be a cookie we issued.
pub const MAX_TOKEN_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub claims: ClaimSet,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Wire claims of the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    admin: bool,
    iss: String,
    iat: i64,
    exp: i64,
}

impl SessionClaims {
    fn into_claim_set(self) -> ClaimSet {
        ClaimSet {
            role: Role::from_claim(self.role.as_deref()),
            subject: self.sub,
            email: self.email,
            is_admin: self.admin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Not a token we could parse, wrong algorithm, wrong issuer, or missing claims.
    Malformed,
    /// Well-formed but signed by no key in the ring.
    BadSignature,
    Expired,
    /// The verifier itself failed; treated exactly like any other invalid cookie.
    Unavailable(String),
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::Malformed => "malformed",
            InvalidReason::BadSignature => "bad_signature",
            InvalidReason::Expired => "expired",
            InvalidReason::Unavailable(_) => "verifier_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(ClaimSet),
    Invalid(InvalidReason),
}

impl Verification {
    pub fn claims(&self) -> Option<&ClaimSet> {
        match self {
            Verification::Valid(c) => Some(c),
            Verification::Invalid(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }
}

/// Turns a cookie value into a verification result. Implementations must not panic on
/// hostile input; the gate still guards against it.
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Verification;
}

/// Signs session cookies with the first configured key and verifies them against
/// every configured key in order, so a rotated-out key keeps old sessions alive.
pub struct SessionCodec {
    encoding: EncodingKey,
    decoding: Vec<DecodingKey>,
    validation: Validation,
    ttl: Duration,
}

impl SessionCodec {
    pub fn new(keys: &[SigningKey], ttl_secs: i64) -> AppResult<Self> {
        let Some(first) = keys.first() else {
            return Err(AppError::config("no_signing_keys", "session codec needs at least one signing key"));
        };
        if ttl_secs <= 0 || ttl_secs > MAX_MAX_AGE_SECS {
            return Err(AppError::config(
                "bad_max_age".to_string(),
                format!("session lifetime must be between 1 and {} seconds, got {}", MAX_MAX_AGE_SECS, ttl_secs),
            ));
        }
        let ttl = Duration::try_seconds(ttl_secs)
            .ok_or_else(|| AppError::config("bad_max_age".to_string(), format!("session lifetime {} out of range", ttl_secs)))?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_issuer(&[SESSION_ISSUER]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        Ok(Self {
            encoding: EncodingKey::from_secret(first.as_bytes()),
            decoding: keys.iter().map(|k| DecodingKey::from_secret(k.as_bytes())).collect(),
            validation,
            ttl,
        })
    }

    pub fn from_config(cfg: &GateConfig) -> AppResult<Self> {
        Self::new(&cfg.signing_keys, cfg.cookie.max_age_secs)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key_count(&self) -> usize {
        self.decoding.len()
    }

    pub fn issue(&self, claims: ClaimSet) -> AppResult<Session> {
        self.issue_at(claims, Utc::now())
    }

    /// Issue with an explicit issue time; expiry is `issued_at + ttl`.
    pub fn issue_at(&self, claims: ClaimSet, issued_at: DateTime<Utc>) -> AppResult<Session> {
        if claims.subject.is_empty() {
            return Err(AppError::user("empty_subject", "cannot issue a session without a subject"));
        }
        // whole seconds on the wire
        let iat = issued_at.timestamp();
        let exp = iat + self.ttl.num_seconds();
        let wire = SessionClaims {
            sub: claims.subject.clone(),
            email: claims.email.clone(),
            role: Some(claims.role.as_str().to_string()),
            admin: claims.is_admin,
            iss: SESSION_ISSUER.to_string(),
            iat,
            exp,
        };
        let token = encode(&Header::new(Algorithm::HS256), &wire, &self.encoding)
            .map_err(|e| AppError::internal("session_sign_failed".to_string(), e.to_string()))?;
        tprintln!("session.issue sub={} admin={} ttl_secs={}", claims.subject, claims.is_admin, self.ttl.num_seconds());
        Ok(Session {
            token,
            claims,
            issued_at: Utc.timestamp_opt(iat, 0).single().unwrap_or(issued_at),
            expires_at: Utc.timestamp_opt(exp, 0).single().unwrap_or(issued_at + self.ttl),
        })
    }
}

impl SessionVerifier for SessionCodec {
    fn verify(&self, token: &str) -> Verification {
        if token.is_empty() || token.len() > MAX_TOKEN_BYTES {
            return Verification::Invalid(InvalidReason::Malformed);
        }
        for key in &self.decoding {
            match decode::<SessionClaims>(token, key, &self.validation) {
                Ok(data) => {
                    if data.claims.sub.is_empty() {
                        return Verification::Invalid(InvalidReason::Malformed);
                    }
                    return Verification::Valid(data.claims.into_claim_set());
                }
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature => continue,
                    ErrorKind::ExpiredSignature => return Verification::Invalid(InvalidReason::Expired),
                    _ => return Verification::Invalid(InvalidReason::Malformed),
                },
            }
        }
        Verification::Invalid(InvalidReason::BadSignature)
    }
}
