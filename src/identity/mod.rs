//! Identity for the site: typed claims, the signed session cookie codec, the login
//! credential provider, and the path policy the session gate enforces.
//! Keep the public surface thin and split implementation across sub-modules.

mod claims;
mod session;
mod provider;
mod request_context;
mod authorizer;

pub use claims::{ClaimSet, Role, UnknownRole};
pub use session::{
    InvalidReason, Session, SessionCodec, SessionToken, SessionVerifier, Verification, MAX_TOKEN_BYTES,
    SESSION_ISSUER,
};
pub use provider::{
    login, provider_from_config, DisabledIdentityProvider, IdTokenProvider, IdentityError, IdentityProvider,
    LoginRequest, LoginResponse, StaticIdentityProvider,
};
pub use request_context::{
    RequestContext, FORWARDED_PREFIX, HEADER_ADMIN, HEADER_EMAIL, HEADER_REQUEST_ID, HEADER_ROLE, HEADER_UID,
};
pub use authorizer::{normalize_path, return_target, PathClass, PathPolicy, DEFAULT_PUBLIC_PATHS};
