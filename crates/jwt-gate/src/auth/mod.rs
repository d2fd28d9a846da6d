//! Bearer-token authentication for multi-tenant routes
//!
//! For each protected request the [`AuthHook`] extracts a bearer token,
//! resolves the tenant's signing material through a [`KeyResolver`], checks
//! the token with a [`TokenVerifier`], and yields an [`AuthContext`].
//! Every failure becomes a single [`AccessDenied`] error.
//!
//! # Features
//!
//! - Header or query-string tokens, selected per route via [`RoutePolicy`]
//! - HS256/384/512 shared secrets and RSA/EC/EdDSA key sets via `jsonwebtoken`
//! - Remote JWKS fetching with TTL caching and background refresh
//! - Tenant selection from a fixed id, a header, or the host subdomain

mod claims;
mod context;
mod error;
mod extract;
mod hook;
mod jwks;
mod middleware;
mod resolver;
mod tenant;
mod verifier;

pub use claims::{Claims, OneOrMany};
pub use context::{AuthContext, Identity};
pub use error::{AccessDenied, DenialReason, ResolveError, Result, VerifyError};
pub use extract::{RoutePolicy, extract_token, strip_bearer};
pub use hook::AuthHook;
pub use jwks::{Jwk, JwkSet, JwksCache, JwksRefreshTask, jwks_http_client};
pub use middleware::{AuthState, Authenticated, protect, require_auth};
pub use resolver::{CachedKeyResolver, KeyMaterial, KeyResolver, StaticKeyResolver, TenantKeys};
pub use tenant::{TenantId, TenantSource};
pub use verifier::{JwtVerifier, TokenVerifier, VerifierConfig};
