//! axum integration
//!
//! The route policy is bound when a router is wrapped with [`protect`].
//! Handlers read the published context through [`Authenticated`].

use std::sync::Arc;

use axum::Router;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use super::context::AuthContext;
use super::error::AccessDenied;
use super::extract::RoutePolicy;
use super::hook::AuthHook;
use super::tenant::{TenantId, TenantSource};

/// Authentication state for middleware
#[derive(Debug, Clone)]
pub struct AuthState {
    pub hook: AuthHook,
    pub tenant_source: Arc<TenantSource>,
    pub policy: RoutePolicy,
}

impl AuthState {
    #[must_use]
    pub fn new(hook: AuthHook, tenant_source: TenantSource) -> Self {
        Self {
            hook,
            tenant_source: Arc::new(tenant_source),
            policy: RoutePolicy::default(),
        }
    }

    /// Same hook and tenant source under a different route policy
    #[must_use]
    pub fn with_policy(&self, policy: RoutePolicy) -> Self {
        Self {
            hook: self.hook.clone(),
            tenant_source: Arc::clone(&self.tenant_source),
            policy,
        }
    }
}

/// Authenticate the request and publish its [`AuthContext`].
///
/// A [`TenantId`] already present in request extensions takes precedence
/// over the configured tenant source.
pub async fn require_auth(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, AccessDenied> {
    let (mut parts, body) = request.into_parts();

    let tenant_id = parts
        .extensions
        .get::<TenantId>()
        .cloned()
        .or_else(|| state.tenant_source.resolve(&parts.headers));

    let ctx = state
        .hook
        .authenticate(
            &state.policy,
            &parts.headers,
            parts.uri.query(),
            tenant_id.as_ref(),
        )
        .await?;

    parts.extensions.insert(ctx);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Require authentication on every route of `router` under `state.policy`
pub fn protect<S>(router: Router<S>, state: AuthState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(axum::middleware::from_fn_with_state(state, require_auth))
}

/// Extractor for the published [`AuthContext`]
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthContext);

impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = AccessDenied;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(Self)
            .ok_or_else(|| {
                tracing::warn!(path = %parts.uri.path(), "Authenticated extractor used on unprotected route");
                AccessDenied::missing_credential()
            })
    }
}
