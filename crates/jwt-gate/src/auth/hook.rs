//! Request authentication pipeline
//!
//! Extract the token, resolve the tenant's key material, verify, and build
//! the [`AuthContext`]. The first failing step denies the request.

use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::time::Instant;

use axum::http::HeaderMap;
use tracing::Instrument;

use super::context::AuthContext;
use super::error::{AccessDenied, ResolveError, Result};
use super::extract::{RoutePolicy, extract_token};
use super::resolver::KeyResolver;
use super::tenant::TenantId;
use super::verifier::TokenVerifier;

/// Authentication hook shared by every protected route
#[derive(Clone)]
pub struct AuthHook {
    resolver: Arc<dyn KeyResolver>,
    verifier: Arc<dyn TokenVerifier>,
}

impl std::fmt::Debug for AuthHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthHook").finish_non_exhaustive()
    }
}

impl AuthHook {
    pub fn new(resolver: Arc<dyn KeyResolver>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { resolver, verifier }
    }

    /// Authenticate a request under the route's policy.
    ///
    /// A missing token is reported before a missing tenant. Nothing is
    /// written anywhere; the caller publishes the returned context.
    pub async fn authenticate(
        &self,
        policy: &RoutePolicy,
        headers: &HeaderMap,
        query: Option<&str>,
        tenant_id: Option<&TenantId>,
    ) -> Result<AuthContext> {
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let token = extract_token(policy, headers, query);

        let result = if token.is_empty() {
            Err(AccessDenied::missing_credential())
        } else if let Some(tenant_id) = tenant_id {
            self.verify_token(tenant_id, token).await
        } else {
            Err(AccessDenied::key_resolution(ResolveError::MissingTenant))
        };

        #[cfg(feature = "metrics")]
        crate::observability::record_auth(
            result.as_ref().err().map(AccessDenied::reason),
            start.elapsed(),
        );

        match &result {
            Ok(ctx) => {
                tracing::debug!(
                    tenant = %ctx.tenant_id(),
                    subject = ctx.subject().unwrap_or_default(),
                    "Request authenticated"
                );
            }
            Err(e) => {
                tracing::warn!(
                    reason = %e.reason(),
                    tenant = tenant_id.map_or("-", TenantId::as_str),
                    error = %e.diagnostic(),
                    "Access denied"
                );
            }
        }

        result
    }

    /// Resolve and verify an already extracted, non-empty token
    pub async fn verify_token(&self, tenant_id: &TenantId, token: String) -> Result<AuthContext> {
        let span = tracing::debug_span!("auth.resolve", tenant = %tenant_id);
        let material = self
            .resolver
            .resolve(tenant_id)
            .instrument(span)
            .await
            .map_err(AccessDenied::key_resolution)?;

        let span = tracing::debug_span!("auth.verify", tenant = %tenant_id);
        let claims = self
            .verifier
            .verify(
                &token,
                material.secret.as_deref(),
                material.key_set.as_deref(),
            )
            .instrument(span)
            .await
            .map_err(AccessDenied::verification)?;

        Ok(AuthContext::verified(tenant_id.clone(), token, claims))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::http::{HeaderValue, header};
    use parking_lot::Mutex;

    use super::*;
    use crate::auth::claims::Claims;
    use crate::auth::error::{DenialReason, VerifyError};
    use crate::auth::jwks::JwkSet;
    use crate::auth::resolver::KeyMaterial;

    #[derive(Default)]
    struct MockResolver {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl KeyResolver for MockResolver {
        async fn resolve(
            &self,
            tenant_id: &TenantId,
        ) -> std::result::Result<KeyMaterial, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ResolveError::UnknownTenant(tenant_id.to_string()))
            } else {
                Ok(KeyMaterial::from_secret("shh"))
            }
        }
    }

    struct MockVerifier {
        outcome: std::result::Result<Claims, String>,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    impl MockVerifier {
        fn accepting(claims: Claims) -> Self {
            Self {
                outcome: Ok(claims),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn rejecting(message: &str) -> Self {
            Self {
                outcome: Err(message.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TokenVerifier for MockVerifier {
        async fn verify(
            &self,
            token: &str,
            secret: Option<&str>,
            _key_set: Option<&JwkSet>,
        ) -> std::result::Result<Claims, VerifyError> {
            self.seen
                .lock()
                .push((token.to_string(), secret.map(str::to_string)));
            self.outcome.clone().map_err(VerifyError::new)
        }
    }

    fn hook(resolver: &Arc<MockResolver>, verifier: &Arc<MockVerifier>) -> AuthHook {
        AuthHook::new(
            Arc::clone(resolver) as Arc<dyn KeyResolver>,
            Arc::clone(verifier) as Arc<dyn TokenVerifier>,
        )
    }

    fn bearer(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    fn acme() -> TenantId {
        TenantId::new("acme").unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_skips_resolver() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::accepting(Claims::new("u42")));

        let err = hook(&resolver, &verifier)
            .authenticate(&RoutePolicy::header_only(), &HeaderMap::new(), None, Some(&acme()))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), DenialReason::MissingCredential);
        assert_eq!(err.message(), "Missing Authorization");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert!(verifier.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_bare_scheme_counts_as_missing() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::accepting(Claims::new("u42")));

        let err = hook(&resolver, &verifier)
            .authenticate(&RoutePolicy::header_only(), &bearer("Bearer  "), None, Some(&acme()))
            .await
            .unwrap_err();

        assert_eq!(err.message(), "Missing Authorization");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_token_reported_before_missing_tenant() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::accepting(Claims::new("u42")));

        let err = hook(&resolver, &verifier)
            .authenticate(&RoutePolicy::header_only(), &HeaderMap::new(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), DenialReason::MissingCredential);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_generic_denial() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::accepting(Claims::new("u42")));

        let err = hook(&resolver, &verifier)
            .authenticate(&RoutePolicy::header_only(), &bearer("Bearer abc"), None, None)
            .await
            .unwrap_err();

        assert_eq!(err.reason(), DenialReason::KeyResolution);
        assert_eq!(err.message(), "Invalid credentials");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolver_failure_denies() {
        let resolver = Arc::new(MockResolver {
            fail: true,
            ..Default::default()
        });
        let verifier = Arc::new(MockVerifier::accepting(Claims::new("u42")));

        let err = hook(&resolver, &verifier)
            .authenticate(&RoutePolicy::header_only(), &bearer("Bearer abc"), None, Some(&acme()))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), DenialReason::KeyResolution);
        assert_eq!(err.message(), "Invalid credentials");
        assert!(err.diagnostic().contains("unknown tenant: acme"));
        assert!(verifier.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_verifier_failure_denies() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::rejecting("invalid signature"));

        let err = hook(&resolver, &verifier)
            .authenticate(&RoutePolicy::header_only(), &bearer("Bearer abc"), None, Some(&acme()))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), DenialReason::Verification);
        assert_eq!(err.message(), "invalid signature");
    }

    #[tokio::test]
    async fn test_success_builds_context() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::accepting(
            Claims::new("user-1").with_role("admin"),
        ));

        let ctx = hook(&resolver, &verifier)
            .authenticate(
                &RoutePolicy::header_only(),
                &bearer("BEARER \t tok.en.x"),
                None,
                Some(&acme()),
            )
            .await
            .unwrap();

        assert_eq!(ctx.token(), "tok.en.x");
        assert_eq!(ctx.claims().unwrap().sub, "user-1");
        assert_eq!(ctx.subject(), Some("user-1"));
        assert_eq!(ctx.role(), Some("admin"));
    }

    #[tokio::test]
    async fn test_query_token_used_when_allowed() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::accepting(Claims::new("u42")));

        let ctx = hook(&resolver, &verifier)
            .authenticate(
                &RoutePolicy::allow_query_string_token(),
                &bearer("Bearer from-header"),
                Some("authorization=from-query"),
                Some(&acme()),
            )
            .await
            .unwrap();

        assert_eq!(ctx.token(), "from-query");
        assert_eq!(verifier.seen.lock()[0].0, "from-query");
    }

    #[tokio::test]
    async fn test_acme_scenario() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::accepting(Claims::new("u42")));

        let ctx = hook(&resolver, &verifier)
            .authenticate(
                &RoutePolicy::header_only(),
                &bearer("Bearer abc.def.ghi"),
                None,
                Some(&acme()),
            )
            .await
            .unwrap();

        assert_eq!(ctx.tenant_id().as_str(), "acme");
        assert_eq!(ctx.token(), "abc.def.ghi");
        assert_eq!(ctx.claims().unwrap().sub, "u42");
        assert_eq!(ctx.subject(), Some("u42"));
        assert_eq!(
            verifier.seen.lock()[0],
            ("abc.def.ghi".to_string(), Some("shh".to_string()))
        );
    }

    #[tokio::test]
    async fn test_repeated_runs_are_identical() {
        let resolver = Arc::new(MockResolver::default());
        let verifier = Arc::new(MockVerifier::accepting(Claims::new("u42")));
        let hook = hook(&resolver, &verifier);
        let headers = bearer("Bearer abc.def.ghi");

        let first = hook
            .authenticate(&RoutePolicy::header_only(), &headers, None, Some(&acme()))
            .await
            .unwrap();
        let second = hook
            .authenticate(&RoutePolicy::header_only(), &headers, None, Some(&acme()))
            .await
            .unwrap();

        assert_eq!(first, second);
    }
}
