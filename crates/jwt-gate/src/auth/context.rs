//! Per-request authentication context

use super::claims::Claims;
use super::tenant::TenantId;

/// Verified identity carried by an [`AuthContext`]
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub claims: Claims,
    pub subject: String,
}

impl Identity {
    /// Subject is always the `sub` claim
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            claims,
        }
    }
}

/// Authentication result published into request extensions.
///
/// Inserted once by the middleware, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    tenant_id: TenantId,
    token: String,
    identity: Option<Identity>,
}

impl AuthContext {
    pub fn verified(tenant_id: TenantId, token: String, claims: Claims) -> Self {
        Self {
            tenant_id,
            token,
            identity: Some(Identity::from_claims(claims)),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// The bearer token with the scheme stripped
    pub fn token(&self) -> &str {
        &self.token
    }

    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.identity.as_ref().map(|i| &i.claims)
    }

    pub fn subject(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.subject.as_str())
    }

    pub fn role(&self) -> Option<&str> {
        self.claims().and_then(|c| c.role.as_deref())
    }

    pub const fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role() == Some(role)
    }
}
