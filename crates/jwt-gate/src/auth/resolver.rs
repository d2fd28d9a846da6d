//! Tenant key material resolution

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::ResolveError;
use super::jwks::{JwkSet, JwksCache, jwks_http_client};
use super::tenant::TenantId;

/// Signing material of one tenant. At least one of `secret` and `key_set` is set.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    pub secret: Option<String>,
    pub key_set: Option<Arc<JwkSet>>,
    /// The key set is kept current by its source; callers must not hold a copy
    pub volatile: bool,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("keys_count", &self.key_set.as_ref().map(|s| s.keys.len()))
            .field("volatile", &self.volatile)
            .finish()
    }
}

impl KeyMaterial {
    pub fn from_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Self::default()
        }
    }

    pub fn from_key_set(key_set: impl Into<Arc<JwkSet>>) -> Self {
        Self {
            key_set: Some(key_set.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub const fn is_empty(&self) -> bool {
        self.secret.is_none() && self.key_set.is_none()
    }
}

/// Looks up the signing material of a tenant
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, tenant_id: &TenantId) -> Result<KeyMaterial, ResolveError>;
}

#[async_trait]
impl<R: KeyResolver + ?Sized> KeyResolver for Arc<R> {
    async fn resolve(&self, tenant_id: &TenantId) -> Result<KeyMaterial, ResolveError> {
        (**self).resolve(tenant_id).await
    }
}

/// Configured keys of one tenant
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantKeys {
    /// Shared secret for HS256/384/512
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Inline key set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<JwkSet>,
    /// Remote key set endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<Url>,
}

impl std::fmt::Debug for TenantKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantKeys")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("jwks", &self.jwks.as_ref().map(|s| s.keys.len()))
            .field("jwks_uri", &self.jwks_uri.as_ref().map(Url::as_str))
            .finish()
    }
}

impl TenantKeys {
    pub const fn is_empty(&self) -> bool {
        self.secret.is_none() && self.jwks.is_none() && self.jwks_uri.is_none()
    }
}

enum KeySetSource {
    Inline(Arc<JwkSet>),
    Remote(Arc<JwksCache>),
}

struct TenantEntry {
    secret: Option<String>,
    key_set: Option<KeySetSource>,
}

/// Resolver over a fixed tenant table
pub struct StaticKeyResolver {
    tenants: HashMap<TenantId, TenantEntry>,
    jwks_cache_ttl: Duration,
    client: Option<reqwest::Client>,
}

impl std::fmt::Debug for StaticKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyResolver")
            .field("tenants", &self.tenants.len())
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .finish_non_exhaustive()
    }
}

impl Default for StaticKeyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticKeyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tenants: HashMap::new(),
            jwks_cache_ttl: Duration::from_secs(3600),
            client: None,
        }
    }

    #[must_use]
    pub const fn with_jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    /// Register a tenant. An inline key set takes precedence over `jwks_uri`.
    pub fn insert_tenant(&mut self, tenant_id: TenantId, keys: TenantKeys) -> crate::Result<()> {
        let key_set = match (keys.jwks, keys.jwks_uri) {
            (Some(inline), uri) => {
                if uri.is_some() {
                    tracing::warn!(tenant = %tenant_id, "Tenant has both jwks and jwks_uri, using inline jwks");
                }
                Some(KeySetSource::Inline(Arc::new(inline)))
            }
            (None, Some(uri)) => {
                let client = match self.client.clone() {
                    Some(client) => client,
                    None => {
                        let client = jwks_http_client()?;
                        self.client = Some(client.clone());
                        client
                    }
                };
                Some(KeySetSource::Remote(Arc::new(JwksCache::new(
                    uri,
                    self.jwks_cache_ttl,
                    client,
                ))))
            }
            (None, None) => None,
        };

        tracing::debug!(
            tenant = %tenant_id,
            has_secret = keys.secret.is_some(),
            has_key_set = key_set.is_some(),
            "Registered tenant"
        );

        self.tenants.insert(
            tenant_id,
            TenantEntry {
                secret: keys.secret,
                key_set,
            },
        );
        Ok(())
    }

    /// Build a resolver from the configured tenant table
    pub fn from_tenants<'a>(
        tenants: impl IntoIterator<Item = (&'a TenantId, &'a TenantKeys)>,
        jwks_cache_ttl: Duration,
    ) -> crate::Result<Self> {
        let mut resolver = Self::new().with_jwks_cache_ttl(jwks_cache_ttl);
        for (id, keys) in tenants {
            resolver.insert_tenant(id.clone(), keys.clone())?;
        }
        Ok(resolver)
    }

    /// Remote key set caches, for background refreshing
    pub fn remote_caches(&self) -> Vec<Arc<JwksCache>> {
        self.tenants
            .values()
            .filter_map(|entry| match &entry.key_set {
                Some(KeySetSource::Remote(cache)) => Some(Arc::clone(cache)),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, tenant_id: &TenantId) -> Result<KeyMaterial, ResolveError> {
        let entry = self
            .tenants
            .get(tenant_id)
            .ok_or_else(|| ResolveError::UnknownTenant(tenant_id.to_string()))?;

        let key_set = match &entry.key_set {
            Some(KeySetSource::Inline(set)) => Some(Arc::clone(set)),
            Some(KeySetSource::Remote(cache)) => Some(cache.key_set().await?),
            None => None,
        };

        let material = KeyMaterial {
            secret: entry.secret.clone(),
            key_set,
            volatile: matches!(entry.key_set, Some(KeySetSource::Remote(_))),
        };

        if material.is_empty() {
            return Err(ResolveError::NoKeyMaterial(tenant_id.to_string()));
        }
        Ok(material)
    }
}

/// TTL cache in front of another resolver. Failures and volatile material
/// are not cached.
pub struct CachedKeyResolver<R> {
    inner: R,
    ttl: Duration,
    max_entries: Option<usize>,
    entries: RwLock<HashMap<TenantId, (KeyMaterial, Instant)>>,
}

impl<R> std::fmt::Debug for CachedKeyResolver<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedKeyResolver")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl<R: KeyResolver> CachedKeyResolver<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            max_entries: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub const fn inner(&self) -> &R {
        &self.inner
    }

    pub fn invalidate(&self, tenant_id: &TenantId) {
        self.entries.write().remove(tenant_id);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn lookup(&self, tenant_id: &TenantId) -> Option<KeyMaterial> {
        let entries = self.entries.read();
        let (material, stored_at) = entries.get(tenant_id)?;
        (stored_at.elapsed() < self.ttl).then(|| material.clone())
    }

    fn store(&self, tenant_id: &TenantId, material: &KeyMaterial) {
        let mut entries = self.entries.write();

        if let Some(max) = self.max_entries
            && !entries.contains_key(tenant_id)
            && entries.len() >= max
        {
            let ttl = self.ttl;
            entries.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);

            if entries.len() >= max {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, (_, stored_at))| *stored_at)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        if self.max_entries != Some(0) {
            entries.insert(tenant_id.clone(), (material.clone(), Instant::now()));
        }
    }
}

#[async_trait]
impl<R: KeyResolver> KeyResolver for CachedKeyResolver<R> {
    async fn resolve(&self, tenant_id: &TenantId) -> Result<KeyMaterial, ResolveError> {
        if let Some(material) = self.lookup(tenant_id) {
            #[cfg(feature = "metrics")]
            crate::observability::record_key_cache_hit();
            tracing::trace!(tenant = %tenant_id, "Key material cache hit");
            return Ok(material);
        }

        #[cfg(feature = "metrics")]
        crate::observability::record_key_cache_miss();

        let material = self.inner.resolve(tenant_id).await?;
        if !material.volatile {
            self.store(tenant_id, &material);
        }
        Ok(material)
    }
}
