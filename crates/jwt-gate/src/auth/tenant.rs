//! Tenant identification

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, header};

use crate::constants::{DEFAULT_TENANT_HEADER, FORWARDED_HOST_HEADER};

/// Non-empty, lowercase tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(Arc<str>);

impl TenantId {
    /// Trims and lowercases `value`. Returns `None` for empty or
    /// whitespace-only input.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(Arc::from(trimmed.to_lowercase())))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where the tenant of a request comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantSource {
    /// Single-tenant deployment
    Fixed(TenantId),
    /// Read from a request header
    Header(HeaderName),
    /// First label of `x-forwarded-host`, falling back to `host`
    Subdomain,
}

impl Default for TenantSource {
    fn default() -> Self {
        Self::Header(HeaderName::from_static(DEFAULT_TENANT_HEADER))
    }
}

impl TenantSource {
    pub fn resolve(&self, headers: &HeaderMap) -> Option<TenantId> {
        match self {
            Self::Fixed(id) => Some(id.clone()),
            Self::Header(name) => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(TenantId::new),
            Self::Subdomain => {
                let host = headers
                    .get(FORWARDED_HOST_HEADER)
                    .or_else(|| headers.get(header::HOST))
                    .and_then(|v| v.to_str().ok())?;
                subdomain_of(host)
            }
        }
    }
}

/// Tenant label of `acme.storage.example.com[:port]`.
///
/// Requires at least three labels so that bare domains, `localhost` and IP
/// addresses never yield a tenant.
fn subdomain_of(host: &str) -> Option<TenantId> {
    // x-forwarded-host may carry a comma-separated chain; the first entry is the client-facing host
    let host = host.split(',').next()?.trim();
    let host = host.rsplit_once(':').map_or(host, |(name, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            name
        } else {
            host
        }
    });

    if host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return None;
    }

    TenantId::new(labels[0])
}

impl fmt::Display for TenantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(id) => write!(f, "fixed:{id}"),
            Self::Header(name) => write!(f, "header:{name}"),
            Self::Subdomain => f.write_str("subdomain"),
        }
    }
}

impl FromStr for TenantSource {
    type Err = crate::Error;

    /// Accepts `fixed:<id>`, `header`, `header:<name>` and `subdomain`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, arg) = s.split_once(':').map_or((s, None), |(k, a)| (k, Some(a)));

        match (kind.to_lowercase().as_str(), arg) {
            ("fixed", Some(id)) => TenantId::new(id)
                .map(Self::Fixed)
                .ok_or_else(|| crate::Error::Config("fixed tenant id must not be empty".into())),
            ("header", None) => Ok(Self::default()),
            ("header", Some(name)) => HeaderName::from_str(name.trim())
                .map(Self::Header)
                .map_err(|e| crate::Error::Config(format!("Invalid tenant header {name:?}: {e}"))),
            ("subdomain", None) => Ok(Self::Subdomain),
            _ => Err(crate::Error::Config(format!(
                "Invalid tenant source {s:?} (expected fixed:<id>, header[:<name>] or subdomain)"
            ))),
        }
    }
}
