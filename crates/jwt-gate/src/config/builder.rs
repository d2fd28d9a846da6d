//! Configuration builder

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use axum::http::HeaderName;
use url::Url;

use crate::Error;
use crate::auth::{TenantId, TenantKeys, TenantSource};
use crate::constants::DEFAULT_TENANT_HEADER;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportConfig,
    pub auth: AuthSettings,
    pub tenants: BTreeMap<TenantId, TenantKeys>,
    pub telemetry: TelemetryConfig,
}

impl Config {
    #[must_use]
    pub const fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    #[must_use]
    pub const fn auth(&self) -> &AuthSettings {
        &self.auth
    }

    #[must_use]
    pub fn tenant(&self, id: &TenantId) -> Option<&TenantKeys> {
        self.tenants.get(id)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub http_host: IpAddr,
    pub http_port: u16,
    pub request_timeout: Duration,
    /// Allowed CORS origin; no CORS headers are sent when `None`
    pub cors_origin: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        ConfigBuilder::new().transport
    }
}

/// Token validation and key caching settings
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub tenant_source: TenantSource,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub leeway: Duration,
    pub key_cache_ttl: Duration,
    pub key_cache_max_entries: Option<usize>,
    pub jwks_cache_ttl: Duration,
    pub jwks_refresh_interval: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        ConfigBuilder::new().auth
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    pub log_level: String,
    pub json_logs: bool,
}

/// Configuration builder with fluent API
#[derive(Debug)]
pub struct ConfigBuilder {
    transport: TransportConfig,
    auth: AuthSettings,
    tenants: BTreeMap<TenantId, TenantKeys>,
    telemetry: TelemetryConfig,
}

impl ConfigBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            transport: TransportConfig {
                http_host: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                http_port: 8080,
                request_timeout: Duration::from_secs(30),
                cors_origin: None,
            },
            auth: AuthSettings {
                tenant_source: TenantSource::Header(HeaderName::from_static(
                    DEFAULT_TENANT_HEADER,
                )),
                issuer: None,
                audience: Vec::new(),
                leeway: Duration::from_secs(60),
                key_cache_ttl: Duration::from_secs(300),
                key_cache_max_entries: None,
                jwks_cache_ttl: Duration::from_secs(3600),
                jwks_refresh_interval: Duration::from_secs(300),
            },
            tenants: BTreeMap::new(),
            telemetry: TelemetryConfig {
                otlp_endpoint: None,
                service_name: String::new(),
                log_level: String::new(),
                json_logs: false,
            },
        }
    }

    #[must_use]
    pub const fn http_host(mut self, host: IpAddr) -> Self {
        self.transport.http_host = host;
        self
    }

    #[must_use]
    pub const fn http_port(mut self, port: u16) -> Self {
        self.transport.http_port = port;
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.transport.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn cors_origin(mut self, origin: Option<String>) -> Self {
        self.transport.cors_origin = origin;
        self
    }

    // Auth configuration methods

    #[must_use]
    pub fn tenant_source(mut self, source: TenantSource) -> Self {
        self.auth.tenant_source = source;
        self
    }

    #[must_use]
    pub fn issuer(mut self, issuer: Option<String>) -> Self {
        self.auth.issuer = issuer;
        self
    }

    #[must_use]
    pub fn audience(mut self, audience: Vec<String>) -> Self {
        self.auth.audience = audience;
        self
    }

    /// Clock skew tolerance for `exp` and `nbf`
    #[must_use]
    pub const fn leeway(mut self, leeway: Duration) -> Self {
        self.auth.leeway = leeway;
        self
    }

    /// How long resolved key material is reused
    #[must_use]
    pub const fn key_cache_ttl(mut self, ttl: Duration) -> Self {
        self.auth.key_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn key_cache_max_entries(mut self, max: Option<usize>) -> Self {
        self.auth.key_cache_max_entries = max;
        self
    }

    /// How long a fetched remote key set is considered fresh
    #[must_use]
    pub const fn jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.auth.jwks_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn jwks_refresh_interval(mut self, interval: Duration) -> Self {
        self.auth.jwks_refresh_interval = interval;
        self
    }

    // Tenant configuration methods

    /// Set all keys of a tenant, replacing earlier values
    #[must_use]
    pub fn tenant(mut self, id: TenantId, keys: TenantKeys) -> Self {
        self.tenants.insert(id, keys);
        self
    }

    #[must_use]
    pub fn tenant_secret(mut self, id: TenantId, secret: String) -> Self {
        self.tenants.entry(id).or_default().secret = Some(secret);
        self
    }

    #[must_use]
    pub fn tenant_jwks_uri(mut self, id: TenantId, uri: Url) -> Self {
        self.tenants.entry(id).or_default().jwks_uri = Some(uri);
        self
    }

    // Telemetry configuration methods

    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.telemetry.otlp_endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn service_name(mut self, name: String) -> Self {
        self.telemetry.service_name = name;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: String) -> Self {
        self.telemetry.log_level = level;
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.telemetry.json_logs = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> crate::Result<Config> {
        if self.tenants.is_empty() {
            return Err(Error::Config("at least one tenant must be configured".into()));
        }

        if let Some((id, _)) = self.tenants.iter().find(|(_, keys)| keys.is_empty()) {
            return Err(Error::Config(format!(
                "tenant {id} has no secret, jwks or jwks_uri"
            )));
        }

        if let TenantSource::Fixed(id) = &self.auth.tenant_source
            && !self.tenants.contains_key(id)
        {
            return Err(Error::Config(format!(
                "fixed tenant {id} is not among the configured tenants"
            )));
        }

        if self.auth.jwks_refresh_interval.is_zero() {
            return Err(Error::Config("jwks_refresh_interval must be positive".into()));
        }

        let service_name = if self.telemetry.service_name.is_empty() {
            "jwt-gate".to_string()
        } else {
            self.telemetry.service_name
        };

        let log_level = if self.telemetry.log_level.is_empty() {
            "info".to_string()
        } else {
            self.telemetry.log_level
        };

        Ok(Config {
            transport: self.transport,
            auth: self.auth,
            tenants: self.tenants,
            telemetry: TelemetryConfig {
                otlp_endpoint: self.telemetry.otlp_endpoint,
                service_name,
                log_level,
                json_logs: self.telemetry.json_logs,
            },
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
