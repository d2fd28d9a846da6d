//! Environment variable loading for configuration

use std::env;
use std::net::IpAddr;
use std::time::Duration;

use url::Url;

use super::builder::ConfigBuilder;
use crate::Result;
use crate::auth::{TenantId, TenantSource};

/// Environment variable names
mod vars {
    pub const HTTP_HOST: &str = "JWT_GATE_HTTP_HOST";
    pub const HTTP_PORT: &str = "JWT_GATE_HTTP_PORT";
    pub const REQUEST_TIMEOUT_SECS: &str = "JWT_GATE_REQUEST_TIMEOUT_SECS";
    pub const CORS_ORIGIN: &str = "JWT_GATE_CORS_ORIGIN";
    pub const TENANT_SOURCE: &str = "JWT_GATE_TENANT_SOURCE";
    pub const ISSUER: &str = "JWT_GATE_ISSUER";
    pub const AUDIENCE: &str = "JWT_GATE_AUDIENCE";
    pub const LEEWAY_SECS: &str = "JWT_GATE_LEEWAY_SECS";
    pub const KEY_CACHE_TTL_SECS: &str = "JWT_GATE_KEY_CACHE_TTL_SECS";
    pub const KEY_CACHE_MAX_ENTRIES: &str = "JWT_GATE_KEY_CACHE_MAX_ENTRIES";
    pub const JWKS_CACHE_TTL_SECS: &str = "JWT_GATE_JWKS_CACHE_TTL_SECS";
    pub const JWKS_REFRESH_INTERVAL_SECS: &str = "JWT_GATE_JWKS_REFRESH_INTERVAL_SECS";
    pub const TENANT_PREFIX: &str = "JWT_GATE_TENANT_";
    pub const TENANT_SECRET_SUFFIX: &str = "_SECRET";
    pub const TENANT_JWKS_URI_SUFFIX: &str = "_JWKS_URI";
    pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
    pub const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
    pub const RUST_LOG: &str = "RUST_LOG";
    pub const JSON_LOGS: &str = "JWT_GATE_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    // Transport
    if let Ok(host_str) = env::var(vars::HTTP_HOST)
        && let Ok(host) = host_str.parse::<IpAddr>()
    {
        builder = builder.http_host(host);
    }

    if let Ok(port_str) = env::var(vars::HTTP_PORT)
        && let Ok(port) = port_str.parse::<u16>()
    {
        builder = builder.http_port(port);
    }

    if let Some(timeout) = secs_var(vars::REQUEST_TIMEOUT_SECS) {
        builder = builder.request_timeout(timeout);
    }

    if let Ok(origin) = env::var(vars::CORS_ORIGIN) {
        builder = builder.cors_origin(Some(origin));
    }

    // Auth
    if let Ok(source) = env::var(vars::TENANT_SOURCE) {
        builder = builder.tenant_source(source.parse::<TenantSource>()?);
    }

    if let Ok(issuer) = env::var(vars::ISSUER) {
        builder = builder.issuer(Some(issuer));
    }

    if let Ok(audience) = env::var(vars::AUDIENCE) {
        builder = builder.audience(split_list(&audience));
    }

    if let Some(leeway) = secs_var(vars::LEEWAY_SECS) {
        builder = builder.leeway(leeway);
    }

    if let Some(ttl) = secs_var(vars::KEY_CACHE_TTL_SECS) {
        builder = builder.key_cache_ttl(ttl);
    }

    if let Ok(max_str) = env::var(vars::KEY_CACHE_MAX_ENTRIES)
        && let Ok(max) = max_str.parse::<usize>()
    {
        builder = builder.key_cache_max_entries(Some(max));
    }

    if let Some(ttl) = secs_var(vars::JWKS_CACHE_TTL_SECS) {
        builder = builder.jwks_cache_ttl(ttl);
    }

    if let Some(interval) = secs_var(vars::JWKS_REFRESH_INTERVAL_SECS) {
        builder = builder.jwks_refresh_interval(interval);
    }

    let entries = env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
    builder = load_tenants(builder, entries)?;

    // Telemetry
    if let Ok(endpoint) = env::var(vars::OTEL_EXPORTER_OTLP_ENDPOINT) {
        builder = builder.otlp_endpoint(Some(endpoint));
    }

    if let Ok(name) = env::var(vars::OTEL_SERVICE_NAME) {
        builder = builder.service_name(name);
    }

    if let Ok(level) = env::var(vars::RUST_LOG) {
        builder = builder.log_level(level);
    }

    if let Ok(val) = env::var(vars::JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

/// Apply `JWT_GATE_TENANT_<ID>_SECRET` and `JWT_GATE_TENANT_<ID>_JWKS_URI`.
/// The tenant id is the `<ID>` segment.
fn load_tenants(
    mut builder: ConfigBuilder,
    entries: impl IntoIterator<Item = (String, String)>,
) -> Result<ConfigBuilder> {
    for (key, value) in entries {
        let Some(rest) = key.strip_prefix(vars::TENANT_PREFIX) else {
            continue;
        };

        if let Some(id) = rest.strip_suffix(vars::TENANT_JWKS_URI_SUFFIX) {
            let Some(id) = TenantId::new(id) else {
                continue;
            };
            let uri = Url::parse(&value)
                .map_err(|e| crate::Error::Config(format!("Invalid {key}: {e}")))?;
            builder = builder.tenant_jwks_uri(id, uri);
        } else if let Some(id) = rest.strip_suffix(vars::TENANT_SECRET_SUFFIX)
            && let Some(id) = TenantId::new(id)
        {
            builder = builder.tenant_secret(id, value);
        }
    }
    Ok(builder)
}

fn secs_var(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
