//! TOML configuration file loading

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::builder::ConfigBuilder;
use crate::Result;
use crate::auth::{TenantId, TenantKeys, TenantSource};

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./jwt-gate.toml",
    "~/.config/jwt-gate/config.toml",
    "/etc/jwt-gate/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    for path_str in CONFIG_PATHS {
        let path = if path_str.starts_with('~') {
            if let Ok(home) = std::env::var("HOME") {
                PathBuf::from(path_str.replacen('~', &home, 1))
            } else {
                continue;
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    apply_file_config(builder, file_config)
}

fn apply_file_config(mut builder: ConfigBuilder, config: FileConfig) -> Result<ConfigBuilder> {
    // Transport settings
    if let Some(transport) = config.transport {
        if let Some(host_str) = transport.http_host
            && let Ok(host) = host_str.parse::<IpAddr>()
        {
            builder = builder.http_host(host);
        }

        if let Some(port) = transport.http_port {
            builder = builder.http_port(port);
        }

        if let Some(secs) = transport.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        if let Some(origin) = transport.cors_origin {
            builder = builder.cors_origin(Some(origin));
        }
    }

    // Auth settings
    if let Some(auth) = config.auth {
        if let Some(source) = auth.tenant_source {
            builder = builder.tenant_source(source.parse::<TenantSource>()?);
        }

        if let Some(issuer) = auth.issuer {
            builder = builder.issuer(Some(issuer));
        }

        if let Some(audience) = auth.audience {
            builder = builder.audience(audience);
        }

        if let Some(secs) = auth.leeway_secs {
            builder = builder.leeway(Duration::from_secs(secs));
        }

        if let Some(secs) = auth.key_cache_ttl_secs {
            builder = builder.key_cache_ttl(Duration::from_secs(secs));
        }

        if let Some(max) = auth.key_cache_max_entries {
            builder = builder.key_cache_max_entries(Some(max));
        }

        if let Some(secs) = auth.jwks_cache_ttl_secs {
            builder = builder.jwks_cache_ttl(Duration::from_secs(secs));
        }

        if let Some(secs) = auth.jwks_refresh_interval_secs {
            builder = builder.jwks_refresh_interval(Duration::from_secs(secs));
        }
    }

    // Tenants; ids are case-insensitive, so `Acme` and `acme` collide
    let mut seen = BTreeSet::new();
    for (id, keys) in config.tenants.unwrap_or_default() {
        let tenant_id = TenantId::new(&id)
            .ok_or_else(|| crate::Error::Config(format!("Invalid tenant id {id:?}")))?;
        if !seen.insert(tenant_id.clone()) {
            return Err(crate::Error::Config(format!(
                "Duplicate tenant id {tenant_id} (tenant ids are case-insensitive)"
            )));
        }
        builder = builder.tenant(tenant_id, keys);
    }

    // Observability settings
    if let Some(obs) = config.observability {
        if let Some(endpoint) = obs.otlp_endpoint {
            builder = builder.otlp_endpoint(Some(endpoint));
        }

        if let Some(name) = obs.service_name {
            builder = builder.service_name(name);
        }

        if let Some(level) = obs.log_level {
            builder = builder.log_level(level);
        }

        if let Some(json) = obs.json_logs {
            builder = builder.json_logs(json);
        }
    }

    Ok(builder)
}

/// Root configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    transport: Option<TransportFileConfig>,
    auth: Option<AuthFileConfig>,
    tenants: Option<BTreeMap<String, TenantKeys>>,
    observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Deserialize)]
struct TransportFileConfig {
    http_host: Option<String>,
    http_port: Option<u16>,
    request_timeout_secs: Option<u64>,
    cors_origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthFileConfig {
    tenant_source: Option<String>,
    issuer: Option<String>,
    audience: Option<Vec<String>>,
    leeway_secs: Option<u64>,
    key_cache_ttl_secs: Option<u64>,
    key_cache_max_entries: Option<usize>,
    jwks_cache_ttl_secs: Option<u64>,
    jwks_refresh_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    otlp_endpoint: Option<String>,
    service_name: Option<String>,
    log_level: Option<String>,
    json_logs: Option<bool>,
}
