use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use jwt_gate::auth::{
    AuthHook, AuthState, CachedKeyResolver, JwksRefreshTask, JwtVerifier, KeyResolver,
    StaticKeyResolver, TenantSource, TokenVerifier,
};
use jwt_gate::config::{self, ConfigBuilder};
use jwt_gate::observability::{init_observability, shutdown_observability};
use jwt_gate::transport::run_transport;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "jwt-gate")]
#[command(about = "Multi-tenant bearer token authentication gateway", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind host
    #[arg(long)]
    http_host: Option<IpAddr>,

    /// HTTP bind port
    #[arg(long)]
    http_port: Option<u16>,

    /// Tenant source (fixed:<id>, header[:<name>] or subdomain)
    #[arg(long)]
    tenant_source: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    /// CLI values form the base that file and environment settings override
    fn into_builder(self) -> anyhow::Result<ConfigBuilder> {
        let mut builder = ConfigBuilder::new();

        if let Some(host) = self.http_host {
            builder = builder.http_host(host);
        }

        if let Some(port) = self.http_port {
            builder = builder.http_port(port);
        }

        if let Some(ref source) = self.tenant_source {
            builder = builder.tenant_source(source.parse::<TenantSource>()?);
        }

        if self.verbose {
            builder = builder.log_level("debug".to_string());
        }

        Ok(builder.json_logs(self.json_logs))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone();
    let base = args.into_builder()?;

    // Load configuration with precedence: env > file > CLI > defaults
    let builder = if let Some(ref path) = config_path {
        config::load_config_from_path(path, base)?
    } else {
        config::load_config(base)?
    };

    let config = builder.build()?;

    init_observability(&config.telemetry)?;

    let auth = config.auth();
    let static_resolver = StaticKeyResolver::from_tenants(&config.tenants, auth.jwks_cache_ttl)?;

    let refresh_shutdown = CancellationToken::new();
    let remote_caches = static_resolver.remote_caches();
    let refresh_task = if remote_caches.is_empty() {
        None
    } else {
        tracing::info!(
            "Refreshing {} remote key set(s) every {:?}",
            remote_caches.len(),
            auth.jwks_refresh_interval
        );
        Some(
            JwksRefreshTask::new(remote_caches, auth.jwks_refresh_interval)
                .spawn(refresh_shutdown.clone()),
        )
    };

    let mut resolver = CachedKeyResolver::new(static_resolver, auth.key_cache_ttl);
    if let Some(max) = auth.key_cache_max_entries {
        resolver = resolver.with_max_entries(max);
    }

    let hook = AuthHook::new(
        Arc::new(resolver) as Arc<dyn KeyResolver>,
        Arc::new(JwtVerifier::from_settings(auth)) as Arc<dyn TokenVerifier>,
    );
    let state = AuthState::new(hook, auth.tenant_source.clone());

    #[cfg(feature = "metrics")]
    jwt_gate::observability::set_tenant_count(config.tenants.len());

    tracing::info!("Starting jwt-gate");
    tracing::info!("Tenants: {}", config.tenants.len());
    tracing::info!("Tenant source: {}", auth.tenant_source);
    tracing::info!("Token leeway: {:?}", auth.leeway);
    tracing::info!("Key cache TTL: {:?}", auth.key_cache_ttl);
    if let Some(ref issuer) = auth.issuer {
        tracing::info!("Required issuer: {issuer}");
    }

    // Setup shutdown signal
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let result = run_transport(&state, &config, shutdown).await;

    refresh_shutdown.cancel();
    if let Some(task) = refresh_task
        && let Err(e) = task.await
    {
        tracing::warn!("JWKS refresh task ended abnormally: {e}");
    }

    shutdown_observability();

    result.map_err(Into::into)
}
