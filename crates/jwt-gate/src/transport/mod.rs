//! HTTP transport

mod http;

pub use http::{build_router, emit_security_warnings, run_http};

use crate::Result;
use crate::auth::AuthState;
use crate::config::Config;

/// Serve the gateway routes until `shutdown` resolves
pub async fn run_transport(
    state: &AuthState,
    config: &Config,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    emit_security_warnings(config.transport.http_host, &config.auth.tenant_source);

    let router = build_router(state, &config.transport);
    run_http(
        router,
        config.transport.http_host,
        config.transport.http_port,
        shutdown,
    )
    .await
}
