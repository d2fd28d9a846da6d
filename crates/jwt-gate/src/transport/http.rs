//! HTTP transport implementation

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthState, Authenticated, RoutePolicy, TenantSource, protect};
use crate::config::TransportConfig;
use crate::constants::STATUS_OK;
use crate::{Error, Result};

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Identity of the authenticated caller
#[derive(Debug, Serialize)]
struct WhoAmIResponse {
    tenant: String,
    subject: Option<String>,
    role: Option<String>,
}

/// Build the gateway router.
///
/// `/health` and `/metrics` are public. `/v1/whoami` accepts header tokens
/// only, `/v1/events` also accepts a token in the query string.
pub fn build_router(state: &AuthState, config: &TransportConfig) -> Router {
    let header_only = protect(
        Router::new().route("/v1/whoami", get(whoami_handler)),
        state.clone(),
    );
    let streaming = protect(
        Router::new().route("/v1/events", get(whoami_handler)),
        state.with_policy(RoutePolicy::allow_query_string_token()),
    );

    #[allow(unused_mut)]
    let mut app = Router::new().route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    {
        app = app.route("/metrics", get(metrics_handler));
    }

    // Spans carry the path only; the query may hold a token
    let mut app = app
        .merge(header_only)
        .merge(streaming)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ));

    if let Some(cors) = build_cors_layer(config) {
        app = app.layer(cors);
    }

    app
}

/// Serve `router` until `shutdown` resolves
pub async fn run_http(
    router: Router,
    host: IpAddr,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::new(host, port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Transport(format!("HTTP server error: {e}")))?;

    tracing::info!("HTTP server shutdown complete");
    Ok(())
}

fn build_cors_layer(config: &TransportConfig) -> Option<CorsLayer> {
    let origin = config.cors_origin.as_ref()?;

    let Ok(origin_value) = origin.parse::<HeaderValue>() else {
        tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
        return None;
    };

    Some(
        CorsLayer::new()
            .allow_origin(origin_value)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .expose_headers([header::WWW_AUTHENTICATE]),
    )
}

/// Warn about deployments that weaken tenant isolation
pub fn emit_security_warnings(host: IpAddr, tenant_source: &TenantSource) {
    for warning in security_warnings(host, tenant_source) {
        tracing::warn!("{warning}");
    }
}

fn security_warnings(host: IpAddr, tenant_source: &TenantSource) -> Vec<String> {
    let mut warnings = Vec::new();
    let is_non_loopback = !host.is_loopback();
    let is_all_interfaces = host == IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        || host == IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED);

    if is_all_interfaces {
        warnings.push(
            "HTTP server binding to all interfaces. \
             This exposes the server to all network interfaces."
                .to_string(),
        );
    } else if is_non_loopback {
        warnings.push(format!(
            "HTTP server binding to non-loopback address ({host}). \
             Ensure network security policies are in place."
        ));
    }

    if is_non_loopback && !matches!(tenant_source, TenantSource::Fixed(_)) {
        warnings.push(format!(
            "Tenant is selected from client-supplied request data ({tenant_source}). \
             Ensure a trusted proxy sets or validates it."
        ));
    }

    warnings
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: STATUS_OK,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn whoami_handler(Authenticated(ctx): Authenticated) -> impl IntoResponse {
    Json(WhoAmIResponse {
        tenant: ctx.tenant_id().to_string(),
        subject: ctx.subject().map(str::to_owned),
        role: ctx.role().map(str::to_owned),
    })
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        crate::observability::render_metrics(),
    )
}
