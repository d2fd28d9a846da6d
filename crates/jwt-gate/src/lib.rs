//! Multi-tenant bearer token authentication for axum services

pub mod auth;
pub mod config;
mod constants;
mod error;
pub mod observability;
pub mod transport;

pub use auth::{
    AccessDenied, AuthContext, AuthHook, Authenticated, Claims, DenialReason, JwkSet, JwtVerifier,
    KeyMaterial, KeyResolver, RoutePolicy, TenantId, TenantSource, TokenVerifier,
};
pub use config::{AuthSettings, Config, ConfigBuilder, TelemetryConfig, TransportConfig};
pub use error::{Error, Result};
