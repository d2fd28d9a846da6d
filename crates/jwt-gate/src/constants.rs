//! Constants shared across the gateway

/// Query parameter carrying a token on routes that allow it
pub const QUERY_TOKEN_PARAM: &str = "authorization";

/// Default header carrying the tenant identifier
pub const DEFAULT_TENANT_HEADER: &str = "x-tenant-id";

/// Header consulted first when deriving the tenant from the host name
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

/// Caller-visible message when no token was presented
pub const MSG_MISSING_AUTHORIZATION: &str = "Missing Authorization";

/// Caller-visible message for tenant and key resolution failures
pub const MSG_INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Timeout for remote JWKS requests
pub const JWKS_FETCH_TIMEOUT_SECS: u64 = 10;

/// Minimum wait before refetching a key set after a failed fetch
pub const JWKS_RETRY_BACKOFF_SECS: u64 = 30;

/// Health status value
pub const STATUS_OK: &str = "ok";
