//! Bearer token extraction

use axum::http::{HeaderMap, header};

use crate::constants::QUERY_TOKEN_PARAM;

const BEARER_SCHEME: &str = "bearer";

/// Per-route authentication policy, fixed when the route is registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Accept the token from the `authorization` query parameter
    pub allow_query_string_token: bool,
}

impl RoutePolicy {
    #[must_use]
    pub const fn header_only() -> Self {
        Self {
            allow_query_string_token: false,
        }
    }

    #[must_use]
    pub const fn allow_query_string_token() -> Self {
        Self {
            allow_query_string_token: true,
        }
    }
}

/// Pull the raw token out of a request.
///
/// With query tokens allowed, a present `authorization` parameter wins over
/// the header, even when empty. The `Bearer` scheme is stripped from either
/// source. An empty result means no credential was presented.
pub fn extract_token(policy: &RoutePolicy, headers: &HeaderMap, query: Option<&str>) -> String {
    let raw = if policy.allow_query_string_token {
        query_token(query).or_else(|| header_token(headers))
    } else {
        header_token(headers)
    };

    raw.map(|value| strip_bearer(&value).to_string())
        .unwrap_or_default()
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn query_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == QUERY_TOKEN_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Remove a case-insensitive `Bearer` prefix and the whitespace after it.
///
/// `Bearer` not followed by whitespace is left as is.
pub fn strip_bearer(value: &str) -> &str {
    let Some(rest) = value
        .get(..BEARER_SCHEME.len())
        .filter(|scheme| scheme.eq_ignore_ascii_case(BEARER_SCHEME))
        .map(|_| &value[BEARER_SCHEME.len()..])
    else {
        return value;
    };

    let token = rest.trim_start();
    if token.len() == rest.len() {
        value
    } else {
        token
    }
}
