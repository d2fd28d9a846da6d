//! Authentication error types
//!
//! Every failure surfaces to the caller as a single [`AccessDenied`] kind.
//! The internal causes ([`ResolveError`], [`VerifyError`]) stay attached as
//! the error source so logs keep the distinguishing detail.

use std::error::Error as StdError;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::constants::{MSG_INVALID_CREDENTIALS, MSG_MISSING_AUTHORIZATION};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Step of the authentication pipeline that denied the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialReason {
    MissingCredential,
    KeyResolution,
    Verification,
}

impl DenialReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::KeyResolution => "key_resolution",
            Self::Verification => "verification",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant key material could not be resolved
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("tenant could not be determined from request")]
    MissingTenant,

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("no key material configured for tenant: {0}")]
    NoKeyMaterial(String),

    #[error("key material unavailable: {0}")]
    Unavailable(String),
}

/// Token verification failed
#[derive(Debug, Error)]
#[error("{message}")]
pub struct VerifyError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl VerifyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        let message = match err.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => "jwt malformed".to_string(),
            ErrorKind::InvalidSignature => "invalid signature".to_string(),
            ErrorKind::ExpiredSignature => "jwt expired".to_string(),
            ErrorKind::ImmatureSignature => "jwt not active".to_string(),
            ErrorKind::InvalidIssuer => "jwt issuer invalid".to_string(),
            ErrorKind::InvalidAudience => "jwt audience invalid".to_string(),
            ErrorKind::MissingRequiredClaim(claim) => format!("missing required claim: {claim}"),
            ErrorKind::InvalidAlgorithm => "invalid algorithm".to_string(),
            _ => "invalid token".to_string(),
        };

        Self::with_source(message, err)
    }
}

/// The only failure surfaced to callers
#[derive(Debug, Error)]
#[error("access denied: {message}")]
pub struct AccessDenied {
    reason: DenialReason,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl AccessDenied {
    #[must_use]
    pub fn missing_credential() -> Self {
        Self {
            reason: DenialReason::MissingCredential,
            message: MSG_MISSING_AUTHORIZATION.to_string(),
            source: None,
        }
    }

    /// Resolution failures share the generic credential message so that
    /// unknown tenants cannot be told apart from bad tokens.
    #[must_use]
    pub fn key_resolution(err: ResolveError) -> Self {
        Self {
            reason: DenialReason::KeyResolution,
            message: MSG_INVALID_CREDENTIALS.to_string(),
            source: Some(Box::new(err)),
        }
    }

    #[must_use]
    pub fn verification(err: VerifyError) -> Self {
        Self {
            reason: DenialReason::Verification,
            message: err.message().to_string(),
            source: Some(Box::new(err)),
        }
    }

    #[must_use]
    pub const fn reason(&self) -> DenialReason {
        self.reason
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Cause chain for diagnostics. Never sent to the caller.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let Some(first) = StdError::source(self) else {
            return self.message.clone();
        };

        let mut out = first.to_string();
        let mut current = first.source();
        while let Some(cause) = current {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            current = cause.source();
        }
        out
    }
}

#[derive(Debug, Serialize)]
struct AccessDeniedBody<'a> {
    error: &'static str,
    message: &'a str,
}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        let body = AccessDeniedBody {
            error: "AccessDenied",
            message: &self.message,
        };
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}

pub type Result<T> = std::result::Result<T, AccessDenied>;
