//! Token verification

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode_header};

use super::claims::Claims;
use super::error::VerifyError;
use super::jwks::JwkSet;
use crate::config::AuthSettings;

/// Checks a token against a tenant's key material
///
/// Implementations must fail, never degrade, when the token is malformed,
/// its signature does not verify, it is outside its validity window, it has
/// no subject, or no usable key is available.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(
        &self,
        token: &str,
        secret: Option<&str>,
        key_set: Option<&JwkSet>,
    ) -> Result<Claims, VerifyError>;
}

/// Validation rules shared by every tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Expected `iss`; unchecked when `None`
    pub issuer: Option<String>,
    /// Accepted `aud` values; unchecked when empty
    pub audience: Vec<String>,
    /// Clock skew tolerance for `exp` and `nbf`
    pub leeway: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: Vec::new(),
            leeway: Duration::from_secs(60),
        }
    }
}

/// `jsonwebtoken`-backed verifier
#[derive(Debug, Clone, Default)]
pub struct JwtVerifier {
    config: VerifierConfig,
}

impl JwtVerifier {
    #[must_use]
    pub const fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(VerifierConfig {
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            leeway: settings.leeway,
        })
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.validate_nbf = true;
        validation.leeway = self.config.leeway.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);

        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer.trim_end_matches('/')]);
        }

        if self.config.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.config.audience);
        }

        validation
    }
}

fn decoding_key(
    alg: Algorithm,
    kid: Option<&str>,
    secret: Option<&str>,
    key_set: Option<&JwkSet>,
) -> Result<DecodingKey, VerifyError> {
    if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
        return match (secret, key_set) {
            (Some(secret), _) => Ok(DecodingKey::from_secret(secret.as_bytes())),
            (None, Some(set)) => set.find_key(kid, alg),
            (None, None) => Err(VerifyError::new(
                "no secret configured for symmetric algorithm",
            )),
        };
    }

    key_set
        .ok_or_else(|| VerifyError::new("no key set configured"))?
        .find_key(kid, alg)
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(
        &self,
        token: &str,
        secret: Option<&str>,
        key_set: Option<&JwkSet>,
    ) -> Result<Claims, VerifyError> {
        let header =
            decode_header(token).map_err(|e| VerifyError::with_source("jwt malformed", e))?;

        let key = decoding_key(header.alg, header.kid.as_deref(), secret, key_set)?;
        let token_data = jsonwebtoken::decode::<Claims>(token, &key, &self.validation(header.alg))?;

        if token_data.claims.sub.is_empty() {
            return Err(VerifyError::new("missing required claim: sub"));
        }

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};

    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    // header {"alg":"RS256","typ":"JWT"}, payload {"sub":"u42","exp":4102444800}
    const RS256_TOKEN: &str =
        "eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.eyJzdWIiOiJ1NDIiLCJleHAiOjQxMDI0NDQ4MDB9.c2ln";

    fn current_time() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn mint(claims: &Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn oct_set(kid: &str) -> JwkSet {
        JwkSet::from_json(&format!(
            r#"{{"keys": [{{"kid": "{kid}", "kty": "oct", "k": "dGVzdC1zZWNyZXQta2V5LWF0LWxlYXN0LTMyLWJ5dGVzLWxvbmc"}}]}}"#
        ))
        .unwrap()
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::default()
    }

    async fn verify_err(verifier: &JwtVerifier, token: &str, secret: Option<&str>) -> String {
        verifier
            .verify(token, secret, None)
            .await
            .unwrap_err()
            .message()
            .to_string()
    }

    #[tokio::test]
    async fn test_verify_valid_hs256() {
        let token = mint(
            &json!({"sub": "user-1", "role": "admin", "exp": current_time() + 3600, "org": "acme"}),
            SECRET,
        );

        let claims = verifier().verify(&token, Some(SECRET), None).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert_eq!(claims.extra["org"], "acme");
    }

    #[tokio::test]
    async fn test_verify_expired() {
        let token = mint(&json!({"sub": "u", "exp": current_time() - 3600}), SECRET);
        assert_eq!(verify_err(&verifier(), &token, Some(SECRET)).await, "jwt expired");
    }

    #[tokio::test]
    async fn test_verify_expired_within_leeway() {
        let token = mint(&json!({"sub": "u", "exp": current_time() - 10}), SECRET);
        assert!(verifier().verify(&token, Some(SECRET), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_not_yet_valid() {
        let now = current_time();
        let token = mint(
            &json!({"sub": "u", "exp": now + 7200, "nbf": now + 3600}),
            SECRET,
        );
        assert_eq!(verify_err(&verifier(), &token, Some(SECRET)).await, "jwt not active");
    }

    #[tokio::test]
    async fn test_verify_wrong_secret() {
        let token = mint(
            &json!({"sub": "u", "exp": current_time() + 3600}),
            "wrong-secret-key-at-least-32-bytes",
        );
        assert_eq!(
            verify_err(&verifier(), &token, Some(SECRET)).await,
            "invalid signature"
        );
    }

    #[tokio::test]
    async fn test_verify_malformed() {
        for token in ["not.a.valid.token", "abc.def.ghi", ""] {
            assert_eq!(
                verify_err(&verifier(), token, Some(SECRET)).await,
                "jwt malformed",
                "token: {token:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_verify_missing_subject() {
        let token = mint(&json!({"exp": current_time() + 3600}), SECRET);
        assert_eq!(
            verify_err(&verifier(), &token, Some(SECRET)).await,
            "missing required claim: sub"
        );
    }

    #[tokio::test]
    async fn test_verify_empty_subject() {
        let token = mint(&json!({"sub": "", "exp": current_time() + 3600}), SECRET);
        assert_eq!(
            verify_err(&verifier(), &token, Some(SECRET)).await,
            "missing required claim: sub"
        );
    }

    #[tokio::test]
    async fn test_verify_missing_expiry() {
        let token = mint(&json!({"sub": "u"}), SECRET);
        assert_eq!(
            verify_err(&verifier(), &token, Some(SECRET)).await,
            "missing required claim: exp"
        );
    }

    #[tokio::test]
    async fn test_verify_symmetric_without_secret() {
        let token = mint(&json!({"sub": "u", "exp": current_time() + 3600}), SECRET);
        assert_eq!(
            verify_err(&verifier(), &token, None).await,
            "no secret configured for symmetric algorithm"
        );
    }

    #[tokio::test]
    async fn test_verify_symmetric_from_key_set() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".to_string());
        let token = encode(
            &header,
            &json!({"sub": "u42", "exp": current_time() + 3600}),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let claims = verifier()
            .verify(&token, None, Some(&oct_set("k1")))
            .await
            .unwrap();
        assert_eq!(claims.sub, "u42");

        let err = verifier()
            .verify(&token, None, Some(&oct_set("other")))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "no matching key found");
    }

    #[tokio::test]
    async fn test_verify_asymmetric_without_key_set() {
        assert_eq!(
            verify_err(&verifier(), RS256_TOKEN, Some(SECRET)).await,
            "no key set configured"
        );
    }

    #[tokio::test]
    async fn test_verify_asymmetric_without_matching_key() {
        let err = verifier()
            .verify(RS256_TOKEN, None, Some(&oct_set("k1")))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "no matching key found");
    }

    #[tokio::test]
    async fn test_verify_issuer() {
        let verifier = JwtVerifier::new(VerifierConfig {
            issuer: Some("https://auth.example.com/".to_string()),
            ..Default::default()
        });

        let good = mint(
            &json!({"sub": "u", "exp": current_time() + 3600, "iss": "https://auth.example.com"}),
            SECRET,
        );
        assert!(verifier.verify(&good, Some(SECRET), None).await.is_ok());

        let bad = mint(
            &json!({"sub": "u", "exp": current_time() + 3600, "iss": "https://evil.example.com"}),
            SECRET,
        );
        assert_eq!(
            verify_err(&verifier, &bad, Some(SECRET)).await,
            "jwt issuer invalid"
        );
    }

    #[tokio::test]
    async fn test_verify_audience() {
        let verifier = JwtVerifier::new(VerifierConfig {
            audience: vec!["api".to_string()],
            ..Default::default()
        });

        let good = mint(
            &json!({"sub": "u", "exp": current_time() + 3600, "aud": ["web", "api"]}),
            SECRET,
        );
        assert!(verifier.verify(&good, Some(SECRET), None).await.is_ok());

        let bad = mint(
            &json!({"sub": "u", "exp": current_time() + 3600, "aud": "other"}),
            SECRET,
        );
        assert_eq!(
            verify_err(&verifier, &bad, Some(SECRET)).await,
            "jwt audience invalid"
        );
    }

    #[tokio::test]
    async fn test_verify_audience_ignored_when_unconfigured() {
        let token = mint(
            &json!({"sub": "u", "exp": current_time() + 3600, "aud": "anything"}),
            SECRET,
        );
        assert!(verifier().verify(&token, Some(SECRET), None).await.is_ok());
    }
}
