//! JSON Web Key Sets: parsing, key selection and remote fetching

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{ResolveError, VerifyError};
use crate::constants::{JWKS_FETCH_TIMEOUT_SECS, JWKS_RETRY_BACKOFF_SECS};

/// HTTP client shared by every remote key set
pub fn jwks_http_client() -> crate::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(JWKS_FETCH_TIMEOUT_SECS))
        .build()
        .map_err(|e| crate::Error::Config(format!("Failed to build JWKS HTTP client: {e}")))
}

/// JSON Web Key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Key type (RSA, EC, OKP, oct)
    pub kty: String,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key usage
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    // RSA components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    // EC / OKP components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    // Symmetric key (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl Jwk {
    /// Whether this key may verify tokens signed with `alg`
    pub fn supports(&self, alg: Algorithm) -> bool {
        if self.key_use.as_deref().is_some_and(|u| u != "sig") {
            return false;
        }

        if let Some(declared) = self.alg.as_deref() {
            return Algorithm::from_str(declared).is_ok_and(|a| a == alg);
        }

        match self.kty.as_str() {
            "RSA" => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            "EC" => match self.crv.as_deref() {
                Some("P-256") => alg == Algorithm::ES256,
                Some("P-384") => alg == Algorithm::ES384,
                _ => false,
            },
            "OKP" => self.crv.as_deref() == Some("Ed25519") && alg == Algorithm::EdDSA,
            "oct" => matches!(
                alg,
                Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
            ),
            _ => false,
        }
    }

    /// Build the verification key
    pub fn decoding_key(&self) -> Result<DecodingKey, VerifyError> {
        let component = |value: Option<_>, name: &str| {
            value.ok_or_else(|| {
                VerifyError::new(format!("missing '{name}' in {} key", self.kty))
            })
        };

        match self.kty.as_str() {
            "RSA" => DecodingKey::from_rsa_components(
                component(self.n.as_ref(), "n")?,
                component(self.e.as_ref(), "e")?,
            )
            .map_err(|e| VerifyError::with_source("invalid RSA key components", e)),
            "EC" => DecodingKey::from_ec_components(
                component(self.x.as_ref(), "x")?,
                component(self.y.as_ref(), "y")?,
            )
            .map_err(|e| VerifyError::with_source("invalid EC key components", e)),
            "OKP" => DecodingKey::from_ed_components(component(self.x.as_ref(), "x")?)
                .map_err(|e| VerifyError::with_source("invalid OKP key components", e)),
            "oct" => {
                let k = component(self.k.as_ref(), "k")?;
                serde_json::from_value::<jsonwebtoken::jwk::Jwk>(
                    serde_json::json!({ "kty": "oct", "k": k }),
                )
                .map_err(|e| VerifyError::with_source("invalid symmetric key", e))
                .and_then(|jwk| {
                    DecodingKey::from_jwk(&jwk)
                        .map_err(|e| VerifyError::with_source("invalid symmetric key", e))
                })
            }
            other => Err(VerifyError::new(format!("unsupported key type: {other}"))),
        }
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn from_json(json: &str) -> Result<Self, ResolveError> {
        serde_json::from_str(json)
            .map_err(|e| ResolveError::Unavailable(format!("JWKS parse failed: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Select the key for a token header.
    ///
    /// With a `kid`, only that key is considered. Without one, the first key
    /// that supports `alg` and decodes successfully is used.
    pub fn find_key(&self, kid: Option<&str>, alg: Algorithm) -> Result<DecodingKey, VerifyError> {
        if let Some(kid) = kid {
            let jwk = self
                .keys
                .iter()
                .find(|k| k.kid.as_deref() == Some(kid) && k.supports(alg))
                .ok_or_else(|| VerifyError::new("no matching key found"))?;
            return jwk.decoding_key();
        }

        self.keys
            .iter()
            .filter(|k| k.supports(alg))
            .find_map(|k| match k.decoding_key() {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::debug!(kty = %k.kty, error = %e, "Skipping undecodable JWK");
                    None
                }
            })
            .ok_or_else(|| VerifyError::new("no matching key found"))
    }
}

/// Remote JWKS with TTL-based refresh
pub struct JwksCache {
    jwks_uri: Url,
    client: reqwest::Client,
    ttl: Duration,
    state: RwLock<CacheState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct CacheState {
    key_set: Option<Arc<JwkSet>>,
    /// No fetch is attempted on the request path before this instant
    next_fetch: Option<Instant>,
    last_error: Option<String>,
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("jwks_uri", &self.jwks_uri)
            .field("ttl", &self.ttl)
            .field(
                "keys_count",
                &self.state.read().key_set.as_ref().map(|set| set.keys.len()),
            )
            .finish_non_exhaustive()
    }
}

impl JwksCache {
    pub fn new(jwks_uri: Url, ttl: Duration, client: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            client,
            ttl,
            state: RwLock::new(CacheState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub const fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Current key set, fetching it when missing or older than the TTL.
    ///
    /// Concurrent callers share one fetch. After a failed fetch the previous
    /// set, or the failure, is returned without refetching until the retry
    /// back-off has passed.
    pub async fn key_set(&self) -> Result<Arc<JwkSet>, ResolveError> {
        if let Some(result) = self.cached() {
            return result;
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(result) = self.cached() {
            return result;
        }

        match self.fetch().await {
            Ok(set) => Ok(set),
            Err(e) => {
                #[cfg(feature = "metrics")]
                crate::observability::record_jwks_refresh(false);

                let mut state = self.state.write();
                state.next_fetch = Some(Instant::now() + self.retry_backoff());

                if let Some(stale) = state.key_set.clone() {
                    tracing::warn!(jwks_uri = %self.jwks_uri, error = %e, "JWKS refresh failed, serving stale keys");
                    Ok(stale)
                } else {
                    state.last_error = Some(match &e {
                        ResolveError::Unavailable(message) => message.clone(),
                        other => other.to_string(),
                    });
                    Err(e)
                }
            }
        }
    }

    /// Fetch the key set from the remote endpoint, ignoring the TTL
    pub async fn refresh(&self) -> Result<Arc<JwkSet>, ResolveError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch().await
    }

    fn cached(&self) -> Option<Result<Arc<JwkSet>, ResolveError>> {
        let state = self.state.read();
        if !state.next_fetch.is_some_and(|at| Instant::now() < at) {
            return None;
        }

        match (&state.key_set, &state.last_error) {
            (Some(set), _) => Some(Ok(Arc::clone(set))),
            (None, Some(message)) => Some(Err(ResolveError::Unavailable(message.clone()))),
            (None, None) => None,
        }
    }

    fn retry_backoff(&self) -> Duration {
        self.ttl.min(Duration::from_secs(JWKS_RETRY_BACKOFF_SECS))
    }

    async fn fetch(&self) -> Result<Arc<JwkSet>, ResolveError> {
        tracing::debug!(jwks_uri = %self.jwks_uri, "Refreshing JWKS");

        let response = self
            .client
            .get(self.jwks_uri.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ResolveError::Unavailable(format!("JWKS fetch failed: {e}")))?;

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| ResolveError::Unavailable(format!("JWKS parse failed: {e}")))?;

        let set = Arc::new(set);
        *self.state.write() = CacheState {
            key_set: Some(Arc::clone(&set)),
            next_fetch: Some(Instant::now() + self.ttl),
            last_error: None,
        };

        #[cfg(feature = "metrics")]
        crate::observability::record_jwks_refresh(true);

        tracing::info!(
            jwks_uri = %self.jwks_uri,
            keys_count = set.keys.len(),
            "JWKS refreshed successfully"
        );

        Ok(set)
    }

    /// Install `set` as if it had been fetched at `fetched_at`
    #[cfg(test)]
    pub(crate) fn seed(&self, set: JwkSet, fetched_at: Instant) {
        *self.state.write() = CacheState {
            key_set: Some(Arc::new(set)),
            next_fetch: Some(fetched_at + self.ttl),
            last_error: None,
        };
    }
}

/// Background JWKS refresh task builder
pub struct JwksRefreshTask {
    caches: Vec<Arc<JwksCache>>,
    interval: Duration,
}

impl std::fmt::Debug for JwksRefreshTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksRefreshTask")
            .field("caches", &self.caches.len())
            .field("interval", &self.interval)
            .finish()
    }
}

impl JwksRefreshTask {
    #[must_use]
    pub const fn new(caches: Vec<Arc<JwksCache>>, interval: Duration) -> Self {
        Self { caches, interval }
    }

    pub fn spawn(
        self,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let results = futures::future::join_all(
                            self.caches.iter().map(|cache| cache.refresh()),
                        )
                        .await;

                        for (cache, result) in self.caches.iter().zip(results) {
                            if let Err(e) = result {
                                #[cfg(feature = "metrics")]
                                crate::observability::record_jwks_refresh(false);
                                tracing::warn!(jwks_uri = %cache.jwks_uri(), error = %e, "Background JWKS refresh failed");
                            }
                        }
                    }
                    () = shutdown.cancelled() => {
                        tracing::debug!("JWKS refresh task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    // base64url("test-secret-key-at-least-32-bytes-long")
    const OCT_K: &str = "dGVzdC1zZWNyZXQta2V5LWF0LWxlYXN0LTMyLWJ5dGVzLWxvbmc";

    fn oct_key(kid: Option<&str>) -> Jwk {
        Jwk {
            kid: kid.map(str::to_string),
            kty: "oct".to_string(),
            alg: None,
            key_use: None,
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
            k: Some(OCT_K.to_string()),
        }
    }

    #[test]
    fn test_jwk_set_deserialize() {
        let json = r#"{
            "keys": [
                {"kid": "key1", "kty": "RSA", "alg": "RS256", "use": "sig", "n": "test_n", "e": "AQAB"},
                {"kid": "ec-key", "kty": "EC", "crv": "P-256", "x": "test_x", "y": "test_y"}
            ]
        }"#;
        let jwks = JwkSet::from_json(json).unwrap();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid.as_deref(), Some("key1"));
        assert_eq!(jwks.keys[0].key_use.as_deref(), Some("sig"));
        assert_eq!(jwks.keys[1].crv.as_deref(), Some("P-256"));
    }

    #[test]
    fn test_jwk_set_invalid_json() {
        let result = JwkSet::from_json("{not json");
        assert!(matches!(result, Err(ResolveError::Unavailable(_))));
    }

    #[test]
    fn test_supports_by_declared_alg() {
        let mut jwk = oct_key(None);
        jwk.alg = Some("HS384".to_string());
        assert!(jwk.supports(Algorithm::HS384));
        assert!(!jwk.supports(Algorithm::HS256));
    }

    #[test]
    fn test_supports_by_key_type() {
        let rsa = Jwk {
            kty: "RSA".to_string(),
            ..oct_key(None)
        };
        assert!(rsa.supports(Algorithm::RS256));
        assert!(rsa.supports(Algorithm::PS512));
        assert!(!rsa.supports(Algorithm::ES256));

        let ec = Jwk {
            kty: "EC".to_string(),
            crv: Some("P-384".to_string()),
            ..oct_key(None)
        };
        assert!(ec.supports(Algorithm::ES384));
        assert!(!ec.supports(Algorithm::ES256));

        assert!(oct_key(None).supports(Algorithm::HS512));
        assert!(!oct_key(None).supports(Algorithm::RS256));
    }

    #[test]
    fn test_encryption_keys_are_skipped() {
        let mut jwk = oct_key(None);
        jwk.key_use = Some("enc".to_string());
        assert!(!jwk.supports(Algorithm::HS256));
    }

    #[test]
    fn test_find_key_by_kid() {
        let set = JwkSet {
            keys: vec![oct_key(Some("a")), oct_key(Some("b"))],
        };
        assert!(set.find_key(Some("b"), Algorithm::HS256).is_ok());

        let err = set.find_key(Some("missing"), Algorithm::HS256).err().unwrap();
        assert_eq!(err.message(), "no matching key found");
    }

    #[test]
    fn test_find_key_without_kid_uses_algorithm() {
        let set = JwkSet {
            keys: vec![oct_key(None)],
        };
        assert!(set.find_key(None, Algorithm::HS256).is_ok());
        assert!(set.find_key(None, Algorithm::RS256).is_err());
    }

    #[test]
    fn test_decoding_key_missing_component() {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            e: Some("AQAB".to_string()),
            ..oct_key(None)
        };
        let err = jwk.decoding_key().err().unwrap();
        assert_eq!(err.message(), "missing 'n' in RSA key");
    }

    #[test]
    fn test_unsupported_key_type() {
        let jwk = Jwk {
            kty: "PGP".to_string(),
            ..oct_key(None)
        };
        assert!(!jwk.supports(Algorithm::HS256));
        assert!(jwk.decoding_key().is_err());
    }

    #[tokio::test]
    async fn test_fresh_cache_does_not_fetch() {
        let cache = JwksCache::new(
            Url::parse("http://127.0.0.1:9/.well-known/jwks.json").unwrap(),
            Duration::from_secs(3600),
            reqwest::Client::new(),
        );
        cache.seed(
            JwkSet {
                keys: vec![oct_key(Some("a"))],
            },
            Instant::now(),
        );

        let set = cache.key_set().await.unwrap();
        assert_eq!(set.keys.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_served_when_refresh_fails() {
        let cache = JwksCache::new(
            Url::parse("http://127.0.0.1:9/.well-known/jwks.json").unwrap(),
            Duration::from_millis(1),
            reqwest::Client::new(),
        );
        cache.seed(
            JwkSet {
                keys: vec![oct_key(Some("a"))],
            },
            Instant::now().checked_sub(Duration::from_secs(5)).unwrap(),
        );

        let set = cache.key_set().await.unwrap();
        assert_eq!(set.keys[0].kid.as_deref(), Some("a"));
    }

    /// Local endpoint answering every request with 503; returns its URL and
    /// the number of connections it accepted
    async fn failing_endpoint() -> (Url, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let url = Url::parse(&format!("http://{addr}/.well-known/jwks.json")).unwrap();
        (url, hits)
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn test_failed_refresh_backs_off() {
        let (url, hits) = failing_endpoint().await;
        let cache = JwksCache::new(url, Duration::from_secs(60), local_client());
        cache.seed(
            JwkSet {
                keys: vec![oct_key(Some("a"))],
            },
            Instant::now().checked_sub(Duration::from_secs(120)).unwrap(),
        );

        for _ in 0..3 {
            let set = cache.key_set().await.unwrap();
            assert_eq!(set.keys[0].kid.as_deref(), Some("a"));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let (url, hits) = failing_endpoint().await;
        let cache = JwksCache::new(url, Duration::from_secs(60), local_client());

        let results = futures::future::join_all((0..8).map(|_| cache.key_set())).await;

        assert!(
            results
                .iter()
                .all(|r| matches!(r, Err(ResolveError::Unavailable(_))))
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_refresh_ignores_back_off() {
        let (url, hits) = failing_endpoint().await;
        let cache = JwksCache::new(url, Duration::from_secs(60), local_client());

        assert!(cache.key_set().await.is_err());
        assert!(cache.refresh().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_cache_fetch_failure() {
        let cache = JwksCache::new(
            Url::parse("http://127.0.0.1:9/.well-known/jwks.json").unwrap(),
            Duration::from_secs(60),
            reqwest::Client::new(),
        );
        let result = cache.key_set().await;
        assert!(matches!(result, Err(ResolveError::Unavailable(_))));
    }
}
