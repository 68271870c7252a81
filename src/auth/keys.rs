use jsonwebtoken::jwk::{Jwk, JwkSet};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

const DEFAULT_MAX_AGE: u64 = 3600;

#[derive(Error, Debug)]
pub enum KeyFetchError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Key fetch failed with status {0}")]
    Status(reqwest::StatusCode),
    #[error("No public key with kid {0}")]
    UnknownKid(String),
}

#[derive(Clone)]
struct CachedKeys {
    keys: JwkSet,
    expires_at: Instant,
}

/// Fetches and caches the JWKS that signs Firebase ID tokens.
pub struct PublicKeyManager {
    client: Client,
    url: String,
    cache: Arc<RwLock<Option<CachedKeys>>>,
}

impl PublicKeyManager {
    pub fn new(client: Client, url: String) -> Self {
        Self {
            client,
            url,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get_key(&self, kid: &str) -> Result<Jwk, KeyFetchError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = &*cache {
                if Instant::now() < cached.expires_at {
                    if let Some(key) = cached.keys.find(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        // Expired, empty, or the key was rotated in since the last fetch.
        self.refresh_keys().await?;

        let cache = self.cache.read().await;
        cache
            .as_ref()
            .and_then(|cached| cached.keys.find(kid).cloned())
            .ok_or_else(|| KeyFetchError::UnknownKid(kid.to_string()))
    }

    async fn refresh_keys(&self) -> Result<(), KeyFetchError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(KeyFetchError::Status(response.status()));
        }

        let max_age = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_max_age)
            .unwrap_or(DEFAULT_MAX_AGE);

        let keys: JwkSet = response.json().await?;
        debug!(count = keys.keys.len(), max_age, "refreshed token signing keys");

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            keys,
            expires_at: Instant::now() + Duration::from_secs(max_age),
        });

        Ok(())
    }
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|part| {
        part.trim()
            .strip_prefix("max-age=")
            .and_then(|v| v.parse::<u64>().ok())
    })
}
