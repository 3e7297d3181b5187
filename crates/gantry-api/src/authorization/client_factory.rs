//! Identity-scoped Kubernetes client construction
//!
//! Every store operation the API tier performs runs as the calling identity,
//! never as the operator's own service account. Client construction involves
//! TLS and connection setup, so built clients are cached per identity
//! fingerprint with a short TTL — long enough to amortize construction,
//! short enough that revoked credentials and role changes are picked up.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::config::AuthInfo;
use kube::{Client, Config};
use secrecy::SecretString;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use gantry_common::{Error, Result};

use super::identity::{Identity, IdentityScheme};

/// Configuration for the scoped client factory
#[derive(Clone, Debug)]
pub struct ClientFactoryConfig {
    /// How long a built client may be served from cache
    pub cache_ttl: Duration,
}

impl Default for ClientFactoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Builds (and caches) store clients that act as a specific caller
pub struct UserClientFactory {
    base_config: Config,
    config: ClientFactoryConfig,
    cache: RwLock<HashMap<String, (Instant, Client)>>,
}

impl UserClientFactory {
    /// Create a factory from the cluster connection settings
    ///
    /// `base_config` supplies the cluster URL and root certificates; its own
    /// auth info is discarded — a built client only ever carries the
    /// caller's credential.
    pub fn new(base_config: Config, config: ClientFactoryConfig) -> Self {
        Self {
            base_config,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build a client that performs all operations as the given identity
    ///
    /// Construction failures are reported; there is no fallback to an
    /// administrative client.
    #[instrument(skip(self, identity), fields(fingerprint = %identity.fingerprint()))]
    pub async fn build_client(&self, identity: &Identity) -> Result<Client> {
        let fingerprint = identity.fingerprint();

        {
            let cache = self.cache.read().await;
            if let Some((built_at, client)) = cache.get(&fingerprint) {
                if built_at.elapsed() < self.config.cache_ttl {
                    debug!("serving scoped client from cache");
                    return Ok(client.clone());
                }
            }
        }

        let client = self.build_uncached(identity)?;

        let mut cache = self.cache.write().await;
        cache.insert(fingerprint, (Instant::now(), client.clone()));
        Ok(client)
    }

    /// Drop all cached clients
    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    fn build_uncached(&self, identity: &Identity) -> Result<Client> {
        let mut config = self.base_config.clone();
        config.auth_info = AuthInfo::default();

        match identity.scheme() {
            IdentityScheme::Bearer => {
                let token = String::from_utf8(identity.raw_credential().to_vec())
                    .map_err(|_| Error::validation("bearer token is not valid UTF-8"))?;
                config.auth_info.token = Some(SecretString::from(token));
            }
            IdentityScheme::ClientCert => {
                // The credential is a PEM bundle holding both certificate and
                // key; the TLS loader extracts each from its own field.
                let pem = STANDARD.encode(identity.raw_credential());
                config.auth_info.client_certificate_data = Some(pem.clone());
                config.auth_info.client_key_data = Some(SecretString::from(pem));
            }
            IdentityScheme::Unknown => {
                return Err(Error::validation(
                    "cannot build a scoped client for an unauthenticated caller",
                ));
            }
        }

        Client::try_from(config)
            .map_err(|e| Error::internal_with_context("client-factory", e.to_string()))
    }

    #[cfg(test)]
    async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}
