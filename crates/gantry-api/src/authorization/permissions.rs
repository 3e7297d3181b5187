//! Per-identity authorized namespace computation
//!
//! A caller may operate in exactly the namespaces where a role binding names
//! them with one of the platform roles. This resolver computes that set from
//! an administrative (list-only) view of role bindings and caches it per
//! identity fingerprint. The cache is read-through and all-or-nothing: an
//! entry is either absent or the complete set for that identity, and a
//! refresh replaces the whole set atomically.
//!
//! Only list-type operations consult this set. Get-by-GUID paths rely on the
//! store's own access check performed as the scoped client; the two
//! boundaries must agree.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::{Api, Client};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use gantry_common::{Error, Result};

use super::identity::Identity;

/// Subject kind in role bindings that names a platform user
const USER_SUBJECT_KIND: &str = "User";

/// Configuration for the permissions resolver
#[derive(Clone, Debug)]
pub struct PermissionsConfig {
    /// How long a computed namespace set may be served from cache
    pub cache_ttl: Duration,
    /// Role names that grant platform access in a namespace
    /// (e.g. "gantry-space-developer", "gantry-space-manager")
    pub authorized_roles: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(120),
            authorized_roles: vec![
                "gantry-admin".to_string(),
                "gantry-space-developer".to_string(),
                "gantry-space-manager".to_string(),
                "gantry-org-manager".to_string(),
            ],
        }
    }
}

/// Trait abstracting the administrative role-binding list call
///
/// The implementation runs as the operator's own service account with a
/// list-only grant; it is never handed to callers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleBindingLister: Send + Sync {
    /// List role bindings across all namespaces
    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>>;
}

/// Real lister backed by the operator's kube client
pub struct KubeRoleBindingLister {
    client: Client,
}

impl KubeRoleBindingLister {
    /// Wrap the given administrative client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RoleBindingLister for KubeRoleBindingLister {
    async fn list_role_bindings(&self) -> Result<Vec<RoleBinding>> {
        let api: Api<RoleBinding> = Api::all(self.client.clone());
        let list = api
            .list(&Default::default())
            .await
            .map_err(|e| Error::from_kube(e, "RoleBinding"))?;
        Ok(list.items)
    }
}

struct CacheEntry {
    computed_at: Instant,
    namespaces: BTreeSet<String>,
}

/// Computes and caches the namespaces an identity may operate in
pub struct NamespacePermissions {
    lister: Arc<dyn RoleBindingLister>,
    config: PermissionsConfig,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl NamespacePermissions {
    /// Create a resolver over the given administrative lister
    pub fn new(lister: Arc<dyn RoleBindingLister>, config: PermissionsConfig) -> Self {
        Self {
            lister,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The set of namespaces where a role binding names this identity
    ///
    /// Served from cache within the TTL; recomputed on miss. An identity
    /// without a subject name (e.g. certificate credentials) gets the empty
    /// set — its get-by-GUID access still works through the store's own
    /// check.
    #[instrument(skip(self, identity), fields(fingerprint = %identity.fingerprint()))]
    pub async fn authorized_namespaces(&self, identity: &Identity) -> Result<BTreeSet<String>> {
        let subject = match identity.name() {
            Some(name) => name.to_string(),
            None => {
                debug!("identity has no subject name, no namespaces authorized for listing");
                return Ok(BTreeSet::new());
            }
        };

        let fingerprint = identity.fingerprint();

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&fingerprint) {
                if entry.computed_at.elapsed() < self.config.cache_ttl {
                    debug!(
                        namespaces = entry.namespaces.len(),
                        "serving namespace set from cache"
                    );
                    return Ok(entry.namespaces.clone());
                }
            }
        }

        let namespaces = self.compute(&subject).await?;

        // Replace the whole set atomically; never partially update
        let mut cache = self.cache.write().await;
        cache.insert(
            fingerprint,
            CacheEntry {
                computed_at: Instant::now(),
                namespaces: namespaces.clone(),
            },
        );

        Ok(namespaces)
    }

    /// Drop the cached set for one identity fingerprint
    pub async fn invalidate(&self, fingerprint: &str) {
        self.cache.write().await.remove(fingerprint);
    }

    /// Drop all cached sets
    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    async fn compute(&self, subject: &str) -> Result<BTreeSet<String>> {
        let bindings = self.lister.list_role_bindings().await?;

        let namespaces: BTreeSet<String> = bindings
            .iter()
            .filter(|rb| self.config.authorized_roles.iter().any(|r| *r == rb.role_ref.name))
            .filter(|rb| {
                rb.subjects.as_deref().unwrap_or_default().iter().any(|s| {
                    s.kind == USER_SUBJECT_KIND && s.name == subject
                })
            })
            .filter_map(|rb| rb.metadata.namespace.clone())
            .collect();

        debug!(
            subject = %subject,
            namespaces = namespaces.len(),
            "computed authorized namespace set"
        );
        Ok(namespaces)
    }
}
