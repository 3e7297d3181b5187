//! Opaque GUID to owning-namespace resolution
//!
//! The REST tier identifies resources only by GUID; the store indexes by
//! namespace, and namespace is the authorization boundary. Every access to a
//! GUID-addressed resource therefore pays one cluster-wide list with a
//! kind-specific selector before the scoped get can happen.
//!
//! Exactly one match is the only success. Two objects answering to the same
//! GUID is a correctness violation that must surface loudly, never be
//! resolved by picking one.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, ListParams};
use kube::{Api, Client};
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use gantry_common::{Error, Result, API_GROUP, API_VERSION, ORG_GUID_LABEL_KEY, SPACE_GUID_LABEL_KEY};

/// Resource kinds addressable by GUID through the REST tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ResourceKind {
    App,
    Build,
    Droplet,
    Domain,
    Package,
    Process,
    Route,
    ServiceBinding,
    ServiceInstance,
    Org,
    Space,
    Task,
}

/// How a kind's objects are found by GUID, irrespective of namespace
enum SelectorStrategy {
    /// The object is named by its GUID; field selector on `metadata.name`
    ByName,
    /// The object carries its GUID in a label under this key
    ByLabel(&'static str),
}

impl ResourceKind {
    /// The store kind name, used in error reporting
    pub fn kind_name(self) -> &'static str {
        match self {
            Self::App => "GantryApp",
            Self::Build => "GantryBuild",
            Self::Droplet => "GantryDroplet",
            Self::Domain => "GantryDomain",
            Self::Package => "GantryPackage",
            Self::Process => "GantryProcess",
            Self::Route => "GantryRoute",
            Self::ServiceBinding => "GantryServiceBinding",
            Self::ServiceInstance => "GantryServiceInstance",
            Self::Org => "GantryOrg",
            Self::Space => "GantrySpace",
            Self::Task => "GantryTask",
        }
    }

    fn plural(self) -> &'static str {
        match self {
            Self::App => "gantryapps",
            Self::Build => "gantrybuilds",
            Self::Droplet => "gantrydroplets",
            Self::Domain => "gantrydomains",
            Self::Package => "gantrypackages",
            Self::Process => "gantryprocesses",
            Self::Route => "gantryroutes",
            Self::ServiceBinding => "gantryservicebindings",
            Self::ServiceInstance => "gantryserviceinstances",
            Self::Org => "gantryorgs",
            Self::Space => "gantryspaces",
            Self::Task => "gantrytasks",
        }
    }

    /// The dynamic store address for this kind
    pub fn api_resource(self) -> ApiResource {
        ApiResource {
            group: API_GROUP.to_string(),
            version: API_VERSION.to_string(),
            api_version: format!("{API_GROUP}/{API_VERSION}"),
            kind: self.kind_name().to_string(),
            plural: self.plural().to_string(),
        }
    }

    /// Org and Space objects are named after their namespace and carry the
    /// GUID in a label; everything else is named by its GUID.
    fn selector(self) -> SelectorStrategy {
        match self {
            Self::Org => SelectorStrategy::ByLabel(ORG_GUID_LABEL_KEY),
            Self::Space => SelectorStrategy::ByLabel(SPACE_GUID_LABEL_KEY),
            _ => SelectorStrategy::ByName,
        }
    }
}

/// Trait abstracting the administrative cluster-wide list call
///
/// The implementation runs as the operator's service account with a
/// list-only grant over the platform's kinds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterObjectLister: Send + Sync {
    /// List objects of a dynamic kind across all namespaces
    async fn list(&self, resource: &ApiResource, params: &ListParams) -> Result<Vec<DynamicObject>>;
}

/// Real lister backed by the operator's kube client
pub struct KubeClusterObjectLister {
    client: Client,
}

impl KubeClusterObjectLister {
    /// Wrap the given administrative client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterObjectLister for KubeClusterObjectLister {
    async fn list(&self, resource: &ApiResource, params: &ListParams) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let list = api
            .list(params)
            .await
            .map_err(|e| Error::from_kube(e, &resource.kind))?;
        Ok(list.items)
    }
}

/// Resolves a GUID + kind to the namespace (or name) owning the object
pub struct NamespaceResolver {
    lister: Arc<dyn ClusterObjectLister>,
}

impl NamespaceResolver {
    /// Create a resolver over the given administrative lister
    pub fn new(lister: Arc<dyn ClusterObjectLister>) -> Self {
        Self { lister }
    }

    /// The namespace that owns the object identified by this GUID
    #[instrument(skip(self), fields(guid = %guid, kind = kind.kind_name()))]
    pub async fn namespace_for(&self, guid: &str, kind: ResourceKind) -> Result<String> {
        let object = self.lookup(guid, kind).await?;
        object
            .metadata
            .namespace
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| Error::not_namespace_scoped(kind.kind_name()))
    }

    /// The object's own name, for kinds looked up by label
    ///
    /// Used where the GUID names a namespace-shaped resource (orgs, spaces)
    /// and the caller needs the object name rather than its location.
    #[instrument(skip(self), fields(guid = %guid, kind = kind.kind_name()))]
    pub async fn name_for(&self, guid: &str, kind: ResourceKind) -> Result<String> {
        let object = self.lookup(guid, kind).await?;
        object
            .metadata
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::not_namespace_scoped(kind.kind_name()))
    }

    async fn lookup(&self, guid: &str, kind: ResourceKind) -> Result<DynamicObject> {
        let params = match kind.selector() {
            SelectorStrategy::ByName => {
                ListParams::default().fields(&format!("metadata.name={guid}"))
            }
            SelectorStrategy::ByLabel(key) => ListParams::default().labels(&format!("{key}={guid}")),
        };

        let mut items = self.lister.list(&kind.api_resource(), &params).await?;
        debug!(matches = items.len(), "guid lookup");

        match items.len() {
            0 => Err(Error::not_found(kind.kind_name())),
            1 => Ok(items.remove(0)),
            _ => Err(Error::duplicate_records(kind.kind_name())),
        }
    }
}
