//! Service binding repository
//!
//! Creating a binding only writes desired state; the managed binding
//! controller drives the broker protocol asynchronously. The create call is
//! still advertised as synchronous, so it bridges the gap with the condition
//! awaiter: return once `Ready` is current, fail fast when the controller
//! records a terminal `BindingFailed`, or time out while the broker is still
//! working.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, ResourceExt};
use tracing::{debug, instrument};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use gantry_common::collections::empty_or_contains;
use gantry_common::crd::{GantryServiceBinding, GantryServiceBindingSpec};
use gantry_common::{
    Error, ObjectRef, Result, BINDING_FAILED_CONDITION, READY_CONDITION, SERVICE_BINDING_FINALIZER,
};

use crate::authorization::{Identity, NamespacePermissions, UserClientFactory};

use super::condition_awaiter::{ConditionAwaiter, ObjectGetter};
use super::namespace_resolver::{NamespaceResolver, ResourceKind};

/// Message for binding an app to a service instance
#[derive(Clone, Debug, Default)]
pub struct CreateServiceBindingMessage {
    /// GUID of the service instance being bound
    pub service_instance_guid: String,
    /// GUID of the app being bound
    pub app_guid: String,
    /// Optional human-facing binding name
    pub display_name: Option<String>,
}

/// Filters for listing bindings; empty filters match everything
#[derive(Clone, Debug, Default)]
pub struct ListServiceBindingsMessage {
    /// Service instance GUIDs to match
    pub service_instance_guids: Vec<String>,
    /// App GUIDs to match
    pub app_guids: Vec<String>,
}

/// Trait abstracting the scoped store calls the binding repository makes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BindingClient: Send + Sync {
    /// Get a binding by namespace and name, as the caller
    async fn get_binding(
        &self,
        identity: &Identity,
        namespace: &str,
        name: &str,
    ) -> Result<GantryServiceBinding>;
    /// List bindings in one namespace, as the caller
    async fn list_bindings(
        &self,
        identity: &Identity,
        namespace: &str,
    ) -> Result<Vec<GantryServiceBinding>>;
    /// Create a binding, as the caller
    async fn create_binding(
        &self,
        identity: &Identity,
        namespace: &str,
        binding: GantryServiceBinding,
    ) -> Result<GantryServiceBinding>;
    /// Delete a binding, as the caller
    async fn delete_binding(&self, identity: &Identity, namespace: &str, name: &str) -> Result<()>;
}

/// Real client that builds a scoped kube client per call
pub struct KubeBindingClient {
    factory: Arc<UserClientFactory>,
}

impl KubeBindingClient {
    /// Create a client over the given scoped-client factory
    pub fn new(factory: Arc<UserClientFactory>) -> Self {
        Self { factory }
    }

    async fn bindings(
        &self,
        identity: &Identity,
        namespace: &str,
    ) -> Result<Api<GantryServiceBinding>> {
        let client = self.factory.build_client(identity).await?;
        Ok(Api::namespaced(client, namespace))
    }
}

#[async_trait]
impl BindingClient for KubeBindingClient {
    async fn get_binding(
        &self,
        identity: &Identity,
        namespace: &str,
        name: &str,
    ) -> Result<GantryServiceBinding> {
        self.bindings(identity, namespace)
            .await?
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, "GantryServiceBinding"))
    }

    async fn list_bindings(
        &self,
        identity: &Identity,
        namespace: &str,
    ) -> Result<Vec<GantryServiceBinding>> {
        let list = self
            .bindings(identity, namespace)
            .await?
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube(e, "GantryServiceBinding"))?;
        Ok(list.items)
    }

    async fn create_binding(
        &self,
        identity: &Identity,
        namespace: &str,
        binding: GantryServiceBinding,
    ) -> Result<GantryServiceBinding> {
        self.bindings(identity, namespace)
            .await?
            .create(&PostParams::default(), &binding)
            .await
            .map_err(|e| Error::from_kube(e, "GantryServiceBinding"))
    }

    async fn delete_binding(&self, identity: &Identity, namespace: &str, name: &str) -> Result<()> {
        self.bindings(identity, namespace)
            .await?
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(e, "GantryServiceBinding"))?;
        Ok(())
    }
}

/// Identity-scoped service binding repository
pub struct ServiceBindingRepo {
    client: Arc<dyn BindingClient>,
    resolver: Arc<NamespaceResolver>,
    permissions: Arc<NamespacePermissions>,
    awaiter: ConditionAwaiter,
}

impl ServiceBindingRepo {
    /// Compose a repository from its collaborators
    pub fn new(
        client: Arc<dyn BindingClient>,
        resolver: Arc<NamespaceResolver>,
        permissions: Arc<NamespacePermissions>,
        awaiter: ConditionAwaiter,
    ) -> Self {
        Self {
            client,
            resolver,
            permissions,
            awaiter,
        }
    }

    /// Create a binding and wait for the controller to settle it
    ///
    /// The desired-state write happens as the caller. The wait distinguishes
    /// three outcomes: `Ready` at the current generation (success), a
    /// terminal `BindingFailed` from the broker ([`Error::ExternalOperationFailed`]),
    /// and a deadline hit while the broker is still working ([`Error::Timeout`]).
    #[instrument(skip(self, identity, message), fields(instance = %message.service_instance_guid, app = %message.app_guid))]
    pub async fn create_service_binding(
        &self,
        identity: &Identity,
        message: CreateServiceBindingMessage,
    ) -> Result<GantryServiceBinding> {
        let namespace = self
            .resolver
            .namespace_for(&message.service_instance_guid, ResourceKind::ServiceInstance)
            .await?;
        let guid = Uuid::new_v4().to_string();

        let mut binding = GantryServiceBinding::new(
            &guid,
            GantryServiceBindingSpec {
                service_ref: ObjectRef::new(&message.service_instance_guid),
                app_ref: ObjectRef::new(&message.app_guid),
                display_name: message.display_name,
            },
        );
        binding.metadata.namespace = Some(namespace.clone());
        binding.metadata.finalizers = Some(vec![SERVICE_BINDING_FINALIZER.to_string()]);

        let created = self
            .client
            .create_binding(identity, &namespace, binding)
            .await?;
        debug!(binding = %created.name_any(), "binding created, awaiting reconciliation");

        let getter = ScopedBindingGetter {
            client: self.client.clone(),
            identity: identity.clone(),
        };
        self.awaiter
            .await_condition(
                &getter,
                &namespace,
                &created.name_any(),
                READY_CONDITION,
                Some(BINDING_FAILED_CONDITION),
            )
            .await
    }

    /// Get a binding by GUID
    #[instrument(skip(self, identity), fields(guid = %guid))]
    pub async fn get_service_binding(
        &self,
        identity: &Identity,
        guid: &str,
    ) -> Result<GantryServiceBinding> {
        let namespace = self
            .resolver
            .namespace_for(guid, ResourceKind::ServiceBinding)
            .await?;
        self.client.get_binding(identity, &namespace, guid).await
    }

    /// List bindings across the caller's authorized namespaces
    #[instrument(skip(self, identity, message))]
    pub async fn list_service_bindings(
        &self,
        identity: &Identity,
        message: ListServiceBindingsMessage,
    ) -> Result<Vec<GantryServiceBinding>> {
        let namespaces = self.permissions.authorized_namespaces(identity).await?;

        let mut bindings = Vec::new();
        for namespace in &namespaces {
            match self.client.list_bindings(identity, namespace).await {
                Ok(list) => bindings.extend(list),
                Err(Error::Forbidden { .. }) => {
                    debug!(namespace = %namespace, "skipping forbidden namespace in list");
                }
                Err(e) => return Err(e),
            }
        }

        bindings.retain(|b| {
            empty_or_contains(&message.service_instance_guids, &b.spec.service_ref.name)
                && empty_or_contains(&message.app_guids, &b.spec.app_ref.name)
        });
        Ok(bindings)
    }

    /// Delete a binding; the controller deprovisions before releasing its finalizer
    #[instrument(skip(self, identity), fields(guid = %guid))]
    pub async fn delete_service_binding(&self, identity: &Identity, guid: &str) -> Result<()> {
        let namespace = self
            .resolver
            .namespace_for(guid, ResourceKind::ServiceBinding)
            .await?;
        self.client.delete_binding(identity, &namespace, guid).await
    }
}

/// Adapter letting the awaiter poll bindings as the caller
struct ScopedBindingGetter {
    client: Arc<dyn BindingClient>,
    identity: Identity,
}

#[async_trait]
impl ObjectGetter<GantryServiceBinding> for ScopedBindingGetter {
    async fn get(&self, namespace: &str, name: &str) -> Result<GantryServiceBinding> {
        self.client.get_binding(&self.identity, namespace, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::{MockRoleBindingLister, PermissionsConfig};
    use crate::repositories::condition_awaiter::AwaitConfig;
    use crate::repositories::namespace_resolver::MockClusterObjectLister;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use gantry_common::crd::GantryServiceBindingStatus;
    use gantry_common::{Condition, ConditionStatus};
    use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
    use kube::api::{DynamicObject, ObjectMeta};
    use std::time::Duration;

    fn identity_named(subject: &str) -> Identity {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{subject}"}}"#));
        Identity::from_token(format!("{header}.{payload}.sig"))
    }

    fn binding_in(namespace: &str, guid: &str, instance: &str, app: &str) -> GantryServiceBinding {
        let mut binding = GantryServiceBinding::new(
            guid,
            GantryServiceBindingSpec {
                service_ref: ObjectRef::new(instance),
                app_ref: ObjectRef::new(app),
                display_name: None,
            },
        );
        binding.metadata.namespace = Some(namespace.to_string());
        binding
    }

    fn with_conditions(
        mut binding: GantryServiceBinding,
        conditions: Vec<Condition>,
        generation: i64,
    ) -> GantryServiceBinding {
        binding.metadata.generation = Some(generation);
        binding.status = Some(GantryServiceBindingStatus {
            conditions,
            ..Default::default()
        });
        binding
    }

    fn resolver_for(kind: ResourceKind, guid: &str, namespace: &str) -> Arc<NamespaceResolver> {
        let mut object = DynamicObject::new(guid, &kind.api_resource());
        object.metadata.namespace = Some(namespace.to_string());
        let mut lister = MockClusterObjectLister::new();
        lister.expect_list().returning(move |_, _| Ok(vec![object.clone()]));
        Arc::new(NamespaceResolver::new(Arc::new(lister)))
    }

    fn permissions_for(namespaces: &[&str]) -> Arc<NamespacePermissions> {
        let bindings: Vec<RoleBinding> = namespaces
            .iter()
            .map(|ns| RoleBinding {
                metadata: ObjectMeta {
                    name: Some(format!("developer-{ns}")),
                    namespace: Some(ns.to_string()),
                    ..Default::default()
                },
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "ClusterRole".to_string(),
                    name: "gantry-space-developer".to_string(),
                },
                subjects: Some(vec![Subject {
                    kind: "User".to_string(),
                    name: "alice".to_string(),
                    ..Default::default()
                }]),
            })
            .collect();
        let mut lister = MockRoleBindingLister::new();
        lister
            .expect_list_role_bindings()
            .returning(move || Ok(bindings.clone()));
        Arc::new(NamespacePermissions::new(
            Arc::new(lister),
            PermissionsConfig::default(),
        ))
    }

    fn repo(
        client: MockBindingClient,
        resolver: Arc<NamespaceResolver>,
        permissions: Arc<NamespacePermissions>,
    ) -> ServiceBindingRepo {
        ServiceBindingRepo::new(
            Arc::new(client),
            resolver,
            permissions,
            ConditionAwaiter::new(AwaitConfig {
                timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(50),
            }),
        )
    }

    /// Story: create writes desired state then waits for Ready
    #[tokio::test]
    async fn story_create_waits_for_ready() {
        let mut client = MockBindingClient::new();
        client
            .expect_create_binding()
            .withf(|_, ns, binding| {
                ns == "instance-ns"
                    && binding.spec.service_ref.name == "instance-1"
                    && binding
                        .metadata
                        .finalizers
                        .as_deref()
                        .unwrap_or_default()
                        .contains(&SERVICE_BINDING_FINALIZER.to_string())
            })
            .times(1)
            .returning(|_, _, binding| Ok(binding));
        client.expect_get_binding().times(1).returning(|_, ns, name| {
            Ok(with_conditions(
                binding_in(ns, name, "instance-1", "app-1"),
                vec![Condition::new(READY_CONDITION, ConditionStatus::True, "Bound", "", 1)],
                1,
            ))
        });

        let repo = repo(
            client,
            resolver_for(ResourceKind::ServiceInstance, "instance-1", "instance-ns"),
            permissions_for(&[]),
        );
        let bound = repo
            .create_service_binding(
                &identity_named("alice"),
                CreateServiceBindingMessage {
                    service_instance_guid: "instance-1".to_string(),
                    app_guid: "app-1".to_string(),
                    display_name: None,
                },
            )
            .await
            .unwrap();
        assert!(gantry_common::is_condition_true(
            bound.status.unwrap().conditions.as_slice(),
            READY_CONDITION
        ));
    }

    /// Story: a broker failure surfaces as an external operation failure,
    /// never as a timeout
    #[tokio::test]
    async fn story_create_surfaces_broker_failure() {
        let mut client = MockBindingClient::new();
        client
            .expect_create_binding()
            .returning(|_, _, binding| Ok(binding));
        client.expect_get_binding().times(1).returning(|_, ns, name| {
            let mut failed = Condition::new(
                BINDING_FAILED_CONDITION,
                ConditionStatus::True,
                "BindFailed",
                "broker rejected the bind",
                1,
            );
            failed.observed_generation = 1;
            Ok(with_conditions(
                binding_in(ns, name, "instance-1", "app-1"),
                vec![failed],
                1,
            ))
        });

        let repo = repo(
            client,
            resolver_for(ResourceKind::ServiceInstance, "instance-1", "instance-ns"),
            permissions_for(&[]),
        );
        let err = repo
            .create_service_binding(
                &identity_named("alice"),
                CreateServiceBindingMessage {
                    service_instance_guid: "instance-1".to_string(),
                    app_guid: "app-1".to_string(),
                    display_name: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExternalOperationFailed { .. }));
    }

    /// Story: listing is permission-scoped and filterable by app
    #[tokio::test]
    async fn story_list_filters_by_app() {
        let mut client = MockBindingClient::new();
        client.expect_list_bindings().returning(|_, ns| {
            Ok(vec![
                binding_in(ns, "b-1", "instance-1", "app-1"),
                binding_in(ns, "b-2", "instance-2", "app-2"),
            ])
        });

        let repo = repo(
            client,
            resolver_for(ResourceKind::ServiceBinding, "unused", "unused"),
            permissions_for(&["space-1"]),
        );
        let bindings = repo
            .list_service_bindings(
                &identity_named("alice"),
                ListServiceBindingsMessage {
                    app_guids: vec!["app-2".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name_any(), "b-2");
    }

    /// Story: get resolves the binding's own namespace by GUID
    #[tokio::test]
    async fn story_get_resolves_namespace() {
        let mut client = MockBindingClient::new();
        client
            .expect_get_binding()
            .withf(|_, ns, name| ns == "space-ns" && name == "b-1")
            .times(1)
            .returning(|_, ns, name| Ok(binding_in(ns, name, "instance-1", "app-1")));

        let repo = repo(
            client,
            resolver_for(ResourceKind::ServiceBinding, "b-1", "space-ns"),
            permissions_for(&[]),
        );
        repo.get_service_binding(&identity_named("alice"), "b-1")
            .await
            .unwrap();
    }
}
