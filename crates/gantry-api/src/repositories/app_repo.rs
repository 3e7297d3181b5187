//! Application repository
//!
//! Translates GUID-addressed app operations from the REST tier into
//! namespace-scoped store calls executed as the caller. List operations are
//! scoped by the caller's authorized namespaces; get-by-GUID resolves the
//! owning namespace first and then lets the store's own access check decide.
//! The two boundaries must agree.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use tracing::{debug, instrument};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use gantry_common::collections::empty_or_contains;
use gantry_common::crd::{AppState, GantryApp, GantryAppSpec, Lifecycle};
use gantry_common::{Error, Result, APP_GUID_LABEL_KEY, READY_CONDITION, SPACE_GUID_LABEL_KEY};

use crate::authorization::{Identity, NamespacePermissions, UserClientFactory};

use super::condition_awaiter::{ConditionAwaiter, ObjectGetter};
use super::namespace_resolver::{NamespaceResolver, ResourceKind};

/// Message for creating an application in a space
#[derive(Clone, Debug, Default)]
pub struct CreateAppMessage {
    /// Human-facing application name, unique within the space
    pub display_name: String,
    /// GUID of the space (which names the space namespace)
    pub space_guid: String,
    /// Initial desired run state
    pub desired_state: AppState,
    /// Build and run lifecycle
    pub lifecycle: Lifecycle,
    /// User-provided environment variables, materialized as a secret
    pub environment_variables: BTreeMap<String, String>,
    /// Labels to set on the app
    pub labels: BTreeMap<String, String>,
    /// Annotations to set on the app
    pub annotations: BTreeMap<String, String>,
}

/// Filters for listing applications; empty filters match everything
#[derive(Clone, Debug, Default)]
pub struct ListAppsMessage {
    /// Display names to match
    pub names: Vec<String>,
    /// App GUIDs to match
    pub guids: Vec<String>,
    /// Space GUIDs to match
    pub space_guids: Vec<String>,
    /// Raw label selector passed through to the store
    pub label_selector: Option<String>,
}

/// Label/annotation updates; a `None` value deletes the key
#[derive(Clone, Debug, Default)]
pub struct PatchAppMetadataMessage {
    /// Label updates
    pub labels: BTreeMap<String, Option<String>>,
    /// Annotation updates
    pub annotations: BTreeMap<String, Option<String>>,
}

/// Trait abstracting the scoped store calls the app repository makes
///
/// Every method runs as the given identity; the store enforces that
/// identity's access boundary server-side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppClient: Send + Sync {
    /// Get an app by namespace and name, as the caller
    async fn get_app(&self, identity: &Identity, namespace: &str, name: &str) -> Result<GantryApp>;
    /// List apps in one namespace, as the caller
    async fn list_apps(
        &self,
        identity: &Identity,
        namespace: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<GantryApp>>;
    /// Create an app, as the caller
    async fn create_app(
        &self,
        identity: &Identity,
        namespace: &str,
        app: GantryApp,
    ) -> Result<GantryApp>;
    /// Merge-patch an app, as the caller
    async fn patch_app(
        &self,
        identity: &Identity,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<GantryApp>;
    /// Delete an app, as the caller
    async fn delete_app(&self, identity: &Identity, namespace: &str, name: &str) -> Result<()>;
    /// Create a secret, as the caller
    async fn create_secret(
        &self,
        identity: &Identity,
        namespace: &str,
        secret: Secret,
    ) -> Result<Secret>;
    /// Get a secret, as the caller
    async fn get_secret(&self, identity: &Identity, namespace: &str, name: &str) -> Result<Secret>;
}

/// Real client that builds a scoped kube client per call
pub struct KubeAppClient {
    factory: Arc<UserClientFactory>,
}

impl KubeAppClient {
    /// Create a client over the given scoped-client factory
    pub fn new(factory: Arc<UserClientFactory>) -> Self {
        Self { factory }
    }

    async fn apps(&self, identity: &Identity, namespace: &str) -> Result<Api<GantryApp>> {
        let client = self.factory.build_client(identity).await?;
        Ok(Api::namespaced(client, namespace))
    }

    async fn secrets(&self, identity: &Identity, namespace: &str) -> Result<Api<Secret>> {
        let client = self.factory.build_client(identity).await?;
        Ok(Api::namespaced(client, namespace))
    }
}

#[async_trait]
impl AppClient for KubeAppClient {
    async fn get_app(&self, identity: &Identity, namespace: &str, name: &str) -> Result<GantryApp> {
        self.apps(identity, namespace)
            .await?
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, "GantryApp"))
    }

    async fn list_apps(
        &self,
        identity: &Identity,
        namespace: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<GantryApp>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(&selector);
        }
        let list = self
            .apps(identity, namespace)
            .await?
            .list(&params)
            .await
            .map_err(|e| Error::from_kube(e, "GantryApp"))?;
        Ok(list.items)
    }

    async fn create_app(
        &self,
        identity: &Identity,
        namespace: &str,
        app: GantryApp,
    ) -> Result<GantryApp> {
        self.apps(identity, namespace)
            .await?
            .create(&PostParams::default(), &app)
            .await
            .map_err(|e| Error::from_kube(e, "GantryApp"))
    }

    async fn patch_app(
        &self,
        identity: &Identity,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<GantryApp> {
        self.apps(identity, namespace)
            .await?
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, "GantryApp"))
    }

    async fn delete_app(&self, identity: &Identity, namespace: &str, name: &str) -> Result<()> {
        self.apps(identity, namespace)
            .await?
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(e, "GantryApp"))?;
        Ok(())
    }

    async fn create_secret(
        &self,
        identity: &Identity,
        namespace: &str,
        secret: Secret,
    ) -> Result<Secret> {
        self.secrets(identity, namespace)
            .await?
            .create(&PostParams::default(), &secret)
            .await
            .map_err(|e| Error::from_kube(e, "Secret"))
    }

    async fn get_secret(&self, identity: &Identity, namespace: &str, name: &str) -> Result<Secret> {
        self.secrets(identity, namespace)
            .await?
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, "Secret"))
    }
}

/// Identity-scoped application repository
pub struct AppRepo {
    client: Arc<dyn AppClient>,
    resolver: Arc<NamespaceResolver>,
    permissions: Arc<NamespacePermissions>,
    awaiter: ConditionAwaiter,
}

impl AppRepo {
    /// Compose a repository from its collaborators
    pub fn new(
        client: Arc<dyn AppClient>,
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

    /// Get an app by GUID
    ///
    /// The owning namespace is resolved first; the get itself runs as the
    /// caller, so the store rejects it when the caller lacks access there.
    #[instrument(skip(self, identity), fields(guid = %guid))]
    pub async fn get_app(&self, identity: &Identity, guid: &str) -> Result<GantryApp> {
        let namespace = self.resolver.namespace_for(guid, ResourceKind::App).await?;
        self.client.get_app(identity, &namespace, guid).await
    }

    /// List apps across the caller's authorized namespaces
    ///
    /// A namespace the permission set names but the store forbids is skipped
    /// rather than failing the whole list; role bindings can briefly outrun
    /// namespace access during org/space teardown.
    #[instrument(skip(self, identity, message))]
    pub async fn list_apps(
        &self,
        identity: &Identity,
        message: ListAppsMessage,
    ) -> Result<Vec<GantryApp>> {
        let namespaces = self.permissions.authorized_namespaces(identity).await?;

        let mut apps = Vec::new();
        for namespace in &namespaces {
            match self
                .client
                .list_apps(identity, namespace, message.label_selector.clone())
                .await
            {
                Ok(list) => apps.extend(list),
                Err(Error::Forbidden { .. }) => {
                    debug!(namespace = %namespace, "skipping forbidden namespace in list");
                }
                Err(e) => return Err(e),
            }
        }

        apps.retain(|app| {
            empty_or_contains(&message.guids, &app.name_any())
                && empty_or_contains(&message.names, &app.spec.display_name)
                && empty_or_contains(&message.space_guids, &app.namespace().unwrap_or_default())
        });
        apps.sort_by(|a, b| a.spec.display_name.cmp(&b.spec.display_name));
        Ok(apps)
    }

    /// Get an app by display name within a space
    ///
    /// Display names are unique per space; two matches is the same
    /// correctness violation as a duplicated GUID and is fatal.
    #[instrument(skip(self, identity), fields(name = %name, space = %space_guid))]
    pub async fn get_app_by_name_and_space(
        &self,
        identity: &Identity,
        name: &str,
        space_guid: &str,
    ) -> Result<GantryApp> {
        let apps = self.client.list_apps(identity, space_guid, None).await?;
        let mut matches: Vec<GantryApp> = apps
            .into_iter()
            .filter(|a| a.spec.display_name == name)
            .collect();

        match matches.len() {
            0 => Err(Error::not_found("GantryApp")),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::duplicate_records("GantryApp")),
        }
    }

    /// Create an app in a space, materializing its environment secret
    #[instrument(skip(self, identity, message), fields(space = %message.space_guid))]
    pub async fn create_app(
        &self,
        identity: &Identity,
        message: CreateAppMessage,
    ) -> Result<GantryApp> {
        // Space namespaces are named by the space GUID
        let namespace = message.space_guid.clone();
        let guid = Uuid::new_v4().to_string();
        let env_secret_name = format!("{guid}-env");

        let mut app = GantryApp::new(
            &guid,
            GantryAppSpec {
                display_name: message.display_name,
                desired_state: message.desired_state,
                env_secret_name: Some(env_secret_name.clone()),
                lifecycle: message.lifecycle,
                current_droplet_ref: None,
            },
        );
        app.metadata.namespace = Some(namespace.clone());
        let mut labels = message.labels;
        labels.insert(SPACE_GUID_LABEL_KEY.to_string(), message.space_guid);
        app.metadata.labels = Some(labels);
        if !message.annotations.is_empty() {
            app.metadata.annotations = Some(message.annotations);
        }

        let created = self.client.create_app(identity, &namespace, app).await?;

        let secret = env_secret(&created, &env_secret_name, &message.environment_variables);
        self.client.create_secret(identity, &namespace, secret).await?;

        Ok(created)
    }

    /// Patch an app's labels and annotations; `None` values delete keys
    #[instrument(skip(self, identity, message), fields(guid = %guid))]
    pub async fn patch_app_metadata(
        &self,
        identity: &Identity,
        guid: &str,
        message: PatchAppMetadataMessage,
    ) -> Result<GantryApp> {
        let namespace = self.resolver.namespace_for(guid, ResourceKind::App).await?;
        let patch = serde_json::json!({
            "metadata": {
                "labels": message.labels,
                "annotations": message.annotations,
            }
        });
        self.client.patch_app(identity, &namespace, guid, patch).await
    }

    /// Set the app's desired run state
    ///
    /// Starting is advertised as synchronous: the call returns once the
    /// workloads controller reports `Ready` for the new generation, or the
    /// awaiter's deadline converts the wait into a timeout.
    #[instrument(skip(self, identity), fields(guid = %guid, state = ?state))]
    pub async fn set_desired_state(
        &self,
        identity: &Identity,
        guid: &str,
        state: AppState,
    ) -> Result<GantryApp> {
        let namespace = self.resolver.namespace_for(guid, ResourceKind::App).await?;
        let patch = serde_json::json!({"spec": {"desiredState": state}});
        let app = self.client.patch_app(identity, &namespace, guid, patch).await?;

        if state == AppState::Started {
            let getter = ScopedAppGetter {
                client: self.client.clone(),
                identity: identity.clone(),
            };
            return self
                .awaiter
                .await_condition(&getter, &namespace, guid, READY_CONDITION, None)
                .await;
        }
        Ok(app)
    }

    /// Delete an app; derived resources follow via owner references
    #[instrument(skip(self, identity), fields(guid = %guid))]
    pub async fn delete_app(&self, identity: &Identity, guid: &str) -> Result<()> {
        let namespace = self.resolver.namespace_for(guid, ResourceKind::App).await?;
        self.client.delete_app(identity, &namespace, guid).await
    }

    /// Read the app's environment variables from its env secret
    #[instrument(skip(self, identity), fields(guid = %guid))]
    pub async fn get_app_env(
        &self,
        identity: &Identity,
        guid: &str,
    ) -> Result<BTreeMap<String, String>> {
        let namespace = self.resolver.namespace_for(guid, ResourceKind::App).await?;
        let app = self.client.get_app(identity, &namespace, guid).await?;

        let Some(secret_name) = app.spec.env_secret_name else {
            return Ok(BTreeMap::new());
        };
        let secret = self.client.get_secret(identity, &namespace, &secret_name).await?;

        let mut env = BTreeMap::new();
        for (key, value) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(value.0).map_err(|_| {
                Error::internal_with_context("app-env", format!("variable {key} is not UTF-8"))
            })?;
            env.insert(key, value);
        }
        Ok(env)
    }
}

/// Adapter letting the awaiter poll apps as the caller
struct ScopedAppGetter {
    client: Arc<dyn AppClient>,
    identity: Identity,
}

#[async_trait]
impl ObjectGetter<GantryApp> for ScopedAppGetter {
    async fn get(&self, namespace: &str, name: &str) -> Result<GantryApp> {
        self.client.get_app(&self.identity, namespace, name).await
    }
}

fn env_secret(app: &GantryApp, name: &str, vars: &BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: app.namespace(),
            labels: Some(BTreeMap::from([(
                APP_GUID_LABEL_KEY.to_string(),
                app.name_any(),
            )])),
            owner_references: Some(vec![app_owner_reference(app)]),
            ..Default::default()
        },
        string_data: Some(vars.clone()),
        ..Default::default()
    }
}

fn app_owner_reference(app: &GantryApp) -> OwnerReference {
    OwnerReference {
        api_version: GantryApp::api_version(&()).into_owned(),
        kind: GantryApp::kind(&()).into_owned(),
        name: app.name_any(),
        uid: app.uid().unwrap_or_default(),
        ..Default::default()
    }
}
