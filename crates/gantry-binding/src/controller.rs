//! Managed service binding controller implementation
//!
//! Reconciles GantryServiceBinding resources through a state machine:
//! Unrequested → Requested → Polling → Bound/Failed
//!
//! All progress is persisted in the binding's status. Reconcile may run any
//! number of times from any observed state and converges to the same
//! terminal status without duplicating broker calls or secrets:
//! - both secret names present → reconciled, nothing to do
//! - `BindingFailed` → terminal, waits for a spec change
//! - an operation token outstanding → poll, never re-bind

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use gantry_common::crd::{
    GantryServiceBinding, GantryServiceBindingStatus, GantryServiceInstance,
};
use gantry_common::{
    is_condition_true, set_condition, Condition, ConditionStatus, Error, Result,
    BINDING_FAILED_CONDITION, BINDING_REQUESTED_CONDITION, READY_CONDITION,
    SERVICE_BINDING_FINALIZER,
};

use crate::broker::{BindRequest, BindingRef, BrokerClient, Credentials, LastOperationState};
use crate::credentials::{binding_secret_name, credentials_secret, projection_secret};

/// Requeue interval while an asynchronous broker operation is in flight
const POLL_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue interval after a transient reconcile failure
const RETRY_REQUEUE: Duration = Duration::from_secs(30);

/// Trait abstracting the store calls the reconciler makes
///
/// These run as the controller's own service account; the reconciler is the
/// sole writer of binding status and the secrets derived from it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BindingKubeClient: Send + Sync {
    /// Get the service instance a binding references
    async fn get_service_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<GantryServiceInstance>;
    /// Merge-patch the binding's status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GantryServiceBindingStatus,
    ) -> Result<()>;
    /// Create a secret, treating "already exists" as success
    async fn ensure_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;
    /// Remove the binding controller's finalizer
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Real store client for the binding controller
pub struct BindingKubeClientImpl {
    client: Client,
}

impl BindingKubeClientImpl {
    /// Wrap the controller's kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BindingKubeClient for BindingKubeClientImpl {
    async fn get_service_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<GantryServiceInstance> {
        let api: Api<GantryServiceInstance> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, "GantryServiceInstance"))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GantryServiceBindingStatus,
    ) -> Result<()> {
        let api: Api<GantryServiceBinding> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, "GantryServiceBinding"))?;
        Ok(())
    }

    async fn ensure_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), secret).await {
            Ok(_) => Ok(()),
            // A previous reconcile already materialized it
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(Error::from_kube(e, "Secret")),
        }
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<GantryServiceBinding> = Api::namespaced(self.client.clone(), namespace);
        let binding = api
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, "GantryServiceBinding"))?;
        let finalizers: Vec<String> = binding
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != SERVICE_BINDING_FINALIZER)
            .collect();
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, "GantryServiceBinding"))?;
        Ok(())
    }
}

/// Shared context for the binding controller
pub struct BindingContext {
    /// Store access
    pub kube: Arc<dyn BindingKubeClient>,
    /// Broker access
    pub broker: Arc<dyn BrokerClient>,
}

/// Reconcile a GantryServiceBinding resource
#[instrument(skip(binding, ctx), fields(binding = %binding.name_any()))]
pub async fn reconcile(
    binding: Arc<GantryServiceBinding>,
    ctx: Arc<BindingContext>,
) -> Result<Action> {
    let name = binding.name_any();
    let namespace = binding
        .namespace()
        .ok_or_else(|| Error::validation("binding has no namespace"))?;

    if binding.metadata.deletion_timestamp.is_some() {
        // Deprovisioning has run by the time we get here; release our hold
        info!("binding deleted, releasing finalizer");
        ctx.kube.remove_finalizer(&namespace, &name).await?;
        return Ok(Action::await_change());
    }

    let mut status = binding.status.clone().unwrap_or_default();
    let generation = binding.metadata.generation.unwrap_or(0);

    if is_reconciled(&status) {
        debug!("binding already reconciled");
        return Ok(Action::await_change());
    }
    if is_condition_true(&status.conditions, BINDING_FAILED_CONDITION) {
        debug!("binding failed terminally, waiting for a spec change");
        return Ok(Action::await_change());
    }

    let instance = ctx
        .kube
        .get_service_instance(&namespace, &binding.spec.service_ref.name)
        .await?;
    let broker_ref = BindingRef {
        binding_guid: name.clone(),
        instance_guid: binding.spec.service_ref.name.clone(),
        service_id: instance.spec.service_id.clone(),
        plan_id: instance.spec.plan_id.clone(),
    };

    let credentials: Credentials;

    if !is_condition_true(&status.conditions, BINDING_REQUESTED_CONDITION) {
        let request = BindRequest {
            binding: broker_ref.clone(),
            app_guid: binding.spec.app_ref.name.clone(),
        };
        match ctx.broker.bind(&request).await {
            Err(e) if !e.is_retryable() => {
                warn!(error = %e, "broker rejected the bind");
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        BINDING_FAILED_CONDITION,
                        ConditionStatus::True,
                        "BindFailed",
                        e.to_string(),
                        generation,
                    ),
                );
                status.observed_generation = Some(generation);
                ctx.kube.patch_status(&namespace, &name, &status).await?;
                return Ok(Action::await_change());
            }
            // Transient; the error policy schedules a retry
            Err(e) => return Err(e),
            Ok(response) => {
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        BINDING_REQUESTED_CONDITION,
                        ConditionStatus::True,
                        "BindRequested",
                        "",
                        generation,
                    ),
                );
                status.observed_generation = Some(generation);

                if !response.complete {
                    let operation = response.operation.ok_or_else(|| {
                        Error::internal("broker accepted the bind without an operation token")
                    })?;
                    debug!(operation = %operation, "bind accepted, polling");
                    status.binding_operation = Some(operation);
                    ctx.kube.patch_status(&namespace, &name, &status).await?;
                    return Ok(Action::requeue(POLL_REQUEUE));
                }

                // Synchronous bind: persist the requested marker before the
                // secrets exist so a crash here never re-binds
                ctx.kube.patch_status(&namespace, &name, &status).await?;
                credentials = match response.credentials {
                    Some(c) => c,
                    None => ctx.broker.get_binding(&broker_ref).await?,
                };
            }
        }
    } else if let Some(operation) = status.binding_operation.clone() {
        // A bind is outstanding; poll it, never re-bind
        let last_op = ctx.broker.get_last_operation(&broker_ref, &operation).await?;
        match last_op.state {
            LastOperationState::InProgress => {
                debug!("bind operation still in progress");
                return Ok(Action::requeue(POLL_REQUEUE));
            }
            LastOperationState::Failed => {
                let message = last_op
                    .description
                    .unwrap_or_else(|| "the broker reported the bind as failed".to_string());
                warn!(message = %message, "bind operation failed");
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        BINDING_FAILED_CONDITION,
                        ConditionStatus::True,
                        "BindFailed",
                        message,
                        generation,
                    ),
                );
                status.observed_generation = Some(generation);
                ctx.kube.patch_status(&namespace, &name, &status).await?;
                return Ok(Action::await_change());
            }
            LastOperationState::Succeeded => {
                credentials = ctx.broker.get_binding(&broker_ref).await?;
            }
        }
    } else {
        // Requested without a token: the broker bound synchronously but the
        // process stopped before the secrets were written
        credentials = ctx.broker.get_binding(&broker_ref).await?;
    }

    let raw_secret = credentials_secret(&binding, &credentials)?;
    let derived_secret = projection_secret(&binding, &credentials)?;
    ctx.kube.ensure_secret(&namespace, &raw_secret).await?;
    ctx.kube.ensure_secret(&namespace, &derived_secret).await?;

    status.credentials_secret = Some(name.clone());
    status.binding_secret = Some(binding_secret_name(&name));
    set_condition(
        &mut status.conditions,
        Condition::new(
            READY_CONDITION,
            ConditionStatus::True,
            "Bound",
            "",
            generation,
        ),
    );
    status.observed_generation = Some(generation);
    ctx.kube.patch_status(&namespace, &name, &status).await?;

    info!("binding bound");
    Ok(Action::await_change())
}

/// Error policy for binding reconciliation
pub fn error_policy(
    binding: Arc<GantryServiceBinding>,
    error: &Error,
    _ctx: Arc<BindingContext>,
) -> Action {
    if error.is_retryable() {
        warn!(
            error = %error,
            binding = %binding.name_any(),
            "binding reconciliation failed, will retry"
        );
        Action::requeue(RETRY_REQUEUE)
    } else {
        error!(
            error = %error,
            binding = %binding.name_any(),
            "binding reconciliation failed permanently"
        );
        Action::await_change()
    }
}

/// Both secret names recorded means the bind materialized exactly once
fn is_reconciled(status: &GantryServiceBindingStatus) -> bool {
    status
        .credentials_secret
        .as_deref()
        .is_some_and(|s| !s.is_empty())
        && status.binding_secret.as_deref().is_some_and(|s| !s.is_empty())
}
