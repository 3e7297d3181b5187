//! Controller runner for the managed binding controller

use std::sync::Arc;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;

use gantry_common::crd::GantryServiceBinding;
use k8s_openapi::api::core::v1::Secret;

use crate::broker::{BrokerConfig, HttpBrokerClient};
use crate::controller::{error_policy, reconcile, BindingContext, BindingKubeClientImpl};

/// Watcher timeout (seconds) - must be less than the client read timeout (30s)
/// so the API server closes idle watches before the client gives up on them.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the managed binding controller until shutdown
///
/// Watches bindings (and the secrets they own, so a deleted secret triggers
/// re-materialization) and drives the broker bind protocol.
pub async fn run_binding_controller(client: Client, broker: BrokerConfig) {
    let bindings: Api<GantryServiceBinding> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());

    let ctx = Arc::new(BindingContext {
        kube: Arc::new(BindingKubeClientImpl::new(client)),
        broker: Arc::new(HttpBrokerClient::new(broker)),
    });

    tracing::info!("- GantryServiceBinding controller");

    Controller::new(
        bindings,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .owns(secrets, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(|result| {
        match result {
            Ok(action) => tracing::debug!(?action, "ServiceBinding reconciliation completed"),
            Err(e) => tracing::error!(error = ?e, "ServiceBinding reconciliation error"),
        }
        std::future::ready(())
    })
    .await;
}
