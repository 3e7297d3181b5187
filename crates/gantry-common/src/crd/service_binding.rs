//! GantryServiceBinding Custom Resource Definition
//!
//! Binds an application to a service instance. The spec is written by the
//! API tier as the calling user; the status is owned exclusively by the
//! managed binding controller, which drives the asynchronous broker bind
//! protocol and records its progress here so a restarted process resumes
//! where it left off.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, HasConditions, ObjectRef};

/// Specification for a GantryServiceBinding
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gantry.dev",
    version = "v1alpha1",
    kind = "GantryServiceBinding",
    plural = "gantryservicebindings",
    namespaced,
    status = "GantryServiceBindingStatus",
    printcolumn = r#"{"name":"Instance","type":"string","jsonPath":".spec.serviceRef.name"}"#,
    printcolumn = r#"{"name":"App","type":"string","jsonPath":".spec.appRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GantryServiceBindingSpec {
    /// The service instance being bound
    pub service_ref: ObjectRef,

    /// The application being bound to the instance
    pub app_ref: ObjectRef,

    /// Optional human-facing binding name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Status for a GantryServiceBinding, owned by the binding controller
///
/// At most one broker operation is in flight at a time; a non-empty
/// `credentials_secret` means the bind succeeded and credentials were
/// materialized exactly once.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GantryServiceBindingStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Token for the broker operation currently in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_operation: Option<String>,

    /// Name of the secret holding raw broker credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<String>,

    /// Name of the derived workload-projection binding secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_secret: Option<String>,

    /// Generation most recently acted on by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl HasConditions for GantryServiceBinding {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    fn generation(&self) -> Option<i64> {
        self.metadata.generation
    }
}
