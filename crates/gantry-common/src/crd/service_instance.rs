//! GantryServiceInstance Custom Resource Definition
//!
//! A provisioned service from an external broker's catalog. Bindings
//! reference an instance by name; the instance carries the broker catalog
//! identifiers the binding protocol needs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, HasConditions};

/// Specification for a GantryServiceInstance
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gantry.dev",
    version = "v1alpha1",
    kind = "GantryServiceInstance",
    plural = "gantryserviceinstances",
    namespaced,
    status = "GantryServiceInstanceStatus",
    printcolumn = r#"{"name":"DisplayName","type":"string","jsonPath":".spec.displayName"}"#,
    printcolumn = r#"{"name":"Plan","type":"string","jsonPath":".spec.planId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GantryServiceInstanceSpec {
    /// Human-facing instance name, unique within the space
    pub display_name: String,

    /// Broker catalog service offering identifier
    pub service_id: String,

    /// Broker catalog plan identifier
    pub plan_id: String,

    /// Free-form tags surfaced to bound applications
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Status for a GantryServiceInstance, owned by the instance controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GantryServiceInstanceStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation most recently acted on by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl HasConditions for GantryServiceInstance {
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
