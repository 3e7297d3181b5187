//! GantryApp Custom Resource Definition
//!
//! A GantryApp is the declarative record of a platform application. Its name
//! is the app GUID the REST API hands out; the human-facing name lives in
//! `spec.display_name`. Apps are namespace-scoped to their space.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, HasConditions, ObjectRef};

/// Desired run state of an application
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    /// The app should be running
    Started,
    /// The app should be stopped
    #[default]
    Stopped,
}

/// How the platform builds and runs the application
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Lifecycle {
    /// The lifecycle type; only "buildpack" is currently supported
    #[serde(rename = "type")]
    pub type_: String,
    /// Details for the lifecycle
    pub data: LifecycleData,
}

/// Buildpack lifecycle details
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LifecycleData {
    /// Buildpacks to include in auto-detection; empty means detect from all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buildpacks: Vec<String>,
    /// Stack to use when building the app image
    #[serde(default)]
    pub stack: String,
}

/// Specification for a GantryApp
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gantry.dev",
    version = "v1alpha1",
    kind = "GantryApp",
    plural = "gantryapps",
    namespaced,
    status = "GantryAppStatus",
    printcolumn = r#"{"name":"DisplayName","type":"string","jsonPath":".spec.displayName"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.desiredState"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GantryAppSpec {
    /// Human-facing application name, unique within the space
    pub display_name: String,

    /// Desired run state
    #[serde(default)]
    pub desired_state: AppState,

    /// Name of the secret holding user-provided environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_secret_name: Option<String>,

    /// Build and run lifecycle
    #[serde(default)]
    pub lifecycle: Lifecycle,

    /// Reference to the droplet currently assigned to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_droplet_ref: Option<ObjectRef>,
}

/// Status for a GantryApp, owned by the app workloads controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GantryAppStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation most recently acted on by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl HasConditions for GantryApp {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_spec_roundtrip() {
        let spec: GantryAppSpec = serde_json::from_value(serde_json::json!({
            "displayName": "my-app",
            "desiredState": "STARTED",
            "lifecycle": {
                "type": "buildpack",
                "data": {"buildpacks": ["java"], "stack": "cflinuxfs4"}
            }
        }))
        .unwrap();

        assert_eq!(spec.display_name, "my-app");
        assert_eq!(spec.desired_state, AppState::Started);
        assert_eq!(spec.lifecycle.data.buildpacks, vec!["java"]);
    }

    #[test]
    fn test_desired_state_defaults_to_stopped() {
        let spec: GantryAppSpec =
            serde_json::from_value(serde_json::json!({"displayName": "quiet-app"})).unwrap();
        assert_eq!(spec.desired_state, AppState::Stopped);
    }
}
