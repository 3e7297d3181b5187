//! Common types for Gantry: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod collections;
pub mod crd;
pub mod error;

pub use crd::{is_condition_true, set_condition, Condition, ConditionStatus, HasConditions, ObjectRef};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all Gantry custom resources
pub const API_GROUP: &str = "gantry.dev";

/// API version for all Gantry custom resources
pub const API_VERSION: &str = "v1alpha1";

/// Namespace for Gantry system resources (broker credentials, operator)
pub const GANTRY_SYSTEM_NAMESPACE: &str = "gantry-system";

/// Label key prefix for Gantry-managed metadata
pub const LABEL_KEY_PREFIX: &str = "gantry.dev/";

/// Label carrying the GUID of the org that owns a namespace
pub const ORG_GUID_LABEL_KEY: &str = "gantry.dev/org-guid";

/// Label carrying the GUID of the space that owns a namespace
pub const SPACE_GUID_LABEL_KEY: &str = "gantry.dev/space-guid";

/// Label carrying the owning app GUID on derived resources (env secrets, processes)
pub const APP_GUID_LABEL_KEY: &str = "gantry.dev/app-guid";

/// Label carrying the service plan GUID on managed bindings
pub const PLAN_GUID_LABEL_KEY: &str = "gantry.dev/plan-guid";

/// Condition type set once a binding request has been issued to the broker
pub const BINDING_REQUESTED_CONDITION: &str = "BindingRequested";

/// Condition type marking a terminal broker-side binding failure
pub const BINDING_FAILED_CONDITION: &str = "BindingFailed";

/// Condition type marking a fully reconciled resource
pub const READY_CONDITION: &str = "Ready";

/// Finalizer held by the managed binding controller until deprovisioning runs
pub const SERVICE_BINDING_FINALIZER: &str = "gantry.dev/service-binding";
