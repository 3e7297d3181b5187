//! Custom Resource Definitions for Gantry
//!
//! All platform state lives in these declarative resources. The API tier
//! writes specs as the calling user; controllers own the status subresources.

mod app;
mod service_binding;
mod service_instance;
mod types;

pub use app::{AppState, GantryApp, GantryAppSpec, GantryAppStatus, Lifecycle, LifecycleData};
pub use service_binding::{
    GantryServiceBinding, GantryServiceBindingSpec, GantryServiceBindingStatus,
};
pub use service_instance::{
    GantryServiceInstance, GantryServiceInstanceSpec, GantryServiceInstanceStatus,
};
pub use types::{
    is_condition_true, set_condition, Condition, ConditionStatus, HasConditions, ObjectRef,
};
