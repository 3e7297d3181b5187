//! Identity-scoped repositories over the object store
//!
//! Repositories own the translation from API-level messages (opaque GUIDs,
//! filter lists) into namespace-scoped store operations executed as the
//! caller. They write desired state only; controllers own status.

mod app_repo;
mod condition_awaiter;
mod namespace_resolver;
mod service_binding_repo;

pub use app_repo::{
    AppClient, AppRepo, CreateAppMessage, KubeAppClient, ListAppsMessage, PatchAppMetadataMessage,
};
pub use condition_awaiter::{AwaitConfig, ConditionAwaiter, KubeObjectGetter, ObjectGetter};
pub use namespace_resolver::{
    ClusterObjectLister, KubeClusterObjectLister, NamespaceResolver, ResourceKind,
};
pub use service_binding_repo::{
    BindingClient, CreateServiceBindingMessage, KubeBindingClient, ListServiceBindingsMessage,
    ServiceBindingRepo,
};
