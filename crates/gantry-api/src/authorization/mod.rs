//! Caller identity, namespace permissions, and identity-scoped clients
//!
//! No claim inside a credential is trusted for authorization: the identity
//! only says *who* is calling, the role bindings in the store say *where*
//! they may operate, and the scoped client makes the store itself enforce
//! that boundary on every call.

mod client_factory;
mod identity;
mod permissions;

pub use client_factory::{ClientFactoryConfig, UserClientFactory};
pub use identity::{Identity, IdentityScheme};
pub use permissions::{NamespacePermissions, PermissionsConfig, RoleBindingLister};

#[cfg(test)]
pub use permissions::MockRoleBindingLister;
