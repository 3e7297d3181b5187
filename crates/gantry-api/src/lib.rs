//! Identity-scoped data access layer for the Gantry API tier
//!
//! Everything the REST handlers touch goes through this crate: raw
//! credentials become a comparable [`authorization::Identity`], the
//! [`authorization::UserClientFactory`] builds store clients that act as
//! that identity, and the repositories translate opaque resource GUIDs into
//! namespace-scoped reads and writes. The object store is the only source of
//! truth; every cache here is a rebuildable projection with bounded
//! staleness.

#![deny(missing_docs)]

pub mod authorization;
pub mod repositories;

pub use authorization::{Identity, IdentityScheme, NamespacePermissions, UserClientFactory};
pub use repositories::{
    AppRepo, ConditionAwaiter, NamespaceResolver, ResourceKind, ServiceBindingRepo,
};
