//! Managed service binding controller
//!
//! Watches GantryServiceBinding resources and drives the asynchronous broker
//! bind protocol (bind, poll, fetch) to a terminal state, persisting every
//! step into the binding's status so a restarted process resumes exactly
//! where the last one stopped. The status is the only durable record of
//! progress; nothing here keeps state across reconciles.

#![deny(missing_docs)]

pub mod broker;
pub mod controller;
mod credentials;
mod runner;

pub use broker::{BrokerClient, BrokerConfig, HttpBrokerClient};
pub use controller::{
    error_policy, reconcile, BindingContext, BindingKubeClient, BindingKubeClientImpl,
};
pub use runner::run_binding_controller;
