//! Service broker protocol client
//!
//! Implements the consumer side of the asynchronous bind protocol: issue a
//! bind, poll the last operation while the broker works, fetch the binding
//! payload once it succeeds. Transport-level failures are retryable; a
//! broker that answers and says no is terminal.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use gantry_common::{Error, Result};

/// Broker endpoint and credentials
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Base URL of the broker (no trailing slash)
    pub url: String,
    /// Basic-auth username
    pub username: String,
    /// Basic-auth password
    pub password: String,
}

/// Identifies a binding to the broker
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingRef {
    /// GUID of the binding (ours)
    pub binding_guid: String,
    /// GUID of the service instance at the broker
    pub instance_guid: String,
    /// Broker service offering identifier
    pub service_id: String,
    /// Broker plan identifier
    pub plan_id: String,
}

/// A bind request, carrying the app the credentials are for
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindRequest {
    /// Binding identity at the broker
    pub binding: BindingRef,
    /// GUID of the app being bound
    pub app_guid: String,
}

/// Broker credentials payload: arbitrary key/value provisioning output
pub type Credentials = BTreeMap<String, serde_json::Value>;

/// Outcome of a bind call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindResponse {
    /// Credentials, present when the broker bound synchronously
    pub credentials: Option<Credentials>,
    /// Operation token to poll with, for an asynchronous bind
    pub operation: Option<String>,
    /// Whether the bind finished within this call
    pub complete: bool,
}

/// State of an in-flight broker operation
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum LastOperationState {
    /// The broker is still working
    #[serde(rename = "in progress")]
    InProgress,
    /// The operation completed successfully
    #[serde(rename = "succeeded")]
    Succeeded,
    /// The operation failed; the broker will not retry
    #[serde(rename = "failed")]
    Failed,
}

/// Last-operation poll result
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LastOperation {
    /// Operation state
    pub state: LastOperationState,
    /// Human-readable progress or failure description
    #[serde(default)]
    pub description: Option<String>,
}

/// Trait abstracting the broker calls the reconciler makes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Request a binding; may complete synchronously or return an operation token
    async fn bind(&self, request: &BindRequest) -> Result<BindResponse>;
    /// Poll the state of an asynchronous bind
    async fn get_last_operation(
        &self,
        binding: &BindingRef,
        operation: &str,
    ) -> Result<LastOperation>;
    /// Fetch the credentials of a successfully bound binding
    async fn get_binding(&self, binding: &BindingRef) -> Result<Credentials>;
}

/// HTTP broker client speaking the Open Service Broker wire shape
pub struct HttpBrokerClient {
    http: reqwest::Client,
    config: BrokerConfig,
}

#[derive(Deserialize)]
struct BindBody {
    #[serde(default)]
    credentials: Option<Credentials>,
    #[serde(default)]
    operation: Option<String>,
}

#[derive(Deserialize)]
struct GetBindingBody {
    #[serde(default)]
    credentials: Credentials,
}

impl HttpBrokerClient {
    /// Create a client for the configured broker
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn binding_url(&self, binding: &BindingRef) -> String {
        format!(
            "{}/v2/service_instances/{}/service_bindings/{}",
            self.config.url, binding.instance_guid, binding.binding_guid
        )
    }

    fn transport_error(e: reqwest::Error) -> Error {
        Error::internal_with_context("broker", e.to_string())
    }

    async fn broker_rejection(reason: &str, response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Error::external_operation_failed(reason, format!("broker returned {status}: {body}"))
    }
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    #[instrument(skip(self, request), fields(binding = %request.binding.binding_guid))]
    async fn bind(&self, request: &BindRequest) -> Result<BindResponse> {
        let body = serde_json::json!({
            "service_id": request.binding.service_id,
            "plan_id": request.binding.plan_id,
            "app_guid": request.app_guid,
        });

        let response = self
            .http
            .put(self.binding_url(&request.binding))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&[("accepts_incomplete", "true")])
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let body: BindBody = response.json().await.map_err(Self::transport_error)?;
                debug!("broker bound synchronously");
                Ok(BindResponse {
                    credentials: body.credentials,
                    operation: None,
                    complete: true,
                })
            }
            StatusCode::ACCEPTED => {
                let body: BindBody = response.json().await.map_err(Self::transport_error)?;
                debug!(operation = ?body.operation, "broker accepted asynchronous bind");
                Ok(BindResponse {
                    credentials: None,
                    operation: body.operation,
                    complete: false,
                })
            }
            _ => Err(Self::broker_rejection("BindFailed", response).await),
        }
    }

    #[instrument(skip(self, binding), fields(binding = %binding.binding_guid, operation = %operation))]
    async fn get_last_operation(
        &self,
        binding: &BindingRef,
        operation: &str,
    ) -> Result<LastOperation> {
        let response = self
            .http
            .get(format!("{}/last_operation", self.binding_url(binding)))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&[
                ("service_id", binding.service_id.as_str()),
                ("plan_id", binding.plan_id.as_str()),
                ("operation", operation),
            ])
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::broker_rejection("LastOperationFailed", response).await);
        }
        response.json().await.map_err(Self::transport_error)
    }

    #[instrument(skip(self, binding), fields(binding = %binding.binding_guid))]
    async fn get_binding(&self, binding: &BindingRef) -> Result<Credentials> {
        let response = self
            .http
            .get(self.binding_url(binding))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::broker_rejection("GetBindingFailed", response).await);
        }
        let body: GetBindingBody = response.json().await.map_err(Self::transport_error)?;
        Ok(body.credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_operation_state_wire_names() {
        let op: LastOperation =
            serde_json::from_value(serde_json::json!({"state": "in progress"})).unwrap();
        assert_eq!(op.state, LastOperationState::InProgress);
        assert!(op.description.is_none());

        let op: LastOperation = serde_json::from_value(
            serde_json::json!({"state": "failed", "description": "quota exceeded"}),
        )
        .unwrap();
        assert_eq!(op.state, LastOperationState::Failed);
        assert_eq!(op.description.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_binding_url_shape() {
        let client = HttpBrokerClient::new(BrokerConfig {
            url: "https://broker.example.com".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
        });
        let url = client.binding_url(&BindingRef {
            binding_guid: "b-1".to_string(),
            instance_guid: "i-1".to_string(),
            ..Default::default()
        });
        assert_eq!(
            url,
            "https://broker.example.com/v2/service_instances/i-1/service_bindings/b-1"
        );
    }
}
