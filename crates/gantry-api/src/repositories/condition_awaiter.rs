//! Bounded polling for a status condition to become current
//!
//! A patch to the store returns before any controller has acted, yet several
//! API operations are advertised as synchronous. This awaiter bridges the
//! gap: it re-gets the object at a fixed interval until the awaited
//! condition is `True` with a current `observed_generation`, a terminal
//! failure condition appears, or the deadline elapses. The deadline is
//! mandatory; dropping the returned future stops polling (these are plain
//! gets, no watch to leak).

use std::time::Duration;

use async_trait::async_trait;
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use gantry_common::{is_condition_true, Error, HasConditions, Result};

/// Trait abstracting the single get used by the poll loop
///
/// The implementation carries a scoped client, so the caller's own access
/// boundary is enforced on every poll.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectGetter<K: Send + Sync + 'static>: Send + Sync {
    /// Fetch the object by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;
}

/// Real getter over a typed namespaced resource
pub struct KubeObjectGetter<K> {
    client: Client,
    _marker: std::marker::PhantomData<K>,
}

impl<K> KubeObjectGetter<K> {
    /// Wrap the given (identity-scoped) client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<K> ObjectGetter<K> for KubeObjectGetter<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
    K: Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, K::kind(&K::DynamicType::default()).as_ref()))
    }
}

/// Polling configuration
#[derive(Clone, Copy, Debug)]
pub struct AwaitConfig {
    /// Hard deadline for the whole wait
    pub timeout: Duration,
    /// Fixed interval between gets
    pub poll_interval: Duration,
}

impl Default for AwaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Polls an object until a condition becomes current, terminal, or times out
#[derive(Clone, Copy, Debug, Default)]
pub struct ConditionAwaiter {
    config: AwaitConfig,
}

impl ConditionAwaiter {
    /// Create an awaiter with the given polling configuration
    pub fn new(config: AwaitConfig) -> Self {
        Self { config }
    }

    /// Wait for `condition_type` to be `True` at the current generation
    ///
    /// If `failure_condition` is given and becomes `True` (at the current
    /// generation) first, the wait ends immediately with
    /// [`Error::ExternalOperationFailed`] carrying that condition's reason
    /// and message — distinguishable from a timeout, which only says the
    /// object was still progressing when the deadline hit.
    #[instrument(skip(self, getter), fields(namespace = %namespace, name = %name, condition = %condition_type))]
    pub async fn await_condition<K>(
        &self,
        getter: &dyn ObjectGetter<K>,
        namespace: &str,
        name: &str,
        condition_type: &str,
        failure_condition: Option<&str>,
    ) -> Result<K>
    where
        K: HasConditions + Send + Sync + 'static,
    {
        let poll = self.poll_until_settled(getter, namespace, name, condition_type, failure_condition);

        match tokio::time::timeout(self.config.timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                format!("condition {condition_type} on {namespace}/{name}"),
                self.config.timeout,
            )),
        }
    }

    async fn poll_until_settled<K>(
        &self,
        getter: &dyn ObjectGetter<K>,
        namespace: &str,
        name: &str,
        condition_type: &str,
        failure_condition: Option<&str>,
    ) -> Result<K>
    where
        K: HasConditions + Send + Sync + 'static,
    {
        loop {
            let object = getter.get(namespace, name).await?;
            let generation = object.generation().unwrap_or(0);

            if let Some(failure_type) = failure_condition {
                if let Some(failed) = current_condition(&object, failure_type, generation) {
                    return Err(Error::external_operation_failed(
                        failed.reason.clone(),
                        failed.message.clone(),
                    ));
                }
            }

            if current_condition(&object, condition_type, generation).is_some() {
                return Ok(object);
            }

            debug!("condition not yet current, polling again");
            sleep(self.config.poll_interval).await;
        }
    }
}

/// The condition of this type, only if True at the object's own generation
fn current_condition<'a, K: HasConditions>(
    object: &'a K,
    condition_type: &str,
    generation: i64,
) -> Option<&'a gantry_common::Condition> {
    if !is_condition_true(object.conditions(), condition_type) {
        return None;
    }
    object
        .conditions()
        .iter()
        .find(|c| c.type_ == condition_type && c.observed_generation == generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_common::crd::{GantryApp, GantryAppSpec, GantryAppStatus};
    use gantry_common::{Condition, ConditionStatus, READY_CONDITION};
    use kube::core::ObjectMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn app(generation: i64, conditions: Vec<Condition>) -> GantryApp {
        let mut app = GantryApp::new("app-guid", GantryAppSpec::default());
        app.metadata = ObjectMeta {
            name: Some("app-guid".to_string()),
            namespace: Some("space-ns".to_string()),
            generation: Some(generation),
            ..Default::default()
        };
        app.status = Some(GantryAppStatus {
            conditions,
            observed_generation: Some(generation),
        });
        app
    }

    fn condition(type_: &str, status: ConditionStatus, generation: i64) -> Condition {
        Condition::new(type_, status, "Tested", "", generation)
    }

    fn awaiter() -> ConditionAwaiter {
        ConditionAwaiter::new(AwaitConfig {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        })
    }

    /// Story: a True condition at the current generation returns the object
    #[tokio::test(start_paused = true)]
    async fn story_current_true_condition_succeeds() {
        let mut getter = MockObjectGetter::<GantryApp>::new();
        getter.expect_get().times(1).returning(|_, _| {
            Ok(app(3, vec![condition(READY_CONDITION, ConditionStatus::True, 3)]))
        });

        let result = awaiter()
            .await_condition(&getter, "space-ns", "app-guid", READY_CONDITION, None)
            .await;
        assert!(result.is_ok());
    }

    /// Story: a stale observed generation keeps the poll going
    #[tokio::test(start_paused = true)]
    async fn story_stale_generation_is_not_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_mock = calls.clone();
        let mut getter = MockObjectGetter::<GantryApp>::new();
        getter.expect_get().times(2).returning(move |_, _| {
            let n = calls_in_mock.fetch_add(1, Ordering::SeqCst);
            // First get: condition from an older spec edit; second: current
            let observed = if n == 0 { 2 } else { 3 };
            Ok(app(
                3,
                vec![condition(READY_CONDITION, ConditionStatus::True, observed)],
            ))
        });

        let result = awaiter()
            .await_condition(&getter, "space-ns", "app-guid", READY_CONDITION, None)
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Story: a terminal failure condition short-circuits the wait
    #[tokio::test(start_paused = true)]
    async fn story_failure_condition_stops_polling() {
        let mut getter = MockObjectGetter::<GantryApp>::new();
        getter.expect_get().times(1).returning(|_, _| {
            let mut failed = condition("BindingFailed", ConditionStatus::True, 3);
            failed.reason = "BindFailed".to_string();
            failed.message = "broker rejected the bind".to_string();
            Ok(app(3, vec![failed]))
        });

        let err = awaiter()
            .await_condition(
                &getter,
                "space-ns",
                "app-guid",
                READY_CONDITION,
                Some("BindingFailed"),
            )
            .await
            .unwrap_err();
        match err {
            Error::ExternalOperationFailed { reason, message } => {
                assert_eq!(reason, "BindFailed");
                assert_eq!(message, "broker rejected the bind");
            }
            other => panic!("expected ExternalOperationFailed, got {other:?}"),
        }
    }

    /// Story: a False failure condition does not end the wait
    #[tokio::test(start_paused = true)]
    async fn story_false_failure_condition_is_ignored() {
        let mut getter = MockObjectGetter::<GantryApp>::new();
        getter.expect_get().returning(|_, _| {
            Ok(app(
                3,
                vec![
                    condition("BindingFailed", ConditionStatus::False, 3),
                    condition(READY_CONDITION, ConditionStatus::True, 3),
                ],
            ))
        });

        let result = awaiter()
            .await_condition(
                &getter,
                "space-ns",
                "app-guid",
                READY_CONDITION,
                Some("BindingFailed"),
            )
            .await;
        assert!(result.is_ok());
    }

    /// Story: the deadline converts "still progressing" into a timeout
    #[tokio::test(start_paused = true)]
    async fn story_deadline_yields_timeout_not_failure() {
        let mut getter = MockObjectGetter::<GantryApp>::new();
        getter.expect_get().returning(|_, _| Ok(app(3, vec![])));

        let err = awaiter()
            .await_condition(&getter, "space-ns", "app-guid", READY_CONDITION, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    /// Story: get errors propagate instead of being swallowed by the loop
    #[tokio::test(start_paused = true)]
    async fn story_get_error_propagates() {
        let mut getter = MockObjectGetter::<GantryApp>::new();
        getter
            .expect_get()
            .times(1)
            .returning(|_, _| Err(Error::not_found("GantryApp")));

        let err = awaiter()
            .await_condition(&getter, "space-ns", "app-guid", READY_CONDITION, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
