//! Teardown registry and the guaranteed teardown scope.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, warn};

type TeardownFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// A registered teardown action.
struct TeardownAction {
    name: String,
    action: Box<dyn FnOnce() -> TeardownFuture + Send>,
}

/// Result of one executed teardown action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownOutcome {
    /// The name the action was registered under.
    pub name: String,
    /// `Err` carries the failure reason.
    pub result: Result<(), String>,
}

impl TeardownOutcome {
    /// Returns true if the action succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Registry for teardown actions executed in LIFO order.
#[derive(Default)]
pub struct TeardownRegistry {
    actions: Mutex<Vec<TeardownAction>>,
}

impl TeardownRegistry {
    /// Creates a new teardown registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a teardown action.
    pub fn register<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.actions.lock().push(TeardownAction {
            name: name.into(),
            action: Box::new(move || Box::pin(action())),
        });
    }

    /// Runs all registered actions in LIFO order.
    ///
    /// A failing or panicking action does not stop the ones registered
    /// before it. The registry is empty afterwards.
    pub async fn run_all(&self) -> Vec<TeardownOutcome> {
        let actions: Vec<TeardownAction> = std::mem::take(&mut *self.actions.lock());
        let mut outcomes = Vec::with_capacity(actions.len());

        for entry in actions.into_iter().rev() {
            let name = entry.name;
            info!(action = %name, "Running teardown");

            let result = match std::panic::catch_unwind(AssertUnwindSafe(entry.action)) {
                Ok(future) => match tokio::spawn(future).await {
                    Ok(result) => result,
                    Err(join_err) => Err(format!("Teardown task failed: {join_err}")),
                },
                Err(panic) => Err(format!("Teardown panicked: {}", panic_message(&*panic))),
            };

            if let Err(reason) = &result {
                warn!(action = %name, %reason, "Teardown failed, continuing");
            }
            outcomes.push(TeardownOutcome { name, result });
        }

        outcomes
    }

    /// Returns the number of pending actions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.actions.lock().len()
    }

    /// Returns pending action names in registration order.
    #[must_use]
    pub fn pending_names(&self) -> Vec<String> {
        self.actions.lock().iter().map(|a| a.name.clone()).collect()
    }
}

impl std::fmt::Debug for TeardownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownRegistry")
            .field("pending", &self.pending_names())
            .finish()
    }
}

/// Runs `body` with a fresh registry, then runs every registered action.
///
/// Teardown runs whether the body returns, fails or panics. A panic is
/// reported as `Err` with the panic message.
pub async fn with_teardown<F, Fut, T>(body: F) -> (Result<T, String>, Vec<TeardownOutcome>)
where
    F: FnOnce(Arc<TeardownRegistry>) -> Fut,
    Fut: Future<Output = T>,
{
    let registry = Arc::new(TeardownRegistry::new());
    let scoped = registry.clone();

    let result = AssertUnwindSafe(async move { body(scoped).await })
        .catch_unwind()
        .await
        .map_err(|panic| panic_message(&*panic));

    let outcomes = registry.run_all().await;
    (result, outcomes)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Recorder = futures::future::Ready<Result<(), String>>;

    fn recorder(
        order: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl FnOnce() -> Recorder {
        let order = order.clone();
        move || {
            order.lock().push(name);
            futures::future::ready(Ok(()))
        }
    }

    #[test]
    fn test_registry_register() {
        let registry = TeardownRegistry::new();
        registry.register("prerequisites", || async { Ok(()) });
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(registry.pending_names(), vec!["prerequisites".to_string()]);
    }

    #[tokio::test]
    async fn test_registry_lifo_order() {
        let registry = TeardownRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        registry.register("prerequisites", recorder(&order, "prerequisites"));
        registry.register("cluster", recorder(&order, "cluster"));
        registry.register("configuration", recorder(&order, "configuration"));

        let outcomes = registry.run_all().await;

        assert_eq!(*order.lock(), vec!["configuration", "cluster", "prerequisites"]);
        assert_eq!(
            outcomes.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
            vec!["configuration", "cluster", "prerequisites"]
        );
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_continues_on_failure_and_panic() {
        let registry = TeardownRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        registry.register("first", recorder(&order, "first"));
        registry.register("panics", || async { panic!("Intentional") });
        registry.register("fails", || async { Err("destroy failed".to_string()) });
        registry.register("last", recorder(&order, "last"));

        let outcomes = registry.run_all().await;

        assert_eq!(*order.lock(), vec!["last", "first"]);
        let failed: Vec<_> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(failed, vec!["fails", "panics"]);
    }

    #[tokio::test]
    async fn test_with_teardown_runs_after_success() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let body_order = order.clone();

        let (result, outcomes) = with_teardown(|registry| {
            let order = body_order.clone();
            async move {
                registry.register("stage", recorder(&order, "teardown"));
                order.lock().push("body");
                7
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(*order.lock(), vec!["body", "teardown"]);
    }

    #[tokio::test]
    async fn test_with_teardown_runs_after_panic() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let body_order = order.clone();

        let (result, outcomes): (Result<(), String>, _) = with_teardown(|registry| {
            let order = body_order.clone();
            async move {
                registry.register("stage", recorder(&order, "teardown"));
                panic!("apply exploded");
            }
        })
        .await;

        assert_eq!(result, Err("apply exploded".to_string()));
        assert!(outcomes[0].is_success());
        assert_eq!(*order.lock(), vec!["teardown"]);
    }
}
