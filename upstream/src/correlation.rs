//! Correlation id propagation for outbound requests.

use std::future::Future;

use fxgate_common::CorrelationId;

tokio::task_local! {
    static CURRENT: CorrelationId;
}

/// Run `future` with `id` as the current correlation id.
pub async fn scope<F: Future>(id: CorrelationId, future: F) -> F::Output {
    CURRENT.scope(id, future).await
}

/// The correlation id of the enclosing [`scope`], if any.
pub fn current() -> Option<CorrelationId> {
    CURRENT.try_with(|id| id.clone()).ok()
}

/// Supplies the correlation id attached to each outbound request.
pub trait CorrelationSource: Send + Sync {
    fn correlation_id(&self) -> CorrelationId;
}

/// Uses the task-scoped id, minting a fresh one outside any scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskCorrelation;

impl CorrelationSource for TaskCorrelation {
    fn correlation_id(&self) -> CorrelationId {
        current()
            .filter(CorrelationId::is_valid)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_sets_current_id() {
        assert!(current().is_none());

        let id = CorrelationId::from("req-42");
        let seen = scope(id.clone(), async { TaskCorrelation.correlation_id() }).await;

        assert_eq!(seen, id);
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_mints_id_outside_scope() {
        let a = TaskCorrelation.correlation_id();
        let b = TaskCorrelation.correlation_id();
        assert!(a.is_valid());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_invalid_scoped_id_is_replaced() {
        let seen = scope(CorrelationId::from("bad id"), async {
            TaskCorrelation.correlation_id()
        })
        .await;
        assert!(seen.is_valid());
        assert_ne!(seen.as_str(), "bad id");
    }
}
