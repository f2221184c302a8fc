//! Task-local correlation id. One pipeline run owns one id end-to-end;
//! `with_correlation` binds it for the dynamic extent of a future,
//! including every `.await` point inside it, and the binding unwinds
//! automatically (nested scopes restore the outer id) when the future
//! completes.

use std::future::Future;

tokio::task_local! {
    static CORRELATION_ID: String;
}

/// Run `f` with `id` bound as the current correlation id. Nesting is safe:
/// the previous id (if any) becomes current again once the returned future
/// resolves.
pub async fn with_correlation<S, F, Fut, T>(id: S, f: F) -> T
where
    S: Into<String>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    CORRELATION_ID.scope(id.into(), f()).await
}

/// Synchronous counterpart for non-async callbacks.
pub fn with_correlation_sync<S, F, T>(id: S, f: F) -> T
where
    S: Into<String>,
    F: FnOnce() -> T,
{
    CORRELATION_ID.sync_scope(id.into(), f)
}

/// The correlation id bound by the innermost enclosing `with_correlation`
/// call, or `None` if no scope is active.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_scope_means_no_id() {
        assert_eq!(current_correlation_id(), None);
    }

    #[tokio::test]
    async fn scope_binds_and_restores() {
        assert_eq!(current_correlation_id(), None);
        with_correlation("outer", || async {
            assert_eq!(current_correlation_id(), Some("outer".to_string()));

            with_correlation("inner", || async {
                assert_eq!(current_correlation_id(), Some("inner".to_string()));
            })
            .await;

            assert_eq!(current_correlation_id(), Some("outer".to_string()));
        })
        .await;
        assert_eq!(current_correlation_id(), None);
    }

    #[tokio::test]
    async fn survives_await_points() {
        with_correlation("q-1", || async {
            tokio::task::yield_now().await;
            assert_eq!(current_correlation_id(), Some("q-1".to_string()));
        })
        .await;
    }

    #[test]
    fn sync_scope_binds_and_restores() {
        assert_eq!(current_correlation_id(), None);
        with_correlation_sync("sync-id", || {
            assert_eq!(current_correlation_id(), Some("sync-id".to_string()));
        });
        assert_eq!(current_correlation_id(), None);
    }
}
