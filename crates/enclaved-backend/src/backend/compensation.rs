//! Explicit compensation stack for multi-step provisioning.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tracing::error;

use crate::error::BackendError;

/// Undo actions for the steps of an ordered provisioning transaction.
///
/// Push an undo after each successful step; if a later step fails, call
/// [`unwind`](Self::unwind) to run them newest-first; on full success call
/// [`commit`](Self::commit) to drop them all. Undo actions run on their own
/// futures (built eagerly, polled only on unwind), so they still execute
/// when the caller's context has been cancelled.
///
/// Undo failures are logged with an operator-actionable message naming the
/// orphaned resource and are not re-raised: compensation is best-effort,
/// and the orphan stays label-discoverable for manual cleanup.
pub(crate) struct CompensationStack {
    undo_actions: Vec<UndoAction>,
}

struct UndoAction {
    resource_description: String,
    action: BoxFuture<'static, Result<(), BackendError>>,
}

impl CompensationStack {
    pub(crate) fn new() -> Self {
        Self {
            undo_actions: Vec::new(),
        }
    }

    /// Registers an undo for a step that just succeeded.
    pub(crate) fn push<F>(&mut self, resource_description: impl Into<String>, action: F)
    where
        F: Future<Output = Result<(), BackendError>> + Send + 'static,
    {
        self.undo_actions.push(UndoAction {
            resource_description: resource_description.into(),
            action: action.boxed(),
        });
    }

    /// Drops every registered undo; the transaction succeeded.
    pub(crate) fn commit(&mut self) {
        self.undo_actions.clear();
    }

    /// Runs every registered undo, newest first.
    pub(crate) async fn unwind(&mut self) {
        while let Some(undo) = self.undo_actions.pop() {
            if let Err(err) = undo.action.await {
                error!(
                    "provisioning didn't complete successfully and undoing '{}' also failed: {err}",
                    undo.resource_description,
                );
                error!(
                    "ACTION REQUIRED: manually clean up {}",
                    undo.resource_description,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn unwind_runs_newest_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        for step in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            stack.push(format!("step {step}"), async move {
                order.lock().unwrap().push(step);
                Ok(())
            });
        }
        stack.unwind().await;
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn commit_discards_all_undos() {
        let ran = Arc::new(Mutex::new(false));
        let mut stack = CompensationStack::new();
        {
            let ran = Arc::clone(&ran);
            stack.push("step", async move {
                *ran.lock().unwrap() = true;
                Ok(())
            });
        }
        stack.commit();
        stack.unwind().await;
        assert!(!*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn a_failing_undo_does_not_stop_the_rest() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        {
            let order = Arc::clone(&order);
            stack.push("inner", async move {
                order.lock().unwrap().push("inner");
                Ok(())
            });
        }
        stack.push("failing", async { Err(BackendError::validation("injected")) });
        stack.unwind().await;
        assert_eq!(*order.lock().unwrap(), vec!["inner"]);
    }
}
