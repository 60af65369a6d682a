//! Run-scoped values shared between the orchestrator and step closures.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::services::SessionId;

#[derive(Debug, Default)]
struct ContextInner {
    outputs: HashMap<String, Value>,
    session: Option<SessionId>,
}

/// Handle to the values a saga run produces while it executes.
///
/// Steps are built before `execute` runs, so a closure that needs an earlier
/// step's output, or the transaction session, clones this handle and reads
/// it when its attempt starts.
#[derive(Debug, Clone, Default)]
pub struct SagaContext {
    inner: Arc<RwLock<ContextInner>>,
}

impl SagaContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Output of a completed step, by step name.
    pub async fn get(&self, step: &str) -> Option<Value> {
        self.inner.read().await.outputs.get(step).cloned()
    }

    /// Session of the transaction the saga is running in, if any.
    ///
    /// Document writes pass this to the store so they commit or abort with
    /// the saga. Blob operations never take part in it.
    pub async fn session(&self) -> Option<SessionId> {
        self.inner.read().await.session
    }

    pub(crate) async fn record(&self, step: &str, output: Value) {
        self.inner
            .write()
            .await
            .outputs
            .insert(step.to_string(), output);
    }

    pub(crate) async fn set_session(&self, session: Option<SessionId>) {
        self.inner.write().await.session = session;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_clones_share_recorded_outputs() {
        let context = SagaContext::new();
        let handle = context.clone();

        context.record("upload_media", json!(["url1"])).await;

        assert_eq!(handle.get("upload_media").await, Some(json!(["url1"])));
        assert_eq!(handle.get("write_toy").await, None);
    }

    #[tokio::test]
    async fn test_session_defaults_to_none() {
        let context = SagaContext::new();
        assert_eq!(context.session().await, None);
    }
}
