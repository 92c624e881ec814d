//! Kubernetes events reported on `ServerlessFunc` objects.
//!
//! Events are observability only: [EmitEvent::emit] logs a failed emission and carries on, so
//! a broken event pipeline never fails a reconciliation.
//!
//! # Example
//! ```rust,ignore
//! use serverless_controller::events::{EmitEvent, EventData, EventRecorder};
//! use serverless_controller::k8s::CachedApiProvider;
//! use std::sync::Arc;
//!
//! let recorder = EventRecorder::new(Arc::new(CachedApiProvider::new(client)), "serverless-controller");
//! recorder.emit(&func, EventData::synced()).await;
//! ```

pub mod types;

mod recorder;

pub use recorder::EventRecorder;
pub use types::EventData;
pub use types::EventType;
pub use types::FuncEventReason;
pub use types::Reason;

use async_trait::async_trait;
use kube::Resource;

use crate::error::Result;
use crate::TryResource;

#[async_trait]
pub trait EmitEvent<R>: Send + Sync
where
    R: Reason,
{
    /// Emits an event about `object` and returns any failure. Prefer [EmitEvent::emit] inside
    /// reconciliation.
    async fn try_emit<K>(&self, object: &K, event: EventData<R>) -> Result<()>
    where
        K: Resource<DynamicType = ()> + TryResource + Clone + Send + Sync;

    /// Emits an event about `object`, logging instead of returning failures.
    async fn emit<K>(&self, object: &K, event: EventData<R>)
    where
        K: Resource<DynamicType = ()> + TryResource + Clone + Send + Sync,
    {
        let reason = event.reason.to_owned();
        if let Err(e) = self.try_emit(object, event).await {
            tracing::warn!(
                error = %e,
                reason = %reason,
                "Failed to emit event"
            );
        }
    }
}
