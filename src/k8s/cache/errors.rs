/**
 * Protocol anomalies seen by the watch caches and the health index.
 *
 * None of these are returned to callers. Each one is logged and then handled by
 * a no-op or a recompute, depending on the operation.
 */
use crate::k8s::resource::ResourceKind;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Anomaly {
    #[error("{kind} {name} added twice without a delete, keeping the first")]
    DuplicateAdd { kind: ResourceKind, name: String },

    #[error("{kind} {name} modified but was never added, caching it now")]
    ModifyWithoutEntry { kind: ResourceKind, name: String },

    #[error("{kind} {name} deleted but was never cached")]
    DeleteWithoutEntry { kind: ResourceKind, name: String },

    #[error("{kind} {name} is already tracked by the health index")]
    ParentAlreadyTracked { kind: ResourceKind, name: String },

    #[error("{kind} {name} deleted but is not tracked by the health index")]
    ParentNotTracked { kind: ResourceKind, name: String },

    #[error("pod {pod} deleted but is not indexed under any parent")]
    PodNotIndexed { pod: String },

    #[error("{kind} event for {name} arrived after the watch failed")]
    EventAfterFailure { kind: ResourceKind, name: String },
}

impl Anomaly {
    /// Log the anomaly at warn level
    pub fn report(&self) {
        warn!(anomaly = ?self, "⚠️  {}", self);
    }
}
