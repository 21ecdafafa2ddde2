/**
 * Configuration for the watch caches, the pod health index and the watch manager
 */
use crate::k8s::resource::{NamespaceInfo, NodeInfo, ParentResource, PodInfo, ResourceKind};
use std::fmt;
use std::sync::Arc;

/// Maximum number of restart attempts for watch streams
pub const MAX_WATCH_RESTARTS: u32 = 50;

/// Maximum backoff time in seconds between restart attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Initial backoff time in seconds
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Brief delay between restart attempts in seconds
pub const RESTART_DELAY_SECONDS: u64 = 1;

/// Channel buffer size between a watch task and the monitor loop
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Window in which refresh notifications are coalesced into one redraw
pub const REFRESH_DEBOUNCE_MILLIS: u64 = 200;

/// Quiet period after the last redraw before a consumer stops continuous layout work
pub const LAYOUT_SETTLE_SECONDS: u64 = 2;

/// Where a resource kind lives in the Kubernetes API.
///
/// Passed explicitly to each watch cache rather than looked up from a global table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindConfig {
    pub kind: ResourceKind,
    pub api_base: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
}

impl KindConfig {
    #[must_use]
    pub const fn for_kind(kind: ResourceKind) -> Self {
        let plural = match kind {
            ResourceKind::Node => "nodes",
            ResourceKind::Namespace => "namespaces",
            ResourceKind::Pod => "pods",
        };
        Self {
            kind,
            api_base: "api",
            version: "v1",
            plural,
        }
    }

    /// Cluster-wide collection path, e.g. `/api/v1/pods`
    #[must_use]
    pub fn api_path(&self) -> String {
        format!("/{}/{}/{}", self.api_base, self.version, self.plural)
    }
}

/// How a `Running` pod is classified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunningPolicy {
    /// Running counts as happy only when every container reports ready
    #[default]
    RequireReady,
    /// Any running pod counts as happy
    AnyRunning,
}

/// Extracts the index key of a parent resource
pub type ParentIdentifier<P> = fn(&P) -> String;

/// Maps a pod to the name of its parent; `None` leaves the pod out of the index
pub type PodToParentMapper = Arc<dyn Fn(&PodInfo) -> Option<String> + Send + Sync>;

/// Injected behaviour for a `PodHealthIndex`
pub struct IndexConfig<P: ParentResource> {
    pub parent_identifier: ParentIdentifier<P>,
    pub pod_mapper: PodToParentMapper,
    pub running_policy: RunningPolicy,
}

impl<P: ParentResource> IndexConfig<P> {
    pub fn new(parent_identifier: ParentIdentifier<P>, pod_mapper: PodToParentMapper) -> Self {
        Self {
            parent_identifier,
            pod_mapper,
            running_policy: RunningPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_running_policy(mut self, policy: RunningPolicy) -> Self {
        self.running_policy = policy;
        self
    }
}

impl<P: ParentResource> Clone for IndexConfig<P> {
    fn clone(&self) -> Self {
        Self {
            parent_identifier: self.parent_identifier,
            pod_mapper: Arc::clone(&self.pod_mapper),
            running_policy: self.running_policy,
        }
    }
}

impl<P: ParentResource> fmt::Debug for IndexConfig<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexConfig")
            .field("parent_kind", &P::KIND)
            .field("running_policy", &self.running_policy)
            .finish_non_exhaustive()
    }
}

impl IndexConfig<NamespaceInfo> {
    /// Group pods by `metadata.namespace`
    #[must_use]
    pub fn by_namespace() -> Self {
        Self::new(|ns| ns.name.clone(), Arc::new(|pod: &PodInfo| pod.namespace.clone()))
    }
}

impl IndexConfig<NodeInfo> {
    /// Group pods by `spec.nodeName`; unscheduled pods are left out
    #[must_use]
    pub fn by_node() -> Self {
        Self::new(|node| node.name.clone(), Arc::new(|pod: &PodInfo| pod.node_name.clone()))
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(MAX_WATCH_RESTARTS > 0, "MAX_WATCH_RESTARTS must be greater than 0");
    assert!(MAX_BACKOFF_SECONDS > 0, "MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS <= MAX_BACKOFF_SECONDS, "INITIAL_BACKOFF_SECONDS must not exceed MAX_BACKOFF_SECONDS");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(RESTART_DELAY_SECONDS > 0, "RESTART_DELAY_SECONDS must be greater than 0");
    assert!(EVENT_CHANNEL_CAPACITY > 0, "EVENT_CHANNEL_CAPACITY must be greater than 0");
    assert!(REFRESH_DEBOUNCE_MILLIS > 0, "REFRESH_DEBOUNCE_MILLIS must be greater than 0");
    assert!(LAYOUT_SETTLE_SECONDS > 0, "LAYOUT_SETTLE_SECONDS must be greater than 0");
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_paths() {
        assert_eq!(KindConfig::for_kind(ResourceKind::Pod).api_path(), "/api/v1/pods");
        assert_eq!(KindConfig::for_kind(ResourceKind::Node).api_path(), "/api/v1/nodes");
        assert_eq!(
            KindConfig::for_kind(ResourceKind::Namespace).api_path(),
            "/api/v1/namespaces"
        );
    }

    #[test]
    fn test_builtin_mappers() {
        let pod = PodInfo::new("p", crate::k8s::resource::PodPhase::Pending).in_namespace("ns1");
        assert_eq!((IndexConfig::by_namespace().pod_mapper)(&pod), Some("ns1".to_string()));
        // not scheduled yet
        assert_eq!((IndexConfig::by_node().pod_mapper)(&pod), None);
        assert_eq!(IndexConfig::by_node().running_policy, RunningPolicy::RequireReady);
    }
}
