/**
 * Pod membership and aggregate health per parent resource (node or namespace).
 *
 * The parent stream and the pod stream are independent and may race, so every
 * operation self-heals instead of assuming the other stream is up to date:
 *
 * - a pod whose parent has not been observed yet is held in an untracked entry
 *   rather than dropped;
 * - when a parent is observed its pod set is rebuilt from the full pod snapshot;
 * - a pod lives in at most one parent's set, enforced through a reverse map.
 *
 * Untracked entries never make a parent visible: its health stays `Unknown`
 * until the parent stream delivers it.
 */
use super::config::{IndexConfig, RunningPolicy};
use super::errors::Anomaly;
use super::watch_cache::ResourceWatchCache;
use crate::k8s::resource::{ParentResource, PodInfo, PodPhase};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Happy,
    Pending,
    Sad,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Happy => write!(f, "HAPPY"),
            Self::Pending => write!(f, "PENDING"),
            Self::Sad => write!(f, "SAD"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classification of a single pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodHealth {
    Happy,
    Pending,
    Sad,
}

impl PodHealth {
    #[must_use]
    pub const fn classify(phase: PodPhase, ready: bool, policy: RunningPolicy) -> Self {
        match phase {
            PodPhase::Succeeded => Self::Happy,
            PodPhase::Running => match policy {
                RunningPolicy::AnyRunning => Self::Happy,
                RunningPolicy::RequireReady if ready => Self::Happy,
                RunningPolicy::RequireReady => Self::Sad,
            },
            PodPhase::Pending => Self::Pending,
            PodPhase::Failed | PodPhase::Unknown => Self::Sad,
        }
    }
}

/// The part of a pod the index keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PodState {
    phase: PodPhase,
    ready: bool,
}

impl From<&PodInfo> for PodState {
    fn from(pod: &PodInfo) -> Self {
        Self {
            phase: pod.phase,
            ready: pod.is_ready(),
        }
    }
}

#[derive(Debug, Default)]
struct ParentEntry {
    /// Set once the parent stream has delivered this parent
    tracked: bool,
    pods: BTreeMap<String, PodState>,
}

/// A parent whose derived health may have changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshSignal<P> {
    /// Re-fetch a tracked parent from the parent cache, by its cache name
    Parent(String),
    /// Index key of a parent the parent stream has not delivered
    Unseen(String),
    /// The parent left the index; carries its last known value
    Removed(P),
}

pub struct PodHealthIndex<P: ParentResource> {
    config: IndexConfig<P>,
    pods_by_parent: HashMap<String, ParentEntry>,
    parent_by_pod: HashMap<String, String>,
    /// Index key to parent cache name, for tracked parents
    cache_names: HashMap<String, String>,
}

impl<P: ParentResource> fmt::Debug for PodHealthIndex<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PodHealthIndex")
            .field("config", &self.config)
            .field("parents", &self.pods_by_parent.len())
            .field("pods", &self.parent_by_pod.len())
            .finish()
    }
}

impl<P: ParentResource> PodHealthIndex<P> {
    /// Seed the index from the current contents of both caches
    pub fn new(
        config: IndexConfig<P>,
        parents: &ResourceWatchCache<P>,
        pods: &ResourceWatchCache<PodInfo>,
    ) -> Self {
        let mut index = Self {
            config,
            pods_by_parent: HashMap::new(),
            parent_by_pod: HashMap::new(),
            cache_names: HashMap::new(),
        };

        for parent in parents.snapshot().values() {
            let key = index.parent_name(parent);
            index.cache_names.insert(key.clone(), parent.name().to_string());
            index.pods_by_parent.entry(key).or_default().tracked = true;
        }

        for pod in pods.snapshot().values() {
            index.upsert_pod(pod);
        }

        debug!(
            "📇 health index seeded: {} parents, {} pods",
            index.pods_by_parent.len(),
            index.parent_by_pod.len()
        );
        index
    }

    pub const fn config(&self) -> &IndexConfig<P> {
        &self.config
    }

    fn parent_name(&self, parent: &P) -> String {
        (self.config.parent_identifier)(parent)
    }

    fn map_pod(&self, pod: &PodInfo) -> Option<String> {
        (self.config.pod_mapper)(pod)
    }

    pub fn on_parent_added(
        &mut self,
        parent: &P,
        pods: &ResourceWatchCache<PodInfo>,
    ) -> Vec<RefreshSignal<P>> {
        let name = self.parent_name(parent);
        if self.is_tracked(&name) {
            Anomaly::ParentAlreadyTracked { kind: P::KIND, name }.report();
            return Vec::new();
        }

        self.rebuild_parent(&name, pods);
        if let Some(entry) = self.pods_by_parent.get_mut(&name) {
            entry.tracked = true;
        }
        self.cache_names.insert(name.clone(), parent.name().to_string());
        debug!("📇 tracking {} {}", P::KIND, name);

        vec![self.signal(name)]
    }

    /// Refresh signal for an index key
    fn signal(&self, key: String) -> RefreshSignal<P> {
        match self.cache_names.get(&key) {
            Some(name) => RefreshSignal::Parent(name.clone()),
            None => RefreshSignal::Unseen(key),
        }
    }

    /// Rebuild one parent's pod set from the full pod snapshot
    fn rebuild_parent(&mut self, name: &str, pods: &ResourceWatchCache<PodInfo>) {
        let mut members = BTreeMap::new();
        for pod in pods.snapshot().values() {
            if self.map_pod(pod).as_deref() == Some(name) {
                members.insert(pod.name.clone(), PodState::from(pod));
            }
        }

        // stale lazy members that no longer map here
        if let Some(entry) = self.pods_by_parent.get(name) {
            let stale: Vec<String> = entry
                .pods
                .keys()
                .filter(|pod| !members.contains_key(*pod))
                .cloned()
                .collect();
            for pod in stale {
                self.parent_by_pod.remove(&pod);
            }
        }

        // members indexed under some other parent move here
        for pod in members.keys() {
            if let Some(previous) = self.parent_by_pod.insert(pod.clone(), name.to_string()) {
                if previous != name {
                    self.remove_from_parent(&previous, pod);
                }
            }
        }

        self.pods_by_parent.entry(name.to_string()).or_default().pods = members;
    }

    pub fn on_parent_deleted(&mut self, parent: &P) -> Vec<RefreshSignal<P>> {
        let name = self.parent_name(parent);
        let Some(entry) = self.pods_by_parent.get_mut(&name).filter(|e| e.tracked) else {
            Anomaly::ParentNotTracked { kind: P::KIND, name }.report();
            return Vec::new();
        };

        // pods still mapping here wait, untracked, in case the parent returns
        entry.tracked = false;
        if entry.pods.is_empty() {
            self.pods_by_parent.remove(&name);
        }
        self.cache_names.remove(&name);
        debug!("📇 stopped tracking {} {}", P::KIND, name);

        vec![RefreshSignal::Removed(parent.clone())]
    }

    pub fn on_pod_added(&mut self, pod: &PodInfo) -> Vec<RefreshSignal<P>> {
        self.upsert_pod(pod)
    }

    pub fn on_pod_modified(&mut self, pod: &PodInfo) -> Vec<RefreshSignal<P>> {
        self.upsert_pod(pod)
    }

    fn upsert_pod(&mut self, pod: &PodInfo) -> Vec<RefreshSignal<P>> {
        let mut signals = Vec::new();
        let target = self.map_pod(pod);

        if let Some(previous) = self.parent_by_pod.get(&pod.name).cloned() {
            if target.as_deref() != Some(previous.as_str()) {
                debug!("📇 pod {} moved away from {}", pod.name, previous);
                self.parent_by_pod.remove(&pod.name);
                self.remove_from_parent(&previous, &pod.name);
                signals.push(self.signal(previous));
            }
        }

        let Some(parent) = target else {
            return signals;
        };

        self.pods_by_parent
            .entry(parent.clone())
            .or_default()
            .pods
            .insert(pod.name.clone(), PodState::from(pod));
        self.parent_by_pod.insert(pod.name.clone(), parent.clone());
        signals.push(self.signal(parent));
        signals
    }

    pub fn on_pod_deleted(&mut self, pod: &PodInfo) -> Vec<RefreshSignal<P>> {
        let parent = match self.parent_by_pod.remove(&pod.name) {
            Some(parent) => parent,
            None => {
                if self.map_pod(pod).is_some() {
                    Anomaly::PodNotIndexed {
                        pod: pod.name.clone(),
                    }
                    .report();
                }
                return Vec::new();
            }
        };

        self.remove_from_parent(&parent, &pod.name);
        vec![self.signal(parent)]
    }

    /// Drop a pod from a set, discarding untracked entries left empty
    fn remove_from_parent(&mut self, parent: &str, pod: &str) {
        if let Some(entry) = self.pods_by_parent.get_mut(parent) {
            entry.pods.remove(pod);
            if !entry.tracked && entry.pods.is_empty() {
                self.pods_by_parent.remove(parent);
            }
        }
    }

    /// Aggregate health of a parent by name.
    ///
    /// Sad beats pending beats happy. A tracked parent with no pods is happy;
    /// a parent the parent stream has not delivered is unknown.
    #[must_use]
    pub fn check_health(&self, parent: &str) -> HealthStatus {
        let Some(entry) = self.pods_by_parent.get(parent).filter(|e| e.tracked) else {
            return HealthStatus::Unknown;
        };

        let policy = self.config.running_policy;
        let (mut pending, mut sad) = (0usize, 0usize);
        for state in entry.pods.values() {
            match PodHealth::classify(state.phase, state.ready, policy) {
                PodHealth::Happy => {}
                PodHealth::Pending => pending += 1,
                PodHealth::Sad => sad += 1,
            }
        }

        if sad > 0 {
            HealthStatus::Sad
        } else if pending > 0 {
            HealthStatus::Pending
        } else {
            HealthStatus::Happy
        }
    }

    #[must_use]
    pub fn health_of(&self, parent: &P) -> HealthStatus {
        self.check_health(&self.parent_name(parent))
    }

    #[must_use]
    pub fn is_tracked(&self, parent: &str) -> bool {
        self.pods_by_parent.get(parent).is_some_and(|e| e.tracked)
    }

    /// Pods currently attributed to a parent, tracked or not
    #[must_use]
    pub fn pods_of(&self, parent: &str) -> Option<BTreeSet<String>> {
        self.pods_by_parent
            .get(parent)
            .map(|entry| entry.pods.keys().cloned().collect())
    }

    #[must_use]
    pub fn pod_count(&self, parent: &str) -> usize {
        self.pods_by_parent.get(parent).map_or(0, |e| e.pods.len())
    }

    #[must_use]
    pub fn parent_of(&self, pod: &str) -> Option<&str> {
        self.parent_by_pod.get(pod).map(String::as_str)
    }

    /// Names of tracked parents, sorted
    #[must_use]
    pub fn tracked_parents(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pods_by_parent
            .iter()
            .filter(|(_, e)| e.tracked)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::cache::config::KindConfig;
    use crate::k8s::cache::watch_cache::WatchEvent;
    use crate::k8s::resource::{NamespaceInfo, NodeInfo, ResourceKind};

    fn caches() -> (ResourceWatchCache<NamespaceInfo>, ResourceWatchCache<PodInfo>) {
        (
            ResourceWatchCache::new(KindConfig::for_kind(ResourceKind::Namespace)),
            ResourceWatchCache::new(KindConfig::for_kind(ResourceKind::Pod)),
        )
    }

    fn pod(name: &str, ns: &str, phase: PodPhase) -> PodInfo {
        PodInfo::new(name, phase).in_namespace(ns)
    }

    fn set(names: &[&str]) -> Option<BTreeSet<String>> {
        Some(names.iter().map(|n| (*n).to_string()).collect())
    }

    #[test]
    fn test_classification_boundaries() {
        use RunningPolicy::{AnyRunning, RequireReady};
        assert_eq!(PodHealth::classify(PodPhase::Succeeded, false, RequireReady), PodHealth::Happy);
        assert_eq!(PodHealth::classify(PodPhase::Running, true, RequireReady), PodHealth::Happy);
        assert_eq!(PodHealth::classify(PodPhase::Running, false, RequireReady), PodHealth::Sad);
        assert_eq!(PodHealth::classify(PodPhase::Running, false, AnyRunning), PodHealth::Happy);
        assert_eq!(PodHealth::classify(PodPhase::Pending, false, AnyRunning), PodHealth::Pending);
        assert_eq!(PodHealth::classify(PodPhase::Failed, true, AnyRunning), PodHealth::Sad);
        assert_eq!(PodHealth::classify(PodPhase::Unknown, true, RequireReady), PodHealth::Sad);
    }

    #[test]
    fn test_seeding_keeps_orphan_pods() {
        let (mut parents, mut pods) = caches();
        parents.ingest(WatchEvent::Added(NamespaceInfo::new("ns1")));
        pods.ingest(WatchEvent::Added(pod("p1", "ns1", PodPhase::Pending)));
        pods.ingest(WatchEvent::Added(pod("p2", "ghost", PodPhase::Failed)));

        let index = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);
        assert_eq!(index.pods_of("ns1"), set(&["p1"]));
        assert_eq!(index.pods_of("ghost"), set(&["p2"]));
        assert!(!index.is_tracked("ghost"));
        assert_eq!(index.check_health("ns1"), HealthStatus::Pending);
        assert_eq!(index.check_health("ghost"), HealthStatus::Unknown);
    }

    #[test]
    fn test_empty_parent_is_happy() {
        let (parents, pods) = caches();
        let ns = NamespaceInfo::new("empty");
        let mut index = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);

        assert_eq!(index.check_health("empty"), HealthStatus::Unknown);
        let signals = index.on_parent_added(&ns, &pods);
        assert_eq!(signals, vec![RefreshSignal::Parent("empty".to_string())]);
        assert_eq!(index.check_health("empty"), HealthStatus::Happy);
        assert_eq!(index.health_of(&ns), HealthStatus::Happy);
    }

    #[test]
    fn test_duplicate_parent_add_is_noop() {
        let (mut parents, pods) = caches();
        parents.ingest(WatchEvent::Added(NamespaceInfo::new("ns1")));
        let mut index = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);

        assert!(index.on_parent_added(&NamespaceInfo::new("ns1"), &pods).is_empty());
        assert!(index.is_tracked("ns1"));
    }

    #[test]
    fn test_delete_untracked_parent_is_noop() {
        let (parents, pods) = caches();
        let mut index = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);
        assert!(index.on_parent_deleted(&NamespaceInfo::new("nope")).is_empty());
    }

    #[test]
    fn test_sad_beats_pending_beats_happy() {
        let (mut parents, mut pods) = caches();
        parents.ingest(WatchEvent::Added(NamespaceInfo::new("ns1")));
        for i in 0..9 {
            pods.ingest(WatchEvent::Added(
                pod(&format!("ok-{i}"), "ns1", PodPhase::Running).with_ready(true),
            ));
        }
        let mut index = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);
        assert_eq!(index.check_health("ns1"), HealthStatus::Happy);

        index.on_pod_added(&pod("wait", "ns1", PodPhase::Pending));
        assert_eq!(index.check_health("ns1"), HealthStatus::Pending);

        index.on_pod_added(&pod("boom", "ns1", PodPhase::Failed));
        assert_eq!(index.check_health("ns1"), HealthStatus::Sad);
    }

    #[test]
    fn test_running_policies() {
        let (mut parents, mut pods) = caches();
        parents.ingest(WatchEvent::Added(NamespaceInfo::new("ns1")));
        pods.ingest(WatchEvent::Added(pod("p1", "ns1", PodPhase::Running).with_ready(false)));

        let strict = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);
        assert_eq!(strict.check_health("ns1"), HealthStatus::Sad);

        let lenient = PodHealthIndex::new(
            IndexConfig::by_namespace().with_running_policy(RunningPolicy::AnyRunning),
            &parents,
            &pods,
        );
        assert_eq!(lenient.check_health("ns1"), HealthStatus::Happy);
    }

    #[test]
    fn test_modify_is_idempotent() {
        let (mut parents, pods) = caches();
        parents.ingest(WatchEvent::Added(NamespaceInfo::new("ns1")));
        let mut index = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);
        let p = pod("p1", "ns1", PodPhase::Pending);

        index.on_pod_modified(&p);
        let once = (index.pods_of("ns1"), index.check_health("ns1"));
        index.on_pod_modified(&p);
        assert_eq!((index.pods_of("ns1"), index.check_health("ns1")), once);
    }

    #[test]
    fn test_pod_moves_between_parents() {
        let (mut nodes, pods) = (
            ResourceWatchCache::new(KindConfig::for_kind(ResourceKind::Node)),
            ResourceWatchCache::new(KindConfig::for_kind(ResourceKind::Pod)),
        );
        nodes.ingest(WatchEvent::Added(NodeInfo::new("node-a")));
        nodes.ingest(WatchEvent::Added(NodeInfo::new("node-b")));
        let mut index = PodHealthIndex::new(IndexConfig::by_node(), &nodes, &pods);

        // unscheduled pods are not indexed
        let unscheduled = PodInfo::new("p1", PodPhase::Pending);
        assert!(index.on_pod_added(&unscheduled).is_empty());
        assert_eq!(index.parent_of("p1"), None);

        index.on_pod_modified(&unscheduled.clone().on_node("node-a"));
        assert_eq!(index.parent_of("p1"), Some("node-a"));

        let signals = index.on_pod_modified(&unscheduled.on_node("node-b"));
        assert_eq!(
            signals,
            vec![
                RefreshSignal::Parent("node-a".to_string()),
                RefreshSignal::Parent("node-b".to_string()),
            ]
        );
        assert_eq!(index.pods_of("node-a"), set(&[]));
        assert_eq!(index.pods_of("node-b"), set(&["p1"]));
    }

    #[test]
    fn test_pod_delete_anomalies() {
        let (mut parents, pods) = caches();
        parents.ingest(WatchEvent::Added(NamespaceInfo::new("ns1")));
        let mut index = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);

        // never indexed
        assert!(index.on_pod_deleted(&pod("p9", "ns1", PodPhase::Running)).is_empty());
        // unmapped pods are ignored silently
        assert!(index.on_pod_deleted(&PodInfo::new("loose", PodPhase::Running)).is_empty());
        assert_eq!(index.pods_of("ns1"), set(&[]));
    }

    #[test]
    fn test_signals_carry_cache_names() {
        let (mut parents, pods) = caches();
        parents.ingest(WatchEvent::Added(NamespaceInfo::new("ns1")));
        let config = IndexConfig::new(
            |ns: &NamespaceInfo| format!("ns/{}", ns.name),
            std::sync::Arc::new(|pod: &PodInfo| pod.namespace.as_ref().map(|ns| format!("ns/{ns}"))),
        );
        let mut index = PodHealthIndex::new(config, &parents, &pods);

        assert!(index.is_tracked("ns/ns1"));
        assert_eq!(
            index.on_pod_added(&pod("p1", "ns1", PodPhase::Pending)),
            vec![RefreshSignal::Parent("ns1".to_string())]
        );
        assert_eq!(
            index.on_pod_added(&pod("p2", "ghost", PodPhase::Pending)),
            vec![RefreshSignal::Unseen("ns/ghost".to_string())]
        );
        assert_eq!(index.check_health("ns/ns1"), HealthStatus::Pending);
    }

    #[test]
    fn test_parent_readd_backfills_waiting_pods() {
        let (mut parents, mut pods) = caches();
        let ns = NamespaceInfo::new("ns1");
        parents.ingest(WatchEvent::Added(ns.clone()));
        let p = pod("p1", "ns1", PodPhase::Failed);
        pods.ingest(WatchEvent::Added(p.clone()));
        let mut index = PodHealthIndex::new(IndexConfig::by_namespace(), &parents, &pods);

        assert_eq!(index.on_parent_deleted(&ns), vec![RefreshSignal::Removed(ns.clone())]);
        assert_eq!(index.check_health("ns1"), HealthStatus::Unknown);
        assert_eq!(index.pods_of("ns1"), set(&["p1"]));

        index.on_parent_added(&ns, &pods);
        assert_eq!(index.check_health("ns1"), HealthStatus::Sad);
        assert_eq!(index.tracked_parents(), vec!["ns1".to_string()]);
    }
}
