/**
 * Health monitor
 *
 * Owns the parent cache, the pod cache, the pod health index and the change
 * notifier, and routes each watch event through them synchronously, in
 * delivery order. All mutation happens through `&mut self`; consumers get
 * read-only views or subscriptions.
 */
use super::config::IndexConfig;
use super::health_index::{HealthStatus, PodHealthIndex, RefreshSignal};
use super::notifier::{ChangeNotifier, Refresh};
use super::subscription::Subscription;
use super::watch_cache::{CacheEvent, ResourceWatchCache, WatchEvent};
use crate::k8s::resource::{ParentResource, PodInfo};
use serde::Serialize;
use tracing::{debug, info};

/// One row of a health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub pods: usize,
}

#[derive(Debug)]
pub struct HealthMonitor<P: ParentResource> {
    parents: ResourceWatchCache<P>,
    pods: ResourceWatchCache<PodInfo>,
    index: PodHealthIndex<P>,
    notifier: ChangeNotifier<P>,
}

impl<P: ParentResource> HealthMonitor<P> {
    /// Build a monitor over caches that may already hold an initial listing
    pub fn new(
        config: IndexConfig<P>,
        parents: ResourceWatchCache<P>,
        pods: ResourceWatchCache<PodInfo>,
    ) -> Self {
        let index = PodHealthIndex::new(config, &parents, &pods);
        info!(
            "🩺 health monitor started: {} {} entries, {} pods",
            parents.len(),
            P::KIND,
            pods.len()
        );
        Self {
            parents,
            pods,
            index,
            notifier: ChangeNotifier::new(),
        }
    }

    /// Apply a parent event. Returns the number of refreshes published.
    pub fn apply_parent_event(&mut self, event: WatchEvent<P>) -> usize {
        let Some(normalized) = self.parents.ingest(event) else {
            return 0;
        };

        let signals = match normalized {
            CacheEvent::Added(parent) => self.index.on_parent_added(&parent, &self.pods),
            CacheEvent::Modified(parent) => {
                // a modify for a parent we never saw added stands in for the add
                let name = (self.index.config().parent_identifier)(&parent);
                if self.index.is_tracked(&name) {
                    Vec::new()
                } else {
                    debug!("{} {} modified before added, tracking it now", P::KIND, name);
                    self.index.on_parent_added(&parent, &self.pods)
                }
            }
            CacheEvent::Deleted(parent) => self.index.on_parent_deleted(&parent),
            CacheEvent::Error(_) => Vec::new(),
        };
        self.publish(signals)
    }

    /// Apply a pod event. Returns the number of refreshes published.
    pub fn apply_pod_event(&mut self, event: WatchEvent<PodInfo>) -> usize {
        let Some(normalized) = self.pods.ingest(event) else {
            return 0;
        };

        let signals = match normalized {
            CacheEvent::Added(pod) => self.index.on_pod_added(&pod),
            CacheEvent::Modified(pod) => self.index.on_pod_modified(&pod),
            CacheEvent::Deleted(pod) => self.index.on_pod_deleted(&pod),
            CacheEvent::Error(_) => Vec::new(),
        };
        self.publish(signals)
    }

    fn publish(&mut self, signals: Vec<RefreshSignal<P>>) -> usize {
        self.notifier.dispatch(signals, &self.parents)
    }

    /// The parent watch terminated
    pub fn fail_parent(&mut self, reason: impl Into<String>) {
        self.parents.fail(reason);
    }

    /// The pod watch terminated
    pub fn fail_pod(&mut self, reason: impl Into<String>) {
        self.pods.fail(reason);
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.parents.has_failed() || self.pods.has_failed()
    }

    #[must_use]
    pub fn check_health(&self, parent: &str) -> HealthStatus {
        self.index.check_health(parent)
    }

    #[must_use]
    pub fn health_of(&self, parent: &P) -> HealthStatus {
        self.index.health_of(parent)
    }

    /// Health of every tracked parent, sorted by name
    #[must_use]
    pub fn health_report(&self) -> Vec<ParentHealth> {
        self.index
            .tracked_parents()
            .into_iter()
            .map(|name| ParentHealth {
                status: self.index.check_health(&name),
                pods: self.index.pod_count(&name),
                name,
            })
            .collect()
    }

    pub fn subscribe_refresh(&mut self) -> Subscription<Refresh<P>> {
        self.notifier.subscribe()
    }

    pub fn subscribe_parents(&mut self) -> Subscription<CacheEvent<P>> {
        self.parents.subscribe()
    }

    pub fn subscribe_pods(&mut self) -> Subscription<CacheEvent<PodInfo>> {
        self.pods.subscribe()
    }

    /// Tear down every listener on the notifier and both caches
    pub fn detach_all(&mut self) {
        self.notifier.detach_all();
        self.parents.unsubscribe_all();
        self.pods.unsubscribe_all();
        debug!("🩺 all listeners detached");
    }

    pub const fn parents(&self) -> &ResourceWatchCache<P> {
        &self.parents
    }

    pub const fn pods(&self) -> &ResourceWatchCache<PodInfo> {
        &self.pods
    }

    pub const fn index(&self) -> &PodHealthIndex<P> {
        &self.index
    }
}
