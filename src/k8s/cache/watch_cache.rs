/**
 * In-memory snapshot of one watched resource kind.
 *
 * Fed by Added/Modified/Deleted events from the watch transport. Every
 * ingested event is re-emitted, in ingestion order, to subscribers.
 */
use super::config::KindConfig;
use super::errors::Anomaly;
use super::subscription::{Subscription, SubscriptionManager};
use crate::k8s::resource::Watchable;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// A typed change notification from the watch transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K: Watchable> WatchEvent<K> {
    pub const fn resource(&self) -> &K {
        match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => r,
        }
    }
}

/// What a cache re-emits to its subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// The upstream watch terminated; no further events follow
    Error(String),
}

#[derive(Debug)]
pub struct ResourceWatchCache<K: Watchable> {
    config: KindConfig,
    entries: HashMap<String, K>,
    subscriptions: SubscriptionManager<CacheEvent<K>>,
    failed: bool,
}

impl<K: Watchable> ResourceWatchCache<K> {
    #[must_use]
    pub fn new(config: KindConfig) -> Self {
        debug_assert_eq!(config.kind, K::KIND);
        Self {
            config,
            entries: HashMap::new(),
            subscriptions: SubscriptionManager::new(),
            failed: false,
        }
    }

    /// Create a cache pre-populated from an initial listing, without emitting events.
    ///
    /// Duplicate names in the listing keep the first occurrence.
    pub fn seeded(config: KindConfig, items: impl IntoIterator<Item = K>) -> Self {
        let mut cache = Self::new(config);
        for item in items {
            let name = item.name().to_string();
            if cache.entries.contains_key(&name) {
                Anomaly::DuplicateAdd { kind: K::KIND, name }.report();
                continue;
            }
            cache.entries.insert(name, item);
        }
        info!("📦 {} cache seeded with {} entries", K::KIND, cache.entries.len());
        cache
    }

    pub const fn config(&self) -> &KindConfig {
        &self.config
    }

    /// Read-only view of the current snapshot
    pub const fn snapshot(&self) -> &HashMap<String, K> {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&K> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn subscribe(&mut self) -> Subscription<CacheEvent<K>> {
        self.subscriptions.subscribe()
    }

    pub fn unsubscribe(&mut self, subscription_id: &str) -> bool {
        self.subscriptions.unsubscribe(subscription_id)
    }

    pub fn unsubscribe_all(&mut self) {
        self.subscriptions.unsubscribe_all();
    }

    /// Apply one event and re-emit it.
    ///
    /// Returns the normalized event, or `None` if the cache has already failed.
    /// Anomalies are logged and the event is still re-emitted. A duplicate add
    /// re-emits the entry kept in the cache; a modify of an unknown entry upserts.
    pub fn ingest(&mut self, event: WatchEvent<K>) -> Option<CacheEvent<K>> {
        if self.failed {
            Anomaly::EventAfterFailure {
                kind: K::KIND,
                name: event.resource().name().to_string(),
            }
            .report();
            return None;
        }

        let normalized = match event {
            WatchEvent::Added(resource) => {
                let name = resource.name().to_string();
                if let Some(kept) = self.entries.get(&name) {
                    // downstream sees what the cache holds, not the rejected payload
                    let kept = kept.clone();
                    Anomaly::DuplicateAdd { kind: K::KIND, name }.report();
                    CacheEvent::Added(kept)
                } else {
                    debug!(kind = %K::KIND, name = %name, "➕ added");
                    self.entries.insert(name, resource.clone());
                    CacheEvent::Added(resource)
                }
            }
            WatchEvent::Modified(resource) => {
                let name = resource.name().to_string();
                if self.entries.contains_key(&name) {
                    debug!(kind = %K::KIND, name = %name, "📝 modified");
                } else {
                    Anomaly::ModifyWithoutEntry {
                        kind: K::KIND,
                        name: name.clone(),
                    }
                    .report();
                }
                self.entries.insert(name, resource.clone());
                CacheEvent::Modified(resource)
            }
            WatchEvent::Deleted(resource) => {
                let name = resource.name().to_string();
                if self.entries.remove(&name).is_some() {
                    debug!(kind = %K::KIND, name = %name, "🗑️  deleted");
                } else {
                    Anomaly::DeleteWithoutEntry { kind: K::KIND, name }.report();
                }
                CacheEvent::Deleted(resource)
            }
        };

        self.subscriptions.notify(&normalized);
        Some(normalized)
    }

    /// Record a terminal transport failure. Only the first call is emitted.
    pub fn fail(&mut self, reason: impl Into<String>) -> Option<CacheEvent<K>> {
        if self.failed {
            return None;
        }
        self.failed = true;
        let reason = reason.into();
        error!("❌ {} watch ({}) failed: {}", K::KIND, self.config.api_path(), reason);

        let event = CacheEvent::Error(reason);
        self.subscriptions.notify(&event);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::resource::{NamespaceInfo, PodInfo, PodPhase, ResourceKind};

    fn ns_cache() -> ResourceWatchCache<NamespaceInfo> {
        ResourceWatchCache::new(KindConfig::for_kind(ResourceKind::Namespace))
    }

    fn pod_cache() -> ResourceWatchCache<PodInfo> {
        ResourceWatchCache::new(KindConfig::for_kind(ResourceKind::Pod))
    }

    #[test]
    fn test_add_modify_delete() {
        let mut cache = pod_cache();
        cache.ingest(WatchEvent::Added(PodInfo::new("p1", PodPhase::Pending)));
        assert_eq!(cache.get("p1").map(|p| p.phase), Some(PodPhase::Pending));

        cache.ingest(WatchEvent::Modified(PodInfo::new("p1", PodPhase::Running)));
        assert_eq!(cache.get("p1").map(|p| p.phase), Some(PodPhase::Running));

        cache.ingest(WatchEvent::Deleted(PodInfo::new("p1", PodPhase::Running)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_duplicate_add_keeps_first() {
        let mut cache = pod_cache();
        cache.ingest(WatchEvent::Added(PodInfo::new("p1", PodPhase::Pending)));
        let emitted = cache.ingest(WatchEvent::Added(PodInfo::new("p1", PodPhase::Failed)));

        assert_eq!(cache.get("p1").map(|p| p.phase), Some(PodPhase::Pending));
        assert_eq!(
            emitted,
            Some(CacheEvent::Added(PodInfo::new("p1", PodPhase::Pending)))
        );
    }

    #[test]
    fn test_duplicate_add_reemits_kept_entry_to_subscribers() {
        let mut cache = pod_cache();
        let mut sub = cache.subscribe();
        let first = PodInfo::new("p1", PodPhase::Succeeded).in_namespace("ns1");
        cache.ingest(WatchEvent::Added(first.clone()));
        cache.ingest(WatchEvent::Added(
            PodInfo::new("p1", PodPhase::Failed).in_namespace("ns2"),
        ));

        assert_eq!(
            sub.drain(),
            vec![CacheEvent::Added(first.clone()), CacheEvent::Added(first)]
        );
    }

    #[test]
    fn test_modify_before_add_upserts() {
        let mut cache = ns_cache();
        let emitted = cache.ingest(WatchEvent::Modified(NamespaceInfo::new("ns1")));
        assert!(cache.contains("ns1"));
        assert_eq!(emitted, Some(CacheEvent::Modified(NamespaceInfo::new("ns1"))));
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let mut cache = ns_cache();
        cache.ingest(WatchEvent::Added(NamespaceInfo::new("ns1")));
        cache.ingest(WatchEvent::Deleted(NamespaceInfo::new("ns2")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_emission_order_matches_ingestion() {
        let mut cache = ns_cache();
        let mut sub = cache.subscribe();

        cache.ingest(WatchEvent::Added(NamespaceInfo::new("a")));
        cache.ingest(WatchEvent::Modified(NamespaceInfo::new("b")));
        cache.ingest(WatchEvent::Deleted(NamespaceInfo::new("a")));

        assert_eq!(
            sub.drain(),
            vec![
                CacheEvent::Added(NamespaceInfo::new("a")),
                CacheEvent::Modified(NamespaceInfo::new("b")),
                CacheEvent::Deleted(NamespaceInfo::new("a")),
            ]
        );
    }

    #[test]
    fn test_failure_is_terminal_and_emitted_once() {
        let mut cache = ns_cache();
        let mut sub = cache.subscribe();

        assert!(cache.fail("stream closed").is_some());
        assert!(cache.fail("again").is_none());
        assert!(cache.ingest(WatchEvent::Added(NamespaceInfo::new("late"))).is_none());

        assert!(cache.has_failed());
        assert!(cache.is_empty());
        assert_eq!(sub.drain(), vec![CacheEvent::Error("stream closed".to_string())]);
    }

    #[test]
    fn test_seeded_cache() {
        let cache = ResourceWatchCache::seeded(
            KindConfig::for_kind(ResourceKind::Namespace),
            vec![NamespaceInfo::new("a"), NamespaceInfo::new("b"), NamespaceInfo::new("a")],
        );
        assert_eq!(cache.len(), 2);
    }
}
