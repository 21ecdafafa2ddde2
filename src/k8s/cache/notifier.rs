use super::health_index::RefreshSignal;
use super::subscription::{Subscription, SubscriptionManager};
use super::watch_cache::ResourceWatchCache;
use crate::k8s::resource::ParentResource;
use tracing::debug;

/// "This parent's health may have changed, re-query and re-render it"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh<P> {
    pub parent: P,
}

/// Turns index refresh signals into `Refresh` notifications.
///
/// One notification per signal, no coalescing. Parents are re-read from the
/// parent cache by cache name at dispatch time; a signal for a parent the cache
/// does not hold, or one the index has not tracked, is dropped.
#[derive(Debug)]
pub struct ChangeNotifier<P: ParentResource> {
    subscriptions: SubscriptionManager<Refresh<P>>,
}

impl<P: ParentResource> Default for ChangeNotifier<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ParentResource> ChangeNotifier<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: SubscriptionManager::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<Refresh<P>> {
        self.subscriptions.subscribe()
    }

    pub fn unsubscribe(&mut self, subscription_id: &str) -> bool {
        self.subscriptions.unsubscribe(subscription_id)
    }

    /// Detach every listener; nothing is delivered after this returns
    pub fn detach_all(&mut self) {
        self.subscriptions.unsubscribe_all();
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active_subscriptions()
    }

    /// Publish the signals in order. Returns how many refreshes went out.
    pub fn dispatch(
        &mut self,
        signals: Vec<RefreshSignal<P>>,
        parents: &ResourceWatchCache<P>,
    ) -> usize {
        let mut sent = 0;
        for signal in signals {
            let parent = match signal {
                RefreshSignal::Parent(name) => match parents.get(&name) {
                    Some(parent) => parent.clone(),
                    None => {
                        debug!("🔕 refresh for unseen {} {} suppressed", P::KIND, name);
                        continue;
                    }
                },
                RefreshSignal::Unseen(key) => {
                    debug!("🔕 refresh for untracked {} {} suppressed", P::KIND, key);
                    continue;
                }
                RefreshSignal::Removed(parent) => parent,
            };
            self.subscriptions.notify(&Refresh { parent });
            sent += 1;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::cache::config::KindConfig;
    use crate::k8s::cache::watch_cache::WatchEvent;
    use crate::k8s::resource::{NamespaceInfo, ResourceKind};

    fn parents(names: &[&str]) -> ResourceWatchCache<NamespaceInfo> {
        let mut cache = ResourceWatchCache::new(KindConfig::for_kind(ResourceKind::Namespace));
        for name in names {
            cache.ingest(WatchEvent::Added(NamespaceInfo::new(*name)));
        }
        cache
    }

    #[test]
    fn test_refresh_rereads_parent() {
        let mut cache = parents(&["ns1"]);
        cache.ingest(WatchEvent::Modified(NamespaceInfo {
            name: "ns1".to_string(),
            phase: Some("Terminating".to_string()),
        }));
        let mut notifier = ChangeNotifier::new();
        let mut sub = notifier.subscribe();

        let sent = notifier.dispatch(vec![RefreshSignal::Parent("ns1".to_string())], &cache);

        assert_eq!(sent, 1);
        let refresh = sub.try_recv().unwrap();
        assert_eq!(refresh.parent.phase.as_deref(), Some("Terminating"));
    }

    #[test]
    fn test_refresh_for_unknown_parent_suppressed() {
        let cache = parents(&[]);
        let mut notifier = ChangeNotifier::new();
        let mut sub = notifier.subscribe();

        assert_eq!(
            notifier.dispatch(vec![RefreshSignal::Parent("ns2".to_string())], &cache),
            0
        );
        assert_eq!(
            notifier.dispatch(vec![RefreshSignal::Unseen("ns/ns2".to_string())], &cache),
            0
        );
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_removed_parent_is_published_without_cache() {
        let cache = parents(&[]);
        let mut notifier = ChangeNotifier::new();
        let mut sub = notifier.subscribe();

        notifier.dispatch(vec![RefreshSignal::Removed(NamespaceInfo::new("gone"))], &cache);
        assert_eq!(sub.drain(), vec![Refresh { parent: NamespaceInfo::new("gone") }]);
    }

    #[test]
    fn test_no_coalescing() {
        let cache = parents(&["ns1"]);
        let mut notifier = ChangeNotifier::new();
        let mut sub = notifier.subscribe();

        let signals = vec![
            RefreshSignal::Parent("ns1".to_string()),
            RefreshSignal::Parent("ns1".to_string()),
        ];
        assert_eq!(notifier.dispatch(signals, &cache), 2);
        assert_eq!(sub.drain().len(), 2);
    }

    #[test]
    fn test_detach_all() {
        let cache = parents(&["ns1"]);
        let mut notifier = ChangeNotifier::new();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        assert_eq!(notifier.active_subscriptions(), 2);

        notifier.detach_all();
        notifier.dispatch(vec![RefreshSignal::Parent("ns1".to_string())], &cache);

        assert_eq!(notifier.active_subscriptions(), 0);
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());
    }
}
