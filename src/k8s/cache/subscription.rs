use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A listener registered with a `SubscriptionManager`.
///
/// Dropping the subscription detaches it: the manager prunes the sender the
/// next time it notifies.
#[derive(Debug)]
pub struct Subscription<E> {
    pub id: String,
    receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Wait for the next update; `None` once the listener has been detached
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Take an already delivered update without waiting
    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    /// Drain every update delivered so far
    pub fn drain(&mut self) -> Vec<E> {
        let mut out = Vec::new();
        while let Ok(update) = self.receiver.try_recv() {
            out.push(update);
        }
        out
    }
}

/// Fan-out of updates to independently disposable listeners.
///
/// Delivery is synchronous and unbounded so publishers never await.
#[derive(Debug)]
pub struct SubscriptionManager<E> {
    subscriptions: HashMap<String, mpsc::UnboundedSender<E>>,
}

impl<E> Default for SubscriptionManager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SubscriptionManager<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();
        self.subscriptions.insert(id.clone(), tx);

        Subscription { id, receiver: rx }
    }

    /// Detach one listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, subscription_id: &str) -> bool {
        self.subscriptions.remove(subscription_id).is_some()
    }

    /// Detach every listener. Their receivers see the end of the stream.
    pub fn unsubscribe_all(&mut self) {
        self.subscriptions.clear();
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.values().filter(|tx| !tx.is_closed()).count()
    }
}

impl<E: Clone> SubscriptionManager<E> {
    pub fn notify(&mut self, update: &E) {
        // a failed send means the receiver was dropped
        self.subscriptions
            .retain(|_, sender| sender.send(update.clone()).is_ok());
    }
}
