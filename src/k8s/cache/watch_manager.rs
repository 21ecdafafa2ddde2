/**
 * K8s Watch Stream Manager
 *
 * Runs one kube watch stream per resource kind and forwards typed
 * Added/Modified/Deleted events to the health monitor loop. Restarting and
 * backing off live here; the caches themselves never reconnect.
 */
use super::config::{
    EVENT_CHANNEL_CAPACITY, INITIAL_BACKOFF_SECONDS, MAX_BACKOFF_SECONDS, MAX_WATCH_RESTARTS,
    RESTART_DELAY_SECONDS, WATCH_TIMEOUT_SECONDS,
};
use super::watch_cache::WatchEvent;
use crate::error::{Error, Result};
use crate::k8s::resource::Watchable;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{Api, ListParams, WatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// What a watch task delivers to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent<T> {
    Event(WatchEvent<T>),
    /// The watch gave up; nothing follows
    Failed(String),
}

/// Result of an initial list, used to seed a cache before watching
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub resource_version: String,
}

enum StreamEnd {
    /// Server closed the stream, resume from the last seen version
    Closed,
    /// Nobody is listening any more
    ReceiverGone,
    /// The resource version is too old to resume from (HTTP 410)
    Expired(String),
}

#[derive(Clone, Copy)]
enum Change {
    Added,
    Modified,
    Deleted,
}

/// Manages K8s watch streams feeding the health monitor
pub struct WatchManager {
    client: Client,
    namespace: Option<String>,
    task_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WatchManager {
    /// Create a new `WatchManager`. Pods are watched in `namespace` when set,
    /// cluster-wide otherwise.
    #[must_use]
    pub const fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace,
            task_handles: Vec::new(),
        }
    }

    #[must_use]
    pub fn pods(&self) -> Api<Pod> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    #[must_use]
    pub fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    #[must_use]
    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    /// List a kind once, converting to typed resources
    ///
    /// # Errors
    ///
    /// Returns an error if the list call fails
    pub async fn list<K, T>(api: &Api<K>) -> Result<Listing<T>>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        T: Watchable + TryFrom<K, Error = Error>,
    {
        let list = api.list(&ListParams::default()).await?;
        let resource_version = list.metadata.resource_version.unwrap_or_default();
        let items: Vec<T> = list.items.into_iter().filter_map(convert).collect();
        info!(
            "📋 listed {} {} entries at resourceVersion {}",
            items.len(),
            T::KIND,
            resource_version
        );

        Ok(Listing {
            items,
            resource_version,
        })
    }

    /// Start watching `api` from `resource_version`.
    ///
    /// Returns the receiving end of the event channel.
    pub fn watch<K, T>(&mut self, api: Api<K>, resource_version: String) -> mpsc::Receiver<TransportEvent<T>>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        T: Watchable + TryFrom<K, Error = Error>,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(Self::run_watcher(api, resource_version, tx));
        self.task_handles.push(handle);
        rx
    }

    /// Hand the running tasks over to a handle used for shutdown
    #[must_use]
    pub fn into_handle(self) -> WatchManagerHandle {
        WatchManagerHandle {
            task_handles: self.task_handles,
        }
    }

    async fn run_watcher<K, T>(
        api: Api<K>,
        mut resource_version: String,
        tx: mpsc::Sender<TransportEvent<T>>,
    ) where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        T: Watchable + TryFrom<K, Error = Error>,
    {
        info!("🔍 Starting {} watcher", T::KIND);

        let mut backoff_seconds = INITIAL_BACKOFF_SECONDS;
        let mut restart_count = 0;

        loop {
            if restart_count >= MAX_WATCH_RESTARTS {
                error!(
                    "❌ {} watcher exceeded maximum restart attempts ({}), stopping",
                    T::KIND,
                    MAX_WATCH_RESTARTS
                );
                let _ = tx
                    .send(TransportEvent::Failed(format!(
                        "{} watch gave up after {MAX_WATCH_RESTARTS} restarts",
                        T::KIND
                    )))
                    .await;
                break;
            }

            match expired_as_end(Self::watch_stream(&api, &mut resource_version, &tx).await) {
                Ok(StreamEnd::Closed) => {
                    debug!("🔍 {} watcher stream ended normally, resuming", T::KIND);
                    backoff_seconds = INITIAL_BACKOFF_SECONDS;
                    restart_count = 0;
                }
                Ok(StreamEnd::ReceiverGone) => {
                    info!("🔍 {} watcher has no receiver, stopping", T::KIND);
                    break;
                }
                Ok(StreamEnd::Expired(message)) => {
                    // the caches only resync on a fresh start
                    error!("❌ {} watch resourceVersion expired: {}", T::KIND, message);
                    let _ = tx
                        .send(TransportEvent::Failed(format!(
                            "{} watch expired: {message}",
                            T::KIND
                        )))
                        .await;
                    break;
                }
                Err(e) => {
                    restart_count += 1;
                    error!(
                        "❌ {} watcher failed (attempt {}/{}): {}, restarting in {}s",
                        T::KIND,
                        restart_count,
                        MAX_WATCH_RESTARTS,
                        e,
                        backoff_seconds
                    );
                    sleep(Duration::from_secs(backoff_seconds)).await;
                    backoff_seconds = (backoff_seconds * 2).min(MAX_BACKOFF_SECONDS);
                }
            }

            sleep(Duration::from_secs(RESTART_DELAY_SECONDS)).await;
        }
    }

    async fn watch_stream<K, T>(
        api: &Api<K>,
        resource_version: &mut String,
        tx: &mpsc::Sender<TransportEvent<T>>,
    ) -> Result<StreamEnd>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        T: Watchable + TryFrom<K, Error = Error>,
    {
        use futures::{TryStreamExt, pin_mut};

        let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECONDS);
        let version = resource_version.clone();
        let stream = api.watch(&wp, &version).await?;
        pin_mut!(stream);

        while let Some(event) = stream.try_next().await? {
            let (object, change) = match event {
                kube::api::WatchEvent::Added(obj) => (obj, Change::Added),
                kube::api::WatchEvent::Modified(obj) => (obj, Change::Modified),
                kube::api::WatchEvent::Deleted(obj) => (obj, Change::Deleted),
                kube::api::WatchEvent::Bookmark(bookmark) => {
                    *resource_version = bookmark.metadata.resource_version;
                    continue;
                }
                kube::api::WatchEvent::Error(e) if e.code == 410 => {
                    return Ok(StreamEnd::Expired(e.message.clone()));
                }
                kube::api::WatchEvent::Error(e) => {
                    return Err(Error::Custom(format!("watch error {}: {}", e.code, e.message)));
                }
            };

            if let Some(rv) = object.resource_version() {
                *resource_version = rv;
            }

            let Some(typed) = convert::<K, T>(object) else {
                continue;
            };
            let event = match change {
                Change::Added => WatchEvent::Added(typed),
                Change::Modified => WatchEvent::Modified(typed),
                Change::Deleted => WatchEvent::Deleted(typed),
            };
            if tx.send(TransportEvent::Event(event)).await.is_err() {
                return Ok(StreamEnd::ReceiverGone);
            }
        }

        Ok(StreamEnd::Closed)
    }
}

/// A 410 Gone from the API server means the same as a 410 watch event
fn expired_as_end(result: Result<StreamEnd>) -> Result<StreamEnd> {
    match result {
        Err(Error::Kube(kube::Error::Api(response))) if response.code == 410 => {
            Ok(StreamEnd::Expired(response.message))
        }
        other => other,
    }
}

fn convert<K, T>(object: K) -> Option<T>
where
    T: Watchable + TryFrom<K, Error = Error>,
{
    match T::try_from(object) {
        Ok(typed) => Some(typed),
        Err(e) => {
            warn!("skipping {}: {}", T::KIND, e);
            None
        }
    }
}

/// Handle to manage watch manager tasks
pub struct WatchManagerHandle {
    task_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WatchManagerHandle {
    /// Shutdown all watch manager tasks
    pub fn shutdown(self) {
        for handle in self.task_handles {
            handle.abort();
        }
        info!("🔍 watch streams shut down");
    }

    #[must_use]
    pub fn active_watchers(&self) -> usize {
        self.task_handles.iter().filter(|h| !h.is_finished()).count()
    }
}
