pub mod config;
pub mod errors;
pub mod health_index;
pub mod monitor;
pub mod notifier;
pub mod subscription;
pub mod watch_cache;
pub mod watch_manager;

pub use config::{IndexConfig, KindConfig, RunningPolicy};
pub use errors::Anomaly;
pub use health_index::{HealthStatus, PodHealth, PodHealthIndex, RefreshSignal};
pub use monitor::{HealthMonitor, ParentHealth};
pub use notifier::{ChangeNotifier, Refresh};
pub use subscription::{Subscription, SubscriptionManager};
pub use watch_cache::{CacheEvent, ResourceWatchCache, WatchEvent};
pub use watch_manager::{Listing, TransportEvent, WatchManager, WatchManagerHandle};
