use clap::{Parser, ValueEnum};
use k8s_openapi::api::core::v1::Pod;
use kruit::board::{HealthBoard, OutputFormat};
use kruit::error::Error;
use kruit::k8s::cache::{
    HealthMonitor, IndexConfig, KindConfig, ResourceWatchCache, RunningPolicy, TransportEvent,
    WatchManager,
};
use kruit::k8s::resource::{ParentResource, PodInfo, ResourceKind};
use kruit::k8s::{USER_AGENT, client};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GroupBy {
    Namespace,
    Node,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    /// Running pods count as happy only when all containers are ready
    Strict,
    /// Any running pod counts as happy
    Lenient,
}

impl From<Policy> for RunningPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Strict => Self::RequireReady,
            Policy::Lenient => Self::AnyRunning,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Aggregate pod health per namespace or per node
    #[arg(short, long, value_enum, default_value_t = GroupBy::Namespace)]
    group_by: GroupBy,

    /// How running pods are classified
    #[arg(short, long, value_enum, default_value_t = Policy::Strict)]
    policy: Policy,

    /// Output format for health updates
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    /// Only watch pods in this namespace
    #[arg(short, long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();
    let client = client::new(Some(USER_AGENT)).await?;
    let manager = WatchManager::new(client, args.namespace.clone());
    let policy = RunningPolicy::from(args.policy);

    match args.group_by {
        GroupBy::Namespace => {
            let api = manager.namespaces();
            let config = IndexConfig::by_namespace().with_running_policy(policy);
            run(manager, api, config, args.output).await
        }
        GroupBy::Node => {
            let api = manager.nodes();
            let config = IndexConfig::by_node().with_running_policy(policy);
            run(manager, api, config, args.output).await
        }
    }
}

async fn run<K, P>(
    mut manager: WatchManager,
    parent_api: Api<K>,
    config: IndexConfig<P>,
    output: OutputFormat,
) -> anyhow::Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    P: ParentResource + TryFrom<K, Error = Error>,
{
    let parents = WatchManager::list::<K, P>(&parent_api).await?;
    let pod_api = manager.pods();
    let pods = WatchManager::list::<Pod, PodInfo>(&pod_api).await?;

    let mut parent_rx = manager.watch::<K, P>(parent_api, parents.resource_version);
    let mut pod_rx = manager.watch::<Pod, PodInfo>(pod_api, pods.resource_version);
    let watchers = manager.into_handle();

    let mut monitor = HealthMonitor::new(
        config,
        ResourceWatchCache::seeded(KindConfig::for_kind(P::KIND), parents.items),
        ResourceWatchCache::seeded(KindConfig::for_kind(ResourceKind::Pod), pods.items),
    );
    let mut refreshes = monitor.subscribe_refresh();
    let mut board = HealthBoard::new();

    println!("{}", HealthBoard::full(&monitor).render(output)?);

    loop {
        let deadline = board.deadline();
        let settle_deadline = board.settle_deadline();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            event = parent_rx.recv() => match event {
                Some(TransportEvent::Event(event)) => {
                    monitor.apply_parent_event(event);
                }
                Some(TransportEvent::Failed(reason)) => {
                    monitor.fail_parent(reason);
                    break;
                }
                None => {
                    monitor.fail_parent(format!("{} watch channel closed", P::KIND));
                    break;
                }
            },
            event = pod_rx.recv() => match event {
                Some(TransportEvent::Event(event)) => {
                    monitor.apply_pod_event(event);
                }
                Some(TransportEvent::Failed(reason)) => {
                    monitor.fail_pod(reason);
                    break;
                }
                None => {
                    monitor.fail_pod("Pod watch channel closed");
                    break;
                }
            },
            () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now))), if deadline.is_some() => {
                if let Some(redraw) = board.flush(&monitor, Instant::now()) {
                    println!("{}", redraw.render(output)?);
                }
            }
            () = tokio::time::sleep_until(tokio::time::Instant::from_std(settle_deadline.unwrap_or_else(Instant::now))), if settle_deadline.is_some() => {
                if let Some(settled) = board.settle(&monitor, Instant::now()) {
                    println!("{}", settled.render(output)?);
                }
            }
        }

        let now = Instant::now();
        for refresh in refreshes.drain() {
            board.note(&refresh, now);
        }
    }

    monitor.detach_all();
    watchers.shutdown();

    if monitor.has_failed() {
        error!("watch terminated, exiting");
        anyhow::bail!("watch terminated");
    }
    Ok(())
}
