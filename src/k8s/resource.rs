/**
 * Typed views of the watched Kubernetes objects.
 *
 * Raw `k8s_openapi` objects are validated once, at the ingestion boundary,
 * and reduced to the handful of fields the watch caches and the health index
 * need. Nothing past this module looks at loosely-typed metadata.
 */
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Node,
    Namespace,
    Pod,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "Node"),
            Self::Namespace => write!(f, "Namespace"),
            Self::Pod => write!(f, "Pod"),
        }
    }
}

/// Anything a `ResourceWatchCache` can hold
pub trait Watchable: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Cache key. Pods are keyed by name alone, across namespaces.
    fn name(&self) -> &str;
}

/// Resource kinds that pods are aggregated under
pub trait ParentResource: Watchable {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Watchable for NodeInfo {
    const KIND: ResourceKind = ResourceKind::Node;

    fn name(&self) -> &str {
        &self.name
    }
}

impl ParentResource for NodeInfo {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub phase: Option<String>,
}

impl NamespaceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: None,
        }
    }
}

impl Watchable for NamespaceInfo {
    const KIND: ResourceKind = ResourceKind::Namespace;

    fn name(&self) -> &str {
        &self.name
    }
}

impl ParentResource for NamespaceInfo {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl FromStr for PodPhase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: Option<String>,
    pub node_name: Option<String>,
    pub phase: PodPhase,
    /// Status of the pod-level `Ready` condition, when reported
    pub ready_condition: Option<bool>,
    /// Per-container `ready` flags from `status.containerStatuses`
    pub containers_ready: Vec<bool>,
}

impl PodInfo {
    pub fn new(name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            node_name: None,
            phase,
            ready_condition: None,
            containers_ready: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    #[must_use]
    pub const fn with_ready(mut self, ready: bool) -> Self {
        self.ready_condition = Some(ready);
        self
    }

    #[must_use]
    pub fn with_containers_ready(mut self, ready: Vec<bool>) -> Self {
        self.containers_ready = ready;
        self
    }

    /// Whether the pod reports every container ready.
    ///
    /// The pod-level `Ready` condition wins when present; otherwise every
    /// container status must be ready. A pod reporting neither is not ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_condition.unwrap_or_else(|| {
            !self.containers_ready.is_empty() && self.containers_ready.iter().all(|r| *r)
        })
    }
}

impl Watchable for PodInfo {
    const KIND: ResourceKind = ResourceKind::Pod;

    fn name(&self) -> &str {
        &self.name
    }
}

fn required_name(kind: ResourceKind, name: Option<String>) -> Result<String> {
    match name {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(Error::InvalidResource(format!("{kind} without metadata.name"))),
    }
}

impl TryFrom<Node> for NodeInfo {
    type Error = Error;

    fn try_from(node: Node) -> Result<Self> {
        Ok(Self {
            name: required_name(ResourceKind::Node, node.metadata.name)?,
        })
    }
}

impl TryFrom<Namespace> for NamespaceInfo {
    type Error = Error;

    fn try_from(ns: Namespace) -> Result<Self> {
        Ok(Self {
            name: required_name(ResourceKind::Namespace, ns.metadata.name)?,
            phase: ns.status.and_then(|s| s.phase),
        })
    }
}

impl TryFrom<Pod> for PodInfo {
    type Error = Error;

    fn try_from(pod: Pod) -> Result<Self> {
        let name = required_name(ResourceKind::Pod, pod.metadata.name)?;
        let node_name = pod.spec.and_then(|spec| spec.node_name);
        let status = pod.status.unwrap_or_default();

        let phase = status
            .phase
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(PodPhase::Unknown);

        let ready_condition = status
            .conditions
            .as_ref()
            .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
            .map(|c| c.status == "True");

        let containers_ready = status
            .container_statuses
            .unwrap_or_default()
            .iter()
            .map(|cs| cs.ready)
            .collect();

        Ok(Self {
            name,
            namespace: pod.metadata.namespace,
            node_name,
            phase,
            ready_condition,
            containers_ready,
        })
    }
}
