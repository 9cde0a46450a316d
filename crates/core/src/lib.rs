//! Conformity core types: object snapshots, rule results and the listing seam.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod quantity;

pub use quantity::Quantity;

/// Label key Kubernetes puts on pods created by a Job.
pub const JOB_NAME_LABEL: &str = "job-name";

/// Workload kinds the scanner knows how to list and evaluate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Pod,
    Deployment,
    StatefulSet,
}

impl ObjectKind {
    /// Evaluation order within one cycle.
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Pod, ObjectKind::Deployment, ObjectKind::StatefulSet];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Pod => "Pod",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU and memory entries of a container's `limits` or `requests`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceList {
    pub cpu: Option<Quantity>,
    pub memory: Option<Quantity>,
}

impl ResourceList {
    /// Absent and explicit-zero quantities are treated the same.
    pub fn cpu_is_zero(&self) -> bool {
        self.cpu.as_ref().map(Quantity::is_zero).unwrap_or(true)
    }

    pub fn memory_is_zero(&self) -> bool {
        self.memory.as_ref().map(Quantity::is_zero).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub limits: ResourceList,
    pub requests: ResourceList,
    pub has_liveness_probe: bool,
    pub has_readiness_probe: bool,
}

/// Kind-specific data only the rule predicates look at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum KindPayload {
    Pod { containers: SmallVec<[ContainerSpec; 2]> },
    Deployment { replicas: i32 },
    StatefulSet { replicas: i32 },
}

impl KindPayload {
    pub fn kind(&self) -> ObjectKind {
        match self {
            KindPayload::Pod { .. } => ObjectKind::Pod,
            KindPayload::Deployment { .. } => ObjectKind::Deployment,
            KindPayload::StatefulSet { .. } => ObjectKind::StatefulSet,
        }
    }

    /// Containers of a pod; empty for other kinds.
    pub fn containers(&self) -> &[ContainerSpec] {
        match self {
            KindPayload::Pod { containers } => containers.as_slice(),
            _ => &[],
        }
    }

    /// Declared replica count of a deployment or stateful set.
    pub fn replicas(&self) -> Option<i32> {
        match self {
            KindPayload::Deployment { replicas } | KindPayload::StatefulSet { replicas } => Some(*replicas),
            KindPayload::Pod { .. } => None,
        }
    }
}

/// Immutable snapshot of one cluster object, taken at listing time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
    /// `metadata.uid` verbatim.
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub payload: KindPayload,
}

impl ObjectRef {
    pub fn kind(&self) -> ObjectKind {
        self.payload.kind()
    }

    /// `name_namespace`, the form reporters print per object.
    pub fn key(&self) -> String {
        format!("{}_{}", self.name, self.namespace)
    }

    pub fn is_job_pod(&self) -> bool {
        self.kind() == ObjectKind::Pod && self.labels.contains_key(JOB_NAME_LABEL)
    }
}

/// Report produced by one rule for one evaluation cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleResult {
    pub rule_name: String,
    pub reason: String,
    pub non_conforming: Vec<ObjectRef>,
}

impl RuleResult {
    pub fn is_conforming(&self) -> bool {
        self.non_conforming.is_empty()
    }
}

/// Failure of the object source for one kind.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ListingError {
    #[error("listing {kind} objects failed: {message}")]
    Api { kind: ObjectKind, message: String },
    #[error("listing {kind} objects timed out after {millis}ms")]
    Timeout { kind: ObjectKind, millis: u64 },
    #[error("no client available to list {kind} objects: {message}")]
    Unavailable { kind: ObjectKind, message: String },
}

impl ListingError {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ListingError::Api { kind, .. } | ListingError::Timeout { kind, .. } | ListingError::Unavailable { kind, .. } => *kind,
        }
    }
}

/// Everything one cycle produced, grouped by kind in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub pod_results: Vec<RuleResult>,
    pub deployment_results: Vec<RuleResult>,
    pub stateful_set_results: Vec<RuleResult>,
    /// Kinds whose listing failed this cycle; their result lists stay empty.
    pub failures: Vec<ListingError>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            pod_results: Vec::new(),
            deployment_results: Vec::new(),
            stateful_set_results: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn results_for(&self, kind: ObjectKind) -> &[RuleResult] {
        match kind {
            ObjectKind::Pod => &self.pod_results,
            ObjectKind::Deployment => &self.deployment_results,
            ObjectKind::StatefulSet => &self.stateful_set_results,
        }
    }

    pub fn results_for_mut(&mut self, kind: ObjectKind) -> &mut Vec<RuleResult> {
        match kind {
            ObjectKind::Pod => &mut self.pod_results,
            ObjectKind::Deployment => &mut self.deployment_results,
            ObjectKind::StatefulSet => &mut self.stateful_set_results,
        }
    }

    /// True when every kind with rules was listed successfully.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn non_conforming_total(&self) -> usize {
        ObjectKind::ALL
            .iter()
            .flat_map(|k| self.results_for(*k))
            .map(|r| r.non_conforming.len())
            .sum()
    }
}

/// Source of live objects; must return every object of a kind across all namespaces.
#[async_trait::async_trait]
pub trait ObjectSource: Send + Sync {
    async fn list(&self, kind: ObjectKind) -> Result<Vec<ObjectRef>, ListingError>;
}

pub mod prelude {
    pub use super::{
        ContainerSpec, CycleReport, KindPayload, ListingError, ObjectKind, ObjectRef, ObjectSource, Quantity,
        ResourceList, RuleResult,
    };
}
