use conformity_core::{ObjectKind, ObjectRef};
use serde::{Deserialize, Serialize};

/// The conformance test for one rule kind. The set is closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RulePredicate {
    /// Every listed label key must be present. An empty list never flags anything.
    LabelsFilledIn { labels: Vec<String> },
    /// Every container declares a non-zero CPU and memory limit.
    LimitsFilledIn,
    /// Every container declares a non-zero CPU and memory request.
    RequestsFilledIn,
    LivenessProbeFilledIn,
    ReadinessProbeFilledIn,
    /// Declared replicas must be at least `minimum`.
    ReplicasMinimum { minimum: i32 },
}

impl RulePredicate {
    pub fn type_name(&self) -> &'static str {
        match self {
            RulePredicate::LabelsFilledIn { .. } => "labels_filled_in",
            RulePredicate::LimitsFilledIn => "limits_filled_in",
            RulePredicate::RequestsFilledIn => "requests_filled_in",
            RulePredicate::LivenessProbeFilledIn => "liveness_probe_filled_in",
            RulePredicate::ReadinessProbeFilledIn => "readiness_probe_filled_in",
            RulePredicate::ReplicasMinimum { .. } => "replicas_minimum",
        }
    }

    pub fn applies_to(&self, kind: ObjectKind) -> bool {
        match self {
            RulePredicate::ReplicasMinimum { .. } => matches!(kind, ObjectKind::Deployment | ObjectKind::StatefulSet),
            _ => kind == ObjectKind::Pod,
        }
    }

    /// Fixed reason text; embeds the rule parameters, never per-object data.
    pub fn reason(&self, kind: ObjectKind) -> String {
        match self {
            RulePredicate::LabelsFilledIn { labels } => format!("Labels: [{}] are not filled in", labels.join(" ")),
            RulePredicate::LimitsFilledIn => "Limits are not filled in".to_string(),
            RulePredicate::RequestsFilledIn => "Requests are not filled in".to_string(),
            RulePredicate::LivenessProbeFilledIn => "Liveness probes are not filled in".to_string(),
            RulePredicate::ReadinessProbeFilledIn => "ReadinessProbes are not filled in".to_string(),
            RulePredicate::ReplicasMinimum { minimum } => match kind {
                ObjectKind::StatefulSet => format!("StatefulSet replicas below the minimum: {}", minimum),
                _ => format!("Replicas below the minimum: {}", minimum),
            },
        }
    }

    /// True when `obj` violates the rule. Any offending container flags the whole pod.
    pub fn is_non_conforming(&self, obj: &ObjectRef) -> bool {
        let containers = obj.payload.containers();
        match self {
            RulePredicate::LabelsFilledIn { labels } => labels.iter().any(|l| !obj.labels.contains_key(l)),
            RulePredicate::LimitsFilledIn => containers.iter().any(|c| c.limits.cpu_is_zero() || c.limits.memory_is_zero()),
            RulePredicate::RequestsFilledIn => {
                containers.iter().any(|c| c.requests.cpu_is_zero() || c.requests.memory_is_zero())
            }
            RulePredicate::LivenessProbeFilledIn => containers.iter().any(|c| !c.has_liveness_probe),
            RulePredicate::ReadinessProbeFilledIn => containers.iter().any(|c| !c.has_readiness_probe),
            RulePredicate::ReplicasMinimum { minimum } => obj.payload.replicas().map(|r| r < *minimum).unwrap_or(false),
        }
    }
}
