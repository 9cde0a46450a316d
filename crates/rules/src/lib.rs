//! Conformity rules: per-kind predicates bound to a name and a filter.

#![forbid(unsafe_code)]

use conformity_core::{ObjectKind, ObjectRef, RuleResult};
use conformity_filter::{ObjectFilter, SelectorConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

mod predicate;

pub use predicate::RulePredicate;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("missing name for {0} rule")]
    EmptyName(&'static str),
    #[error("rule {name:?}: minimum replicas must be positive, got {minimum}")]
    InvalidMinimum { name: String, minimum: i32 },
    #[error("rule {name:?}: {predicate} does not apply to {kind}")]
    KindMismatch { name: String, predicate: &'static str, kind: ObjectKind },
}

/// A runnable rule: filter first, then the predicate on each survivor.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    name: String,
    kind: ObjectKind,
    predicate: RulePredicate,
    filter: ObjectFilter,
    reason: String,
}

impl Rule {
    pub fn new(name: impl Into<String>, kind: ObjectKind, predicate: RulePredicate, selector: &SelectorConfig) -> Result<Self, RuleError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RuleError::EmptyName(predicate.type_name()));
        }
        if !predicate.applies_to(kind) {
            return Err(RuleError::KindMismatch { name, predicate: predicate.type_name(), kind });
        }
        if let RulePredicate::ReplicasMinimum { minimum } = &predicate {
            if *minimum <= 0 {
                return Err(RuleError::InvalidMinimum { name, minimum: *minimum });
            }
        }
        let reason = predicate.reason(kind);
        let filter = ObjectFilter::for_kind(selector, kind);
        Ok(Self { name, kind, predicate, filter, reason })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn predicate(&self) -> &RulePredicate {
        &self.predicate
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn filter(&self) -> &ObjectFilter {
        &self.filter
    }

    /// Evaluate against a full listing of this rule's kind. Objects of other
    /// kinds are skipped.
    pub fn evaluate(&self, objects: &[ObjectRef]) -> RuleResult {
        let (filtered, dbg) = self.filter.apply_with_debug(objects);
        let non_conforming: Vec<ObjectRef> = filtered
            .into_iter()
            .filter(|o| o.kind() == self.kind && self.predicate.is_non_conforming(o))
            .cloned()
            .collect();
        debug!(
            rule = %self.name,
            kind = %self.kind,
            total = dbg.total,
            considered = dbg.survivors(),
            non_conforming = non_conforming.len(),
            "rule evaluated"
        );
        RuleResult { rule_name: self.name.clone(), reason: self.reason.clone(), non_conforming }
    }
}

/// Configured rules grouped by kind, each group in author order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pod: Vec<Rule>,
    deployment: Vec<Rule>,
    stateful_set: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule to its kind's group.
    pub fn push(&mut self, rule: Rule) {
        match rule.kind() {
            ObjectKind::Pod => self.pod.push(rule),
            ObjectKind::Deployment => self.deployment.push(rule),
            ObjectKind::StatefulSet => self.stateful_set.push(rule),
        }
    }

    pub fn for_kind(&self, kind: ObjectKind) -> &[Rule] {
        match kind {
            ObjectKind::Pod => &self.pod,
            ObjectKind::Deployment => &self.deployment,
            ObjectKind::StatefulSet => &self.stateful_set,
        }
    }

    pub fn len(&self) -> usize {
        self.pod.len() + self.deployment.len() + self.stateful_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rules across all kinds in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        ObjectKind::ALL.into_iter().flat_map(move |k| self.for_kind(k).iter())
    }

    pub fn summary(&self) -> Vec<RuleSummary> {
        self.iter()
            .map(|r| RuleSummary {
                kind: r.kind(),
                name: r.name().to_string(),
                reason: r.reason().to_string(),
                filter_stages: r.filter().stages().iter().map(|s| s.stage_name().to_string()).collect(),
            })
            .collect()
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        let mut set = RuleSet::new();
        for r in iter {
            set.push(r);
        }
        set
    }
}

/// Flat description of a configured rule for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSummary {
    pub kind: ObjectKind,
    pub name: String,
    pub reason: String,
    pub filter_stages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_rejected() {
        let err = Rule::new("  ", ObjectKind::Pod, RulePredicate::LimitsFilledIn, &SelectorConfig::default()).unwrap_err();
        assert_eq!(err, RuleError::EmptyName("limits_filled_in"));
    }

    #[test]
    fn minimum_must_be_positive() {
        let err = Rule::new(
            "replicas",
            ObjectKind::Deployment,
            RulePredicate::ReplicasMinimum { minimum: 0 },
            &SelectorConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidMinimum { minimum: 0, .. }));
    }

    #[test]
    fn pod_predicates_do_not_bind_to_deployments() {
        let err = Rule::new("probes", ObjectKind::Deployment, RulePredicate::LivenessProbeFilledIn, &SelectorConfig::default())
            .unwrap_err();
        assert!(matches!(err, RuleError::KindMismatch { kind: ObjectKind::Deployment, .. }));
        let err = Rule::new("replicas", ObjectKind::Pod, RulePredicate::ReplicasMinimum { minimum: 1 }, &SelectorConfig::default())
            .unwrap_err();
        assert!(matches!(err, RuleError::KindMismatch { kind: ObjectKind::Pod, .. }));
    }

    #[test]
    fn rule_set_routes_by_kind_and_keeps_order() {
        let sel = SelectorConfig::default();
        let set: RuleSet = vec![
            Rule::new("sts", ObjectKind::StatefulSet, RulePredicate::ReplicasMinimum { minimum: 2 }, &sel).unwrap(),
            Rule::new("limits", ObjectKind::Pod, RulePredicate::LimitsFilledIn, &sel).unwrap(),
            Rule::new("labels", ObjectKind::Pod, RulePredicate::LabelsFilledIn { labels: vec!["app".into()] }, &sel).unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 3);
        let pods: Vec<_> = set.for_kind(ObjectKind::Pod).iter().map(|r| r.name()).collect();
        assert_eq!(pods, vec!["limits", "labels"]);
        assert!(set.for_kind(ObjectKind::Deployment).is_empty());
        let all: Vec<_> = set.iter().map(|r| r.name()).collect();
        assert_eq!(all, vec!["limits", "labels", "sts"]);
        assert_eq!(set.summary()[2].reason, "StatefulSet replicas below the minimum: 2");
    }
}
