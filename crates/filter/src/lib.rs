//! Conformity filter: selects which objects a rule looks at.
//!
//! A filter is a fixed pipeline of selector stages. Each stage keeps the
//! survivors of the previous one and never reorders them:
//!
//! 1. include-namespaces (empty = all)
//! 2. exclude-namespaces
//! 3. exclude-annotations (one matching key/value pair is enough)
//! 4. exclude-labels (same)
//! 5. exclude-jobs (pods only; drops pods labelled `job-name`)

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use conformity_core::{ObjectKind, ObjectRef};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Selector configuration as written in the config file. Read-only after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectorConfig {
    pub include_namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
    pub exclude_annotations: BTreeMap<String, String>,
    pub exclude_labels: BTreeMap<String, String>,
    pub exclude_jobs: bool,
}

impl SelectorConfig {
    pub fn is_empty(&self) -> bool {
        self.include_namespaces.is_empty()
            && self.exclude_namespaces.is_empty()
            && self.exclude_annotations.is_empty()
            && self.exclude_labels.is_empty()
            && !self.exclude_jobs
    }
}

/// A single include/exclude predicate over object metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    IncludeNamespaces(FxHashSet<String>),
    ExcludeNamespaces(FxHashSet<String>),
    ExcludeAnnotations(BTreeMap<String, String>),
    ExcludeLabels(BTreeMap<String, String>),
    ExcludeJobs,
}

impl Selector {
    /// Whether `obj` survives this stage.
    pub fn keeps(&self, obj: &ObjectRef) -> bool {
        match self {
            Selector::IncludeNamespaces(set) => set.is_empty() || set.contains(&obj.namespace),
            Selector::ExcludeNamespaces(set) => !set.contains(&obj.namespace),
            Selector::ExcludeAnnotations(pairs) => !any_pair_matches(pairs, &obj.annotations),
            Selector::ExcludeLabels(pairs) => !any_pair_matches(pairs, &obj.labels),
            Selector::ExcludeJobs => !obj.is_job_pod(),
        }
    }

    pub fn stage_name(&self) -> &'static str {
        match self {
            Selector::IncludeNamespaces(_) => "include_namespaces",
            Selector::ExcludeNamespaces(_) => "exclude_namespaces",
            Selector::ExcludeAnnotations(_) => "exclude_annotations",
            Selector::ExcludeLabels(_) => "exclude_labels",
            Selector::ExcludeJobs => "exclude_jobs",
        }
    }
}

// OR across configured keys: a single key present with the configured value excludes.
fn any_pair_matches(pairs: &BTreeMap<String, String>, meta: &BTreeMap<String, String>) -> bool {
    pairs.iter().any(|(k, v)| meta.get(k).map(|have| have == v).unwrap_or(false))
}

/// Survivor counts after each stage, in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterDebugInfo {
    pub total: usize,
    pub stages: Vec<(&'static str, usize)>,
}

impl FilterDebugInfo {
    pub fn survivors(&self) -> usize {
        self.stages.last().map(|(_, n)| *n).unwrap_or(self.total)
    }
}

/// Ordered pipeline of selectors for one object kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    stages: Vec<Selector>,
}

impl ObjectFilter {
    /// A filter that passes everything.
    pub fn all() -> Self {
        Self { stages: Vec::new() }
    }

    /// Compile a selector config for `kind`. Empty settings compile to no stage;
    /// `exclude_jobs` is only honoured for pods.
    pub fn for_kind(cfg: &SelectorConfig, kind: ObjectKind) -> Self {
        let mut stages = Vec::new();
        if !cfg.include_namespaces.is_empty() {
            stages.push(Selector::IncludeNamespaces(cfg.include_namespaces.iter().cloned().collect()));
        }
        if !cfg.exclude_namespaces.is_empty() {
            stages.push(Selector::ExcludeNamespaces(cfg.exclude_namespaces.iter().cloned().collect()));
        }
        if !cfg.exclude_annotations.is_empty() {
            stages.push(Selector::ExcludeAnnotations(cfg.exclude_annotations.clone()));
        }
        if !cfg.exclude_labels.is_empty() {
            stages.push(Selector::ExcludeLabels(cfg.exclude_labels.clone()));
        }
        if cfg.exclude_jobs {
            if kind == ObjectKind::Pod {
                stages.push(Selector::ExcludeJobs);
            } else {
                debug!(kind = %kind, "exclude_jobs ignored for non-pod kind");
            }
        }
        Self { stages }
    }

    pub fn stages(&self) -> &[Selector] {
        &self.stages
    }

    pub fn is_pass_through(&self) -> bool {
        self.stages.is_empty()
    }

    /// Keep the objects every stage accepts, in input order.
    pub fn apply<'a>(&self, objects: &'a [ObjectRef]) -> Vec<&'a ObjectRef> {
        self.apply_with_debug(objects).0
    }

    pub fn apply_with_debug<'a>(&self, objects: &'a [ObjectRef]) -> (Vec<&'a ObjectRef>, FilterDebugInfo) {
        let mut survivors: Vec<&ObjectRef> = objects.iter().collect();
        let mut dbg = FilterDebugInfo { total: objects.len(), stages: Vec::with_capacity(self.stages.len()) };
        for stage in self.stages.iter() {
            survivors.retain(|o| stage.keeps(o));
            dbg.stages.push((stage.stage_name(), survivors.len()));
        }
        (survivors, dbg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conformity_core::KindPayload;

    fn obj(ns: &str, name: &str, labels: &[(&str, &str)], annos: &[(&str, &str)]) -> ObjectRef {
        ObjectRef {
            namespace: ns.to_string(),
            name: name.to_string(),
            uid: format!("uid-{}", name),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            annotations: annos.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            payload: KindPayload::Pod { containers: Default::default() },
        }
    }

    fn names(v: &[&ObjectRef]) -> Vec<String> {
        v.iter().map(|o| o.name.clone()).collect()
    }

    #[test]
    fn empty_config_compiles_to_pass_through() {
        let f = ObjectFilter::for_kind(&SelectorConfig::default(), ObjectKind::Pod);
        assert!(f.is_pass_through());
        let objs = vec![obj("b", "2", &[], &[]), obj("a", "1", &[], &[])];
        assert_eq!(names(&f.apply(&objs)), vec!["2", "1"]);
    }

    #[test]
    fn stages_follow_pipeline_order() {
        let cfg = SelectorConfig {
            include_namespaces: vec!["a".into()],
            exclude_namespaces: vec!["b".into()],
            exclude_annotations: [("k".to_string(), "v".to_string())].into_iter().collect(),
            exclude_labels: [("k".to_string(), "v".to_string())].into_iter().collect(),
            exclude_jobs: true,
        };
        let f = ObjectFilter::for_kind(&cfg, ObjectKind::Pod);
        let order: Vec<_> = f.stages().iter().map(|s| s.stage_name()).collect();
        assert_eq!(order, vec!["include_namespaces", "exclude_namespaces", "exclude_annotations", "exclude_labels", "exclude_jobs"]);
    }

    #[test]
    fn exclude_jobs_only_compiled_for_pods() {
        let cfg = SelectorConfig { exclude_jobs: true, ..Default::default() };
        assert_eq!(ObjectFilter::for_kind(&cfg, ObjectKind::Pod).stages().len(), 1);
        assert!(ObjectFilter::for_kind(&cfg, ObjectKind::Deployment).is_pass_through());
    }

    #[test]
    fn annotation_exclusion_requires_equal_value() {
        let cfg = SelectorConfig {
            exclude_annotations: [("testkey1".to_string(), "testvalue1".to_string())].into_iter().collect(),
            ..Default::default()
        };
        let f = ObjectFilter::for_kind(&cfg, ObjectKind::Pod);
        let objs = vec![
            obj("default", "name1", &[], &[("testkey1", "testvalue1")]),
            obj("default", "name2", &[], &[("testkey1", "testvalue2")]),
            obj("default", "name3", &[], &[("testkey2", "testvalue1")]),
        ];
        assert_eq!(names(&f.apply(&objs)), vec!["name2", "name3"]);
    }

    #[test]
    fn debug_counts_survivors_per_stage() {
        let cfg = SelectorConfig {
            include_namespaces: vec!["default".into(), "tools".into()],
            exclude_labels: [("tier".to_string(), "infra".to_string())].into_iter().collect(),
            ..Default::default()
        };
        let f = ObjectFilter::for_kind(&cfg, ObjectKind::Pod);
        let objs = vec![
            obj("default", "a", &[("tier", "infra")], &[]),
            obj("tools", "b", &[], &[]),
            obj("kube-system", "c", &[], &[]),
        ];
        let (out, dbg) = f.apply_with_debug(&objs);
        assert_eq!(names(&out), vec!["b"]);
        assert_eq!(dbg.total, 3);
        assert_eq!(dbg.stages, vec![("include_namespaces", 2), ("exclude_labels", 1)]);
        assert_eq!(dbg.survivors(), 1);
    }
}
