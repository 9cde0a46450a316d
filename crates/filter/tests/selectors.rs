#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use conformity_core::{KindPayload, ObjectKind, ObjectRef};
use conformity_filter::{ObjectFilter, SelectorConfig};

fn pod(ns: &str, name: &str, labels: &[(&str, &str)]) -> ObjectRef {
    ObjectRef {
        namespace: ns.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        annotations: BTreeMap::new(),
        payload: KindPayload::Pod { containers: smallvec::SmallVec::new() },
    }
}

fn deployment(ns: &str, name: &str) -> ObjectRef {
    ObjectRef {
        namespace: ns.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
        payload: KindPayload::Deployment { replicas: 1 },
    }
}

fn names(v: &[&ObjectRef]) -> Vec<String> {
    v.iter().map(|o| o.name.clone()).collect()
}

fn mixed() -> Vec<ObjectRef> {
    vec![
        pod("ns", "p1", &[]),
        pod("other", "p2", &[("app", "x")]),
        pod("ns", "p3", &[("job-name", "curator-212312")]),
        pod("kube-system", "p4", &[]),
        pod("ns", "p5", &[("app", "y"), ("tier", "web")]),
    ]
}

#[test]
fn default_filter_returns_input_unchanged() {
    let objs = mixed();
    let f = ObjectFilter::for_kind(&SelectorConfig::default(), ObjectKind::Pod);
    let out = f.apply(&objs);
    assert_eq!(out.len(), objs.len());
    for (a, b) in out.iter().zip(objs.iter()) {
        assert_eq!(*a, b);
    }
}

#[test]
fn include_namespace_keeps_exact_subset_in_order() {
    let objs = mixed();
    let cfg = SelectorConfig { include_namespaces: vec!["ns".into()], ..Default::default() };
    let out = ObjectFilter::for_kind(&cfg, ObjectKind::Pod).apply(&objs);
    assert_eq!(names(&out), vec!["p1", "p3", "p5"]);
}

#[test]
fn include_namespaces_is_an_or() {
    let objs = mixed();
    let cfg = SelectorConfig { include_namespaces: vec!["other".into(), "kube-system".into()], ..Default::default() };
    let out = ObjectFilter::for_kind(&cfg, ObjectKind::Pod).apply(&objs);
    assert_eq!(names(&out), vec!["p2", "p4"]);
}

#[test]
fn exclude_namespace_drops_listed() {
    let objs = vec![pod("default", "name1", &[]), pod("kube-system", "name2", &[])];
    let cfg = SelectorConfig { exclude_namespaces: vec!["kube-system".into()], ..Default::default() };
    let out = ObjectFilter::for_kind(&cfg, ObjectKind::Pod).apply(&objs);
    assert_eq!(names(&out), vec!["name1"]);
}

#[test]
fn one_matching_label_pair_of_two_is_enough_to_exclude() {
    let objs = vec![
        pod("ns", "only-first", &[("team", "a")]),
        pod("ns", "only-second", &[("env", "dev")]),
        pod("ns", "neither", &[("team", "b"), ("env", "prod")]),
        pod("ns", "bare", &[]),
    ];
    let cfg = SelectorConfig {
        exclude_labels: [("team".to_string(), "a".to_string()), ("env".to_string(), "dev".to_string())]
            .into_iter()
            .collect(),
        ..Default::default()
    };
    let out = ObjectFilter::for_kind(&cfg, ObjectKind::Pod).apply(&objs);
    assert_eq!(names(&out), vec!["neither", "bare"]);
}

#[test]
fn objects_without_metadata_pass_exclusions() {
    let objs = vec![pod("ns", "bare", &[])];
    let cfg = SelectorConfig {
        exclude_labels: [("app".to_string(), "x".to_string())].into_iter().collect(),
        exclude_annotations: [("skip".to_string(), "true".to_string())].into_iter().collect(),
        ..Default::default()
    };
    let out = ObjectFilter::for_kind(&cfg, ObjectKind::Pod).apply(&objs);
    assert_eq!(names(&out), vec!["bare"]);
}

#[test]
fn exclude_jobs_ignores_label_value() {
    let objs = vec![pod("default", "name1", &[("job-name", "")]), pod("default", "name2", &[])];
    let on = SelectorConfig { exclude_jobs: true, ..Default::default() };
    assert_eq!(names(&ObjectFilter::for_kind(&on, ObjectKind::Pod).apply(&objs)), vec!["name2"]);
    let off = SelectorConfig::default();
    assert_eq!(ObjectFilter::for_kind(&off, ObjectKind::Pod).apply(&objs).len(), 2);
}

#[test]
fn empty_input_stays_empty() {
    let cfg = SelectorConfig {
        include_namespaces: vec!["ns".into()],
        exclude_namespaces: vec!["x".into()],
        exclude_labels: [("a".to_string(), "b".to_string())].into_iter().collect(),
        exclude_jobs: true,
        ..Default::default()
    };
    let (out, dbg) = ObjectFilter::for_kind(&cfg, ObjectKind::Pod).apply_with_debug(&[]);
    assert!(out.is_empty());
    assert!(dbg.stages.iter().all(|(_, n)| *n == 0));
}

#[test]
fn result_does_not_depend_on_config_map_order() {
    let objs = mixed();
    let a = SelectorConfig {
        exclude_labels: [("app".to_string(), "x".to_string()), ("tier".to_string(), "web".to_string())]
            .into_iter()
            .collect(),
        include_namespaces: vec!["ns".into(), "other".into()],
        ..Default::default()
    };
    let b = SelectorConfig {
        exclude_labels: [("tier".to_string(), "web".to_string()), ("app".to_string(), "x".to_string())]
            .into_iter()
            .collect(),
        include_namespaces: vec!["other".into(), "ns".into()],
        ..Default::default()
    };
    let out_a = names(&ObjectFilter::for_kind(&a, ObjectKind::Pod).apply(&objs));
    let out_b = names(&ObjectFilter::for_kind(&b, ObjectKind::Pod).apply(&objs));
    assert_eq!(out_a, out_b);
    assert_eq!(out_a, vec!["p1", "p3"]);
}

#[test]
fn deployment_filter_ignores_exclude_jobs() {
    let objs = vec![deployment("default", "d1"), deployment("tools", "d2")];
    let cfg = SelectorConfig { exclude_jobs: true, exclude_namespaces: vec!["tools".into()], ..Default::default() };
    let out = ObjectFilter::for_kind(&cfg, ObjectKind::Deployment).apply(&objs);
    assert_eq!(names(&out), vec!["d1"]);
}

#[test]
fn selector_config_parses_from_yaml() {
    let yaml = r#"
include_namespaces:
- include_namespace
exclude_namespaces:
- exclude_namespace
exclude_annotations:
  annotationKey: annotationValue
exclude_labels:
  labelKey: labelValue
exclude_jobs: true
"#;
    let cfg: SelectorConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.include_namespaces, vec!["include_namespace"]);
    assert_eq!(cfg.exclude_namespaces, vec!["exclude_namespace"]);
    assert_eq!(cfg.exclude_annotations.get("annotationKey").map(String::as_str), Some("annotationValue"));
    assert_eq!(cfg.exclude_labels.get("labelKey").map(String::as_str), Some("labelValue"));
    assert!(cfg.exclude_jobs);

    let empty: SelectorConfig = serde_yaml::from_str("{}").unwrap();
    assert!(empty.is_empty());
}
