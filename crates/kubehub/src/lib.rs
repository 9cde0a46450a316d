//! Conformity kubehub: client wiring and projection of live objects into `ObjectRef`s.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use conformity_core::{ContainerSpec, KindPayload, ListingError, ObjectKind, ObjectRef, ObjectSource, Quantity, ResourceList};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Container, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Page size for list calls.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Replica count the API server assumes when `spec.replicas` is omitted.
const DEFAULT_REPLICAS: i32 = 1;

/// How to reach the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Explicit kubeconfig file; otherwise in-cluster or `~/.kube/config`.
    pub kube_config: Option<PathBuf>,
    /// Overrides the cluster URL from the kubeconfig.
    pub master: Option<String>,
}

pub async fn connect(opts: &ClientOptions) -> Result<Client> {
    let mut config = match opts.kube_config.as_ref() {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?
        }
        None => kube::Config::infer().await.context("inferring kube config")?,
    };
    if let Some(master) = opts.master.as_deref() {
        config.cluster_url = master.parse().with_context(|| format!("parsing master url {}", master))?;
    }
    info!(host = %config.cluster_url, "targeting cluster");
    Client::try_from(config).context("building kube client")
}

/// Lists pods, deployments and stateful sets across all namespaces.
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
    page_size: u32,
}

impl KubeSource {
    pub fn new(client: Client) -> Self {
        Self { client, page_size: DEFAULT_PAGE_SIZE }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn list_all<K>(&self, kind: ObjectKind) -> Result<Vec<K>, ListingError>
    where
        K: kube::Resource + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let mut out = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let mut lp = ListParams::default().limit(self.page_size);
            if let Some(token) = continue_token.as_deref() {
                lp = lp.continue_token(token);
            }
            let page = api
                .list(&lp)
                .await
                .map_err(|e| listing_error(kind, e))?;
            debug!(kind = %kind, page = page.items.len(), "list page");
            out.extend(page.items);
            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ObjectSource for KubeSource {
    async fn list(&self, kind: ObjectKind) -> Result<Vec<ObjectRef>, ListingError> {
        let started = Instant::now();
        let refs: Vec<ObjectRef> = match kind {
            ObjectKind::Pod => self.list_all::<Pod>(kind).await?.iter().map(pod_ref).collect(),
            ObjectKind::Deployment => self.list_all::<Deployment>(kind).await?.iter().map(deployment_ref).collect(),
            ObjectKind::StatefulSet => self.list_all::<StatefulSet>(kind).await?.iter().map(stateful_set_ref).collect(),
        };
        metrics::histogram!("kube_list_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => kind.as_str());
        metrics::gauge!("kube_listed_objects", refs.len() as f64, "kind" => kind.as_str());
        Ok(refs)
    }
}

/// API server answers become `Api`; transport and auth failures mean the server was never reached.
fn listing_error(kind: ObjectKind, err: kube::Error) -> ListingError {
    match err {
        kube::Error::Api(resp) => ListingError::Api { kind, message: format!("{} ({})", resp.message, resp.code) },
        other => ListingError::Unavailable { kind, message: other.to_string() },
    }
}

fn meta_ref(meta: &ObjectMeta, payload: KindPayload) -> ObjectRef {
    ObjectRef {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        payload,
    }
}

fn resource_list(reqs: Option<&ResourceRequirements>, limits: bool) -> ResourceList {
    let map = reqs.and_then(|r| if limits { r.limits.as_ref() } else { r.requests.as_ref() });
    match map {
        Some(m) => ResourceList {
            cpu: m.get("cpu").map(|q| Quantity::from(q.0.clone())),
            memory: m.get("memory").map(|q| Quantity::from(q.0.clone())),
        },
        None => ResourceList::default(),
    }
}

fn container_spec(c: &Container) -> ContainerSpec {
    ContainerSpec {
        name: c.name.clone(),
        limits: resource_list(c.resources.as_ref(), true),
        requests: resource_list(c.resources.as_ref(), false),
        has_liveness_probe: c.liveness_probe.is_some(),
        has_readiness_probe: c.readiness_probe.is_some(),
    }
}

/// Project a pod; only regular containers are considered, not init containers.
pub fn pod_ref(pod: &Pod) -> ObjectRef {
    let containers = pod
        .spec
        .as_ref()
        .map(|s| s.containers.iter().map(container_spec).collect())
        .unwrap_or_default();
    meta_ref(&pod.metadata, KindPayload::Pod { containers })
}

pub fn deployment_ref(d: &Deployment) -> ObjectRef {
    let replicas = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(DEFAULT_REPLICAS);
    meta_ref(&d.metadata, KindPayload::Deployment { replicas })
}

pub fn stateful_set_ref(s: &StatefulSet) -> ObjectRef {
    let replicas = s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(DEFAULT_REPLICAS);
    meta_ref(&s.metadata, KindPayload::StatefulSet { replicas })
}
