//! Health, metrics and config page served next to the scan loop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, response::Html, routing::get, Router};
use conformity_config::{Config, EmailConfig, RuleConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PAGE: &str = r#"<html>
<head><title>Kube conformity</title></head>
<body>
<h1>Kube conformity</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/healthz">Health Check</a></p>
<h2>Rules</h2>
<table>
<tr><th>Kind</th><th>Name</th><th>Reason</th><th>Filters</th></tr>
{% for rule in rules %}<tr><td>{{ rule.kind }}</td><td>{{ rule.name }}</td><td>{{ rule.reason }}</td><td>{{ rule.filter_stages | join(sep=", ") }}</td></tr>
{% endfor %}</table>
<h2>Configuration</h2>
<pre>{{ yaml }}</pre>
</body>
</html>
"#;

#[derive(Serialize)]
struct ConfigView<'a> {
    interval: String,
    list_timeout: String,
    page_size: u32,
    rules: &'a [RuleConfig],
    email_config: Option<&'a EmailConfig>,
}

/// Render the `/` page once; the config never changes while running.
pub fn landing_page(config: &Config) -> Result<String> {
    let view = ConfigView {
        interval: format!("{:?}", config.interval),
        list_timeout: format!("{:?}", config.list_timeout),
        page_size: config.page_size,
        rules: &config.rules,
        email_config: config.email.as_ref(),
    };
    let yaml = serde_yaml::to_string(&view).context("serializing config")?;
    let mut ctx = tera::Context::new();
    ctx.insert("rules", &config.rule_set()?.summary());
    ctx.insert("yaml", &yaml);
    tera::Tera::one_off(PAGE, &ctx, true).context("rendering landing page")
}

#[derive(Clone)]
pub struct HttpState {
    metrics: PrometheusHandle,
    page: Arc<String>,
}

impl HttpState {
    pub fn new(metrics: PrometheusHandle, page: String) -> Self {
        Self { metrics, page: Arc::new(page) }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

async fn index(State(state): State<HttpState>) -> Html<String> {
    Html(state.page.as_ref().clone())
}

async fn healthz() -> &'static str {
    "OK\n"
}

async fn render_metrics(State(state): State<HttpState>) -> String {
    state.metrics.render()
}

/// Bind `addr` and serve until `cancel` fires. Binding errors are returned to the caller.
pub async fn spawn(addr: SocketAddr, state: HttpState, cancel: CancellationToken) -> Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {}", addr))?;
    info!(addr = %addr, "serving /metrics, /healthz and /");
    Ok(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await {
            warn!(error = %e, "http server stopped");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    const CONFIG: &str = r#"
interval: 5m
rules:
  - type: pod_labels_filled_in
    name: "<b>owners</b>"
    labels: [team]
    filter:
      exclude_namespaces: [kube-system]
email_config:
  enabled: true
  to: ops@example.com
  host: smtp.example.com
  auth_username: bot
  auth_password: hunter2
"#;

    fn config() -> Config {
        Config::parse_with_env(CONFIG, |_| None).unwrap()
    }

    fn state(page: &str) -> HttpState {
        HttpState::new(PrometheusBuilder::new().build_recorder().handle(), page.to_string())
    }

    async fn get_body(state: HttpState, uri: &str) -> (StatusCode, String) {
        let resp = router(state).oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let (status, body) = get_body(state(""), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK\n");
    }

    #[tokio::test]
    async fn metrics_endpoint_is_served() {
        let (status, _) = get_body(state(""), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn index_serves_rendered_page() {
        let page = landing_page(&config()).unwrap();
        let (status, body) = get_body(state(&page), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, page);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let (status, _) = get_body(state(""), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn landing_page_lists_rules_and_hides_password() {
        let page = landing_page(&config()).unwrap();
        assert!(page.contains(r#"<a href="/healthz">"#));
        assert!(page.contains("&lt;b&gt;owners&lt;&#x2F;b&gt;") || page.contains("&lt;b&gt;owners&lt;/b&gt;"));
        assert!(!page.contains("<b>owners</b>"));
        assert!(page.contains("Labels: [team] are not filled in"));
        assert!(page.contains("exclude_namespaces"));
        assert!(page.contains("interval: 300s"));
        assert!(page.contains("smtp.example.com"));
        assert!(!page.contains("hunter2"));
    }
}
