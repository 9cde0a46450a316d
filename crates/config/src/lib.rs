//! Conformity configuration: the YAML file model, validation and rule construction.
//!
//! Rules can be written as one tagged `rules:` list (evaluated in file order) or
//! with the keyed lists (`pod_rules_labels_filled_in`, ...). Keyed lists are
//! appended after `rules:` in a fixed order.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use conformity_core::ObjectKind;
use conformity_filter::SelectorConfig;
use conformity_rules::{Rule, RulePredicate, RuleSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

mod duration;

pub use duration::parse_duration;

/// Overrides `email_config.auth_password` when set.
pub const EMAIL_PASSWORD_ENV: &str = "CONFORMITY_EMAIL_AUTH_PASSWORD";

pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Objects requested per list call.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing interval in config")]
    MissingInterval,
    #[error("page_size must be positive")]
    PageSize,
    #[error("invalid duration {value:?}: {reason}")]
    Duration { value: String, reason: String },
    #[error("rule #{index} ({rule_type}): {reason}")]
    InvalidRule { index: usize, rule_type: &'static str, reason: String },
    #[error("email config: {0}")]
    Email(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelsRuleConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub filter: SelectorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlainRuleConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filter: SelectorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicasRuleConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub minimum_replicas: i32,
    #[serde(default)]
    pub filter: SelectorConfig,
}

/// One rule as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConfig {
    PodLabelsFilledIn(LabelsRuleConfig),
    PodLimitsFilledIn(PlainRuleConfig),
    PodRequestsFilledIn(PlainRuleConfig),
    PodLivenessProbeFilledIn(PlainRuleConfig),
    PodReadinessProbeFilledIn(PlainRuleConfig),
    DeploymentReplicasMinimum(ReplicasRuleConfig),
    #[serde(rename = "statefulset_replicas_minimum")]
    StatefulSetReplicasMinimum(ReplicasRuleConfig),
}

impl RuleConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleConfig::PodLabelsFilledIn(_) => "pod_labels_filled_in",
            RuleConfig::PodLimitsFilledIn(_) => "pod_limits_filled_in",
            RuleConfig::PodRequestsFilledIn(_) => "pod_requests_filled_in",
            RuleConfig::PodLivenessProbeFilledIn(_) => "pod_liveness_probe_filled_in",
            RuleConfig::PodReadinessProbeFilledIn(_) => "pod_readiness_probe_filled_in",
            RuleConfig::DeploymentReplicasMinimum(_) => "deployment_replicas_minimum",
            RuleConfig::StatefulSetReplicasMinimum(_) => "statefulset_replicas_minimum",
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            RuleConfig::DeploymentReplicasMinimum(_) => ObjectKind::Deployment,
            RuleConfig::StatefulSetReplicasMinimum(_) => ObjectKind::StatefulSet,
            _ => ObjectKind::Pod,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RuleConfig::PodLabelsFilledIn(c) => &c.name,
            RuleConfig::PodLimitsFilledIn(c)
            | RuleConfig::PodRequestsFilledIn(c)
            | RuleConfig::PodLivenessProbeFilledIn(c)
            | RuleConfig::PodReadinessProbeFilledIn(c) => &c.name,
            RuleConfig::DeploymentReplicasMinimum(c) | RuleConfig::StatefulSetReplicasMinimum(c) => &c.name,
        }
    }

    pub fn filter(&self) -> &SelectorConfig {
        match self {
            RuleConfig::PodLabelsFilledIn(c) => &c.filter,
            RuleConfig::PodLimitsFilledIn(c)
            | RuleConfig::PodRequestsFilledIn(c)
            | RuleConfig::PodLivenessProbeFilledIn(c)
            | RuleConfig::PodReadinessProbeFilledIn(c) => &c.filter,
            RuleConfig::DeploymentReplicasMinimum(c) | RuleConfig::StatefulSetReplicasMinimum(c) => &c.filter,
        }
    }

    pub fn predicate(&self) -> RulePredicate {
        match self {
            RuleConfig::PodLabelsFilledIn(c) => RulePredicate::LabelsFilledIn { labels: c.labels.clone() },
            RuleConfig::PodLimitsFilledIn(_) => RulePredicate::LimitsFilledIn,
            RuleConfig::PodRequestsFilledIn(_) => RulePredicate::RequestsFilledIn,
            RuleConfig::PodLivenessProbeFilledIn(_) => RulePredicate::LivenessProbeFilledIn,
            RuleConfig::PodReadinessProbeFilledIn(_) => RulePredicate::ReadinessProbeFilledIn,
            RuleConfig::DeploymentReplicasMinimum(c) | RuleConfig::StatefulSetReplicasMinimum(c) => {
                RulePredicate::ReplicasMinimum { minimum: c.minimum_replicas }
            }
        }
    }

    /// Validate and build the runnable rule. `index` is the rule's position in evaluation order.
    pub fn build(&self, index: usize) -> Result<Rule, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRule { index, rule_type: self.type_name(), reason };
        if let RuleConfig::PodLabelsFilledIn(c) = self {
            if c.labels.is_empty() {
                return Err(invalid("missing labels".to_string()));
            }
        }
        if self.kind() != ObjectKind::Pod && self.filter().exclude_jobs {
            return Err(invalid("exclude_jobs only applies to pod rules".to_string()));
        }
        Rule::new(self.name(), self.kind(), self.predicate(), self.filter()).map_err(|e| invalid(e.to_string()))
    }
}

fn default_from() -> String {
    "no-reply@kube-conformity.com".to_string()
}

fn default_subject() -> String {
    "kube-conformity".to_string()
}

fn default_port() -> u16 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub to: String,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub auth_username: Option<String>,
    #[serde(default, skip_serializing)]
    pub auth_password: Option<String>,
    /// Upgrade the SMTP session with STARTTLS.
    #[serde(default)]
    pub starttls: bool,
    /// HTML template file; the built-in template is used when unset.
    #[serde(default)]
    pub template: Option<PathBuf>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            to: String::new(),
            from: default_from(),
            host: String::new(),
            port: default_port(),
            subject: default_subject(),
            auth_username: None,
            auth_password: None,
            starttls: false,
            template: None,
        }
    }
}

impl EmailConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.to.trim().is_empty() {
            return Err(ConfigError::Email("missing to address".into()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Email("missing host".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    interval: Option<String>,
    list_timeout: Option<String>,
    page_size: Option<u32>,
    #[serde(default)]
    rules: Vec<RuleConfig>,
    #[serde(default)]
    pod_rules_labels_filled_in: Vec<LabelsRuleConfig>,
    #[serde(default)]
    pod_rules_limits_filled_in: Vec<PlainRuleConfig>,
    #[serde(default)]
    pod_rules_requests_filled_in: Vec<PlainRuleConfig>,
    #[serde(default)]
    pod_rules_liveness_probe_filled_in: Vec<PlainRuleConfig>,
    #[serde(default)]
    pod_rules_readiness_probe_filled_in: Vec<PlainRuleConfig>,
    #[serde(default)]
    deployment_rules_replicas_minimum: Vec<ReplicasRuleConfig>,
    #[serde(default)]
    statefulset_rules_replicas_minimum: Vec<ReplicasRuleConfig>,
    email_config: Option<EmailConfig>,
}

/// Validated scanner configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interval: Duration,
    pub list_timeout: Duration,
    pub page_size: u32,
    /// All rules in evaluation order.
    pub rules: Vec<RuleConfig>,
    pub email: Option<EmailConfig>,
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let cfg = text.parse::<Config>()?;
        debug!(path = %path.display(), rules = cfg.rules.len(), "config loaded");
        Ok(cfg)
    }

    /// Parse with an explicit environment lookup.
    pub fn parse_with_env<F>(text: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        let interval = match raw.interval.as_deref() {
            Some(s) => parse_duration(s)?,
            None => return Err(ConfigError::MissingInterval),
        };
        if interval.is_zero() {
            return Err(ConfigError::MissingInterval);
        }
        let list_timeout = match raw.list_timeout.as_deref() {
            Some(s) => parse_duration(s)?,
            None => DEFAULT_LIST_TIMEOUT,
        };

        let page_size = raw.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ConfigError::PageSize);
        }

        let mut rules = raw.rules;
        rules.extend(raw.pod_rules_labels_filled_in.into_iter().map(RuleConfig::PodLabelsFilledIn));
        rules.extend(raw.pod_rules_limits_filled_in.into_iter().map(RuleConfig::PodLimitsFilledIn));
        rules.extend(raw.pod_rules_requests_filled_in.into_iter().map(RuleConfig::PodRequestsFilledIn));
        rules.extend(raw.pod_rules_liveness_probe_filled_in.into_iter().map(RuleConfig::PodLivenessProbeFilledIn));
        rules.extend(raw.pod_rules_readiness_probe_filled_in.into_iter().map(RuleConfig::PodReadinessProbeFilledIn));
        rules.extend(raw.deployment_rules_replicas_minimum.into_iter().map(RuleConfig::DeploymentReplicasMinimum));
        rules.extend(raw.statefulset_rules_replicas_minimum.into_iter().map(RuleConfig::StatefulSetReplicasMinimum));

        let mut email = raw.email_config;
        if let Some(e) = email.as_mut() {
            if let Some(pw) = env(EMAIL_PASSWORD_ENV).filter(|p| !p.is_empty()) {
                e.auth_password = Some(pw);
            }
            e.validate()?;
        }

        let cfg = Config { interval, list_timeout, page_size, rules, email };
        cfg.rule_set()?;
        Ok(cfg)
    }

    /// Build the runnable rules, grouped by kind in configured order.
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        let mut set = RuleSet::new();
        for (index, rc) in self.rules.iter().enumerate() {
            set.push(rc.build(index)?);
        }
        Ok(set)
    }

    /// Email settings when sending is enabled.
    pub fn enabled_email(&self) -> Option<&EmailConfig> {
        self.email.as_ref().filter(|e| e.enabled)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Config::parse_with_env(s, |k| std::env::var(k).ok())
    }
}
