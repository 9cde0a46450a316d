//! Conformity notify: reporters that present a finished cycle.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use conformity_config::EmailConfig;
use conformity_core::{CycleReport, ObjectKind};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Serialize;
use tera::Tera;
use tracing::{debug, info, warn};

const TEMPLATE_NAME: &str = "mail.html";
const DEFAULT_TEMPLATE: &str = include_str!("../templates/mail.html");

#[async_trait::async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: &CycleReport) -> Result<()>;
}

/// Presentation lines in log order: one header per kind with results, then
/// name, reason and offending objects per rule.
pub fn present_lines(report: &CycleReport) -> Vec<String> {
    let mut lines = Vec::new();
    for kind in ObjectKind::ALL {
        let results = report.results_for(kind);
        if results.is_empty() {
            continue;
        }
        lines.push(format!("Presenting {} rule results", kind));
        for res in results {
            lines.push(format!("rule name: {}", res.rule_name));
            lines.push(format!("rule reason: {}", res.reason));
            lines.extend(res.non_conforming.iter().map(|o| o.key()));
        }
    }
    lines
}

/// Writes results through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait::async_trait]
impl Reporter for LogReporter {
    async fn report(&self, report: &CycleReport) -> Result<()> {
        for line in present_lines(report) {
            info!("{}", line);
        }
        for failure in report.failures.iter() {
            warn!(kind = %failure.kind(), error = %failure, "kind missing from results");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RuleView {
    name: String,
    reason: String,
    objects: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SectionView {
    kind: &'static str,
    rules: Vec<RuleView>,
}

#[derive(Debug, Serialize)]
struct MailView {
    started_at: String,
    non_conforming_total: usize,
    sections: Vec<SectionView>,
    failures: Vec<String>,
}

impl MailView {
    /// Only rules with findings are listed.
    fn from_report(report: &CycleReport) -> Self {
        let sections = ObjectKind::ALL
            .iter()
            .map(|kind| SectionView {
                kind: kind.as_str(),
                rules: report
                    .results_for(*kind)
                    .iter()
                    .filter(|r| !r.is_conforming())
                    .map(|r| RuleView {
                        name: r.rule_name.clone(),
                        reason: r.reason.clone(),
                        objects: r.non_conforming.iter().map(|o| o.key()).collect(),
                    })
                    .collect(),
            })
            .filter(|s| !s.rules.is_empty())
            .collect();
        Self {
            started_at: report.started_at.to_rfc3339(),
            non_conforming_total: report.non_conforming_total(),
            sections,
            failures: report.failures.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Whether a cycle is worth a mail.
pub fn has_findings(report: &CycleReport) -> bool {
    report.non_conforming_total() > 0 || !report.failures.is_empty()
}

/// Renders an HTML summary and sends it over SMTP.
pub struct EmailReporter {
    config: EmailConfig,
    tera: Tera,
}

impl EmailReporter {
    /// Loads the configured template file, or the built-in one.
    pub fn new(config: EmailConfig) -> Result<Self> {
        let source = match config.template.as_ref() {
            Some(path) => {
                std::fs::read_to_string(path).with_context(|| format!("reading mail template {}", path.display()))?
            }
            None => DEFAULT_TEMPLATE.to_string(),
        };
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, &source).context("parsing mail template")?;
        Ok(Self { config, tera })
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }

    pub fn render_body(&self, report: &CycleReport) -> Result<String> {
        let ctx = tera::Context::from_serialize(MailView::from_report(report)).context("building mail context")?;
        self.tera.render(TEMPLATE_NAME, &ctx).context("rendering mail template")
    }

    pub fn build_message(&self, report: &CycleReport) -> Result<Message> {
        let from: Mailbox = self.config.from.parse().with_context(|| format!("parsing from address {}", self.config.from))?;
        let mut builder = Message::builder().from(from).subject(self.config.subject.clone());
        for addr in self.config.to.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            let to: Mailbox = addr.parse().with_context(|| format!("parsing to address {}", addr))?;
            builder = builder.to(to);
        }
        let body = self.render_body(report)?;
        builder.header(ContentType::TEXT_HTML).body(body).context("building mail")
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if self.config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
                .with_context(|| format!("setting up STARTTLS to {}", self.config.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
        };
        builder = builder.port(self.config.port);
        if let (Some(user), Some(pass)) = (self.config.auth_username.as_ref(), self.config.auth_password.as_ref()) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(builder.build())
    }
}

#[async_trait::async_trait]
impl Reporter for EmailReporter {
    async fn report(&self, report: &CycleReport) -> Result<()> {
        if !has_findings(report) {
            debug!("nothing to mail");
            return Ok(());
        }
        let message = self.build_message(report)?;
        let transport = self.transport()?;
        transport
            .send(message)
            .await
            .with_context(|| format!("sending mail via {}:{}", self.config.host, self.config.port))?;
        info!(to = %self.config.to, findings = report.non_conforming_total(), "results mailed");
        Ok(())
    }
}
