//! Conformity runner: one list -> filter -> evaluate pass over every kind that has rules.
//!
//! Kinds run in `ObjectKind::ALL` order and never interleave. A failed listing
//! only removes that kind's contribution; it is recorded in the report and the
//! remaining kinds still run.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use conformity_core::{CycleReport, ListingError, ObjectKind, ObjectSource, RuleResult};
use conformity_rules::RuleSet;
use metrics::{counter, gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default deadline for a single listing call.
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CycleError {
    #[error("cycle cancelled before evaluating {0}")]
    Cancelled(ObjectKind),
}

pub struct ConformityRunner<S> {
    source: S,
    rules: RuleSet,
    list_timeout: Duration,
}

impl<S: ObjectSource> ConformityRunner<S> {
    pub fn new(source: S, rules: RuleSet) -> Self {
        Self { source, rules, list_timeout: DEFAULT_LIST_TIMEOUT }
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// List `kind` once and run each of its rules in configured order.
    /// Kinds without rules are not listed.
    pub async fn evaluate_kind(&self, kind: ObjectKind) -> Result<Vec<RuleResult>, ListingError> {
        let rules = self.rules.for_kind(kind);
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let objects = match tokio::time::timeout(self.list_timeout, self.source.list(kind)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(ListingError::Timeout { kind, millis: self.list_timeout.as_millis() as u64 });
            }
        };
        histogram!("conformity_list_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => kind.as_str());
        debug!(kind = %kind, count = objects.len(), "objects listed");

        let results: Vec<RuleResult> = rules.iter().map(|r| r.evaluate(&objects)).collect();
        for res in results.iter() {
            gauge!("conformity_non_conforming_objects", res.non_conforming.len() as f64, "rule" => res.rule_name.clone());
        }
        Ok(results)
    }

    /// Run one full cycle. Listing failures end up in `CycleReport::failures`;
    /// only cancellation aborts the cycle.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let mut report = CycleReport::new(chrono::Utc::now());
        for kind in ObjectKind::ALL {
            if cancel.is_cancelled() {
                info!(kind = %kind, "cycle cancelled");
                return Err(CycleError::Cancelled(kind));
            }
            match self.evaluate_kind(kind).await {
                Ok(results) => *report.results_for_mut(kind) = results,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "listing failed; kind skipped this cycle");
                    counter!("conformity_listing_failures_total", 1u64, "kind" => kind.as_str());
                    report.failures.push(e);
                }
            }
        }
        counter!("conformity_cycles_total", 1u64);
        histogram!("conformity_cycle_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(
            non_conforming = report.non_conforming_total(),
            failed_kinds = report.failures.len(),
            took_ms = started.elapsed().as_millis() as u64,
            "cycle complete"
        );
        Ok(report)
    }
}
