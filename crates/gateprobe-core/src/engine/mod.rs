use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{aggregate, SuiteAssessment};
use crate::catalog::{Catalog, SkippedTemplate, Template};
use crate::errors::{codes, Diagnostic};
use crate::evaluate::evaluate;
use crate::model::{ProbeResult, StepOutcome, StepStatus, SuiteArtifacts};

pub mod executor;

pub use executor::SuiteExecutor;

/// What the host configured before pressing "validate".
#[derive(Debug, Clone)]
pub struct SuiteOptions {
    pub provider_id: String,
    /// Endpoint under test, handed to the transport verbatim.
    pub base_url: String,
    pub model: String,
    /// Second provider for cross-provider signature replay. Planning fails
    /// fast when a planned template needs one and none is set.
    pub secondary_provider_id: Option<String>,
    pub enable_tamper_probe: bool,
}

impl SuiteOptions {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            base_url: base_url.into(),
            model: model.into(),
            secondary_provider_id: None,
            enable_tamper_probe: true,
        }
    }
}

/// Cooperative cancellation token, checked between steps. An in-flight
/// probe is never aborted mid-request; cancelling stops the suite at the
/// next step boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One slot of a live suite. Status moves Pending -> Running -> Done/Error
/// and never backwards, with a single exception: a transport that reports
/// its environment gone before anything reached the wire returns the slot
/// to Pending so it can be re-driven.
#[derive(Debug, Clone)]
pub struct SuiteStep {
    /// 1-based position, stable for the lifetime of the run.
    pub index: u32,
    pub template: Template,
    pub status: StepStatus,
    pub request_snapshot: Option<serde_json::Value>,
    pub request_fingerprint: Option<String>,
    pub probe: Option<ProbeResult>,
    pub error: Option<String>,
}

impl SuiteStep {
    fn new(index: u32, template: Template) -> Self {
        Self {
            index,
            template,
            status: StepStatus::Pending,
            request_snapshot: None,
            request_fingerprint: None,
            probe: None,
            error: None,
        }
    }

    fn outcome(&self) -> StepOutcome {
        let evaluation = match self.status {
            StepStatus::Done => evaluate(Some(&self.template), self.probe.as_ref()),
            _ => evaluate(Some(&self.template), None),
        };
        StepOutcome {
            index: Some(self.index),
            label: self.template.label.to_string(),
            status: self.status,
            evaluation,
            error: self.error.clone(),
        }
    }
}

/// A planned validation suite against one provider. Owned by the host
/// dialog; all mutation goes through [`SuiteExecutor`].
#[derive(Debug, Clone)]
pub struct SuiteRun {
    pub suite_run_id: Uuid,
    pub options: SuiteOptions,
    pub steps: Vec<SuiteStep>,
    pub skipped: Vec<SkippedTemplate>,
    pub artifacts: SuiteArtifacts,
}

impl SuiteRun {
    /// Plans a suite from the catalog. Applicability is decided here, once;
    /// the planned step list never changes afterwards.
    pub fn plan(catalog: &Catalog, options: SuiteOptions) -> anyhow::Result<Self> {
        let partition = catalog.partition(&options.model);

        if partition.applicable.is_empty() {
            return Err(anyhow::Error::new(
                Diagnostic::new(
                    codes::E_NO_APPLICABLE_TEMPLATE,
                    format!("no probe template applies to model '{}'", options.model),
                )
                .with_source("engine")
                .with_context(json!({
                    "model": options.model,
                    "skipped": partition
                        .skipped
                        .iter()
                        .map(|s| s.key.as_str())
                        .collect::<Vec<_>>(),
                }))
                .with_fix_step("选择一个受支持的模型后重试"),
            ));
        }

        if options.secondary_provider_id.is_none() {
            if let Some(t) = partition.applicable.iter().find(|t| t.requires_cross_provider) {
                return Err(anyhow::Error::new(
                    Diagnostic::new(
                        codes::E_SECONDARY_PROVIDER_REQUIRED,
                        format!(
                            "template '{}' needs a secondary provider for cross-provider replay",
                            t.key.as_str()
                        ),
                    )
                    .with_source("engine")
                    .with_context(json!({"template": t.key.as_str()}))
                    .with_fix_step("在设置中配置第二个渠道，或从套件中移除跨厂回放模板"),
                ));
            }
        }

        let suite_run_id = Uuid::new_v4();
        let steps: Vec<SuiteStep> = partition
            .applicable
            .into_iter()
            .enumerate()
            .map(|(i, t)| SuiteStep::new(i as u32 + 1, t))
            .collect();

        tracing::info!(
            event = "suite.planned",
            suite_run_id = %suite_run_id,
            provider_id = %options.provider_id,
            model = %options.model,
            steps = steps.len(),
            skipped = partition.skipped.len(),
            "planned validation suite"
        );

        Ok(Self {
            suite_run_id,
            options,
            steps,
            skipped: partition.skipped,
            artifacts: SuiteArtifacts::default(),
        })
    }

    /// Index of the next step to drive, honoring strict sequential order.
    /// `None` once every step has resolved.
    pub fn next_pending(&self) -> Option<usize> {
        for (i, step) in self.steps.iter().enumerate() {
            if !step.status.is_resolved() {
                return (step.status == StepStatus::Pending).then_some(i);
            }
        }
        None
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_resolved())
    }

    /// Uniform view for the aggregator; identical in shape to what history
    /// reconciliation produces for the same run.
    pub fn outcomes(&self) -> Vec<StepOutcome> {
        self.steps.iter().map(|s| s.outcome()).collect()
    }

    pub fn assess(&self) -> SuiteAssessment {
        aggregate(&self.outcomes())
    }
}
