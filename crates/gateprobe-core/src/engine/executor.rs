use serde_json::json;
use std::sync::Arc;

use crate::engine::{CancelFlag, SuiteRun, SuiteStep};
use crate::errors::{codes, Diagnostic};
use crate::fingerprint::envelope_fingerprint;
use crate::model::{StepRecord, StepStatus};
use crate::providers::{ProbeTransport, TransportError};
use crate::storage::HistoryStore;
use uuid::Uuid;

/// Drives a [`SuiteRun`] one step at a time. Probe failures become error
/// rows instead of aborting the suite; only a lost transport environment
/// propagates, because in that case nothing reached the wire and the step
/// is still intact.
pub struct SuiteExecutor {
    transport: Arc<dyn ProbeTransport>,
    store: Option<Arc<dyn HistoryStore>>,
    cancel: CancelFlag,
}

impl SuiteExecutor {
    pub fn new(transport: Arc<dyn ProbeTransport>, store: Option<Arc<dyn HistoryStore>>) -> Self {
        Self {
            transport,
            store,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle the host keeps to cancel an ongoing suite. Cancellation is
    /// observed between steps; the current probe always finishes.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub async fn run_to_completion(&self, run: &mut SuiteRun) -> anyhow::Result<()> {
        tracing::info!(
            event = "suite.start",
            suite_run_id = %run.suite_run_id,
            provider_id = %run.options.provider_id,
            transport = self.transport.transport_name(),
            steps = run.steps.len(),
            "running validation suite"
        );
        while let Some(index) = run.next_pending() {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    event = "suite.cancelled",
                    suite_run_id = %run.suite_run_id,
                    next_index = run.steps[index].index,
                    "suite cancelled between steps"
                );
                break;
            }
            self.execute_step(run, index).await?;
        }
        Ok(())
    }

    /// Executes the step at `index`. The step must be pending and every
    /// earlier step resolved; anything else is a driver bug surfaced as a
    /// coded diagnostic rather than silently reordered.
    pub async fn execute_step(&self, run: &mut SuiteRun, index: usize) -> anyhow::Result<()> {
        let total = run.steps.len() as u32;
        {
            let step = run.steps.get(index).ok_or_else(|| {
                anyhow::Error::new(
                    Diagnostic::new(codes::E_SUITE_STATE, format!("no step at index {index}"))
                        .with_source("engine"),
                )
            })?;
            if step.status != StepStatus::Pending {
                return Err(anyhow::Error::new(
                    Diagnostic::new(
                        codes::E_SUITE_STATE,
                        format!("step {} is {:?}, expected pending", step.index, step.status),
                    )
                    .with_source("engine")
                    .with_context(json!({"index": step.index})),
                ));
            }
            if run.steps[..index].iter().any(|s| !s.status.is_resolved()) {
                return Err(anyhow::Error::new(
                    Diagnostic::new(
                        codes::E_SUITE_STATE,
                        format!("step {} driven before earlier steps resolved", step.index),
                    )
                    .with_source("engine")
                    .with_context(json!({"index": step.index})),
                ));
            }
        }

        let envelope = {
            let step = &run.steps[index];
            let user_id = Uuid::new_v4().to_string();
            let body = step
                .template
                .build_body(&run.options.model, &user_id, &run.artifacts);
            let headers = step.template.envelope_headers(
                run.options.enable_tamper_probe,
                run.options.secondary_provider_id.as_deref(),
            );
            json!({
                "headers": headers,
                "body": body,
                "suite_run_id": run.suite_run_id.to_string(),
                "suite_step_index": step.index,
                "suite_step_total": total,
            })
        };

        let step = &mut run.steps[index];
        step.request_snapshot = Some(envelope.clone());
        step.request_fingerprint = Some(envelope_fingerprint(&envelope));
        step.status = StepStatus::Running;
        tracing::info!(
            event = "suite.step.start",
            suite_run_id = %run.suite_run_id,
            index = step.index,
            template = step.template.key.as_str(),
            fingerprint = step.request_fingerprint.as_deref().unwrap_or_default(),
            "probing"
        );

        let provider_id = run.options.provider_id.clone();
        let base_url = run.options.base_url.clone();
        match self.transport.probe(&provider_id, &base_url, &envelope).await {
            Ok(probe) => {
                let step = &mut run.steps[index];
                tracing::info!(
                    event = "suite.step.done",
                    suite_run_id = %run.suite_run_id,
                    index = step.index,
                    status = probe.status,
                    duration_ms = probe.duration_ms,
                    "probe finished"
                );
                if let Some(sig) = &probe.signals.thinking_signature {
                    run.artifacts.thinking_signature = Some(sig.clone());
                }
                if let Some(text) = &probe.signals.thinking_text {
                    run.artifacts.thinking_text = Some(text.clone());
                }
                let step = &mut run.steps[index];
                step.probe = Some(probe);
                step.status = StepStatus::Done;
                self.persist(run, index).await;
                Ok(())
            }
            Err(TransportError::Unavailable) => {
                // Nothing reached the wire. Return the slot untouched so the
                // same step can be driven again once the environment is back.
                let step = &mut run.steps[index];
                step.status = StepStatus::Pending;
                step.request_snapshot = None;
                step.request_fingerprint = None;
                tracing::warn!(
                    event = "suite.step.env_lost",
                    suite_run_id = %run.suite_run_id,
                    index = step.index,
                    "transport environment unavailable, step rolled back"
                );
                Err(anyhow::Error::new(
                    Diagnostic::new(
                        codes::E_ENV_UNAVAILABLE,
                        "probe transport unavailable before the request was sent",
                    )
                    .with_source("transport")
                    .with_context(json!({"index": index as u32 + 1}))
                    .with_fix_step("等待宿主环境恢复后重新执行该步骤"),
                ))
            }
            Err(TransportError::Failed(message)) => {
                let step = &mut run.steps[index];
                tracing::warn!(
                    event = "suite.step.error",
                    suite_run_id = %run.suite_run_id,
                    index = step.index,
                    error = %message,
                    "probe failed"
                );
                step.error = Some(message);
                step.status = StepStatus::Error;
                self.persist(run, index).await;
                Ok(())
            }
        }
    }

    /// Re-drives a resolved step by replacing its slot with a fresh pending
    /// one. The original attempt stays in history; reconciliation prefers
    /// the newer row for the same index.
    pub async fn retry_step(&self, run: &mut SuiteRun, index: usize) -> anyhow::Result<()> {
        let (step_index, template) = {
            let step = run.steps.get(index).ok_or_else(|| {
                anyhow::Error::new(
                    Diagnostic::new(codes::E_SUITE_STATE, format!("no step at index {index}"))
                        .with_source("engine"),
                )
            })?;
            if !matches!(step.status, StepStatus::Done | StepStatus::Error) {
                return Err(anyhow::Error::new(
                    Diagnostic::new(
                        codes::E_SUITE_STATE,
                        format!(
                            "step {} is {:?}, only done or error steps can be retried",
                            step.index, step.status
                        ),
                    )
                    .with_source("engine"),
                ));
            }
            (step.index, step.template.clone())
        };
        tracing::info!(
            event = "suite.step.retry",
            suite_run_id = %run.suite_run_id,
            index = step_index,
            "retrying step"
        );
        run.steps[index] = SuiteStep::new(step_index, template);
        self.execute_step(run, index).await
    }

    /// History writes are best effort: a failed append is logged and the
    /// suite keeps going, since the live result is still on screen.
    async fn persist(&self, run: &SuiteRun, index: usize) {
        let Some(store) = &self.store else {
            return;
        };
        let step = &run.steps[index];
        let record = StepRecord {
            template_key: step.template.key.as_str().to_string(),
            outcome: if step.status == StepStatus::Done {
                StepStatus::Done
            } else {
                StepStatus::Error
            },
            result: step.probe.clone(),
            error: step.error.clone(),
        };
        let request_json = step
            .request_snapshot
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string());
        let result_json = match serde_json::to_string(&record) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    event = "history.encode_failed",
                    index = step.index,
                    error = %e,
                    "failed to encode step record"
                );
                return;
            }
        };
        if let Err(e) = store
            .append(&run.options.provider_id, &request_json, &result_json)
            .await
        {
            tracing::warn!(
                event = "history.append_failed",
                provider_id = %run.options.provider_id,
                index = step.index,
                error = %e,
                "failed to append history row"
            );
        }
    }
}
