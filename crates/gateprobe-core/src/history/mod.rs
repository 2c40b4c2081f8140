use std::collections::BTreeMap;

use crate::aggregate::SuiteAssessment;
use crate::catalog::Catalog;
use crate::evaluate::evaluate;
use crate::model::{HistoryRunRow, ProbeResult, StepOutcome, StepRecord, StepStatus};
use crate::storage::{HistoryStore, StoreError};

/// One step rebuilt from history. `Missing` steps have no row behind them;
/// they stand in for indices the group's rows say should exist.
#[derive(Debug, Clone)]
pub struct ReconstructedStep {
    pub index: Option<u32>,
    pub row_id: Option<i64>,
    pub created_at: Option<String>,
    pub template_key: Option<String>,
    pub status: StepStatus,
    pub probe: Option<ProbeResult>,
    pub error: Option<String>,
    /// Request envelope persisted alongside the row, for the detail view.
    pub request: Option<serde_json::Value>,
}

/// A suite rebuilt from rows sharing a `suite_run_id`, or a single legacy
/// row that never carried one.
#[derive(Debug, Clone)]
pub struct HistoryGroup {
    /// `suite:<uuid>` or `run:<row id>`.
    pub key: String,
    pub suite_run_id: Option<String>,
    pub expected_total: u32,
    pub max_row_id: i64,
    pub newest_created_at: Option<String>,
    pub steps: Vec<ReconstructedStep>,
}

impl HistoryGroup {
    /// Same shape the live engine produces, so the aggregator cannot tell
    /// a reconstructed suite from a fresh one. Templates are resolved
    /// against `catalog`; pass the catalog the suite originally ran with.
    pub fn outcomes(&self, catalog: &Catalog) -> Vec<StepOutcome> {
        self.steps
            .iter()
            .map(|s| {
                let template = s.template_key.as_deref().and_then(|k| catalog.get_by_str(k));
                let evaluation = match s.status {
                    StepStatus::Done => evaluate(template, s.probe.as_ref()),
                    _ => evaluate(template, None),
                };
                let label = template
                    .map(|t| t.label.to_string())
                    .or_else(|| s.template_key.clone())
                    .unwrap_or_else(|| match s.index {
                        Some(i) => format!("第 {i} 步"),
                        None => "未知步骤".to_string(),
                    });
                StepOutcome {
                    index: s.index,
                    label,
                    status: s.status,
                    evaluation,
                    error: s.error.clone(),
                }
            })
            .collect()
    }

    pub fn assess(&self, catalog: &Catalog) -> SuiteAssessment {
        crate::aggregate::aggregate(&self.outcomes(catalog))
    }
}

struct ParsedRow {
    row_id: i64,
    created_at: String,
    suite_run_id: Option<String>,
    step_index: Option<u32>,
    step_total: Option<u32>,
    request: Option<serde_json::Value>,
    record: Option<StepRecord>,
}

fn parse_row(row: &HistoryRunRow) -> ParsedRow {
    let request: Option<serde_json::Value> = match serde_json::from_str(&row.request_json) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(
                event = "history.row_unreadable",
                row_id = row.id,
                field = "request_json",
                error = %e,
                "ignoring unreadable request envelope"
            );
            None
        }
    };
    let record: Option<StepRecord> = match serde_json::from_str(&row.result_json) {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::warn!(
                event = "history.row_unreadable",
                row_id = row.id,
                field = "result_json",
                error = %e,
                "treating row as an errored step"
            );
            None
        }
    };
    let envelope = request.as_ref();
    let suite_run_id = envelope
        .and_then(|v| v.get("suite_run_id"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);
    let step_index = envelope
        .and_then(|v| v.get("suite_step_index"))
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .filter(|i| *i >= 1);
    let step_total = envelope
        .and_then(|v| v.get("suite_step_total"))
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok());
    ParsedRow {
        row_id: row.id,
        created_at: row.created_at.clone(),
        suite_run_id,
        step_index,
        step_total,
        request,
        record,
    }
}

fn step_from_row(index: Option<u32>, r: ParsedRow) -> ReconstructedStep {
    match r.record {
        Some(rec) => {
            let status = match rec.outcome {
                StepStatus::Done => StepStatus::Done,
                _ => StepStatus::Error,
            };
            ReconstructedStep {
                index,
                row_id: Some(r.row_id),
                created_at: Some(r.created_at),
                template_key: Some(rec.template_key),
                status,
                probe: rec.result,
                error: rec.error,
                request: r.request,
            }
        }
        // The row exists, so something ran; an unreadable record degrades
        // to an errored step rather than a missing one.
        None => ReconstructedStep {
            index,
            row_id: Some(r.row_id),
            created_at: Some(r.created_at),
            template_key: None,
            status: StepStatus::Error,
            probe: None,
            error: Some("记录无法解析".to_string()),
            request: r.request,
        },
    }
}

fn missing_step(index: u32) -> ReconstructedStep {
    ReconstructedStep {
        index: Some(index),
        row_id: None,
        created_at: None,
        template_key: None,
        status: StepStatus::Missing,
        probe: None,
        error: None,
        request: None,
    }
}

/// Ceiling on the missing slots a persisted `suite_step_total` can add
/// beyond the rows actually present; a corrupt total degrades to a
/// truncated view instead of a group with thousands of synthetic steps.
const MAX_SYNTHETIC_STEPS: u32 = 16;

fn build_group(key: String, mut rows: Vec<ParsedRow>) -> HistoryGroup {
    // Ascending row id, so for a duplicated index the latest write wins.
    rows.sort_by_key(|r| r.row_id);

    let suite_run_id = rows.iter().find_map(|r| r.suite_run_id.clone());
    let max_row_id = rows.iter().map(|r| r.row_id).max().unwrap_or(0);
    let newest_created_at = rows.last().map(|r| r.created_at.clone());

    // Index reconstruction is scoped to suite groups. A row without a
    // suite id is its own single-step run and never grows synthetic gaps.
    if suite_run_id.is_none() {
        let expected_total = rows.len() as u32;
        let steps = rows
            .into_iter()
            .map(|r| {
                let index = r.step_index;
                step_from_row(index, r)
            })
            .collect();
        return HistoryGroup {
            key,
            suite_run_id: None,
            expected_total,
            max_row_id,
            newest_created_at,
            steps,
        };
    }

    let total_seen = rows.iter().filter_map(|r| r.step_total).max().unwrap_or(0);
    let row_count = rows.len() as u32;
    let mut expected_total = total_seen.max(row_count);
    let cap = row_count + MAX_SYNTHETIC_STEPS;
    if expected_total > cap {
        tracing::warn!(
            event = "history.total_clamped",
            group = %key,
            claimed = expected_total,
            capped_to = cap,
            "persisted suite_step_total is implausibly large"
        );
        expected_total = cap;
    }

    let mut slots: BTreeMap<u32, ParsedRow> = BTreeMap::new();
    let mut unindexed: Vec<ParsedRow> = Vec::new();
    for r in rows {
        match r.step_index {
            Some(i) => {
                slots.insert(i, r);
            }
            None => unindexed.push(r),
        }
    }

    let mut steps = Vec::new();
    for i in 1..=expected_total {
        match slots.remove(&i) {
            Some(r) => steps.push(step_from_row(Some(i), r)),
            None => steps.push(missing_step(i)),
        }
    }
    // Stray indices beyond the expected range are kept, not dropped.
    for (i, r) in slots {
        steps.push(step_from_row(Some(i), r));
    }
    for r in unindexed {
        steps.push(step_from_row(None, r));
    }

    HistoryGroup {
        key,
        suite_run_id,
        expected_total,
        max_row_id,
        newest_created_at,
        steps,
    }
}

/// Groups raw history rows back into suites. Tolerates rows in any order,
/// duplicated indices from retries, unreadable JSON and gaps; pure, so
/// reconciling the same rows twice gives the same groups.
pub fn reconcile(rows: &[HistoryRunRow]) -> Vec<HistoryGroup> {
    let mut grouped: BTreeMap<String, Vec<ParsedRow>> = BTreeMap::new();
    for row in rows {
        let parsed = parse_row(row);
        let key = match &parsed.suite_run_id {
            Some(id) => format!("suite:{id}"),
            None => format!("run:{}", parsed.row_id),
        };
        grouped.entry(key).or_default().push(parsed);
    }
    let mut out: Vec<HistoryGroup> = grouped
        .into_iter()
        .map(|(key, rows)| build_group(key, rows))
        .collect();
    // Newest suite first.
    out.sort_by_key(|g| std::cmp::Reverse(g.max_row_id));
    out
}

/// History as the host dialog sees it: either the environment is gone, or a
/// list of reconciled groups (possibly empty).
#[derive(Debug)]
pub enum HistoryView {
    Unavailable,
    Groups(Vec<HistoryGroup>),
}

/// Loads and reconciles history for one provider. Storage loss is reported
/// as [`HistoryView::Unavailable`] so the host can say "history unavailable"
/// instead of showing an empty list; other store failures degrade to empty.
pub async fn load_groups(store: &dyn HistoryStore, provider_id: &str, limit: u32) -> HistoryView {
    match store.list(provider_id, limit).await {
        Ok(rows) => HistoryView::Groups(reconcile(&rows)),
        Err(StoreError::Unavailable) => HistoryView::Unavailable,
        Err(StoreError::Failed(e)) => {
            tracing::warn!(
                event = "history.read_failed",
                provider_id = %provider_id,
                error = %e,
                "history list failed"
            );
            HistoryView::Groups(Vec::new())
        }
    }
}
