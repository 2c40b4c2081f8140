use serde::Serialize;

use crate::evaluate::grade::pick_evidence_grade;
use crate::model::{CheckKey, Grade, ProtocolItem, StepOutcome, StepStatus};

/// Display order of the suite checklist. Items never declared by any step
/// are simply absent; the rest keep this order regardless of step order.
pub const CHECKLIST_ORDER: [CheckKey; 15] = [
    CheckKey::RequestOk,
    CheckKey::ModelConsistency,
    CheckKey::OutputTokensExact,
    CheckKey::ResponseId,
    CheckKey::ServiceTier,
    CheckKey::OutputConfig,
    CheckKey::ToolSupport,
    CheckKey::MultiTurn,
    CheckKey::ThinkingOutput,
    CheckKey::ThinkingPreserved,
    CheckKey::Signature,
    CheckKey::SignatureRoundtrip,
    CheckKey::CrossProviderRoundtrip,
    CheckKey::SignatureTamper,
    CheckKey::ReverseProxy,
];

/// Three-valued conjunction over per-step check outcomes. Empty input is
/// "nothing observed", not success; a single false condemns the item; any
/// remaining null keeps the answer open.
pub fn suite_aggregate_ok(values: &[Option<bool>]) -> Option<bool> {
    if values.is_empty() {
        return None;
    }
    if values.iter().any(|v| *v == Some(false)) {
        return Some(false);
    }
    if values.iter().any(|v| v.is_none()) {
        return None;
    }
    Some(true)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepCounters {
    pub total: u32,
    pub done: u32,
    pub errors: u32,
    pub missing: u32,
    /// Steps still pending or running. Non-zero keeps the verdict open.
    pub unresolved: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingStep,
    StepError,
    RequiredItemFailed,
    RequiredItemUndetermined,
    TamperAdvisory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub label: String,
    pub detail: String,
}

/// Everything the host needs to render one suite, live or reconstructed.
/// Pure function of the step outcomes; no clocks, no randomness.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteAssessment {
    pub items: Vec<ProtocolItem>,
    pub overall_pass: Option<bool>,
    pub evidence_grade: Option<Grade>,
    pub counters: StepCounters,
    /// Complete list, highest priority first. Renderers may truncate for
    /// display but the verdict above is computed from all of them.
    pub issues: Vec<Issue>,
}

fn step_ref(step: &StepOutcome) -> String {
    match step.index {
        Some(i) => {
            let plain = format!("第 {i} 步");
            // Reconstructed steps without a recoverable template already use
            // the positional fallback as their label; repeating it reads odd.
            if step.label == plain {
                plain
            } else {
                format!("{plain}（{}）", step.label)
            }
        }
        None => step.label.clone(),
    }
}

fn is_universal(key: CheckKey) -> bool {
    matches!(
        key,
        CheckKey::RequestOk | CheckKey::ModelConsistency | CheckKey::ReverseProxy
    )
}

fn build_item(key: CheckKey, steps: &[StepOutcome]) -> Option<ProtocolItem> {
    let declaring: Vec<&StepOutcome> = steps
        .iter()
        .filter(|s| s.evaluation.checks.contains_key(&key))
        .collect();
    if declaring.is_empty() {
        return None;
    }

    // Universal items aggregate over completed steps only; capability items
    // span every step whose template raised the flag, so an unfinished or
    // errored declaring step holds the item at null.
    let subset: Vec<&StepOutcome> = if is_universal(key) {
        declaring
            .iter()
            .copied()
            .filter(|s| s.status == StepStatus::Done)
            .collect()
    } else {
        declaring
    };
    let values: Vec<Option<bool>> = subset.iter().map(|s| s.evaluation.check_ok(key)).collect();
    let ok = suite_aggregate_ok(&values);

    // The tamper probe is informational by design. A relay hit is the
    // reverse: normally advisory, but a confirmed fingerprint must block.
    let required = match key {
        CheckKey::SignatureTamper => false,
        CheckKey::ReverseProxy => ok == Some(false),
        _ => !subset.is_empty(),
    };

    let detail = match ok {
        Some(true) => None,
        Some(false) => subset
            .iter()
            .find(|s| s.evaluation.check_ok(key) == Some(false))
            .map(|s| format!("{} 不满足", step_ref(s))),
        None if values.is_empty() => Some("暂无已完成的相关步骤".to_string()),
        None if key == CheckKey::SignatureTamper => Some("篡改探针未执行".to_string()),
        None => Some("存在未能判定的步骤".to_string()),
    };

    Some(ProtocolItem {
        key,
        label: key.title().to_string(),
        ok,
        required,
        detail,
    })
}

/// Folds step outcomes into the suite-level verdict, checklist and issue
/// list. Live runs and reconstructed history groups go through this same
/// function, so the two views can never drift apart.
pub fn aggregate(steps: &[StepOutcome]) -> SuiteAssessment {
    let mut counters = StepCounters {
        total: steps.len() as u32,
        ..Default::default()
    };
    for s in steps {
        match s.status {
            StepStatus::Done => counters.done += 1,
            StepStatus::Error => counters.errors += 1,
            StepStatus::Missing => counters.missing += 1,
            StepStatus::Pending | StepStatus::Running => counters.unresolved += 1,
        }
    }

    let items: Vec<ProtocolItem> = CHECKLIST_ORDER
        .iter()
        .filter_map(|key| build_item(*key, steps))
        .collect();

    let overall_pass = if counters.unresolved > 0 {
        None
    } else {
        Some(
            counters.errors == 0
                && counters.missing == 0
                && steps
                    .iter()
                    .all(|s| s.evaluation.overall_pass == Some(true)),
        )
    };

    let evidence_grade =
        pick_evidence_grade(steps.iter().filter_map(|s| s.evaluation.grade.as_ref()));

    let fully_resolved = counters.unresolved == 0;
    let mut issues = Vec::new();
    for s in steps.iter().filter(|s| s.status == StepStatus::Missing) {
        issues.push(Issue {
            kind: IssueKind::MissingStep,
            label: s.label.clone(),
            detail: format!("{} 未观测到执行记录", step_ref(s)),
        });
    }
    for s in steps.iter().filter(|s| s.status == StepStatus::Error) {
        issues.push(Issue {
            kind: IssueKind::StepError,
            label: s.label.clone(),
            detail: s.error.clone().unwrap_or_else(|| "执行失败".to_string()),
        });
    }
    for item in items.iter().filter(|i| i.required && i.ok == Some(false)) {
        issues.push(Issue {
            kind: IssueKind::RequiredItemFailed,
            label: item.label.clone(),
            detail: item.detail.clone().unwrap_or_default(),
        });
    }
    if fully_resolved && counters.errors == 0 && counters.missing == 0 {
        for item in items.iter().filter(|i| i.required && i.ok.is_none()) {
            issues.push(Issue {
                kind: IssueKind::RequiredItemUndetermined,
                label: item.label.clone(),
                detail: item.detail.clone().unwrap_or_default(),
            });
        }
    }
    if let Some(tamper) = items
        .iter()
        .find(|i| i.key == CheckKey::SignatureTamper && i.ok == Some(false))
    {
        issues.push(Issue {
            kind: IssueKind::TamperAdvisory,
            label: tamper.label.clone(),
            detail: "被篡改的签名被上游接受，建议人工复核该渠道".to_string(),
        });
    }

    SuiteAssessment {
        items,
        overall_pass,
        evidence_grade,
        counters,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckResult, Evaluation};
    use std::collections::BTreeMap;

    fn outcome(
        index: u32,
        label: &str,
        status: StepStatus,
        checks: &[(CheckKey, Option<bool>)],
        overall: Option<bool>,
    ) -> StepOutcome {
        let mut map = BTreeMap::new();
        for (k, ok) in checks {
            map.insert(*k, CheckResult::new(*k, *ok));
        }
        StepOutcome {
            index: Some(index),
            label: label.to_string(),
            status,
            evaluation: Evaluation {
                checks: map,
                overall_pass: overall,
                ..Default::default()
            },
            error: None,
        }
    }

    #[test]
    fn combinator_truth_table() {
        assert_eq!(suite_aggregate_ok(&[]), None);
        assert_eq!(suite_aggregate_ok(&[Some(true)]), Some(true));
        assert_eq!(suite_aggregate_ok(&[Some(false)]), Some(false));
        assert_eq!(suite_aggregate_ok(&[None]), None);
        assert_eq!(suite_aggregate_ok(&[Some(true), None]), None);
        assert_eq!(suite_aggregate_ok(&[Some(false), None]), Some(false));
        assert_eq!(suite_aggregate_ok(&[Some(true), Some(false), None]), Some(false));
        assert_eq!(suite_aggregate_ok(&[Some(true), Some(true)]), Some(true));
    }

    #[test]
    fn missing_and_error_issues_precede_item_issues() {
        let mut error_step = outcome(
            2,
            "max_tokens 精确截断",
            StepStatus::Error,
            &[(CheckKey::RequestOk, None)],
            None,
        );
        error_step.error = Some("上游 500".into());
        let steps = vec![
            outcome(1, "第 1 步", StepStatus::Missing, &[], None),
            error_step,
            outcome(
                3,
                "基础流式会话",
                StepStatus::Done,
                &[(CheckKey::RequestOk, Some(false)), (CheckKey::ToolSupport, None)],
                Some(false),
            ),
        ];
        let a = aggregate(&steps);
        assert_eq!(a.overall_pass, Some(false));
        let kinds: Vec<IssueKind> = a.issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![IssueKind::MissingStep, IssueKind::StepError, IssueKind::RequiredItemFailed]
        );
        // With errors and missing steps present, open items are implied and
        // not reported a second time as undetermined.
        assert!(!kinds.contains(&IssueKind::RequiredItemUndetermined));
        assert_eq!(a.issues[0].detail, "第 1 步 未观测到执行记录");
        assert_eq!(a.issues[1].detail, "上游 500");
    }

    #[test]
    fn undetermined_required_items_need_full_resolution() {
        let resolved = vec![outcome(
            1,
            "基础流式会话",
            StepStatus::Done,
            &[(CheckKey::RequestOk, Some(true)), (CheckKey::ToolSupport, None)],
            None,
        )];
        let a = aggregate(&resolved);
        assert_eq!(
            a.issues.iter().map(|i| i.kind).collect::<Vec<_>>(),
            vec![IssueKind::RequiredItemUndetermined]
        );

        let mut with_pending = resolved;
        with_pending.push(outcome(
            2,
            "第二步",
            StepStatus::Pending,
            &[(CheckKey::RequestOk, None), (CheckKey::ToolSupport, None)],
            None,
        ));
        let a = aggregate(&with_pending);
        assert_eq!(a.overall_pass, None);
        assert!(a.issues.is_empty(), "open suites do not nag about null items");
    }

    #[test]
    fn tamper_advisory_never_blocks_and_sorts_last() {
        // Tamper alone: the suite still passes, with one advisory issue.
        let accepted_tamper = vec![outcome(
            1,
            "签名同厂回放",
            StepStatus::Done,
            &[
                (CheckKey::RequestOk, Some(true)),
                (CheckKey::SignatureTamper, Some(false)),
            ],
            Some(true),
        )];
        let a = aggregate(&accepted_tamper);
        assert_eq!(a.overall_pass, Some(true));
        assert_eq!(
            a.issues.iter().map(|i| i.kind).collect::<Vec<_>>(),
            vec![IssueKind::TamperAdvisory]
        );

        // Combined with a real failure, the advisory stays at the end.
        let mixed = vec![outcome(
            1,
            "签名同厂回放",
            StepStatus::Done,
            &[
                (CheckKey::RequestOk, Some(false)),
                (CheckKey::SignatureTamper, Some(false)),
            ],
            Some(false),
        )];
        let a = aggregate(&mixed);
        assert_eq!(a.overall_pass, Some(false));
        let kinds: Vec<IssueKind> = a.issues.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IssueKind::RequiredItemFailed, IssueKind::TamperAdvisory]);
    }

    #[test]
    fn universal_items_skip_unfinished_steps_capability_items_wait() {
        let steps = vec![
            outcome(
                1,
                "基础流式会话",
                StepStatus::Done,
                &[(CheckKey::RequestOk, Some(true)), (CheckKey::ToolSupport, Some(true))],
                Some(true),
            ),
            outcome(
                2,
                "第二会话",
                StepStatus::Running,
                &[(CheckKey::RequestOk, None), (CheckKey::ToolSupport, None)],
                None,
            ),
        ];
        let a = aggregate(&steps);
        let request_ok = a.items.iter().find(|i| i.key == CheckKey::RequestOk).unwrap();
        assert_eq!(request_ok.ok, Some(true), "universal item judges completed steps only");
        let tool = a.items.iter().find(|i| i.key == CheckKey::ToolSupport).unwrap();
        assert_eq!(tool.ok, None, "capability item waits for its declaring step");
        assert_eq!(tool.detail.as_deref(), Some("存在未能判定的步骤"));
        assert_eq!(a.overall_pass, None);
    }
}
