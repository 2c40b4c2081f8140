use crate::aggregate::{Issue, IssueKind, SuiteAssessment};

/// Issues rendered before the list is elided. Only the text is truncated;
/// the verdict always reflects the full issue list.
pub const MAX_ISSUES_SHOWN: usize = 8;

fn icon(ok: Option<bool>) -> &'static str {
    match ok {
        Some(true) => "✅",
        Some(false) => "❌",
        None => "❓",
    }
}

fn issue_prefix(kind: IssueKind) -> &'static str {
    match kind {
        IssueKind::MissingStep => "[缺失]",
        IssueKind::StepError => "[错误]",
        IssueKind::RequiredItemFailed => "[未满足]",
        IssueKind::RequiredItemUndetermined => "[未判定]",
        IssueKind::TamperAdvisory => "[参考]",
    }
}

fn issue_line(n: usize, issue: &Issue) -> String {
    if issue.detail.is_empty() {
        format!("  {}. {} {}", n, issue_prefix(issue.kind), issue.label)
    } else {
        format!(
            "  {}. {} {}：{}",
            n,
            issue_prefix(issue.kind),
            issue.label,
            issue.detail
        )
    }
}

/// Renders an assessment as the plain text block shown in the host dialog.
/// Pure function of the assessment, so identical inputs produce identical
/// text and live and reconstructed views agree to the byte.
pub fn render_plain(a: &SuiteAssessment) -> String {
    let mut out = String::new();

    let required_total = a.items.iter().filter(|i| i.required).count();
    let satisfied = a
        .items
        .iter()
        .filter(|i| i.required && i.ok == Some(true))
        .count();

    match a.overall_pass {
        Some(true) => out.push_str(&format!(
            "协议兼容性：通过（全部满足 {satisfied}/{required_total}）\n"
        )),
        Some(false) => out.push_str(&format!(
            "协议兼容性：未通过（满足 {satisfied}/{required_total}）\n"
        )),
        None => out.push_str(&format!(
            "协议兼容性：待定（满足 {satisfied}/{required_total}，仍有步骤未完成）\n"
        )),
    }

    match &a.evidence_grade {
        Some(g) => out.push_str(&format!("证据等级：{}（{}）\n", g.label, g.title)),
        None => out.push_str("证据等级：无（未获得一方证据信号）\n"),
    }
    out.push_str("说明：协议通过不代表一方强证据，证据等级仅由签名与思考类探测决定。\n");

    out.push_str(&format!(
        "步骤：{}/{} 完成（{} 错误，{} 缺失）\n",
        a.counters.done, a.counters.total, a.counters.errors, a.counters.missing
    ));

    out.push_str("\n协议检查：\n");
    for item in &a.items {
        let mut notes = Vec::new();
        if !item.required {
            notes.push("参考".to_string());
        }
        if let Some(detail) = &item.detail {
            notes.push(detail.clone());
        }
        if notes.is_empty() {
            out.push_str(&format!("  {} {}\n", icon(item.ok), item.label));
        } else {
            out.push_str(&format!(
                "  {} {}（{}）\n",
                icon(item.ok),
                item.label,
                notes.join("，")
            ));
        }
    }

    if !a.issues.is_empty() {
        out.push_str("\n问题：\n");
        for (i, issue) in a.issues.iter().take(MAX_ISSUES_SHOWN).enumerate() {
            out.push_str(&issue_line(i + 1, issue));
            out.push('\n');
        }
        if a.issues.len() > MAX_ISSUES_SHOWN {
            out.push_str(&format!(
                "  …另有 {} 项未显示\n",
                a.issues.len() - MAX_ISSUES_SHOWN
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{StepCounters, SuiteAssessment};
    use crate::model::{CheckKey, Grade, ProtocolItem};

    fn item(key: CheckKey, ok: Option<bool>, required: bool) -> ProtocolItem {
        ProtocolItem {
            key,
            label: key.title().to_string(),
            ok,
            required,
            detail: None,
        }
    }

    fn base_assessment() -> SuiteAssessment {
        SuiteAssessment {
            items: vec![
                item(CheckKey::RequestOk, Some(true), true),
                item(CheckKey::ModelConsistency, Some(true), true),
                item(CheckKey::SignatureTamper, None, false),
            ],
            overall_pass: Some(true),
            evidence_grade: Some(Grade::evidence_b()),
            counters: StepCounters {
                total: 2,
                done: 2,
                ..Default::default()
            },
            issues: vec![],
        }
    }

    #[test]
    fn pass_verdict_counts_required_items_only() {
        let text = render_plain(&base_assessment());
        assert!(text.contains("协议兼容性：通过（全部满足 2/2）"), "{text}");
        assert!(text.contains("证据等级：B级"));
        assert!(text.contains("协议通过不代表一方强证据"));
        assert!(text.contains("❓ 篡改签名被拒绝（参考）"));
        assert!(!text.contains("问题："));
    }

    #[test]
    fn fail_verdict_and_issue_sections() {
        let mut a = base_assessment();
        a.overall_pass = Some(false);
        a.items[1].ok = Some(false);
        a.items[1].detail = Some("第 1 步（基础流式会话）不满足".into());
        a.issues = vec![Issue {
            kind: IssueKind::RequiredItemFailed,
            label: a.items[1].label.clone(),
            detail: "第 1 步（基础流式会话）不满足".into(),
        }];
        let text = render_plain(&a);
        assert!(text.contains("协议兼容性：未通过（满足 1/2）"));
        assert!(text.contains("❌ 模型回显一致（第 1 步（基础流式会话）不满足）"));
        assert!(text.contains("1. [未满足] 模型回显一致：第 1 步（基础流式会话）不满足"));
    }

    #[test]
    fn issue_list_is_capped_in_text_only() {
        let mut a = base_assessment();
        a.overall_pass = Some(false);
        a.issues = (1..=11)
            .map(|i| Issue {
                kind: IssueKind::MissingStep,
                label: format!("第 {i} 步"),
                detail: format!("第 {i} 步 未观测到执行记录"),
            })
            .collect();
        let text = render_plain(&a);
        assert!(text.contains("…另有 3 项未显示"));
        assert!(text.contains("第 8 步"));
        assert!(!text.contains("9. [缺失]"));
    }

    #[test]
    fn identical_assessments_render_identically() {
        let a = base_assessment();
        assert_eq!(render_plain(&a), render_plain(&a));
    }
}
