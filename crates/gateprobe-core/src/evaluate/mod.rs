use std::collections::BTreeMap;

use crate::catalog::{Template, TemplateKind};
use crate::model::{CheckKey, CheckResult, Evaluation, ProbeResult};

pub mod grade;

/// Substrings whose presence in response text betrays a relay in front of
/// the real endpoint. Mostly artifacts of popular gateway projects and of
/// cloud-rehosted models leaking through.
const RELAY_FINGERPRINTS: &[&str] = &[
    "one-api",
    "new-api",
    "one_api",
    "shell-api",
    "openai-compatible",
    "upstream_error",
    "bad gateway",
    "bedrock",
    "vertex",
    "当前分组",
    "无可用渠道",
    "令牌额度",
    "渠道已被禁用",
];

/// First relay fingerprint found in `text`, if any. ASCII keywords are
/// matched case-insensitively; the Chinese ones are exact.
pub fn relay_fingerprint_hit(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    RELAY_FINGERPRINTS.iter().copied().find(|k| lower.contains(k))
}

/// Evaluates one step. Total by construction: every combination of template
/// and probe yields an `Evaluation`, never an error.
///
/// With a template but no probe (step pending, errored, or retried away)
/// all declared checks come back null. With no template (reconstructed step
/// whose key is unknown) the evaluation carries zero checks. Either way
/// `overall_pass` stays null rather than guessing.
pub fn evaluate(template: Option<&Template>, probe: Option<&ProbeResult>) -> Evaluation {
    let Some(t) = template else {
        return Evaluation::default();
    };

    let mut checks = BTreeMap::new();
    for key in t.declared_checks() {
        let ok = probe.and_then(|p| check_value(key, t, p));
        checks.insert(key, CheckResult::new(key, ok));
    }

    let mut any_false = false;
    let mut any_null = false;
    for key in t.required_checks() {
        match checks.get(&key).and_then(|c| c.ok) {
            Some(false) => any_false = true,
            None => any_null = true,
            Some(true) => {}
        }
    }
    let overall_pass = if any_false {
        Some(false)
    } else if any_null {
        None
    } else {
        Some(true)
    };

    let model_name = probe.and_then(|p| p.signals.model.clone());
    let model_consistency = checks.get(&CheckKey::ModelConsistency).and_then(|c| c.ok);
    let grade = grade::step_grade(&checks, overall_pass);

    Evaluation {
        template_key: Some(t.key.as_str().to_string()),
        checks,
        model_name,
        model_consistency,
        overall_pass,
        grade,
    }
}

fn check_value(key: CheckKey, template: &Template, probe: &ProbeResult) -> Option<bool> {
    let s = &probe.signals;
    match key {
        CheckKey::RequestOk => {
            if probe.status != 200 {
                return Some(false);
            }
            match s.response_parse_mode.as_deref() {
                Some("sse") | Some("sse_fallback") => {}
                Some(_) => return Some(false),
                None => return None,
            }
            // Parse mode known good; an unreported stream error counts as none.
            Some(s.stream_read_error != Some(true))
        }
        CheckKey::ModelConsistency => {
            let requested = probe
                .request
                .pointer("/body/model")
                .and_then(|v| v.as_str())?;
            let echoed = s.model.as_deref()?;
            Some(echoed == requested)
        }
        CheckKey::OutputTokensExact => {
            let cap = match template.kind {
                TemplateKind::MaxTokens { cap } => u64::from(cap),
                _ => return None,
            };
            s.output_tokens.map(|n| n == cap)
        }
        CheckKey::ResponseId => s
            .response_id
            .as_deref()
            .map(|id| id.starts_with("msg_") && id.len() > "msg_".len()),
        CheckKey::ServiceTier => s.service_tier.as_deref().map(|t| !t.is_empty()),
        CheckKey::OutputConfig => s.output_config_echoed,
        CheckKey::ToolSupport => s.tool_use_ok,
        CheckKey::MultiTurn => s.multi_turn_ok,
        CheckKey::ThinkingOutput => s.thinking_present,
        CheckKey::ThinkingPreserved => s.thinking_preserved,
        CheckKey::Signature => s
            .signature_present
            .or_else(|| s.thinking_signature.as_ref().map(|_| true)),
        CheckKey::SignatureRoundtrip => s.signature_roundtrip_ok,
        CheckKey::CrossProviderRoundtrip => s.cross_roundtrip_ok,
        CheckKey::SignatureTamper => {
            // Only meaningful when the transport actually ran the tamper
            // phase; otherwise the probe proves nothing either way.
            if s.roundtrip_step3_enabled == Some(true) {
                s.tamper_rejected
            } else {
                None
            }
        }
        CheckKey::ReverseProxy => {
            if s.mentions_amazon_bedrock == Some(true) {
                return Some(false);
            }
            let mut haystack = String::new();
            haystack.push_str(&probe.sse_excerpt);
            if let Some(t) = &s.response_text_excerpt {
                haystack.push('\n');
                haystack.push_str(t);
            }
            if let Some(m) = &s.stream_read_error_message {
                haystack.push('\n');
                haystack.push_str(m);
            }
            if haystack.trim().is_empty() {
                return None;
            }
            Some(relay_fingerprint_hit(&haystack).is_none())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, TemplateKey};
    use crate::providers::fake::passing_result;
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::standard()
    }

    #[test]
    fn no_template_yields_zero_checks() {
        let e = evaluate(None, None);
        assert!(e.checks.is_empty());
        assert_eq!(e.overall_pass, None);
        assert_eq!(e.grade, None);
    }

    #[test]
    fn template_without_probe_yields_all_null() {
        let c = catalog();
        for t in &c.templates {
            let e = evaluate(Some(t), None);
            assert_eq!(e.checks.len(), t.declared_checks().len());
            assert!(e.checks.values().all(|c| c.ok.is_none()), "{}", t.key.as_str());
            assert_eq!(e.overall_pass, None);
            assert_eq!(e.grade, None);
        }
    }

    #[test]
    fn passing_baseline_gets_protocol_pass() {
        let c = catalog();
        let t = c.get(TemplateKey::BaselineStream).unwrap();
        let mut p = passing_result(t, "claude-sonnet-4-5");
        p.request = json!({"body": {"model": "claude-sonnet-4-5"}});
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.overall_pass, Some(true));
        let g = e.grade.unwrap();
        assert!(g.is_protocol());
        assert_eq!(g.label, "通过");
    }

    #[test]
    fn model_mismatch_fails_consistency() {
        let c = catalog();
        let t = c.get(TemplateKey::BaselineStream).unwrap();
        let mut p = passing_result(t, "gpt-4o-mini");
        p.request = json!({"body": {"model": "claude-sonnet-4-5"}});
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::ModelConsistency), Some(false));
        assert_eq!(e.overall_pass, Some(false));
        assert_eq!(e.grade.unwrap().label, "未通过");
    }

    #[test]
    fn max_tokens_is_exact_not_at_most() {
        let c = catalog();
        let t = c.get(TemplateKey::MaxTokensExact).unwrap();
        let mut p = passing_result(t, "claude-sonnet-4-5");
        p.request = json!({"body": {"model": "claude-sonnet-4-5"}});

        p.signals.output_tokens = Some(16);
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::OutputTokensExact), Some(true));

        // 15 tokens is a miss even though it respects the cap.
        p.signals.output_tokens = Some(15);
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::OutputTokensExact), Some(false));
        assert_eq!(e.overall_pass, Some(false));

        p.signals.output_tokens = None;
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::OutputTokensExact), None);
        assert_eq!(e.overall_pass, None);
    }

    #[test]
    fn non_sse_parse_mode_fails_request_ok() {
        let c = catalog();
        let t = c.get(TemplateKey::BaselineStream).unwrap();
        let mut p = passing_result(t, "claude-sonnet-4-5");
        p.request = json!({"body": {"model": "claude-sonnet-4-5"}});

        p.signals.response_parse_mode = Some("json".into());
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::RequestOk), Some(false));

        p.signals.response_parse_mode = Some("sse_fallback".into());
        p.signals.stream_read_error = Some(false);
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::RequestOk), Some(true));

        p.signals.stream_read_error = Some(true);
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::RequestOk), Some(false));

        p.signals.response_parse_mode = None;
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::RequestOk), None);
    }

    #[test]
    fn tamper_check_is_tristate() {
        let c = catalog();
        let t = c.get(TemplateKey::SignatureRoundtrip).unwrap();
        let mut p = passing_result(t, "claude-opus-4-1");
        p.request = json!({"body": {"model": "claude-opus-4-1"}});

        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::SignatureTamper), Some(true));

        // Tamper phase disabled: unknown, and must not drag the step down.
        p.signals.roundtrip_step3_enabled = Some(false);
        p.signals.tamper_rejected = None;
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::SignatureTamper), None);
        assert_eq!(e.overall_pass, Some(true));

        // Accepted tampered signature: advisory false, step still passes
        // its required set, but the grade turns into risk.
        p.signals.roundtrip_step3_enabled = Some(true);
        p.signals.tamper_rejected = Some(false);
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::SignatureTamper), Some(false));
        assert_eq!(e.overall_pass, Some(true));
        assert_eq!(e.grade.unwrap().title, "风险：被篡改的签名未被上游拒绝");
    }

    #[test]
    fn relay_fingerprint_forces_failure_and_risk_grade() {
        let c = catalog();
        let t = c.get(TemplateKey::BaselineStream).unwrap();
        let mut p = passing_result(t, "claude-sonnet-4-5");
        p.request = json!({"body": {"model": "claude-sonnet-4-5"}});
        p.signals.response_text_excerpt =
            Some("当前分组 default 下对于模型 claude-sonnet-4-5 无可用渠道".into());

        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::ReverseProxy), Some(false));
        assert_eq!(e.overall_pass, Some(false));
        let g = e.grade.unwrap();
        assert_eq!(g.level, crate::model::GradeLevel::D);
        assert!(!g.is_protocol());
    }

    #[test]
    fn bedrock_signal_counts_as_relay() {
        let c = catalog();
        let t = c.get(TemplateKey::BaselineStream).unwrap();
        let mut p = passing_result(t, "claude-sonnet-4-5");
        p.request = json!({"body": {"model": "claude-sonnet-4-5"}});
        p.signals.mentions_amazon_bedrock = Some(true);
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::ReverseProxy), Some(false));
    }

    #[test]
    fn empty_scannable_text_leaves_relay_check_null() {
        let c = catalog();
        let t = c.get(TemplateKey::BaselineStream).unwrap();
        let mut p = passing_result(t, "claude-sonnet-4-5");
        p.request = json!({"body": {"model": "claude-sonnet-4-5"}});
        p.sse_excerpt = String::new();
        p.signals.response_text_excerpt = None;
        let e = evaluate(Some(t), Some(&p));
        assert_eq!(e.check_ok(CheckKey::ReverseProxy), None);
        assert_eq!(e.overall_pass, None);
    }

    #[test]
    fn fingerprint_scan_is_ascii_case_insensitive() {
        assert_eq!(relay_fingerprint_hit("routed via One-API v0.6"), Some("one-api"));
        assert_eq!(relay_fingerprint_hit("Amazon BEDROCK runtime"), Some("bedrock"));
        assert_eq!(relay_fingerprint_hit("完全正常的回答"), None);
    }

    #[test]
    fn hostile_probe_shapes_never_panic() {
        let c = catalog();
        let t = c.get(TemplateKey::SignatureRoundtrip).unwrap();
        let shapes = [
            json!(null),
            json!([1, 2, 3]),
            json!({"body": "not an object"}),
            json!({"body": {"model": 42}}),
        ];
        for shape in shapes {
            let p = ProbeResult {
                status: 200,
                request: shape,
                ..Default::default()
            };
            let e = evaluate(Some(t), Some(&p));
            assert_eq!(e.check_ok(CheckKey::ModelConsistency), None);
            assert_eq!(e.overall_pass, None);
        }
    }
}
