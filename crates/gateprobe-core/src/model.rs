use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::signals::Signals;

/// Outcome of one probe request, as reported by the transport collaborator.
///
/// The transport consumes the SSE stream itself; by the time a `ProbeResult`
/// reaches this crate everything interesting has been distilled into the
/// typed [`Signals`] record plus a raw excerpt kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// HTTP status of the upstream response.
    pub status: u16,
    pub duration_ms: u64,
    #[serde(default)]
    pub signals: Signals,
    /// First chunk of the raw SSE body, for display and fingerprint scans.
    #[serde(default)]
    pub sse_excerpt: String,
    /// The request envelope exactly as it went out, echoed back.
    #[serde(default)]
    pub request: serde_json::Value,
}

/// Names for the individual checks an evaluation can contain. These double
/// as the protocol-checklist item keys, so a check on a single step and the
/// suite-wide requirement it feeds share one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKey {
    RequestOk,
    ModelConsistency,
    OutputTokensExact,
    ResponseId,
    ServiceTier,
    OutputConfig,
    ToolSupport,
    MultiTurn,
    ThinkingOutput,
    ThinkingPreserved,
    Signature,
    SignatureRoundtrip,
    CrossProviderRoundtrip,
    SignatureTamper,
    ReverseProxy,
}

impl CheckKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKey::RequestOk => "request_ok",
            CheckKey::ModelConsistency => "model_consistency",
            CheckKey::OutputTokensExact => "output_tokens_exact",
            CheckKey::ResponseId => "response_id",
            CheckKey::ServiceTier => "service_tier",
            CheckKey::OutputConfig => "output_config",
            CheckKey::ToolSupport => "tool_support",
            CheckKey::MultiTurn => "multi_turn",
            CheckKey::ThinkingOutput => "thinking_output",
            CheckKey::ThinkingPreserved => "thinking_preserved",
            CheckKey::Signature => "signature",
            CheckKey::SignatureRoundtrip => "signature_roundtrip",
            CheckKey::CrossProviderRoundtrip => "cross_provider_roundtrip",
            CheckKey::SignatureTamper => "signature_tamper",
            CheckKey::ReverseProxy => "reverse_proxy",
        }
    }

    /// Display title. The host UI is Chinese, so titles are too.
    pub fn title(&self) -> &'static str {
        match self {
            CheckKey::RequestOk => "请求成功并按 SSE 解析",
            CheckKey::ModelConsistency => "模型回显一致",
            CheckKey::OutputTokensExact => "max_tokens 精确生效",
            CheckKey::ResponseId => "响应 ID 形态规范",
            CheckKey::ServiceTier => "返回 service_tier 字段",
            CheckKey::OutputConfig => "输出配置被遵守",
            CheckKey::ToolSupport => "工具调用按协议返回",
            CheckKey::MultiTurn => "多轮上下文被保留",
            CheckKey::ThinkingOutput => "产生扩展思考输出",
            CheckKey::ThinkingPreserved => "思考内容跨轮保留",
            CheckKey::Signature => "思考签名存在",
            CheckKey::SignatureRoundtrip => "签名同厂回放通过",
            CheckKey::CrossProviderRoundtrip => "签名跨厂回放通过",
            CheckKey::SignatureTamper => "篡改签名被拒绝",
            CheckKey::ReverseProxy => "无中转/代理特征",
        }
    }
}

/// Tri-state check outcome. `ok: None` means "cannot be determined from this
/// response" and is never collapsed into a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub ok: Option<bool>,
    pub title: String,
}

impl CheckResult {
    pub fn new(key: CheckKey, ok: Option<bool>) -> Self {
        Self {
            ok,
            title: key.title().to_string(),
        }
    }
}

/// Confidence level in first-party authenticity. `D` marks risk and always
/// dominates; among positive evidence `A` is strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradeLevel {
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub level: GradeLevel,
    pub label: String,
    pub title: String,
}

impl Grade {
    fn new(level: GradeLevel, label: &str, title: &str) -> Self {
        Self {
            level,
            label: label.to_string(),
            title: title.to_string(),
        }
    }

    /// Plain protocol pass, no authenticity evidence implied.
    pub fn pass() -> Self {
        Self::new(GradeLevel::A, "通过", "协议检查通过")
    }

    /// Plain protocol failure.
    pub fn fail() -> Self {
        Self::new(GradeLevel::D, "未通过", "协议检查未通过")
    }

    pub fn evidence_a() -> Self {
        Self::new(GradeLevel::A, "A级", "强一方证据：思考签名可跨请求回放验证")
    }

    pub fn evidence_b() -> Self {
        Self::new(GradeLevel::B, "B级", "中等证据：扩展思考签名存在")
    }

    pub fn evidence_c() -> Self {
        Self::new(GradeLevel::C, "C级", "弱证据：仅基础协议形态一致")
    }

    pub fn risk_relay() -> Self {
        Self::new(GradeLevel::D, "D级", "风险：响应中检测到中转/代理特征")
    }

    pub fn risk_tamper() -> Self {
        Self::new(GradeLevel::D, "D级", "风险：被篡改的签名未被上游拒绝")
    }

    /// Protocol grades carry a bare pass/fail label and say nothing about
    /// first-party authenticity; evidence-grade selection must skip them.
    pub fn is_protocol(&self) -> bool {
        self.label == "通过" || self.label == "未通过"
    }
}

/// Per-step verdict of the response evaluator. Produced live from a fresh
/// `ProbeResult` or during reconciliation from a persisted one; the two paths
/// must be indistinguishable downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Key of the template this evaluation belongs to. `None` only for
    /// reconstructed steps whose template cannot be recovered.
    pub template_key: Option<String>,
    pub checks: BTreeMap<CheckKey, CheckResult>,
    /// Model name echoed by the endpoint, when present.
    pub model_name: Option<String>,
    pub model_consistency: Option<bool>,
    pub overall_pass: Option<bool>,
    pub grade: Option<Grade>,
}

impl Evaluation {
    pub fn check_ok(&self, key: CheckKey) -> Option<bool> {
        self.checks.get(&key).and_then(|c| c.ok)
    }
}

/// One line of the suite-wide protocol checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolItem {
    pub key: CheckKey,
    pub label: String,
    pub ok: Option<bool>,
    /// Advisory items (`required: false`) are surfaced for reference and
    /// never block the suite verdict.
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Lifecycle of one suite step. `Missing` exists only in reconciled views:
/// a live run never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Error,
    Missing,
}

impl StepStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Error | StepStatus::Missing)
    }
}

/// Artifacts harvested from completed steps and replayed by later templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteArtifacts {
    pub thinking_signature: Option<String>,
    pub thinking_text: Option<String>,
}

/// The uniform shape the checklist aggregator consumes, whether the step ran
/// just now or was rebuilt from history rows.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// 1-based position inside the suite; `None` for legacy rows persisted
    /// without an index.
    pub index: Option<u32>,
    pub label: String,
    pub status: StepStatus,
    pub evaluation: Evaluation,
    pub error: Option<String>,
}

/// Persisted form of one step as handed to the history store. The row id and
/// timestamp are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRunRow {
    pub id: i64,
    pub created_at: String,
    pub request_json: String,
    pub result_json: String,
}

/// Payload serialized into `HistoryRunRow::result_json`. Error steps are
/// recorded too, so reconciliation can tell "step failed" apart from "step
/// never observed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub template_key: String,
    pub outcome: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProbeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_grades_are_label_exact() {
        assert!(Grade::pass().is_protocol());
        assert!(Grade::fail().is_protocol());
        assert!(!Grade::evidence_a().is_protocol());
        assert!(!Grade::risk_relay().is_protocol());
        // A grade merely mentioning the word is not a protocol grade.
        let g = Grade::new(GradeLevel::B, "通过B", "x");
        assert!(!g.is_protocol());
    }

    #[test]
    fn check_keys_serialize_snake_case() {
        let v = serde_json::to_value(CheckKey::SignatureRoundtrip).unwrap();
        assert_eq!(v, serde_json::json!("signature_roundtrip"));
    }

    #[test]
    fn step_record_roundtrips_without_result() {
        let rec = StepRecord {
            template_key: "baseline_stream".into(),
            outcome: StepStatus::Error,
            result: None,
            error: Some("connect timeout".into()),
        };
        let s = serde_json::to_string(&rec).unwrap();
        let back: StepRecord = serde_json::from_str(&s).unwrap();
        assert_eq!(back, rec);
        assert!(!s.contains("\"result\""));
    }
}
