use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use crate::model::{CheckKey, SuiteArtifacts};

/// Identity of a probe template. Serialized form is the snake_case key that
/// ends up in persisted step records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    BaselineStream,
    MaxTokensExact,
    ThinkingSignature,
    SignatureRoundtrip,
    CrossProviderRoundtrip,
}

impl TemplateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::BaselineStream => "baseline_stream",
            TemplateKey::MaxTokensExact => "max_tokens_exact",
            TemplateKey::ThinkingSignature => "thinking_signature",
            TemplateKey::SignatureRoundtrip => "signature_roundtrip",
            TemplateKey::CrossProviderRoundtrip => "cross_provider_roundtrip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "baseline_stream" => Some(TemplateKey::BaselineStream),
            "max_tokens_exact" => Some(TemplateKey::MaxTokensExact),
            "thinking_signature" => Some(TemplateKey::ThinkingSignature),
            "signature_roundtrip" => Some(TemplateKey::SignatureRoundtrip),
            "cross_provider_roundtrip" => Some(TemplateKey::CrossProviderRoundtrip),
            _ => None,
        }
    }
}

/// Capability flags a template declares. Each flag maps to exactly one check
/// key; the checklist aggregator scopes capability items to the steps whose
/// template raised the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    MaxTokens,
    ResponseId,
    ServiceTier,
    OutputConfig,
    ToolSupport,
    MultiTurn,
    Thinking,
    ThinkingPreserved,
    Signature,
    SignatureRoundtrip,
    SignatureTamper,
    CrossProvider,
}

impl Capability {
    pub fn check(&self) -> CheckKey {
        match self {
            Capability::MaxTokens => CheckKey::OutputTokensExact,
            Capability::ResponseId => CheckKey::ResponseId,
            Capability::ServiceTier => CheckKey::ServiceTier,
            Capability::OutputConfig => CheckKey::OutputConfig,
            Capability::ToolSupport => CheckKey::ToolSupport,
            Capability::MultiTurn => CheckKey::MultiTurn,
            Capability::Thinking => CheckKey::ThinkingOutput,
            Capability::ThinkingPreserved => CheckKey::ThinkingPreserved,
            Capability::Signature => CheckKey::Signature,
            Capability::SignatureRoundtrip => CheckKey::SignatureRoundtrip,
            Capability::SignatureTamper => CheckKey::SignatureTamper,
            Capability::CrossProvider => CheckKey::CrossProviderRoundtrip,
        }
    }
}

/// What a template probes for, with the knobs that shape its request body.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateKind {
    /// Plain streamed conversation with tools, prior turns and sampling
    /// overrides attached.
    BaselineStream,
    /// Tiny `max_tokens` cap; a genuine endpoint truncates at exactly `cap`.
    MaxTokens { cap: u32 },
    /// Extended thinking request expected to yield a signed thinking block.
    ThinkingSignature { budget_tokens: u32 },
    /// Replays a previously obtained signature against the same provider,
    /// optionally followed by a tampered copy that must be rejected.
    SignatureRoundtrip { budget_tokens: u32 },
    /// Replays the signature against a second provider; passing is the
    /// strongest first-party evidence this tool can produce.
    CrossProviderRoundtrip { budget_tokens: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub key: TemplateKey,
    pub label: &'static str,
    pub kind: TemplateKind,
    pub capabilities: Vec<Capability>,
    pub requires_cross_provider: bool,
    /// Gated behind the Claude 4 family; older models skip this template.
    pub claude4_only: bool,
}

fn claude4_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(opus|sonnet|haiku)-4\b").expect("static model pattern"))
}

/// Matches the Claude 4 family: `opus-4`, `sonnet-4`, `haiku-4` followed by
/// a word boundary, so `sonnet-4-5` matches but `sonnet-45` does not.
pub fn is_claude4_family(model: &str) -> bool {
    claude4_pattern().is_match(model)
}

impl Template {
    pub fn applicable_to(&self, model: &str) -> bool {
        !self.claude4_only || is_claude4_family(model)
    }

    /// Checks whose failure fails the step. Universal checks come first;
    /// capability checks follow in declaration order. The tamper probe is
    /// advisory at step level and deliberately not part of this set, and a
    /// relay-fingerprint hit fails the step through `ReverseProxy` here.
    pub fn required_checks(&self) -> Vec<CheckKey> {
        let mut out = vec![
            CheckKey::RequestOk,
            CheckKey::ModelConsistency,
            CheckKey::ReverseProxy,
        ];
        for cap in &self.capabilities {
            let key = cap.check();
            if key != CheckKey::SignatureTamper && !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }

    /// Everything the evaluator will emit a check entry for, including
    /// advisory checks.
    pub fn declared_checks(&self) -> Vec<CheckKey> {
        let mut out = self.required_checks();
        if self.capabilities.contains(&Capability::SignatureTamper) {
            out.push(CheckKey::SignatureTamper);
        }
        out
    }

    /// Request body for this template. `user_id` must be fresh per step so
    /// upstream caching and billing dedup never blur two probes together.
    /// Artifacts from earlier steps are replayed when present.
    pub fn build_body(&self, model: &str, user_id: &str, artifacts: &SuiteArtifacts) -> Value {
        match &self.kind {
            TemplateKind::BaselineStream => json!({
                "model": model,
                "stream": true,
                "max_tokens": 512,
                "temperature": 0,
                "service_tier": "auto",
                "stop_sequences": ["<END>"],
                "messages": [
                    {"role": "user", "content": "请只回答：连通性检查。"},
                    {"role": "assistant", "content": "连通性检查。"},
                    {"role": "user", "content": "重复上一句，并调用 echo 工具原样返回它，最后输出 <END>。"}
                ],
                "tools": [{
                    "name": "echo",
                    "description": "原样返回输入文本",
                    "input_schema": {
                        "type": "object",
                        "properties": {"text": {"type": "string"}},
                        "required": ["text"]
                    }
                }],
                "metadata": {"user_id": user_id}
            }),
            TemplateKind::MaxTokens { cap } => json!({
                "model": model,
                "stream": true,
                "max_tokens": cap,
                "messages": [
                    {"role": "user", "content": "从 1 数到 200，每个数字单独一行。"}
                ],
                "metadata": {"user_id": user_id}
            }),
            TemplateKind::ThinkingSignature { budget_tokens } => json!({
                "model": model,
                "stream": true,
                "max_tokens": budget_tokens + 1024,
                "thinking": {"type": "enabled", "budget_tokens": budget_tokens},
                "messages": [
                    {"role": "user", "content": "计算 13 × 24，先展示思考过程再给出结果。"}
                ],
                "metadata": {"user_id": user_id}
            }),
            TemplateKind::SignatureRoundtrip { budget_tokens }
            | TemplateKind::CrossProviderRoundtrip { budget_tokens } => {
                self.roundtrip_body(model, user_id, *budget_tokens, artifacts)
            }
        }
    }

    /// Round-trip bodies replay the signed thinking block harvested from an
    /// earlier step when one exists. Without artifacts the transport is
    /// expected to run the produce phase itself, so the body falls back to a
    /// fresh thinking request.
    fn roundtrip_body(
        &self,
        model: &str,
        user_id: &str,
        budget_tokens: u32,
        artifacts: &SuiteArtifacts,
    ) -> Value {
        let messages = match (&artifacts.thinking_signature, &artifacts.thinking_text) {
            (Some(signature), Some(thinking)) => json!([
                {"role": "user", "content": "计算 13 × 24，先展示思考过程再给出结果。"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": thinking, "signature": signature},
                    {"type": "text", "text": "312"}
                ]},
                {"role": "user", "content": "换一种方法再验证一次这个结果。"}
            ]),
            _ => json!([
                {"role": "user", "content": "计算 13 × 24，先展示思考过程再给出结果。"}
            ]),
        };
        json!({
            "model": model,
            "stream": true,
            "max_tokens": budget_tokens + 1024,
            "thinking": {"type": "enabled", "budget_tokens": budget_tokens},
            "messages": messages,
            "metadata": {"user_id": user_id}
        })
    }

    /// Headers for the request envelope. `x-probe-*` entries are directives
    /// for the transport and must never be forwarded upstream.
    pub fn envelope_headers(
        &self,
        tamper_enabled: bool,
        secondary_provider_id: Option<&str>,
    ) -> Map<String, Value> {
        let mut headers = Map::new();
        headers.insert("content-type".into(), json!("application/json"));
        headers.insert("accept".into(), json!("text/event-stream"));
        headers.insert("anthropic-version".into(), json!("2023-06-01"));
        match &self.kind {
            TemplateKind::SignatureRoundtrip { .. } => {
                headers.insert("x-probe-roundtrip".into(), json!("signature"));
                if tamper_enabled {
                    headers.insert("x-probe-tamper".into(), json!("1"));
                }
            }
            TemplateKind::CrossProviderRoundtrip { .. } => {
                headers.insert("x-probe-roundtrip".into(), json!("signature"));
                if let Some(id) = secondary_provider_id {
                    headers.insert("x-probe-secondary-provider".into(), json!(id));
                }
            }
            _ => {}
        }
        headers
    }
}

/// Reason-tagged entry for a template the planner left out.
#[derive(Debug, Clone)]
pub struct SkippedTemplate {
    pub key: TemplateKey,
    pub label: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub applicable: Vec<Template>,
    pub skipped: Vec<SkippedTemplate>,
}

/// Ordered set of probe templates. The standard catalog is what the host
/// ships; tests and embedders can assemble their own.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub templates: Vec<Template>,
}

impl Catalog {
    pub fn standard() -> Self {
        Self {
            templates: vec![
                Template {
                    key: TemplateKey::BaselineStream,
                    label: "基础流式会话",
                    kind: TemplateKind::BaselineStream,
                    capabilities: vec![
                        Capability::ResponseId,
                        Capability::ServiceTier,
                        Capability::OutputConfig,
                        Capability::ToolSupport,
                        Capability::MultiTurn,
                    ],
                    requires_cross_provider: false,
                    claude4_only: false,
                },
                Template {
                    key: TemplateKey::MaxTokensExact,
                    label: "max_tokens 精确截断",
                    kind: TemplateKind::MaxTokens { cap: 16 },
                    capabilities: vec![Capability::MaxTokens, Capability::ResponseId],
                    requires_cross_provider: false,
                    claude4_only: false,
                },
                Template {
                    key: TemplateKey::ThinkingSignature,
                    label: "扩展思考签名",
                    kind: TemplateKind::ThinkingSignature { budget_tokens: 1024 },
                    capabilities: vec![Capability::Thinking, Capability::Signature],
                    requires_cross_provider: false,
                    claude4_only: true,
                },
                Template {
                    key: TemplateKey::SignatureRoundtrip,
                    label: "签名同厂回放",
                    kind: TemplateKind::SignatureRoundtrip { budget_tokens: 1024 },
                    capabilities: vec![
                        Capability::Thinking,
                        Capability::ThinkingPreserved,
                        Capability::Signature,
                        Capability::SignatureRoundtrip,
                        Capability::SignatureTamper,
                    ],
                    requires_cross_provider: false,
                    claude4_only: true,
                },
                Template {
                    key: TemplateKey::CrossProviderRoundtrip,
                    label: "签名跨厂回放",
                    kind: TemplateKind::CrossProviderRoundtrip { budget_tokens: 1024 },
                    capabilities: vec![Capability::Signature, Capability::CrossProvider],
                    requires_cross_provider: true,
                    claude4_only: true,
                },
            ],
        }
    }

    pub fn get(&self, key: TemplateKey) -> Option<&Template> {
        self.templates.iter().find(|t| t.key == key)
    }

    pub fn get_by_str(&self, key: &str) -> Option<&Template> {
        TemplateKey::parse(key).and_then(|k| self.get(k))
    }

    /// Splits the catalog into templates that apply to `model` and the rest,
    /// each skip carrying a display reason. Catalog order is preserved.
    pub fn partition(&self, model: &str) -> Partition {
        let mut out = Partition::default();
        for t in &self.templates {
            if t.applicable_to(model) {
                out.applicable.push(t.clone());
            } else {
                out.skipped.push(SkippedTemplate {
                    key: t.key,
                    label: t.label,
                    reason: format!("需要 Claude 4 系列模型（当前：{model}）"),
                });
            }
        }
        out
    }
}
