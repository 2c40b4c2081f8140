use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::catalog::{Capability, Template, TemplateKind};
use crate::model::ProbeResult;
use crate::providers::{ProbeTransport, TransportError};
use crate::signals::Signals;

/// Scripted transport for tests and host dry-runs. Each call pops the next
/// scripted response in order and captures the envelope it was given.
#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<ProbeResult, TransportError>>>,
    calls: Mutex<Vec<serde_json::Value>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<ProbeResult, TransportError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn push_ok(&self, result: ProbeResult) {
        self.push(Ok(result));
    }

    pub fn push_failed(&self, message: &str) {
        self.push(Err(TransportError::Failed(message.to_string())));
    }

    pub fn push_unavailable(&self) {
        self.push(Err(TransportError::Unavailable));
    }

    /// Envelopes observed so far, in call order.
    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ProbeTransport for FakeTransport {
    async fn probe(
        &self,
        _provider_id: &str,
        _base_url: &str,
        envelope: &serde_json::Value,
    ) -> Result<ProbeResult, TransportError> {
        self.calls.lock().unwrap().push(envelope.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut result)) => {
                // Real transports echo the envelope; keep the fake honest
                // unless a script pinned its own echo.
                if result.request.is_null() {
                    result.request = envelope.clone();
                }
                Ok(result)
            }
            Some(Err(e)) => Err(e),
            None => Err(TransportError::Failed("fake transport script exhausted".into())),
        }
    }

    fn transport_name(&self) -> &'static str {
        "fake"
    }
}

/// A fully green result for `template`, as a genuine endpoint would answer.
/// Tests start from this and break exactly the signal under test.
pub fn passing_result(template: &Template, model: &str) -> ProbeResult {
    let mut signals = Signals {
        response_parse_mode: Some("sse".into()),
        stream_read_error: Some(false),
        model: Some(model.to_string()),
        response_id: Some("msg_01FakeProbe".into()),
        stop_reason: Some("end_turn".into()),
        response_text_excerpt: Some("连通性检查。<END>".into()),
        ..Default::default()
    };
    for cap in &template.capabilities {
        match cap {
            Capability::MaxTokens => {
                let cap_value = match template.kind {
                    TemplateKind::MaxTokens { cap } => cap,
                    _ => 16,
                };
                signals.output_tokens = Some(u64::from(cap_value));
                signals.stop_reason = Some("max_tokens".into());
            }
            Capability::ResponseId => {}
            Capability::ServiceTier => signals.service_tier = Some("standard".into()),
            Capability::OutputConfig => signals.output_config_echoed = Some(true),
            Capability::ToolSupport => signals.tool_use_ok = Some(true),
            Capability::MultiTurn => signals.multi_turn_ok = Some(true),
            Capability::Thinking => {
                signals.thinking_present = Some(true);
                signals.thinking_text = Some("13 × 24 = 13 × 25 - 13 = 312".into());
            }
            Capability::ThinkingPreserved => signals.thinking_preserved = Some(true),
            Capability::Signature => {
                signals.signature_present = Some(true);
                signals.thinking_signature = Some("EqMBCkgIBRABGAI=".into());
            }
            Capability::SignatureRoundtrip => signals.signature_roundtrip_ok = Some(true),
            Capability::SignatureTamper => {
                signals.roundtrip_step3_enabled = Some(true);
                signals.tamper_rejected = Some(true);
            }
            Capability::CrossProvider => signals.cross_roundtrip_ok = Some(true),
        }
    }
    ProbeResult {
        status: 200,
        duration_ms: 420,
        signals,
        sse_excerpt: "event: message_start\ndata: {\"type\":\"message_start\"}\n\n".into(),
        request: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, TemplateKey};
    use serde_json::json;

    #[tokio::test]
    async fn pops_script_in_order_and_records_calls() {
        let fake = FakeTransport::new();
        fake.push_ok(ProbeResult {
            status: 200,
            ..Default::default()
        });
        fake.push_failed("boom");

        let env = json!({"body": {"model": "m"}});
        let first = fake.probe("p1", "https://api.example.com", &env).await.unwrap();
        assert_eq!(first.status, 200);
        // Echo injected from the envelope.
        assert_eq!(first.request, env);

        let second = fake.probe("p1", "https://api.example.com", &env).await.unwrap_err();
        assert_eq!(second, TransportError::Failed("boom".into()));

        let third = fake.probe("p1", "https://api.example.com", &env).await.unwrap_err();
        assert!(matches!(third, TransportError::Failed(_)));
        assert_eq!(fake.call_count(), 3);
        assert_eq!(fake.transport_name(), "fake");
    }

    #[test]
    fn passing_result_covers_declared_capabilities() {
        let catalog = Catalog::standard();
        let t = catalog.get(TemplateKey::SignatureRoundtrip).unwrap();
        let r = passing_result(t, "claude-opus-4-1");
        assert_eq!(r.signals.signature_roundtrip_ok, Some(true));
        assert_eq!(r.signals.tamper_rejected, Some(true));
        assert_eq!(r.signals.roundtrip_step3_enabled, Some(true));

        let base = catalog.get(TemplateKey::BaselineStream).unwrap();
        let r = passing_result(base, "claude-opus-4-1");
        assert_eq!(r.signals.tool_use_ok, Some(true));
        assert_eq!(r.signals.signature_present, None);
    }
}
