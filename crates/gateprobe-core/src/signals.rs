use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed signal record distilled by the transport while it drains the SSE
/// stream. Decoding happens exactly once, at the transport boundary; every
/// check downstream reads these fields instead of re-sniffing raw JSON.
///
/// All fields are optional: an absent signal means "the response gave no
/// basis to judge", which evaluators map to a null check rather than a
/// failure. Unknown keys survive in `extra` so newer transports can ship
/// signals an older core simply ignores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signals {
    /// How the body was consumed: `sse`, `sse_fallback` or `json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_read_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_read_error_message: Option<String>,
    /// Model name echoed in `message_start`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    /// Whether stop sequences and sampling overrides were honored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_config_echoed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_turn_ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_present: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_preserved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_present: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_roundtrip_ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_roundtrip_ok: Option<bool>,
    /// Whether the transport actually ran the tamper phase of a round-trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roundtrip_step3_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tamper_rejected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentions_amazon_bedrock: Option<bool>,
    /// Visible assistant text, scanned for relay fingerprints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text_excerpt: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Signals {
    /// Lenient decode from whatever the transport handed over. A shape that
    /// does not fit yields the all-null record instead of an error, so a
    /// hostile or broken upstream can never panic the evaluator.
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }
}
