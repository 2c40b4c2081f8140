use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Deterministic fingerprint of an outgoing request envelope, shown next to
/// each step so an operator can confirm what actually left the machine.
///
/// `serde_json::Value` objects keep sorted keys, so serializing the envelope
/// is already canonical and the hash is stable across reruns of the same
/// request shape.
pub fn envelope_fingerprint(envelope: &serde_json::Value) -> String {
    sha256_hex(&envelope.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_across_key_order() {
        let a = json!({"body": {"model": "m", "stream": true}, "headers": {}});
        let b = json!({"headers": {}, "body": {"stream": true, "model": "m"}});
        assert_eq!(envelope_fingerprint(&a), envelope_fingerprint(&b));
    }

    #[test]
    fn differs_on_content() {
        let a = json!({"body": {"model": "m1"}});
        let b = json!({"body": {"model": "m2"}});
        assert_ne!(envelope_fingerprint(&a), envelope_fingerprint(&b));
        assert_eq!(envelope_fingerprint(&a).len(), 64);
    }
}
