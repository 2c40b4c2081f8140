use std::collections::BTreeMap;

use crate::model::{CheckKey, CheckResult, Grade, GradeLevel};

/// Grade for a single evaluated step.
///
/// Risk findings dominate everything: a relay fingerprint or an accepted
/// tampered signature is `D` no matter how strong the rest looks. Positive
/// evidence is then picked strongest-first, and steps that prove nothing
/// about authenticity fall back to a bare protocol pass/fail grade.
pub fn step_grade(
    checks: &BTreeMap<CheckKey, CheckResult>,
    overall_pass: Option<bool>,
) -> Option<Grade> {
    let ok = |key: CheckKey| checks.get(&key).and_then(|c| c.ok);

    if ok(CheckKey::ReverseProxy) == Some(false) {
        return Some(Grade::risk_relay());
    }
    if ok(CheckKey::SignatureTamper) == Some(false) {
        return Some(Grade::risk_tamper());
    }

    if ok(CheckKey::CrossProviderRoundtrip) == Some(true) {
        return Some(Grade::evidence_a());
    }
    if ok(CheckKey::SignatureRoundtrip) == Some(true) {
        // Surviving the tamper phase upgrades a same-provider round-trip.
        if ok(CheckKey::SignatureTamper) == Some(true) {
            return Some(Grade::evidence_a());
        }
        return Some(Grade::evidence_b());
    }
    if ok(CheckKey::Signature) == Some(true) {
        return Some(Grade::evidence_b());
    }
    if ok(CheckKey::ThinkingOutput) == Some(true) {
        return Some(Grade::evidence_c());
    }

    match overall_pass {
        Some(true) => Some(Grade::pass()),
        Some(false) => Some(Grade::fail()),
        None => None,
    }
}

/// Suite-level evidence grade from the per-step grades.
///
/// Protocol grades (bare 通过/未通过) are not evidence and are skipped. Among
/// the rest any `D` wins outright; otherwise the strongest positive level
/// (`A` > `B` > `C`) is returned. No evidence grades at all yields `None`.
pub fn pick_evidence_grade<'a, I>(grades: I) -> Option<Grade>
where
    I: IntoIterator<Item = &'a Grade>,
{
    let evidence: Vec<&Grade> = grades.into_iter().filter(|g| !g.is_protocol()).collect();
    for level in [GradeLevel::D, GradeLevel::A, GradeLevel::B, GradeLevel::C] {
        if let Some(g) = evidence.iter().find(|g| g.level == level) {
            return Some((*g).clone());
        }
    }
    None
}
