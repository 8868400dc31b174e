//! Level 9: timing profile and the sealed evidence package.

use std::collections::BTreeMap;

use serde_json::json;

use super::CheckContext;
use crate::diagnostics::package::EvidencePackage;
use crate::domain::error::DigestError;
use crate::domain::evidence::CheckResult;

pub fn timing(_ctx: &CheckContext, prior: &[CheckResult]) -> Vec<CheckResult> {
    let total: u64 = prior.iter().map(|c| c.duration_ms).sum();
    let mut by_level: BTreeMap<u8, u64> = BTreeMap::new();
    for c in prior {
        *by_level.entry(c.level).or_default() += c.duration_ms;
    }
    let mut slowest: Vec<&CheckResult> = prior.iter().collect();
    slowest.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms).then_with(|| a.name.cmp(&b.name)));
    let slowest: Vec<_> = slowest
        .iter()
        .take(5)
        .map(|c| json!({ "name": c.name, "duration_ms": c.duration_ms, "attempts": c.attempts }))
        .collect();
    let retried = prior.iter().filter(|c| c.attempts > 1).count();

    vec![CheckResult::pass(
        "audit.timing",
        format!("{} check(s) in {total} ms, {retried} retried", prior.len()),
    )
    .with_attachment(
        "profile",
        json!({
            "total_ms": total,
            "by_level": by_level,
            "slowest": slowest,
            "retried": retried,
        }),
    )]
}

fn seal(ctx: &CheckContext, prior: &[CheckResult]) -> Result<(EvidencePackage, serde_json::Value), DigestError> {
    let run = &ctx.run;
    let inputs = ctx
        .manifests
        .iter()
        .map(|(name, m)| (name.clone(), m.fingerprint.clone()))
        .collect();
    let package = EvidencePackage::seal(
        &run.run_id,
        &run.project,
        &run.ruleset,
        &run.code_version,
        ctx.level.value(),
        inputs,
        prior.to_vec(),
    )?;
    let value = serde_json::to_value(&package)?;
    Ok((package, value))
}

pub fn package(ctx: &CheckContext, prior: &[CheckResult]) -> Vec<CheckResult> {
    match seal(ctx, prior) {
        Ok((package, value)) => vec![CheckResult::pass(
            "audit.evidence_package",
            format!("package sealed over {} check(s)", package.checks.len()),
        )
        .with_attachment("digest", json!(package.digest))
        .with_attachment("package", value)],
        Err(e) => vec![CheckResult::fail(
            "audit.evidence_package",
            format!("could not seal evidence package: {e}"),
        )],
    }
}
