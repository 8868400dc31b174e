//! Level 3: rounded content checksums compared with the last recorded baseline.

use serde_json::json;

use super::CheckContext;
use crate::domain::evidence::{CheckResult, CheckStatus};

pub fn run(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let places = ctx.config.rounding_places;
    ctx.datasets
        .iter()
        .map(|ds| {
            let check = format!("integrity.checksum.{}", ds.name);
            let Some(checksum) = ctx.checksums.get(&ds.name) else {
                return CheckResult::fail(check, "checksum could not be computed");
            };
            let prior = ctx.baselines.get(&ds.name);
            let prior_checksum = prior.and_then(|b| b.checksum.as_deref());
            let result = match (prior, prior_checksum) {
                (_, None) => CheckResult::pass(check, "no prior checksum; baseline established"),
                (_, Some(p)) if p == checksum.as_str() => {
                    CheckResult::pass(check, "checksum matches prior run")
                }
                (recorded, Some(_)) => {
                    let status = ctx.config.drift.checksum.status();
                    let since = recorded.map(|r| r.run_id.as_str()).unwrap_or("unknown");
                    let detail = format!("checksum changed since run {since}");
                    match status {
                        CheckStatus::Pass => CheckResult::pass(check, format!("{detail} (ignored)")),
                        CheckStatus::Warn => CheckResult::warn(check, detail),
                        CheckStatus::Fail => CheckResult::fail(check, detail),
                    }
                }
            };
            result
                .with_attachment("checksum", json!(checksum))
                .with_attachment("prior_checksum", json!(prior_checksum))
                .with_attachment("rounding_places", json!(places))
        })
        .collect()
}
