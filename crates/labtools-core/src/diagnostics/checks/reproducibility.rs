//! Level 7: inputs are frozen and the run's provenance is complete.

use std::collections::BTreeMap;

use serde_json::json;

use super::CheckContext;
use crate::domain::evidence::CheckResult;
use crate::git::UNKNOWN_VERSION;
use crate::manifest::{fingerprint_with, FingerprintOptions};

pub fn run(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let options = FingerprintOptions {
        drop_columns: ctx.config.drop_columns.clone(),
        round_places: None,
    };

    let mut drifted = Vec::new();
    let mut inputs = BTreeMap::new();
    for ds in &ctx.datasets {
        let recorded = ctx.manifests.get(&ds.name).map(|m| m.fingerprint.clone());
        match fingerprint_with(ds, &options) {
            Ok(now) => {
                if recorded.as_deref() != Some(now.as_str()) {
                    drifted.push(ds.name.clone());
                }
                inputs.insert(ds.name.clone(), now);
            }
            Err(e) => drifted.push(format!("{} ({e})", ds.name)),
        }
    }
    let frozen = if drifted.is_empty() {
        CheckResult::pass(
            "repro.frozen_inputs",
            format!("{} input(s) unchanged since diagnostics began", inputs.len()),
        )
    } else {
        CheckResult::fail(
            "repro.frozen_inputs",
            format!("input(s) changed during the run: {}", drifted.join(", ")),
        )
    };

    let run = &ctx.run;
    let provenance = json!({
        "run_id": run.run_id,
        "code_version": run.code_version,
        "ruleset": run.ruleset,
        "inputs": inputs,
        "outputs": run
            .artifacts
            .iter()
            .map(|a| json!({ "path": a.path, "fingerprint": a.fingerprint, "step": a.step }))
            .collect::<Vec<_>>(),
    });
    let lineage = if run.code_version == UNKNOWN_VERSION {
        CheckResult::warn(
            "repro.provenance",
            "code version unknown; outputs cannot be tied to source",
        )
    } else {
        CheckResult::pass(
            "repro.provenance",
            format!(
                "{} input(s) and {} output(s) linked to {}",
                inputs.len(),
                run.artifacts.len(),
                run.code_version
            ),
        )
    };

    vec![
        frozen.with_attachment("inputs", json!(inputs)),
        lineage.with_attachment("provenance", provenance),
    ]
}
