//! Level 0: the run itself is recorded.

use serde_json::json;

use super::CheckContext;
use crate::domain::evidence::CheckResult;

pub fn run(ctx: &CheckContext, _prior: &[CheckResult]) -> Vec<CheckResult> {
    let run = &ctx.run;
    vec![CheckResult::pass(
        "logging.run_recorded",
        format!("run {} recorded at level {}", run.run_id, ctx.level),
    )
    .with_attachment(
        "run",
        json!({
            "run_id": run.run_id,
            "project": run.project,
            "environment": run.environment,
            "ruleset": run.ruleset,
            "code_version": run.code_version,
            "requested_level": ctx.level,
        }),
    )]
}
