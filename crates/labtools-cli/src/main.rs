//! LabTools - governed lab runs from the command line
//!
//! The `lab` command wires the governance engine together for a single job.
//!
//! ## Commands
//!
//! - `run`: open a run, enforce, diagnose, validate, report and finalize
//! - `scan`: check source files against the throwaway-code rules
//! - `manifest`: build dataset manifests or diff two of them
//! - `discover`: list the validation scripts a run would execute
//! - `check-env`: verify this process is a managed child of a run

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use labtools_core::manifest::FingerprintOptions;
use labtools_core::obs::RunSpan;
use labtools_core::reporter::outcome::EXIT_ERROR;
use labtools_core::reporter::write_report;
use labtools_core::{
    diff_manifests, init_tracing, resolve_code_version, verify_run_environment, ArtifactRecord,
    BuildReport, BuildReporter, Dataset, DatasetHandle, DiagnosticsEngine, EnforcementPolicy,
    EnforcerError, ExecutionEnforcer, ExitOutcome, FsManifestStore, GovernanceConfig, LabError,
    Manifest, ManifestStore, MemoryAuditSink, MemoryManifestStore, RunContext, RunOptions, Tier,
    ValidationResult, ValidationStatus, DEFAULT_CONFIG_FILE, METRICS,
};
use labtools_validate::ValidationRunner;

#[derive(Parser)]
#[command(name = "lab")]
#[command(author = "LabTools Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Governed, audited lab runs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Governance configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full governance pipeline for one job
    Run(RunArgs),

    /// Scan source files for throwaway code
    Scan {
        /// Files to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Build or compare dataset manifests
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },

    /// List validation scripts under the configured root
    Discover {
        /// Validation root (default: `[validation].root`)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Report run variables missing from this process
    CheckEnv,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Project the run belongs to
    #[arg(short, long)]
    project: String,

    /// Lab environment (default: `[run].environment`)
    #[arg(short, long, env = "LAB_ENV")]
    env: Option<String>,

    /// Governance ruleset id
    #[arg(short, long, default_value = "default")]
    ruleset: String,

    /// Diagnostics level 0-9 (default: `[run].default_level`)
    #[arg(short, long)]
    level: Option<u8>,

    /// Dataset JSON files to diagnose
    #[arg(short, long = "dataset")]
    datasets: Vec<PathBuf>,

    /// Baseline manifest to diff the datasets against
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Source files to scan before diagnostics
    #[arg(long = "scan")]
    scan: Vec<PathBuf>,

    /// Only run these validation tiers
    #[arg(long = "tier", value_parser = parse_tier)]
    tiers: Vec<Tier>,

    /// Approve the report as this reviewer when the gate is ready
    #[arg(long)]
    approve_as: Option<String>,

    /// Where the build report is written (default: `<log_dir>/<run_id>`)
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Code version to record (default: git HEAD)
    #[arg(long)]
    code_version: Option<String>,

    /// Id of the run this one retries
    #[arg(long)]
    retry_of: Option<String>,
}

#[derive(Subcommand)]
enum ManifestAction {
    /// Print the manifest of one or more datasets
    Build {
        #[arg(required = true)]
        datasets: Vec<PathBuf>,

        /// Write the manifest here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare two manifests
    Diff { baseline: PathBuf, current: PathBuf },
}

fn parse_tier(s: &str) -> std::result::Result<Tier, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let code = match dispatch(cli).await {
        Ok(outcome) => outcome.code(),
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    };
    METRICS.flush();
    ExitCode::from(code as u8)
}

async fn dispatch(cli: Cli) -> Result<ExitOutcome> {
    let config = GovernanceConfig::load_or_default(&cli.config)
        .map_err(LabError::from)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Run(args) => cmd_run(&config, args).await,
        Commands::Scan { paths } => cmd_scan(&config, &paths),
        Commands::Manifest { action } => match action {
            ManifestAction::Build { datasets, output } => {
                cmd_manifest_build(&config, &datasets, output.as_deref())
            }
            ManifestAction::Diff { baseline, current } => cmd_manifest_diff(&baseline, &current),
        },
        Commands::Discover { root } => cmd_discover(&config, root),
        Commands::CheckEnv => cmd_check_env(),
    }
}

/// Governance errors keep their dedicated code; everything else exits 1.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(lab) = err.downcast_ref::<LabError>() {
        return ExitOutcome::code_for_error(lab);
    }
    EXIT_ERROR
}

fn open_run(config: &GovernanceConfig, args: &RunArgs) -> Result<RunContext> {
    let environment = config.environment(args.env.as_deref()).map_err(LabError::from)?;
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let mut options = config
        .run_options(args.level)
        .map_err(LabError::from)?
        .with_code_version(resolve_code_version(args.code_version.as_deref(), &cwd));
    if let Some(prior) = &args.retry_of {
        options = options.retry_of(prior.clone());
    }
    let run = RunContext::open(&args.project, environment.as_str(), &args.ruleset, options)
        .map_err(LabError::from)?;
    Ok(run)
}

/// Run the whole pipeline, finalizing the run whatever happens in between.
async fn cmd_run(config: &GovernanceConfig, args: RunArgs) -> Result<ExitOutcome> {
    let run = open_run(config, &args)?;
    let _span = RunSpan::enter(run.run_id());
    println!("Run ID: {}", run.run_id());

    let outcome = match ExecutionEnforcer::global().attach(&run, config.enforcement.clone()) {
        Ok(handle) => {
            let outcome = pipeline(config, &args, &run).await;
            handle.detach();
            outcome
        }
        Err(e) => Err(LabError::from(e).into()),
    };

    match run.finalize() {
        Ok(summary) => {
            println!(
                "Run {} closed at stage {} ({} ms)",
                summary.run_id, summary.stage, summary.duration_ms
            );
        }
        Err(e) => {
            // The pipeline error, if any, is the more useful one to surface.
            if outcome.is_ok() {
                return Err(LabError::from(e)).context("failed to finalize run");
            }
            warn!(error = %e, "failed to finalize run");
        }
    }
    outcome
}

async fn pipeline(config: &GovernanceConfig, args: &RunArgs, run: &RunContext) -> Result<ExitOutcome> {
    scan_sources(&args.scan)?;

    let datasets = load_datasets(&args.datasets)?;
    let store = manifest_store(config)?;
    let level = args.level.unwrap_or_else(|| run.info().diag_level.value());
    let evidence = DiagnosticsEngine::new(config.diagnostics.clone(), store)
        .with_rulesets(config.rulesets.clone())
        .run(run, level, &datasets)
        .await
        .map_err(LabError::from)?;
    println!(
        "Diagnostics: level {} -> {} ({} checks)",
        level,
        evidence.status,
        evidence.checks.len()
    );

    let results = validate(config, args, run).await?;

    let diff = match &args.baseline {
        Some(path) => {
            let baseline = read_manifest(path)?;
            let options = fingerprint_options(config);
            let current = Manifest::from_datasets(&datasets, &options).map_err(LabError::from)?;
            Some(diff_manifests(&baseline, &current))
        }
        None => None,
    };

    let reporter = BuildReporter::new(config.report.clone());
    let mut report = reporter
        .compose(run, evidence, results, diff)
        .map_err(LabError::from)?;

    if let Some(reviewer) = &args.approve_as {
        match reporter.approve(run, &mut report, reviewer) {
            Ok(()) => println!("Approved by {reviewer}"),
            Err(e) => println!("Approval refused: {e}"),
        }
    }

    let dir = args
        .report_dir
        .clone()
        .unwrap_or_else(|| config.run.log_dir.join(run.run_id()));
    let (md, json) = write_report(&dir, &report)?;
    for (path, step) in [(&md, "report.markdown"), (&json, "report.json")] {
        let record = ArtifactRecord::from_file(path, step)
            .with_context(|| format!("failed to fingerprint {}", path.display()))?;
        run.register_artifact(record).map_err(LabError::from)?;
    }
    print_report(&report, &md);
    Ok(report.outcome())
}

/// Scan each file; blocked findings are already on the run's audit log.
fn scan_sources(paths: &[PathBuf]) -> Result<()> {
    let Some(handle) = ExecutionEnforcer::global().current() else {
        return Ok(());
    };
    for path in paths {
        match handle.scan_file(path) {
            Ok(matches) => {
                for m in matches {
                    info!(file = %path.display(), rule = %m.rule_id, line = ?m.line, "throwaway pattern");
                }
            }
            Err(EnforcerError::Violation(violation)) => {
                println!("Blocked {}: {}", path.display(), violation);
            }
            Err(e) => {
                return Err(LabError::from(e))
                    .with_context(|| format!("failed to scan {}", path.display()))
            }
        }
    }
    Ok(())
}

async fn validate(
    config: &GovernanceConfig,
    args: &RunArgs,
    run: &RunContext,
) -> Result<Vec<ValidationResult>> {
    let runner = ValidationRunner::new(config.validation.clone());
    let tiers = (!args.tiers.is_empty()).then_some(args.tiers.as_slice());
    let results = if runner.config().root.is_dir() {
        runner.validate(run, tiers).await
    } else {
        warn!(root = %runner.config().root.display(), "no validation root; nothing to run");
        runner.execute(run, Vec::new(), tiers).await
    };
    let results = results.context("validation failed to run")?;

    for result in &results {
        let marker = match result.status {
            ValidationStatus::Pass => "ok",
            ValidationStatus::Fail => "FAIL",
            ValidationStatus::Timeout => "TIMEOUT",
            ValidationStatus::Error => "ERROR",
            ValidationStatus::Cancelled => "CANCELLED",
        };
        println!("  [{marker}] {} ({} ms)", result.script_id, result.duration_ms);
    }
    Ok(results)
}

fn load_datasets(paths: &[PathBuf]) -> Result<Vec<DatasetHandle>> {
    paths
        .iter()
        .map(|path| {
            Dataset::load_json(path)
                .map(Dataset::into_handle)
                .map_err(LabError::from)
                .with_context(|| format!("failed to load dataset {}", path.display()))
        })
        .collect()
}

fn manifest_store(config: &GovernanceConfig) -> Result<Arc<dyn ManifestStore>> {
    Ok(match &config.diagnostics.store_dir {
        Some(dir) => Arc::new(FsManifestStore::new(dir).map_err(LabError::from)?),
        None => Arc::new(MemoryManifestStore::new()),
    })
}

fn fingerprint_options(config: &GovernanceConfig) -> FingerprintOptions {
    FingerprintOptions::default().dropping(config.diagnostics.drop_columns.iter().cloned())
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse manifest {}", path.display()))
}

fn print_report(report: &BuildReport, markdown: &Path) {
    println!();
    println!("Report: {}", markdown.display());
    println!("Digest: {}", report.digest());
    if report.gate_ready() {
        println!("Gate: ready for approval");
    } else {
        println!("Gate: not ready");
        for blocker in report.gate_blockers() {
            println!("  - {blocker}");
        }
    }
}

/// Scans run under a short-lived audit run so findings are still recorded.
fn cmd_scan(config: &GovernanceConfig, paths: &[PathBuf]) -> Result<ExitOutcome> {
    let run = RunContext::open(
        "scan",
        "dev",
        "default",
        RunOptions::default()
            .with_sink(Arc::new(MemoryAuditSink::new()))
            .without_env_export()
            .with_code_version("scan"),
    )
    .map_err(LabError::from)?;
    let handle = ExecutionEnforcer::new()
        .attach(&run, scan_policy(&config.enforcement))
        .map_err(LabError::from)?;

    let mut blocked = false;
    for path in paths {
        let matches = match handle.scan_file(path) {
            Ok(matches) => matches,
            Err(EnforcerError::Violation(violation)) => {
                blocked = true;
                violation.matches
            }
            Err(e) => {
                return Err(LabError::from(e))
                    .with_context(|| format!("failed to scan {}", path.display()))
            }
        };
        for m in matches {
            let line = m.line.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
            println!(
                "{}:{}: [{:?}] {} {}",
                path.display(),
                line,
                m.severity,
                m.rule_id,
                m.excerpt.trim()
            );
        }
    }
    handle.detach();
    run.finalize().map_err(LabError::from)?;

    Ok(if blocked {
        ExitOutcome::PolicyViolation
    } else {
        ExitOutcome::Success
    })
}

/// A standalone scan never cancels anything.
fn scan_policy(policy: &EnforcementPolicy) -> EnforcementPolicy {
    EnforcementPolicy {
        fatal: false,
        ..policy.clone()
    }
}

fn cmd_manifest_build(
    config: &GovernanceConfig,
    paths: &[PathBuf],
    output: Option<&Path>,
) -> Result<ExitOutcome> {
    let datasets = load_datasets(paths)?;
    let manifest = Manifest::from_datasets(&datasets, &fingerprint_options(config))
        .map_err(LabError::from)?;
    let json = serde_json::to_string_pretty(&manifest)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
            println!("Manifest for {} dataset(s) written to {}", manifest.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(ExitOutcome::Success)
}

fn cmd_manifest_diff(baseline: &Path, current: &Path) -> Result<ExitOutcome> {
    let diff = diff_manifests(&read_manifest(baseline)?, &read_manifest(current)?);
    if !diff.has_drift() {
        println!("Manifests are identical.");
        return Ok(ExitOutcome::Success);
    }
    for name in &diff.added_datasets {
        println!("  + {name}");
    }
    for name in &diff.removed_datasets {
        println!("  - {name}");
    }
    for (name, drift) in &diff.drifts {
        if drift.is_clean() {
            continue;
        }
        println!("  ~ {name}");
        for column in &drift.added_columns {
            println!("      + column {column}");
        }
        for column in &drift.removed_columns {
            println!("      - column {column}");
        }
        for change in &drift.type_changes {
            println!("      ~ column {} ({:?} -> {:?})", change.column, change.from, change.to);
        }
        if drift.row_count_delta != 0 {
            println!("      rows {:+}", drift.row_count_delta);
        }
        if drift.fingerprint_changed {
            println!("      content changed");
        }
    }
    Ok(ExitOutcome::Success)
}

fn cmd_discover(config: &GovernanceConfig, root: Option<PathBuf>) -> Result<ExitOutcome> {
    let mut validation = config.validation.clone();
    if let Some(root) = root {
        validation.root = root;
    }
    let runner = ValidationRunner::new(validation);
    let mut count = 0;
    for script in runner.discover()? {
        let script = script?;
        println!("{:<12} {}", script.tier.as_str(), script.script_id);
        count += 1;
    }
    println!("{count} script(s)");
    Ok(ExitOutcome::Success)
}

fn cmd_check_env() -> Result<ExitOutcome> {
    let missing = verify_run_environment();
    if missing.is_empty() {
        println!("Run environment complete.");
        return Ok(ExitOutcome::Success);
    }
    anyhow::bail!("missing run variables: {}", missing.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use labtools_core::ReportError;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "lab", "run", "--project", "churn", "--env", "lab", "--level", "3", "--dataset",
            "scores.json", "--tier", "unit", "--tier", "governance",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.project, "churn");
                assert_eq!(args.level, Some(3));
                assert_eq!(args.tiers, vec![Tier::Unit, Tier::Governance]);
                assert_eq!(args.ruleset, "default");
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_unknown_tier_rejected() {
        assert!(Cli::try_parse_from(["lab", "run", "-p", "x", "--tier", "smoke"]).is_err());
    }

    #[test]
    fn test_exit_code_for_gate_error() {
        let err = anyhow::Error::from(LabError::from(ReportError::GateNotReady {
            reasons: vec!["tier unit: FAIL".to_string()],
        }))
        .context("compose failed");
        assert_eq!(exit_code_for(&err), 4);
        assert_eq!(exit_code_for(&anyhow::anyhow!("disk full")), EXIT_ERROR);
    }
}
