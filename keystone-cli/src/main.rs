mod file_provider;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use log::warn;
use tokio_util::sync::CancellationToken;

use keystone_core::apply::{ApplyConfig, ApplyEngine, ApplyOutcome, ApplyReport};
use keystone_core::manifest::Manifest;
use keystone_core::output::extract_outputs;
use keystone_core::plan::Plan;
use keystone_core::provider::Provider;
use keystone_core::resource::Value;
use keystone_core::rollback::{RollbackController, RollbackReport};
use keystone_core::state::{Lifecycle, ResourceState, StateSnapshot, StateStore};
use keystone_core::topology::{WebTierConfig, web_tier_manifest};
use keystone_provider_awscc::AwsccProvider;
use keystone_state::{LocalBackend, LockOperation, StateBackend};

use file_provider::FileProvider;

#[derive(Parser)]
#[command(name = "keystone")]
#[command(about = "Dependency-ordered provisioning with rollback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a manifest
    Validate {
        /// Path to the manifest
        #[arg(default_value = "keystone.json")]
        file: PathBuf,
    },
    /// Show the creation order without creating anything
    Plan {
        /// Path to the manifest
        #[arg(default_value = "keystone.json")]
        file: PathBuf,
    },
    /// Create every resource in the manifest, rolling back on failure
    Apply {
        /// Path to the manifest
        #[arg(default_value = "keystone.json")]
        file: PathBuf,

        /// Path to the state file
        #[arg(long, default_value = LocalBackend::DEFAULT_STATE_FILE)]
        state: PathBuf,

        /// Maximum concurrent create calls (1 creates strictly in order)
        #[arg(long, default_value_t = 4)]
        max_concurrency: usize,

        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Tear down everything recorded in the state file
    Destroy {
        /// Path to the state file
        #[arg(long, default_value = LocalBackend::DEFAULT_STATE_FILE)]
        state: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,

        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Remove the state lock left behind by a run that no longer exists
    ForceUnlock {
        /// Lock ID reported by the refused command
        lock_id: String,

        /// Path to the state file
        #[arg(long, default_value = LocalBackend::DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
    /// Print the built-in web tier as a manifest
    Topology {
        /// Prefix for provider-visible names
        #[arg(long, default_value = "keystone")]
        name_prefix: String,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ProviderArgs {
    /// Provider to create resources with
    #[arg(long, value_enum, default_value_t = ProviderKind::File)]
    provider: ProviderKind,

    /// AWS region for the awscc provider
    #[arg(long, default_value = "ap-northeast-1")]
    region: String,

    /// Make the file provider fail to create this resource
    #[arg(long, value_name = "NAME")]
    fail_on: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    /// Local JSON file (.keystone/provider.json)
    File,
    /// AWS Cloud Control API
    Awscc,
}

/// Exit status for a failed run
const EXIT_ERROR: u8 = 1;
const EXIT_ROLLED_BACK: u8 = 2;
const EXIT_ROLLBACK_INCOMPLETE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(&file),
        Commands::Apply {
            file,
            state,
            max_concurrency,
            provider,
        } => run_apply(&file, &state, max_concurrency, &provider).await,
        Commands::Destroy {
            state,
            auto_approve,
            provider,
        } => run_destroy(&state, auto_approve, &provider).await,
        Commands::ForceUnlock { lock_id, state } => run_force_unlock(&lock_id, &state).await,
        Commands::Topology {
            name_prefix,
            output,
        } => run_topology(name_prefix, output.as_deref()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn load_manifest(file: &Path) -> Result<Manifest, String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    Manifest::from_json(&content).map_err(|e| format!("{}: {}", file.display(), e))
}

fn load_plan(file: &Path) -> Result<(Manifest, Plan), String> {
    let manifest = load_manifest(file)?;
    let plan = manifest.plan().map_err(|e| e.to_string())?;
    Ok((manifest, plan))
}

async fn get_provider(args: &ProviderArgs) -> Box<dyn Provider> {
    match args.provider {
        ProviderKind::Awscc => {
            if !args.fail_on.is_empty() {
                warn!("--fail-on only applies to the file provider");
            }
            Box::new(AwsccProvider::new(&args.region).await)
        }
        ProviderKind::File => {
            Box::new(FileProvider::new().failing_on(args.fail_on.iter().cloned()))
        }
    }
}

fn run_validate(file: &Path) -> Result<ExitCode, String> {
    println!("{}", "Validating...".cyan());

    let (_, plan) = load_plan(file)?;

    println!(
        "{}",
        format!("✓ {} resources validated successfully.", plan.len())
            .green()
            .bold()
    );
    for resource in plan.resources() {
        println!("  • {} ({})", resource.name, resource.kind);
    }

    Ok(ExitCode::SUCCESS)
}

fn run_plan(file: &Path) -> Result<ExitCode, String> {
    let (manifest, plan) = load_plan(file)?;
    print_plan(&plan);

    if !manifest.outputs.is_empty() {
        println!();
        println!("{}", "Outputs after apply:".cyan());
        for output in &manifest.outputs {
            println!("  • {}.{}", output.resource, output.attribute);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_plan(plan: &Plan) {
    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for (index, batch) in plan.batches().iter().enumerate() {
        println!("  {}", format!("Batch {}", index + 1).bold());
        for name in batch {
            let kind = plan
                .resource(name)
                .map(|r| r.kind.to_string())
                .unwrap_or_default();
            let targets: Vec<&str> = plan.graph().targets_of(name).into_iter().collect();
            if targets.is_empty() {
                println!("    {} {} ({})", "+".green().bold(), name, kind);
            } else {
                println!(
                    "    {} {} ({}) {}",
                    "+".green().bold(),
                    name,
                    kind,
                    format!("← {}", targets.join(", ")).dimmed()
                );
            }
        }
    }

    println!();
    println!("{}", plan.summary());
}

async fn run_apply(
    file: &Path,
    state_path: &Path,
    max_concurrency: usize,
    provider_args: &ProviderArgs,
) -> Result<ExitCode, String> {
    let (manifest, plan) = load_plan(file)?;
    if max_concurrency == 0 {
        return Err("--max-concurrency must be at least 1".to_string());
    }

    let backend = LocalBackend::with_path(state_path.to_path_buf());
    backend.init().await.map_err(|e| e.to_string())?;
    let lock = backend
        .acquire_lock(LockOperation::Apply)
        .await
        .map_err(|e| e.to_string())?;

    let result = apply_locked(&backend, &manifest, &plan, max_concurrency, provider_args).await;

    if let Err(e) = backend.release_lock(&lock).await {
        warn!("Failed to release state lock: {}", e);
    }
    result
}

async fn apply_locked(
    backend: &LocalBackend,
    manifest: &Manifest,
    plan: &Plan,
    max_concurrency: usize,
    provider_args: &ProviderArgs,
) -> Result<ExitCode, String> {
    let mut state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();

    let live = state.live_resources().count();
    if live > 0 {
        return Err(format!(
            "{} already records {} live resources; run `keystone destroy` first",
            backend.state_path().display(),
            live
        ));
    }

    print_plan(plan);
    println!();

    let provider = get_provider(provider_args).await;
    let engine = ApplyEngine::new(provider).with_config(ApplyConfig { max_concurrency });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, finishing in-flight calls...".yellow());
            on_signal.cancel();
        }
    });

    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let report = engine.apply_with_cancel(plan, &cancel).await;
    print_report(&report);

    state.record(report.snapshot.clone());
    backend
        .write_state(&state)
        .await
        .map_err(|e| format!("Failed to write state: {}", e))?;

    println!();
    let code = match report.outcome() {
        ApplyOutcome::Succeeded => {
            println!(
                "{}",
                format!("Apply complete! {} resources created.", plan.len())
                    .green()
                    .bold()
            );
            let outputs =
                extract_outputs(&report.snapshot, &manifest.outputs).map_err(|e| e.to_string())?;
            if !outputs.is_empty() {
                println!();
                println!("{}", "Outputs:".cyan().bold());
                for output in outputs {
                    println!(
                        "  {}.{} = {}",
                        output.resource,
                        output.attribute,
                        format_value(&output.value)
                    );
                }
            }
            ExitCode::SUCCESS
        }
        ApplyOutcome::RolledBack => {
            let reason = if report.cancelled { "Apply cancelled" } else { "Apply failed" };
            println!(
                "{}",
                format!("{}; all created resources were rolled back.", reason)
                    .yellow()
                    .bold()
            );
            ExitCode::from(EXIT_ROLLED_BACK)
        }
        ApplyOutcome::RollbackIncomplete => {
            println!(
                "{}",
                "Apply failed and rollback is incomplete.".red().bold()
            );
            if let Some(rollback) = &report.rollback {
                print_stuck(rollback);
            }
            ExitCode::from(EXIT_ROLLBACK_INCOMPLETE)
        }
    };

    Ok(code)
}

fn print_report(report: &ApplyReport) {
    for state in ordered_states(&report.snapshot) {
        print_state(state);
    }
    for failure in &report.failures {
        println!("  {} {}", "✗".red(), failure);
    }
    if report.has_internal_error() {
        println!(
            "  {}",
            "The engine stopped on an internal error; this is a bug in keystone.".red()
        );
    }
    if let Some(rollback) = &report.rollback {
        println!();
        println!(
            "{}",
            format!("Rolled back {} resources.", rollback.rolled_back.len()).yellow()
        );
    }
}

/// Settled resources in creation order
fn ordered_states(snapshot: &StateSnapshot) -> Vec<&ResourceState> {
    snapshot
        .creation_order()
        .iter()
        .filter_map(|name| snapshot.get(name))
        .collect()
}

fn print_state(state: &ResourceState) {
    let id = state.provider_id.as_deref().unwrap_or("-");
    match state.lifecycle {
        Lifecycle::Created => println!("  {} {} ({})", "✓".green(), state.name, id),
        Lifecycle::RolledBack => println!("  {} {} ({})", "↺".yellow(), state.name, id),
        Lifecycle::Failed => println!("  {} {} ({})", "✗".red(), state.name, id),
        Lifecycle::Pending | Lifecycle::Creating => {}
    }
}

fn print_stuck(rollback: &RollbackReport) {
    println!("{}", "These resources still exist and need attention:".red());
    for failure in &rollback.failures {
        println!(
            "  {} {} ({}, {}) - {}",
            "✗".red(),
            failure.resource,
            failure.kind,
            failure.provider_id.as_deref().unwrap_or("no identifier"),
            failure.error
        );
    }
}

async fn run_destroy(
    state_path: &Path,
    auto_approve: bool,
    provider_args: &ProviderArgs,
) -> Result<ExitCode, String> {
    let backend = LocalBackend::with_path(state_path.to_path_buf());
    backend.init().await.map_err(|e| e.to_string())?;
    let lock = backend
        .acquire_lock(LockOperation::Destroy)
        .await
        .map_err(|e| e.to_string())?;

    let result = destroy_locked(&backend, auto_approve, provider_args).await;

    if let Err(e) = backend.release_lock(&lock).await {
        warn!("Failed to release state lock: {}", e);
    }
    result
}

async fn destroy_locked(
    backend: &LocalBackend,
    auto_approve: bool,
    provider_args: &ProviderArgs,
) -> Result<ExitCode, String> {
    let Some(mut state) = backend.read_state().await.map_err(|e| e.to_string())? else {
        println!("{}", "No state found. Nothing to destroy.".green());
        return Ok(ExitCode::SUCCESS);
    };

    let snapshot = state.to_snapshot();
    let mut targets: Vec<&ResourceState> = state.live_resources().collect();
    if targets.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return Ok(ExitCode::SUCCESS);
    }
    targets.sort_by_key(|s| std::cmp::Reverse(s.sequence));

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for resource in &targets {
        println!(
            "  {} {} ({}, {})",
            "-".red().bold(),
            resource.name,
            resource.kind,
            resource.provider_id.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("Plan: {} to destroy.", targets.len().to_string().red());
    println!();

    if !auto_approve && !confirm_destroy()? {
        println!();
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let provider = get_provider(provider_args).await;
    let store = StateStore::from_snapshot(snapshot);
    let report = RollbackController::new(&provider).rollback(&store).await;

    let after = store.snapshot();
    for name in &report.rolled_back {
        if let Some(resource) = after.get(name) {
            print_state(resource);
        }
    }
    for failure in &report.failures {
        println!("  {} {} - {}", "✗".red(), failure.resource, failure.error);
    }

    state.record(after);
    backend
        .write_state(&state)
        .await
        .map_err(|e| format!("Failed to write state: {}", e))?;

    println!();
    if report.is_complete() {
        println!(
            "{}",
            format!(
                "Destroy complete! {} resources destroyed.",
                report.rolled_back.len()
            )
            .green()
            .bold()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{}",
            format!(
                "Destroy failed. {} destroyed, {} remaining.",
                report.rolled_back.len(),
                report.failures.len()
            )
            .red()
            .bold()
        );
        print_stuck(&report);
        Ok(ExitCode::from(EXIT_ROLLBACK_INCOMPLETE))
    }
}

fn confirm_destroy() -> Result<bool, String> {
    println!(
        "{}",
        "Do you really want to destroy all resources?"
            .yellow()
            .bold()
    );
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim() == "yes")
}

async fn run_force_unlock(lock_id: &str, state_path: &Path) -> Result<ExitCode, String> {
    let backend = LocalBackend::with_path(state_path.to_path_buf());
    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "{}",
        format!("✓ Removed lock {} from {}", lock_id, state_path.display()).green()
    );
    Ok(ExitCode::SUCCESS)
}

fn run_topology(name_prefix: String, output: Option<&Path>) -> Result<ExitCode, String> {
    let config = WebTierConfig {
        name_prefix,
        ..Default::default()
    };
    let json = web_tier_manifest(&config)
        .to_json()
        .map_err(|e| e.to_string())?;

    match output {
        Some(path) => {
            fs::write(path, json + "\n")
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            println!("{}", format!("✓ Wrote {}", path.display()).green());
        }
        None => println!("{}", json),
    }
    Ok(ExitCode::SUCCESS)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_json().to_string(),
    }
}
