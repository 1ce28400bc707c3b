//! Stratoform CLI entrypoint.
//!
//! This is the main entrypoint for the stratoform command-line tool.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use stratoform::autoscale::{AutoscaleController, ControllerConfig};
use stratoform::cli::{Cli, Commands, OutputFormatter, StateCommands};
use stratoform::config::{find_config_file, ConfigParser, ConfigValidator, DeployConfig};
use stratoform::error::Result;
use stratoform::lb::HttpHealthSource;
use stratoform::metrics::HttpMetricSource;
use stratoform::provider::MemoryProvider;
use stratoform::reconciler::Reconciler;
use stratoform::state::{generate_holder_id, LocalStateStore, StateStore, TierState};

use clap::Parser;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Exit code for partial apply failures.
const EXIT_PARTIAL_FAILURE: u8 = 2;

/// Exit code for fatal configuration errors (cycles, invalid references).
const EXIT_CONFIG_ERROR: u8 = 3;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_config_error() {
                ExitCode::from(EXIT_CONFIG_ERROR)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply { yes, parallel } => {
            cmd_apply(cli.config.as_ref(), yes, parallel, &formatter).await
        }
        Commands::Status { detailed } => cmd_status(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Drift => cmd_drift(cli.config.as_ref(), &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(cli.config.as_ref(), yes, &formatter).await,
        Commands::Watch {
            metrics_url,
            health_url,
        } => cmd_watch(cli.config.as_ref(), &metrics_url, &health_url).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Loads and validates configuration.
fn load_config(config_path: Option<&PathBuf>) -> Result<DeployConfig> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => find_config_file(std::env::current_dir()?)?,
    };

    let parser = ConfigParser::new()
        .with_base_path(path.parent().unwrap_or_else(|| std::path::Path::new(".")));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&path)?;

    let validator = ConfigValidator::new();
    validator.validate(&config)?;

    Ok(config)
}

/// Opens the state store configured for the deployment.
fn open_store(config: &DeployConfig) -> Result<LocalStateStore> {
    match &config.state.path {
        Some(path) => Ok(LocalStateStore::with_state_path(path.clone())),
        None => LocalStateStore::new(),
    }
}

/// Loads recorded state, or starts fresh.
async fn load_state(store: &LocalStateStore, config: &DeployConfig) -> Result<TierState> {
    Ok(store.load().await?.unwrap_or_else(|| {
        TierState::new(&config.project.name, &config.project.environment)
    }))
}

/// Builds the reconciler stack around the in-memory provider.
///
/// Real cloud backends plug in through the `CloudProvider` trait; the
/// shipped binary runs against the in-memory implementation.
fn build_reconciler(
    config: DeployConfig,
    state: TierState,
) -> (Arc<Reconciler<MemoryProvider>>, Arc<RwLock<TierState>>) {
    let provider = Arc::new(MemoryProvider::new());
    let state = Arc::new(RwLock::new(state));
    let reconciler = Arc::new(Reconciler::new(config, provider, Arc::clone(&state)));
    (reconciler, state)
}

/// Asks for confirmation on stdin.
fn confirm(prompt: &str) -> bool {
    print!("{prompt} (y/N): ");
    let _ = std::io::stdout().flush();

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }

    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Wires Ctrl-C to a cancellation channel.
fn cancellation_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling between plan items");
            let _ = tx.send(true);
        }
    });
    rx
}

/// `init` command: writes a starter configuration.
fn cmd_init(path: &std::path::Path, force: bool) -> Result<ExitCode> {
    let config_path = path.join("stratoform.deploy.yaml");

    if config_path.exists() && !force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
        return Ok(ExitCode::FAILURE);
    }

    std::fs::create_dir_all(path)?;
    std::fs::write(&config_path, CONFIG_TEMPLATE)?;
    println!("Created {}", config_path.display());

    Ok(ExitCode::SUCCESS)
}

/// `validate` command.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => find_config_file(std::env::current_dir()?)?,
    };

    let parser = ConfigParser::new();
    let config = parser.load_with_env(&path)?;

    let validator = ConfigValidator::new();
    match validator.validate(&config) {
        Ok(result) => {
            print!("{}", formatter.format_validation(&result, warnings));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(ExitCode::from(EXIT_CONFIG_ERROR))
        }
    }
}

/// `plan` command.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let state = load_state(&store, &config).await?;

    let (reconciler, _state) = build_reconciler(config, state);
    let (_diff, plan) = reconciler.plan().await?;

    print!("{}", formatter.format_plan(&plan, detailed));

    Ok(ExitCode::SUCCESS)
}

/// `apply` command.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    yes: bool,
    parallel: usize,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let state = load_state(&store, &config).await?;

    let provider = Arc::new(MemoryProvider::new());
    let shared_state = Arc::new(RwLock::new(state));
    let reconciler = Reconciler::new(config, provider, Arc::clone(&shared_state))
        .with_max_parallel(parallel);

    let (_diff, plan) = reconciler.plan().await?;
    print!("{}", formatter.format_plan(&plan, false));

    if plan.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    if !yes && !confirm("Apply these changes?") {
        println!("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let lock = store.acquire_lock(&generate_holder_id()).await?;
    let result = reconciler.apply(Some(cancellation_signal())).await;

    // Persist whatever completed, even on failure.
    let snapshot = shared_state.read().await.clone();
    if let Err(e) = store.save(&snapshot).await {
        error!("Failed to save state: {e}");
    }
    store.release_lock(&lock.lock_id).await?;

    let result = result?;
    print!("{}", formatter.format_result(&result));

    if result.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    }
}

/// `status` command.
async fn cmd_status(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let state = load_state(&store, &config).await?;

    print!("{}", formatter.format_state(&state, detailed));

    Ok(ExitCode::SUCCESS)
}

/// `drift` command.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let state = load_state(&store, &config).await?;

    let (reconciler, _state) = build_reconciler(config, state);
    let report = reconciler.check_drift().await?;

    print!("{}", formatter.format_drift(&report));

    Ok(ExitCode::SUCCESS)
}

/// `destroy` command.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    yes: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let state = load_state(&store, &config).await?;

    if state.resources.is_empty() {
        println!("Nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    if !yes
        && !confirm(&format!(
            "Destroy all {} recorded resources?",
            state.resources.len()
        ))
    {
        println!("Destroy cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let provider = Arc::new(MemoryProvider::new());
    let shared_state = Arc::new(RwLock::new(state));
    let reconciler = Reconciler::new(config, provider, Arc::clone(&shared_state));

    let lock = store.acquire_lock(&generate_holder_id()).await?;
    let result = reconciler.destroy(Some(cancellation_signal())).await;

    let snapshot = shared_state.read().await.clone();
    if let Err(e) = store.save(&snapshot).await {
        error!("Failed to save state: {e}");
    }
    store.release_lock(&lock.lock_id).await?;

    let result = result?;
    print!("{}", formatter.format_result(&result));

    if result.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    }
}

/// `watch` command: runs one autoscaling controller per policy-bearing
/// scaling group until interrupted.
async fn cmd_watch(
    config_path: Option<&PathBuf>,
    metrics_url: &str,
    health_url: &str,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let state = load_state(&store, &config).await?;

    let controller_configs: Vec<ControllerConfig> = config
        .scaling_groups
        .iter()
        .filter_map(ControllerConfig::from_group)
        .collect();

    if controller_configs.is_empty() {
        println!("No scaling group carries a scaling policy; nothing to watch.");
        return Ok(ExitCode::SUCCESS);
    }

    let (reconciler, shared_state) = build_reconciler(config, state);
    let metrics = Arc::new(HttpMetricSource::new(metrics_url)?);
    let health = Arc::new(HttpHealthSource::new(health_url)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    for controller_config in controller_configs {
        debug!("Starting controller for '{}'", controller_config.group);
        let controller = AutoscaleController::new(
            controller_config,
            Arc::clone(&reconciler),
            Arc::clone(&metrics),
            Arc::clone(&health),
        );
        handles.push(tokio::spawn(controller.run(shutdown_rx.clone())));
    }

    info!("Watching {} scaling group(s); Ctrl-C to stop", handles.len());
    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }

    // Capacity changes mutate state; persist them on the way out.
    let snapshot = shared_state.read().await.clone();
    store.save(&snapshot).await?;

    Ok(ExitCode::SUCCESS)
}

/// `state` subcommands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    match command {
        StateCommands::Show => {
            let state = load_state(&store, &config).await?;
            print!("{}", formatter.format_state(&state, false));
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            println!("Acquired lock {} for {}", lock.lock_id, lock.holder);
        }
        StateCommands::Unlock { lock_id, force } => match (lock_id, force) {
            (Some(lock_id), _) => {
                store.release_lock(&lock_id).await?;
                println!("Released lock {lock_id}");
            }
            (None, true) => {
                if let Some(info) = store.get_lock_info().await? {
                    store.release_lock(&info.lock_id).await?;
                    println!("Force-released lock {} held by {}", info.lock_id, info.holder);
                } else {
                    println!("State is not locked.");
                }
            }
            (None, false) => {
                eprintln!("Provide --lock-id, or --force to release whatever lock is held.");
                return Ok(ExitCode::FAILURE);
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

/// Starter configuration written by `stratoform init`.
const CONFIG_TEMPLATE: &str = r#"project:
  name: web-tier
  environment: dev

images:
  - name: web-image
    family: "al2023-ami-*"

security_groups:
  - name: lb-sg
    description: balancer ingress
    network: vpc-main
    ingress:
      - from_port: 443
        to_port: 443
        cidr: "0.0.0.0/0"
  - name: web-sg
    description: web tier, balancer traffic only
    network: vpc-main
    ingress:
      - from_port: 8080
        to_port: 8080
        source_group: "${resource.lb-sg.id}"

launch_templates:
  - name: web-lt
    image: "${resource.web-image.id}"
    instance_type: m6i.large
    security_groups: ["${resource.web-sg.id}"]

load_balancers:
  - name: web-lb
    subnets: [subnet-a, subnet-b]
    security_groups: ["${resource.lb-sg.id}"]

target_groups:
  - name: web-tg
    port: 8080
    network: vpc-main
    load_balancer: "${resource.web-lb.id}"
    health_check:
      path: /healthz

scaling_groups:
  - name: web-asg
    launch_template: "${resource.web-lt.id}"
    target_group: "${resource.web-tg.id}"
    min_size: 2
    max_size: 10
    desired_capacity: 2
    subnets: [subnet-a, subnet-b]
    scaling:
      metric: cpu_utilization
      target_value: 60.0
"#;
