//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use enrichkit_connector::{ConnectorDocument, TemplateEngine};
use enrichkit_core::{Orchestrator, PipelineDefinition, RunObserver, RunSnapshot, RunState, StepStatus, StepTrace};
use enrichkit_plugins::{
    EnvVault, PluginContext, PluginRegistry, SystemResolver, load_connector_dir,
    register_builtin_plugins,
};
use enrichkit_shared::{AppConfig, HttpConfig, RunId, SketchId, init_config, load_config};
use enrichkit_types::TypeCatalog;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// enrichkit: grow an investigation graph one pipeline at a time.
#[derive(Parser)]
#[command(
    name = "enrichkit",
    version,
    about = "Run entity-enrichment pipelines built from plugins and declarative connectors.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a pipeline definition against seed values and print its trace.
    Run {
        /// Pipeline definition file (.json or .yaml).
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Seed value (repeatable).
        #[arg(short, long = "seed", required = true)]
        seeds: Vec<String>,

        /// Sketch to write into (defaults to config).
        #[arg(long)]
        sketch: Option<String>,

        /// Connector directory (defaults to config).
        #[arg(long)]
        connectors: Option<PathBuf>,

        /// Run timeout in seconds; 0 disables it (defaults to config).
        #[arg(long)]
        timeout: Option<u64>,

        /// Hide the progress spinner.
        #[arg(long)]
        quiet: bool,
    },

    /// Inspect registered plugins.
    Plugins {
        #[command(subcommand)]
        action: PluginsAction,
    },

    /// Inspect the entity type catalog.
    Types {
        #[command(subcommand)]
        action: TypesAction,
    },

    /// Connector document tooling.
    Connector {
        #[command(subcommand)]
        action: ConnectorAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum PluginsAction {
    /// List plugins grouped by category.
    List {
        /// Only this category.
        #[arg(long)]
        category: Option<String>,

        /// Only plugins accepting this input type.
        #[arg(long)]
        input_type: Option<String>,

        /// Connector directory (defaults to config).
        #[arg(long)]
        connectors: Option<PathBuf>,
    },
    /// Print a plugin's descriptor and schemas as JSON.
    Describe {
        name: String,

        /// Connector directory (defaults to config).
        #[arg(long)]
        connectors: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub(crate) enum TypesAction {
    /// List known entity types.
    List,
    /// Classify raw strings.
    Detect {
        #[arg(required = true)]
        values: Vec<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConnectorAction {
    /// Validate connector documents without registering them.
    Validate {
        /// Files to check.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays
/// machine-readable.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = [
        "enrichkit",
        "enrichkit_core",
        "enrichkit_plugins",
        "enrichkit_connector",
        "enrichkit_types",
    ]
    .iter()
    .map(|target| format!("{target}={level}"))
    .collect::<Vec<_>>()
    .join(",");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            pipeline,
            seeds,
            sketch,
            connectors,
            timeout,
            quiet,
        } => {
            cmd_run(
                &pipeline,
                seeds,
                sketch.as_deref(),
                connectors.as_deref(),
                timeout,
                quiet,
            )
            .await
        }
        Command::Plugins { action } => match action {
            PluginsAction::List {
                category,
                input_type,
                connectors,
            } => cmd_plugins_list(category.as_deref(), input_type.as_deref(), connectors.as_deref()),
            PluginsAction::Describe { name, connectors } => {
                cmd_plugins_describe(&name, connectors.as_deref())
            }
        },
        Command::Types { action } => match action {
            TypesAction::List => cmd_types_list(),
            TypesAction::Detect { values } => cmd_types_detect(&values),
        },
        Command::Connector { action } => match action {
            ConnectorAction::Validate { paths } => cmd_connector_validate(&paths),
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Registry setup
// ---------------------------------------------------------------------------

struct Runtime {
    config: AppConfig,
    catalog: Arc<TypeCatalog>,
    registry: PluginRegistry,
}

/// Load config, the type catalog, built-in plugins and the connector
/// directory. A missing default connector directory is not an error.
fn load_runtime(connectors: Option<&Path>) -> Result<Runtime> {
    let config = load_config()?;
    let catalog = Arc::new(TypeCatalog::with_builtin_types());
    let mut registry = PluginRegistry::new();
    register_builtin_plugins(&mut registry, Arc::new(SystemResolver));

    let dir = connectors
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.defaults.connectors_dir));
    if dir.is_dir() {
        let engine = TemplateEngine::from_config(&HttpConfig::from(&config))?;
        let report = load_connector_dir(&mut registry, &dir, &catalog, &engine)?;
        for (path, reason) in &report.rejected {
            warn!(path = %path.display(), %reason, "connector rejected");
        }
    } else if connectors.is_some() {
        return Err(eyre!("connector directory '{}' does not exist", dir.display()));
    } else {
        info!(dir = %dir.display(), "no connector directory, using built-in plugins only");
    }

    Ok(Runtime {
        config,
        catalog,
        registry,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    pipeline: &Path,
    seeds: Vec<String>,
    sketch: Option<&str>,
    connectors: Option<&Path>,
    timeout: Option<u64>,
    quiet: bool,
) -> Result<()> {
    let runtime = load_runtime(connectors)?;
    let definition = PipelineDefinition::from_path(pipeline)?;

    let sketch_id = SketchId::new(sketch.unwrap_or(&runtime.config.defaults.sketch_id));
    let base = PluginContext::new(runtime.catalog.clone())
        .with_vault(Arc::new(EnvVault::from(&runtime.config.vault)))
        .with_sketch(sketch_id);

    let mut orchestrator = Orchestrator::new(Arc::new(runtime.registry), base);
    let progress = (!quiet).then(|| Arc::new(CliProgress::new()));
    if let Some(progress) = &progress {
        orchestrator = orchestrator.with_observer(progress.clone());
    }

    info!(
        pipeline = %pipeline.display(),
        branches = definition.branches.len(),
        seeds = seeds.len(),
        "starting run"
    );
    let seeds = seeds.into_iter().map(Value::String).collect();
    let run_id = orchestrator.submit(definition, seeds).await;

    let timeout_secs = timeout.unwrap_or(runtime.config.orchestrator.run_timeout_secs);
    let snapshot = wait_with_timeout(&orchestrator, run_id, timeout_secs).await?;
    if let Some(progress) = &progress {
        progress.spinner.finish_and_clear();
    }

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    match (&snapshot.state, &snapshot.error) {
        (RunState::Failed, Some(error)) => Err(eyre!("run failed: {}", error.message)),
        (RunState::Failed, None) => Err(eyre!("run failed")),
        _ => Ok(()),
    }
}

/// Wait for a run; past the deadline, cancel it and wait for in-flight
/// steps to settle.
async fn wait_with_timeout(orchestrator: &Orchestrator, run_id: RunId, secs: u64) -> Result<RunSnapshot> {
    let finished = if secs == 0 {
        orchestrator.wait(run_id).await
    } else {
        match tokio::time::timeout(Duration::from_secs(secs), orchestrator.wait(run_id)).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!(%run_id, secs, "run timed out, cancelling");
                orchestrator.cancel(run_id).await;
                orchestrator.wait(run_id).await
            }
        }
    };
    finished.ok_or_else(|| eyre!("run {run_id} disappeared"))
}

fn cmd_plugins_list(
    category: Option<&str>,
    input_type: Option<&str>,
    connectors: Option<&Path>,
) -> Result<()> {
    let runtime = load_runtime(connectors)?;

    if let Some(type_name) = input_type {
        for descriptor in runtime.registry.list_by_input_type(type_name) {
            println!("{:<24} {} -> {}", descriptor.name, descriptor.input_type, descriptor.output_type);
        }
        return Ok(());
    }

    for (name, descriptors) in runtime.registry.list_by_category() {
        if category.is_some_and(|c| !c.eq_ignore_ascii_case(&name)) {
            continue;
        }
        println!("{name}");
        for descriptor in descriptors {
            println!(
                "  {:<24} {:<9} {} -> {}",
                descriptor.name,
                descriptor.kind.to_string(),
                descriptor.input_type,
                descriptor.output_type
            );
        }
    }
    Ok(())
}

fn cmd_plugins_describe(name: &str, connectors: Option<&Path>) -> Result<()> {
    let runtime = load_runtime(connectors)?;
    let described = runtime.registry.describe(name, &runtime.catalog)?;
    println!("{}", serde_json::to_string_pretty(&described)?);
    Ok(())
}

fn cmd_types_list() -> Result<()> {
    let catalog = TypeCatalog::with_builtin_types();
    for descriptor in catalog.list() {
        let detectable = if descriptor.detection().is_some() { "detect" } else { "" };
        println!("{:<14} {:<12} {detectable}", descriptor.name(), descriptor.primary());
    }
    Ok(())
}

fn cmd_types_detect(values: &[String]) -> Result<()> {
    let catalog = TypeCatalog::with_builtin_types();
    for value in values {
        let detected = catalog.detect(value);
        let name = detected.as_ref().map(|d| d.name()).unwrap_or("unknown");
        println!("{name:<14} {value}");
    }
    Ok(())
}

fn cmd_connector_validate(paths: &[PathBuf]) -> Result<()> {
    let catalog = TypeCatalog::with_builtin_types();
    let mut invalid = 0;
    for path in paths {
        match ConnectorDocument::from_path(path, &catalog) {
            Ok(document) => println!(
                "ok       {} ({} {} -> {})",
                path.display(),
                document.name,
                document.input.type_name,
                document.output.type_name
            ),
            Err(e) => {
                invalid += 1;
                println!("invalid  {}: {e}", path.display());
            }
        }
    }
    if invalid > 0 {
        return Err(eyre!("{invalid} of {} connector documents invalid", paths.len()));
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress observer
// ---------------------------------------------------------------------------

/// Spinner showing the step currently in flight.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl RunObserver for CliProgress {
    fn step_started(&self, _run_id: RunId, branch_id: &str, step: &StepTrace) {
        self.spinner.set_message(format!(
            "[{branch_id}] {} ({}, {} inputs)",
            step.step_id, step.plugin, step.input_count
        ));
    }

    fn step_finished(&self, _run_id: RunId, branch_id: &str, step: &StepTrace) {
        let line = match (&step.status, &step.error) {
            (StepStatus::Error, Some(error)) => {
                format!("  ✗ [{branch_id}] {}: {}", step.step_id, error.message)
            }
            _ => format!("  ✓ [{branch_id}] {} -> {} outputs", step.step_id, step.output_count),
        };
        self.spinner.println(line);
    }

    fn run_finished(&self, snapshot: &RunSnapshot) {
        self.spinner
            .set_message(format!("run {} {:?}", snapshot.run_id, snapshot.state));
    }
}
