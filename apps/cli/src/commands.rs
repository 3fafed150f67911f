//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use redline_core::{
    BridgeExecutor, BridgeSettings, Orchestrator, ProgressReporter, RunReport, RunState,
    SilentProgress, build_corpus, default_stages,
};
use redline_discovery::{DocumentStore, StoreOptions};
use redline_shared::{AppConfig, init_config, load_config, load_config_from};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// redline: find what changed, what contradicts, and what is void.
#[derive(Parser)]
#[command(
    name = "redline",
    version,
    about = "Review PDF document sets, excluding struck-through text, with staged analysis.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.redline/redline.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Documents directory (overrides config and REDLINE_DOCUMENTS_PATH).
    #[arg(short, long, global = true)]
    pub documents: Option<PathBuf>,

    /// Hide the progress spinner.
    #[arg(long, global = true)]
    pub quiet: bool,

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
    /// Build the corpus and run every analysis stage.
    Run,

    /// Build the corpus only and print or save it as JSON.
    Corpus {
        /// Write the corpus here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the documents a run would process.
    List,

    /// List the analysis stages in execution order.
    Stages,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "redline=info",
        1 => "redline=debug",
        _ => "redline=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
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
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(&cli)?),
        };
    }

    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Run => cmd_run(&config, cli.quiet).await,
        Command::Corpus { out } => cmd_corpus(&config, out.as_deref(), cli.quiet),
        Command::List => cmd_list(&config),
        Command::Stages => cmd_stages(),
        Command::Config { .. } => Ok(()),
    }
}

/// Load config, then apply command-line overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = load_config_from(path)?;
            config.apply_env();
            config
        }
        None => load_config()?,
    };
    if let Some(documents) = &cli.documents {
        config.documents.root = documents.to_string_lossy().into_owned();
    }
    config.validate()?;
    Ok(config)
}

fn reporter(quiet: bool) -> Box<dyn ProgressReporter> {
    if quiet {
        Box::new(SilentProgress)
    } else {
        Box::new(CliProgress::new())
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, quiet: bool) -> Result<()> {
    info!(root = %config.documents.root, "starting review");

    let orchestrator = Orchestrator::from_config(config)?;
    let mut executor = BridgeExecutor::new(BridgeSettings::from(config));
    let progress = reporter(quiet);

    let report = orchestrator.run(&mut executor, progress.as_ref()).await;
    print_summary(&report, config);

    match &report.state {
        RunState::Completed => {
            if let Some((stage, result)) = report.context.results().last() {
                println!("  Final result ({stage}):");
                println!("{}", serde_json::to_string_pretty(result)?);
            }
            Ok(())
        }
        RunState::Aborted { reason } => Err(eyre!("run aborted: {reason}")),
        other => Err(eyre!("run ended in unexpected state: {other}")),
    }
}

fn print_summary(report: &RunReport, config: &AppConfig) {
    let corpus = report.context.corpus();
    let struck: usize = corpus.entries().iter().map(|e| e.struck_count).sum();

    println!();
    println!("  Run:        {}", report.run_id);
    println!("  State:      {}", report.state);
    println!(
        "  Documents:  {} ({} converted)",
        corpus.len(),
        corpus.converted_count()
    );
    println!("  Struck:     {struck} paragraphs excluded");
    println!("  Stages:     {}", report.context.results().len());
    println!("  Log:        {}", config.output.log_path);
    println!("  Results:    {}", config.output.results_path);
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    for (path, error) in &report.persisted.failed {
        println!("  Not saved:  {} ({error})", path.display());
    }
    println!();
}

fn cmd_corpus(config: &AppConfig, out: Option<&Path>, quiet: bool) -> Result<()> {
    let progress = reporter(quiet);
    let ctx = build_corpus(config, progress.as_ref())?;
    let json = serde_json::to_string_pretty(ctx.corpus())?;

    match out {
        Some(path) => {
            std::fs::write(path, json)
                .map_err(|e| eyre!("cannot write {}: {e}", path.display()))?;
            println!(
                "Corpus for {} documents written to {}",
                ctx.corpus().len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }

    if ctx.documents().is_empty() {
        return Err(eyre!("no documents discovered in {}", config.documents.root));
    }
    Ok(())
}

fn cmd_list(config: &AppConfig) -> Result<()> {
    let store = DocumentStore::new(StoreOptions::from(config));
    let documents = store.try_list()?;

    if documents.is_empty() {
        println!("No documents in {}", store.root().display());
        return Ok(());
    }
    for doc in &documents {
        println!("  {}", doc.name);
    }
    println!("\n  {} documents in {}", documents.len(), store.root().display());
    Ok(())
}

fn cmd_stages() -> Result<()> {
    for (i, stage) in default_stages().iter().enumerate() {
        println!("  {}. {:<18} {}", i + 1, stage.name, stage.description);
        if !stage.requires.is_empty() {
            println!("     requires: {}", stage.requires.join(", "));
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn document_converted(&self, name: &str, converted: bool, current: usize, total: usize) {
        let status = if converted { "converted" } else { "failed" };
        self.spinner
            .set_message(format!("Converting [{current}/{total}] {name} ({status})"));
    }

    fn stage_attempt(&self, stage: &str, attempt: u32, max_attempts: u32) {
        self.spinner
            .set_message(format!("Running {stage} (attempt {attempt}/{max_attempts})"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["redline", "run", "--documents", "/srv/docs", "-vv"]).unwrap();
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.documents, Some(PathBuf::from("/srv/docs")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn documents_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redline.toml");
        std::fs::write(&path, "[documents]\nroot = \"from-file\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "redline",
            "--config",
            path.to_str().unwrap(),
            "--documents",
            "from-flag",
            "list",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.documents.root, "from-flag");
    }
}
