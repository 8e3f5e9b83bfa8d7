//! Vision Key CLI.
//!
//! Runs the capture-to-answer pipeline from the command line. The local
//! capture/result store and the optional settings file live under
//! `--state-dir`, so separate invocations observe each other's state.
//!
//! Usage examples:
//!   Extract the answer from saved model output:
//!     $ vision-key parse --file response.txt
//!   Analyze a cropped screenshot:
//!     $ VISION_KEY_API_KEY=... vision-key analyze --image question.png
//!   Analyze and auto-answer in a Chrome started with --remote-debugging-port=9222:
//!     $ VISION_KEY_API_KEY=... vision-key analyze --image question.png \
//!       --cdp-url http://127.0.0.1:9222

use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use vision_key::adapter::ChromiumConnection;
use vision_key::config::{LoggerCallback, Verbosity, VisionKeyConfig, VisionKeyConfigOverrides};
use vision_key::llm::{QuotaStatus, VisionModelClient, build_prompt};
use vision_key::logging::VisionLogger;
use vision_key::orchestrator::{AnalysisContext, AnalysisOrchestrator, AnswerDispatcher};
use vision_key::page::InteractionDriver;
use vision_key::parser::parse_detailed;
use vision_key::store::{CaptureStore, FileStore, SettingsStore};
use vision_key::types::{AnswerMode, ExecutionSurface};

const LOCAL_STORE_FILE: &str = "local.json";

#[derive(Parser)]
#[command(
    name = "vision-key",
    author,
    version,
    about = "Vision Key capture-to-answer utilities"
)]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory holding the local capture/result store.
    #[arg(long, global = true, default_value = ".vision-key")]
    state_dir: PathBuf,

    /// Read settings from this JSON file instead of VISION_KEY_* variables.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract the final answer from model output (file or stdin).
    Parse(ParseArgs),
    /// Print the prompt sent for a mode.
    Prompt(PromptArgs),
    /// Run the full pipeline on a PNG capture.
    Analyze(AnalyzeArgs),
    /// Check the remaining quota for the configured key.
    Quota,
    /// Clear stored captures and results.
    Clear(ClearArgs),
    /// Show or reset the settings file.
    Settings(SettingsArgs),
}

#[derive(Args)]
struct ParseArgs {
    /// File containing the model output; stdin when omitted.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct PromptArgs {
    /// `tracNghiem` (multiple choice) or `tuLuan` (essay).
    #[arg(long, default_value = "tracNghiem", value_parser = parse_mode)]
    mode: AnswerMode,

    /// Persona context, e.g. "Sinh học".
    #[arg(long, default_value = "")]
    expert: String,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// PNG image of the question.
    #[arg(long)]
    image: PathBuf,

    #[arg(long, value_parser = parse_mode)]
    mode: Option<AnswerMode>,

    #[arg(long)]
    expert: Option<String>,

    /// Chrome DevTools endpoint; when set the answer is applied to the open
    /// quiz tab.
    #[arg(long)]
    cdp_url: Option<String>,
}

#[derive(Args)]
struct ClearArgs {
    /// Only clear the displayed result, keeping the capture.
    #[arg(long)]
    result_only: bool,
}

#[derive(Args)]
struct SettingsArgs {
    /// Restore every setting to its default.
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();
    let verbosity = verbosity_from_count(cli.verbose);

    match &cli.command {
        Command::Parse(args) => run_parse(args),
        Command::Prompt(args) => {
            println!("{}", build_prompt(args.mode, &args.expert));
            Ok(())
        }
        Command::Analyze(args) => run_analyze(&cli, args, verbosity).await,
        Command::Quota => run_quota(&cli, verbosity).await,
        Command::Clear(args) => run_clear(&cli, args).await,
        Command::Settings(args) => run_settings(&cli, args).await,
    }
}

fn run_parse(args: &ParseArgs) -> Result<()> {
    let text = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };

    match parse_detailed(&text) {
        Some(parsed) => {
            info!("Matched with {} strategy", parsed.strategy.as_str());
            println!("{}", parsed.answer);
        }
        None => warn!("No answer found in input"),
    }
    Ok(())
}

async fn run_analyze(cli: &Cli, args: &AnalyzeArgs, verbosity: Verbosity) -> Result<()> {
    let mut config = load_config(cli, verbosity).await?;
    let mut overrides = VisionKeyConfigOverrides::default();
    if let Some(mode) = args.mode {
        overrides = overrides.answer_mode(mode);
    }
    if let Some(expert) = &args.expert {
        overrides.expert_context = Some(expert.clone());
    }
    if args.cdp_url.is_some() {
        overrides = overrides.auto_click_enabled(true);
    }
    config = config.with_overrides(overrides);

    let image = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let data_url = format!("data:image/png;base64,{}", STANDARD.encode(&image));

    let client = VisionModelClient::from_config(&config, None)
        .context("failed to construct model client")?;
    let store = FileStore::new(cli.state_dir.join(LOCAL_STORE_FILE));
    let orchestrator =
        AnalysisOrchestrator::new(client, store).with_logger(VisionLogger::new(config.verbose));

    // The connection must outlive the run.
    let (_connection, dispatcher) = match &args.cdp_url {
        Some(url) => {
            let connection = ChromiumConnection::connect(url)
                .await
                .with_context(|| format!("failed to connect to {url}"))?;
            let dispatcher: Option<Arc<dyn AnswerDispatcher>> =
                match connection.quiz_page().await? {
                    Some(surface) => {
                        info!("Auto-answer target found");
                        Some(Arc::new(
                            InteractionDriver::new(surface)
                                .with_logger(VisionLogger::new(config.verbose)),
                        ))
                    }
                    None => {
                        warn!("No quiz tab open; the answer will only be displayed");
                        None
                    }
                };
            (Some(connection), dispatcher)
        }
        None => (None, None),
    };

    let mut ctx = AnalysisContext::new(config, ExecutionSurface::Popup);
    let outcome = orchestrator
        .run(&mut ctx, data_url, dispatcher.as_deref())
        .await
        .map_err(|err| anyhow!(err.user_message()))?;

    println!("{}", outcome.report.render());
    if let Some(activation) = &outcome.activation {
        info!("Auto-answer: {}", serde_json::to_string(activation)?);
    }
    let metrics = orchestrator.metrics();
    info!(
        "Inference took {} ms ({} analyses this run)",
        metrics.total_inference_time_ms, metrics.total_analyses
    );
    Ok(())
}

async fn run_quota(cli: &Cli, verbosity: Verbosity) -> Result<()> {
    let config = load_config(cli, verbosity).await?;
    let Some(key) = config.credential() else {
        bail!("API Key not set. Please configure in Settings.");
    };
    let client = VisionModelClient::from_config(&config, None)
        .context("failed to construct model client")?;

    match client.check_quota(key).await? {
        QuotaStatus::Active { quota, level } => println!("Active: {quota} requests left ({level:?})"),
        QuotaStatus::Deactivated { quota } => println!("Deactivated ({quota} requests left)"),
        QuotaStatus::Rejected { message } => bail!("Key rejected: {message}"),
    }
    Ok(())
}

async fn run_clear(cli: &Cli, args: &ClearArgs) -> Result<()> {
    let store = CaptureStore::new(FileStore::new(cli.state_dir.join(LOCAL_STORE_FILE)));
    if args.result_only {
        store.clear_result().await?;
        info!("Cleared stored result");
    } else {
        store.clear_history().await?;
        info!("Cleared capture history");
    }
    Ok(())
}

async fn run_settings(cli: &Cli, args: &SettingsArgs) -> Result<()> {
    let path = cli
        .settings
        .as_deref()
        .ok_or_else(|| anyhow!("--settings <FILE> is required"))?;
    let settings = SettingsStore::new(FileStore::new(path));
    let config = if args.reset {
        settings.reset().await?
    } else {
        settings.load().await?
    };
    println!("{}", serde_json::to_string_pretty(&config.to_settings())?);
    Ok(())
}

async fn load_config(cli: &Cli, verbosity: Verbosity) -> Result<VisionKeyConfig> {
    let mut config = match &cli.settings {
        Some(path) => settings_from_file(path).await?,
        None => VisionKeyConfig::from_env().context("invalid VISION_KEY_* environment")?,
    };
    if cli.verbose > 0 {
        config.verbose = verbosity;
    }
    config.logger = Some(make_logger_callback());
    Ok(config)
}

async fn settings_from_file(path: &Path) -> Result<VisionKeyConfig> {
    SettingsStore::new(FileStore::new(path))
        .load()
        .await
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

fn parse_mode(value: &str) -> Result<AnswerMode, String> {
    AnswerMode::parse(value).ok_or_else(|| format!("unknown answer mode '{value}'"))
}

fn make_logger_callback() -> LoggerCallback {
    Arc::new(|line: &str| {
        log::debug!("{line}");
    })
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
