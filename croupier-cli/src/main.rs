//! Croupier CLI
//!
//! Replays recorded command mappings against the configured club clients.
//!
//! Usage:
//!   croupier run --input tasks.json              # Run every task in the file
//!   croupier run --app pppoker --input in.json   # Fill `App` for raw inputs
//!   croupier validate                            # Parse every mapping file
//!   croupier catalog                             # Print the operation catalog

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use croupier::command::MappingKind;
use croupier::errors::EngineError;
use croupier::export::{HttpWebhook, LogExporter, LogSignal, ResultExporter};
use croupier::geometry::ClientRect;
use croupier::overlay::{Overlay, TracingRenderer};
use croupier::platforms::Platform;
use croupier::question::APP;
use croupier::{Comando, CommandStore, EngineConfig, EngineRegistry};
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "croupier")]
#[command(about = "Replays recorded UI command mappings against club-management clients")]
struct Cli {
    /// YAML configuration file (defaults apply when omitted)
    #[clap(long, short = 'c', global = true, env = "CROUPIER_CONFIG")]
    config: Option<PathBuf>,

    /// Also write daily rolling logs into this directory
    #[clap(long, global = true, env = "CROUPIER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every task in an input file until all engines are idle
    Run(RunArgs),
    /// Load every mapping file the catalog refers to and report parse errors
    Validate {
        /// Only check this app
        #[clap(long)]
        app: Option<String>,
    },
    /// Print the effective operation catalog as YAML
    Catalog,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// App used for tasks that do not name one
    #[clap(long)]
    app: Option<String>,

    /// JSON file holding one task envelope, an array of envelopes, or raw input objects
    #[clap(long, short = 'i')]
    input: PathBuf,

    /// Client area as LEFT,TOP,WIDTH,HEIGHT where windows cannot be located natively
    #[clap(long, value_parser = parse_rect, default_value = "0,0,1280,720")]
    client_rect: ClientRect,
}

fn parse_rect(raw: &str) -> Result<ClientRect, String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let [left, top, width, height] = parts.as_slice() else {
        return Err(format!("expected LEFT,TOP,WIDTH,HEIGHT, got '{raw}'"));
    };
    fn number<T: std::str::FromStr>(s: &str) -> Result<T, String> {
        s.parse()
            .map_err(|_| format!("'{s}' is not a number in range for {}", std::any::type_name::<T>()))
    }
    Ok(ClientRect {
        left: number(left)?,
        top: number(top)?,
        width: number(width)?,
        height: number(height)?,
    })
}

fn level_filter() -> EnvFilter {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);
    EnvFilter::from_default_env().add_directive(log_level.into())
}

fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "croupier.log");
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_filter(level_filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_filter(level_filter()),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref())?;

    let config = EngineConfig::load(cli.config.as_deref()).context("Invalid configuration")?;

    match cli.command {
        Commands::Run(args) => run(Arc::new(config), args).await,
        Commands::Validate { app } => validate(&config, app.as_deref()),
        Commands::Catalog => {
            print!("{}", serde_yaml::to_string(&config.catalog)?);
            Ok(())
        }
    }
}

async fn run(config: Arc<EngineConfig>, args: RunArgs) -> Result<()> {
    let comandos = read_comandos(&args.input, &config, args.app.as_deref())?;
    if comandos.is_empty() {
        warn!("{} holds no tasks", args.input.display());
        return Ok(());
    }
    info!("Loaded {} tasks from {}", comandos.len(), args.input.display());

    let token = CancellationToken::new();
    let (overlay, overlay_task) = Overlay::spawn(Arc::new(TracingRenderer), token.clone());
    let exporter: Arc<dyn ResultExporter> = match config.webhook_url.as_deref() {
        Some(url) => Arc::new(HttpWebhook::new(url)?),
        None => {
            warn!("No webhook configured, results are only logged");
            Arc::new(LogExporter)
        }
    };
    let client_rect = args.client_rect;
    let registry = EngineRegistry::build(
        Arc::clone(&config),
        exporter,
        Arc::new(LogSignal),
        overlay,
        token.clone(),
        |app| platform_for(app, client_rect),
    )?;

    #[cfg(feature = "desktop")]
    croupier::platforms::desktop::spawn_abort_listener(token.clone());
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, stopping engines");
                token.cancel();
            }
        });
    }

    for comando in comandos {
        if let Err(e) = registry.submit(comando).await {
            if e.is_cancelled() {
                break;
            }
            error!("Task rejected: {}", e);
        }
    }

    let mut engines = JoinSet::new();
    for app in registry.apps() {
        let Some(engine) = registry.engine(app) else {
            continue;
        };
        engines.spawn(async move {
            let mut engine = engine.lock().await;
            let app = engine.app().to_string();
            (app, engine.run().await)
        });
    }

    let mut stopped = false;
    while let Some(joined) = engines.join_next().await {
        match joined {
            Ok((app, Ok(()))) => info!("{} is idle", app),
            Ok((app, Err(e))) if e.is_cancelled() => {
                warn!("{} stopped: {}", app, e);
                stopped = true;
            }
            Ok((app, Err(e))) => error!("{} stopped: {}", app, e),
            Err(e) => error!("Engine task failed: {}", e),
        }
    }

    registry.shutdown();
    if let Err(e) = overlay_task.await {
        warn!("Overlay task failed: {}", e);
    }
    if stopped {
        bail!("Aborted before every task finished");
    }
    Ok(())
}

/// Reads tasks from a JSON file. Objects with a `question` key are task
/// envelopes, anything else is a raw input object.
fn read_comandos(path: &Path, config: &EngineConfig, default_app: Option<&str>) -> Result<Vec<Comando>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let entries = match value {
        Value::Array(entries) => entries,
        other => vec![other],
    };

    let mut comandos = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let Value::Object(mut object) = entry else {
            bail!("Entry {} of {} is not an object", index, path.display());
        };
        let mut comando = if object.contains_key("question") {
            Comando::from_value(Value::Object(object))
                .with_context(|| format!("Entry {index} is not a valid task envelope"))?
        } else {
            let has_app = object.keys().any(|key| key.eq_ignore_ascii_case(APP));
            if let (false, Some(app)) = (has_app, default_app) {
                object.insert(APP.to_string(), Value::String(app.to_string()));
            }
            let app = object
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(APP))
                .and_then(|(_, value)| value.as_str())
                .unwrap_or_default()
                .to_string();
            let bot_id = config.bot_id(&app).map(|id| id.to_string()).unwrap_or_default();
            let question = config
                .catalog
                .inputs
                .build_question(&object, &bot_id)
                .with_context(|| format!("Entry {index} is not a valid input"))?;
            Comando::new(question, "Input")
        };
        if let (None, Some(app)) = (comando.app(), default_app) {
            comando.question.set(APP, app);
        }
        comandos.push(comando);
    }
    Ok(comandos)
}

#[cfg(feature = "desktop")]
fn platform_for(app: &str, client_rect: ClientRect) -> Result<Platform, EngineError> {
    use croupier::platforms::desktop::{RdevInput, XcapScreen};

    #[cfg(feature = "ocr")]
    let recognizer: Arc<dyn croupier::platforms::TextRecognizer> = Arc::new(croupier::platforms::ocr::UniOcr);
    #[cfg(not(feature = "ocr"))]
    let recognizer: Arc<dyn croupier::platforms::TextRecognizer> =
        Arc::new(croupier::platforms::UnavailableRecognizer);

    Ok(Platform::new(
        Arc::new(RdevInput::new()),
        Arc::new(XcapScreen),
        recognizer,
        window_for(app, client_rect),
    ))
}

#[cfg(not(feature = "desktop"))]
fn platform_for(app: &str, _client_rect: ClientRect) -> Result<Platform, EngineError> {
    Err(EngineError::Platform(format!(
        "cannot drive {app}: built without the `desktop` feature"
    )))
}

#[cfg(all(feature = "desktop", target_os = "windows"))]
fn window_for(app: &str, _client_rect: ClientRect) -> Arc<dyn croupier::platforms::AppWindow> {
    Arc::new(croupier::platforms::windows::Win32Window::new(app))
}

#[cfg(all(feature = "desktop", not(target_os = "windows")))]
fn window_for(app: &str, client_rect: ClientRect) -> Arc<dyn croupier::platforms::AppWindow> {
    Arc::new(croupier::platforms::fixed::FixedWindow::new(app, client_rect))
}

fn validate(config: &EngineConfig, only: Option<&str>) -> Result<()> {
    let store = CommandStore::new(config.mapping_root.clone());
    let apps: Vec<String> = match only {
        Some(app) => vec![app.trim().to_lowercase()],
        None => config.apps.keys().map(|app| app.trim().to_lowercase()).collect(),
    };

    let mut targets = vec![(MappingKind::Base, "Base".to_string())];
    for screen in config.catalog.screens() {
        targets.push((MappingKind::Nav, screen.to_string()));
        targets.push((MappingKind::Ret, screen.to_string()));
    }
    for operation in config.catalog.operation_names() {
        targets.push((MappingKind::Act, operation.to_string()));
    }

    let (mut loaded, mut missing, mut broken) = (0usize, 0usize, 0usize);
    for app in &apps {
        for (kind, name) in &targets {
            let path = store.path(app, *kind, name);
            if !path.exists() {
                missing += 1;
                continue;
            }
            match CommandStore::load(&path) {
                Ok(commands) => {
                    loaded += 1;
                    info!("{}: {} commands", path.display(), commands.len());
                }
                Err(e) => {
                    broken += 1;
                    error!("{}: {}", path.display(), e);
                }
            }
        }
    }

    println!("{loaded} mappings loaded, {missing} missing, {broken} invalid");
    if broken > 0 {
        bail!("{broken} mapping files could not be loaded");
    }
    Ok(())
}
