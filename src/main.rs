#![forbid(unsafe_code)]

mod app;
mod browser_sources;
mod config;
mod connection;
mod constants;
mod ftc_live;
mod obs;
mod scenes;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level as TraceLevel, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use app::App;
use config::settings::{self, EffectiveSettings};
use config::{ConfigStoreExt, ConnectionConfig, FieldSceneMap};
use constants::keys;
use scenes::FieldOutcome;

#[derive(Parser)]
#[command(name = "obs-event-sync")]
#[command(about = "Keep OBS scenes and overlays in sync with a competition event")]
struct Cli {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show or change persisted settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Connect once and report the outcome
    Status,

    /// List scenes, most recently created first
    Scenes,

    /// Switch program output to a scene
    SwitchScene { name: String },

    /// Switch to the scene mapped to a field (0 = manual switching)
    SwitchField { field: u32 },

    /// List event-bound browser sources
    Sources,

    /// List events known to the catalog
    Events {
        /// Catalog host (defaults to the stored catalog host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Remember the event overlays should show
    SelectEvent { code: String },

    /// Point every event-bound browser source at an event
    UpdateEvent {
        /// Event code (defaults to the selected event)
        code: Option<String>,
        /// Host serving the overlays (defaults to the stored catalog host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Stay connected, record stream starts and switch fields read from stdin
    ///
    /// Each stdin line is a field number, standing in for the scoring server's
    /// live match-event stream.
    Watch,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print all effective settings
    Show,

    /// Control socket address and password
    Connection {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        password: Option<String>,
    },

    /// Map a field to a scene, or clear the mapping when SCENE is omitted
    Field {
        #[arg(value_parser = clap::value_parser!(u32).range(1..=2))]
        field: u32,
        scene: Option<String>,
    },

    /// Host of the event catalog (scoring server)
    Catalog { host: String },
}

fn init_logging() -> Result<()> {
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let app = App::load(cli.config)?;

    match cli.command {
        Command::Config(command) => configure(&app, command),
        Command::Status => status(&app).await,
        Command::Scenes => {
            app.connect().await?;
            let result = app.scenes.fetch_scenes().await;
            app.connection.disconnect().await;
            for scene in result? {
                println!("{scene}");
            }
            Ok(())
        }
        Command::SwitchScene { name } => {
            app.connect().await?;
            let result = app.scenes.switch_scene(&name).await;
            app.connection.disconnect().await;
            result?;
            Ok(())
        }
        Command::SwitchField { field } => {
            app.connect().await?;
            let result = app.scenes.set_active_field(field).await;
            app.connection.disconnect().await;
            report_field(result?);
            Ok(())
        }
        Command::Sources => {
            app.connect().await?;
            let result = app.sources.fetch_browser_sources().await;
            app.connection.disconnect().await;
            for source in result? {
                println!("{}\t{}", source.name, source.url);
            }
            Ok(())
        }
        Command::Events { host } => {
            for event in app.catalog(host.as_deref())?.fetch_events().await? {
                println!("{} - {}", event.event_code, event.name);
            }
            Ok(())
        }
        Command::SelectEvent { code } => select_event(&app, &code).await,
        Command::UpdateEvent { code, host } => update_event(&app, code, host).await,
        Command::Watch => watch(&app).await,
    }
}

fn configure(app: &App, command: ConfigCommand) -> Result<()> {
    let store = app.store.as_ref();
    match command {
        ConfigCommand::Show => {
            let shown = EffectiveSettings::load(store);
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigCommand::Connection { host, port, password } => {
            let mut connection = ConnectionConfig::load(store);
            if let Some(host) = host {
                connection.host = host;
            }
            if let Some(port) = port {
                connection.port = port;
            }
            if let Some(password) = password {
                connection.password = password;
            }
            connection.save(store)?;
            info!(address = %connection.address(), "Saved connection settings");
        }
        ConfigCommand::Field { field, scene } => {
            FieldSceneMap::assign(store, field, scene.as_deref())?;
            info!(field, scene = ?scene, "Saved field mapping");
        }
        ConfigCommand::Catalog { host } => {
            store.set(keys::CATALOG_HOST, &host)?;
            info!(host = %host, "Saved catalog host");
        }
    }
    Ok(())
}

async fn status(app: &App) -> Result<()> {
    let config = ConnectionConfig::load(app.store.as_ref());
    app.connection.connect(&config).await;
    match app.connection.error() {
        None => println!("Connected to {}", config.address()),
        Some(e) => println!("{e}"),
    }
    app.connection.disconnect().await;
    Ok(())
}

fn report_field(outcome: FieldOutcome) {
    match outcome {
        FieldOutcome::Switched(scene) => println!("Switched to {scene}"),
        FieldOutcome::ManualSwitching => println!("Finals match, manual switching required"),
    }
}

async fn select_event(app: &App, code: &str) -> Result<()> {
    let event = app
        .catalog(None)?
        .event(code)
        .await
        .with_context(|| format!("Event '{code}' not found in the catalog"))?;
    app.store.set(keys::SELECTED_EVENT, &event.event_code)?;
    println!("Selected {} - {}", event.event_code, event.name);
    Ok(())
}

async fn update_event(app: &App, code: Option<String>, host: Option<String>) -> Result<()> {
    let store = app.store.as_ref();
    let Some(code) = code.or_else(|| settings::selected_event(store)) else {
        bail!("No event code given and no event selected (use select-event first)");
    };
    let host = host.unwrap_or_else(|| settings::catalog_host(store));

    app.connect().await?;
    let result = app.sources.update_event_code(&host, &code).await;
    app.connection.disconnect().await;
    let report = result?;

    for source in &report.updated {
        println!("updated\t{}\t{}", source.name, source.url);
    }
    for name in &report.unchanged {
        println!("skipped\t{name}");
    }
    for failure in &report.failed {
        println!("failed\t{}\t{}", failure.name, failure.error);
    }
    if !report.is_complete() {
        bail!("{} of the browser sources could not be updated", report.failed.len());
    }
    Ok(())
}

/// Field numbers arrive one per line on stdin in place of the scoring
/// server's match-event stream; 0 marks a finals match.
async fn watch(app: &App) -> Result<()> {
    app.connect().await?;
    app.store.on_change(
        keys::STREAM_START,
        Arc::new(|value: &Value| info!(timestamp = %value, "Recorded stream start")),
    );
    info!("Watching; enter a field number per line (0 = finals), Ctrl-C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                match input.parse::<u32>() {
                    Ok(field) => match app.scenes.set_active_field(field).await {
                        Ok(outcome) => report_field(outcome),
                        Err(e) => eprintln!("{e}"),
                    },
                    Err(_) => warn!(input = %input, "Expected a field number"),
                }
            }
        }
    }

    app.connection.disconnect().await;
    Ok(())
}
