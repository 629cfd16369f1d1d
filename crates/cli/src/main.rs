use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use docdrop_core::{
    APP_NAME, Error, HttpBlobStorage, ObjectStoreConfig, OutcomeSink, ProgressSink,
    UploadCoordinator, materialize_temp_file,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docdrop")]
#[command(about = "Uploads a document to an object-storage bucket", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file; the object key is the file's base name.
    Upload {
        source: Option<PathBuf>,

        /// Read the document from stdin into a temp .pdf and upload that.
        #[arg(long)]
        stdin: bool,
    },
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    Show,
    Set,
}

#[derive(Debug, Serialize)]
struct CliError {
    code: String,
    message: String,
}

impl CliError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    fn from_core(e: &Error) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

enum UploadEvent {
    Succeeded,
    Failed { code: &'static str, message: String },
}

struct CliSink {
    emit_events: bool,
    key: String,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ProgressSink for CliSink {
    fn on_progress(&self, percent: u8) {
        if self.emit_events {
            let line = serde_json::json!({
                "type": "upload.progress",
                "key": self.key,
                "percent": percent,
            });
            println!("{line}");
        }
    }
}

impl OutcomeSink for CliSink {
    fn on_success(&self) {
        let _ = self.events_tx.send(UploadEvent::Succeeded);
    }

    fn on_failure(&self, error: &Error) {
        let _ = self.events_tx.send(UploadEvent::Failed {
            code: error.code(),
            message: error.to_string(),
        });
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| std::env::var("DOCDROP_CONFIG_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_config_dir);

    match cli.cmd {
        Command::Upload { source, stdin } => {
            upload_run(&config_dir, source, stdin, cli.json, cli.events).await
        }
        Command::Config { cmd } => match cmd {
            ConfigCmd::Show => config_show(&config_dir, cli.json),
            ConfigCmd::Set => config_set(&config_dir),
        },
    }
}

async fn upload_run(
    config_dir: &Path,
    source: Option<PathBuf>,
    stdin: bool,
    json: bool,
    events: bool,
) -> Result<i32, CliError> {
    let config = load_config(config_dir)?;
    config.validate().map_err(|e| CliError::from_core(&e))?;
    tracing::debug!(
        event = "config.loaded",
        endpoint = %config.endpoint,
        bucket = %config.bucket,
        "config.loaded"
    );

    let source = if stdin {
        let mut input = tokio::io::stdin();
        materialize_temp_file(&mut input, &std::env::temp_dir(), ".pdf")
            .await
            .map_err(|e| CliError::from_core(&e))?
    } else {
        source.ok_or_else(|| CliError::new("args.invalid", "a source path or --stdin is required"))?
    };

    let key = source
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document")
        .to_string();

    let storage = Arc::new(HttpBlobStorage::new(config));
    let coordinator = UploadCoordinator::new(storage);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let sink = Arc::new(CliSink {
        emit_events: events,
        key: key.clone(),
        events_tx,
    });

    coordinator
        .start_upload(&source, sink.clone(), sink.clone())
        .map_err(|e| CliError::from_core(&e))?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            // The cancelled outcome is swallowed by the coordinator; no
            // success or failure will arrive after this.
            coordinator.cancel_upload(&*sink);
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "type": "upload.result", "status": "cancelled", "key": key })
                );
            } else {
                eprintln!("upload cancelled");
            }
            Ok(130)
        }
        event = events_rx.recv() => match event {
            Some(UploadEvent::Succeeded) => {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "type": "upload.result", "status": "succeeded", "key": key })
                    );
                } else {
                    println!("uploaded {key}");
                }
                Ok(0)
            }
            Some(UploadEvent::Failed { code, message }) => Err(CliError::new(code, message)),
            None => Err(CliError::new("internal", "upload event channel closed")),
        },
    }
}

fn config_show(config_dir: &Path, json: bool) -> Result<i32, CliError> {
    let config = load_config(config_dir)?;
    if json {
        let text = serde_json::to_string(&config)
            .map_err(|e| CliError::new("config.invalid", e.to_string()))?;
        println!("{text}");
    } else {
        let text =
            toml::to_string(&config).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
        print!("{text}");
    }
    Ok(0)
}

fn config_set(config_dir: &Path) -> Result<i32, CliError> {
    let mut input = String::new();
    std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)
        .map_err(|e| CliError::new("config.read_failed", e.to_string()))?;
    let config: ObjectStoreConfig =
        toml::from_str(&input).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    config.validate().map_err(|e| CliError::from_core(&e))?;

    let path = config_path(config_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError::new("config.write_failed", e.to_string()))?;
    }
    let text =
        toml::to_string(&config).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    atomic_write(&path, text.as_bytes())
        .map_err(|e| CliError::new("config.write_failed", e.to_string()))?;
    Ok(0)
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_NAME)
}

fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

fn load_config(config_dir: &Path) -> Result<ObjectStoreConfig, CliError> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Err(CliError::new(
            "config.missing",
            format!(
                "no config at {}; pipe TOML into `docdrop config set`",
                path.display()
            ),
        ));
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| CliError::new("config.read_failed", e.to_string()))?;
    let config: ObjectStoreConfig =
        toml::from_str(&text).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    Ok(config)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e)
        .unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\"}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
