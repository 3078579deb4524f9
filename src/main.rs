//! dirtail - tail every file under a set of directories, line by line.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dirtail::config::{ConfigError, ConfigLoader, TailConfig};
use dirtail::metrics::InMemoryRegistry;
use dirtail::tail::{EngineOptions, Record, RecordSink, SinkError, TailEngine};

#[derive(Parser)]
#[command(
    name = "dirtail",
    about = "Tail every file under a set of directories",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch directories and print each new line as JSON on stdout.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to a config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory to watch, as `PATH` or `ID=PATH`. Repeatable.
    #[arg(short, long = "dir")]
    dirs: Vec<String>,
    /// Filename regex applied to directories given with `--dir`.
    #[arg(long)]
    pattern: Option<String>,
    /// Close handles idle for this many minutes.
    #[arg(long)]
    unlock_file_time: Option<u64>,
    /// Attach the absolute file path to each record.
    #[arg(long)]
    file_header: bool,
    /// Attach the file name to each record.
    #[arg(long)]
    basename_header: bool,
}

impl RunArgs {
    fn apply(self, config: &mut TailConfig) {
        for (index, dir) in self.dirs.iter().enumerate() {
            let (id, path) = match dir.split_once('=') {
                Some((id, path)) => (id.to_string(), PathBuf::from(path)),
                None => (format!("dir{index}"), PathBuf::from(dir)),
            };
            config.add_directory(&id, path, self.pattern.clone());
        }
        if let Some(minutes) = self.unlock_file_time {
            config.unlock_file_time = minutes;
        }
        config.headers.file_header |= self.file_header;
        config.headers.basename_header |= self.basename_header;
    }
}

/// Writes each record as one JSON line on stdout.
struct StdoutSink;

#[derive(Serialize)]
struct JsonRecord<'a> {
    headers: &'a BTreeMap<String, String>,
    body: Cow<'a, str>,
}

#[async_trait]
impl RecordSink for StdoutSink {
    async fn accept(&self, record: Record) -> Result<(), SinkError> {
        let line = JsonRecord {
            headers: &record.headers,
            body: String::from_utf8_lossy(&record.body),
        };
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer(&mut stdout, &line).map_err(std::io::Error::from)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
        Ok(())
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(args: RunArgs) -> Result<(), ConfigError> {
    let loader = args
        .config
        .clone()
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = loader.load()?;
    args.apply(&mut config);

    let roots = config.resolve_roots()?;
    let mut engine = TailEngine::new(
        roots,
        EngineOptions::from(&config),
        Arc::new(StdoutSink),
        Arc::new(InMemoryRegistry::new()),
    );

    if engine.start().await == 0 {
        tracing::warn!("No directory could be watched, waiting for shutdown");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
    engine.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => {
            if let Err(e) = run(args).await {
                tracing::error!(error = %e, "Failed to start");
                eprintln!("dirtail: {e}");
                std::process::exit(1);
            }
        }
    }
}
