mod api;
mod app;
mod cache;
mod commands;
mod config;
mod session;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "CLUBGATE_LOG";

#[derive(Parser, Debug)]
#[command(name = "clubgate")]
#[command(about = "Command-line client for the club membership API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/clubgate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

/// Log to stderr, and additionally to a daily file when a directory is
/// configured. The returned guard flushes the file writer on drop.
fn init_tracing(config: &config::LoggingConfig) -> Option<WorkerGuard> {
  let filter =
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("clubgate=info"));

  let (file_layer, guard) = match &config.directory {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "clubgate.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config.logging);

  // Build the services and run the requested command
  let app = app::App::new(config)?;
  let output = app.run(args.command).await?;
  println!("{}", output);

  Ok(())
}
