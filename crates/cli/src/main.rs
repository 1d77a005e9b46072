mod commands;
mod config;
mod serve;

use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use rapid_core::{Catalog, RapidService};
use rapid_sqlite::SqliteStorage;
use rapid_storage::{MemoryStorage, RapidStorage};
use tracing_subscriber::EnvFilter;

use crate::config::{Backend, Config, LogFormat};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Live poll service: collection runs, answer ingestion, response histograms.
#[derive(Parser)]
#[command(
    name = "rapid",
    version,
    about = "Live poll service: collection runs, answer ingestion, response histograms"
)]
struct Cli {
    /// Path to the TOML config file (default: ./rapid.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Log format (overrides [logging] format)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on (overrides [server] port)
        #[arg(long)]
        port: Option<u16>,
        /// Path to TLS certificate PEM file (requires `tls` feature)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires `tls` feature)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Open a new run for a problem, or close the open one
    Toggle {
        /// Problem id (block usage key)
        problem: String,
        /// Context id (course key)
        context: String,
    },

    /// Show the per-run response histogram for a problem
    Responses { problem: String, context: String },

    /// Show whether a problem is open and enabled
    Status { problem: String, context: String },

    /// Flip the per-problem enabled flag
    ToggleEnabled { problem: String },

    /// Ingest newline-delimited JSON tracking events from a file
    Ingest {
        /// Path to the NDJSON file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e.to_string(), cli.output, cli.quiet);
            process::exit(1);
        }
    };
    init_tracing(cli.log_format.unwrap_or(config.logging.format));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("failed to create tokio runtime: {e}"),
                cli.output,
                cli.quiet,
            );
            process::exit(1);
        }
    };

    let (output, quiet) = (cli.output, cli.quiet);
    if let Err(e) = runtime.block_on(dispatch(cli, config)) {
        report_error(&e.to_string(), output, quiet);
        process::exit(1);
    }
}

/// Install the global subscriber. Logs go to stderr so stdout carries only
/// command output.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rapid=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Open the configured backend and run the command against it.
async fn dispatch(cli: Cli, config: Config) -> Result<(), Box<dyn Error>> {
    let catalog = Arc::new(config.catalog()?);
    match config.storage.backend {
        Backend::Memory => {
            let service = RapidService::new(Arc::new(MemoryStorage::new()), catalog);
            run(cli, &config, service).await
        }
        Backend::Sqlite => {
            let storage = SqliteStorage::open(&config.storage.path)?;
            tracing::debug!(path = %config.storage.path.display(), "opened sqlite store");
            let service = RapidService::new(Arc::new(storage), catalog);
            run(cli, &config, service).await
        }
    }
}

async fn run<S: RapidStorage>(
    cli: Cli,
    config: &Config,
    service: RapidService<S, Catalog>,
) -> Result<(), Box<dyn Error>> {
    let output = cli.output;
    match cli.command {
        Commands::Serve {
            port,
            tls_cert,
            tls_key,
        } => {
            if tls_cert.is_some() != tls_key.is_some() {
                return Err("--tls-cert and --tls-key must both be provided".into());
            }
            let options = serve::ServeOptions {
                port: port.unwrap_or(config.server.port),
                rate_limit: config.server.rate_limit,
                max_body_bytes: config.server.max_body_bytes,
                staff_keys: config.auth.staff_keys.clone(),
                ingest_key: config.auth.ingest_key.clone(),
                tls_cert,
                tls_key,
            };
            serve::start_server(service, options).await
        }
        Commands::Toggle { problem, context } => {
            commands::toggle::cmd_toggle(&service, &problem, &context, output).await
        }
        Commands::Responses { problem, context } => {
            commands::responses::cmd_responses(&service, &problem, &context, output).await
        }
        Commands::Status { problem, context } => {
            commands::status::cmd_status(&service, &problem, &context, output).await
        }
        Commands::ToggleEnabled { problem } => {
            commands::toggle::cmd_toggle_enabled(&service, &problem, output).await
        }
        Commands::Ingest { file } => {
            commands::ingest::cmd_ingest(&service, &file, output, cli.quiet).await
        }
    }
}

/// Print an error to stderr in the requested format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}
