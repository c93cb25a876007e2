//! # otsdb
//!
//! Command-line client for OpenTSDB: batched writes with bounded retry,
//! time-series queries and metadata lookups.

mod commands;
mod lifecycle;
mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};
use otsdb_core::models::query::{QueryRequest, SuggestKind};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// OpenTSDB client
#[derive(Parser, Debug)]
#[command(name = "otsdb")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (JSON). Defaults to the platform config directory.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// TSD host (overrides OTSDB_HOST and the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// TSD port (overrides OTSDB_PORT and the config file)
    #[arg(long, short = 'p', global = true)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, short = 'l', global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write values for one metric
    Put {
        #[arg(long, short = 'm')]
        metric: String,

        /// Values to store, in order
        #[arg(
            long = "value",
            short = 'v',
            required = true,
            num_args = 1..,
            allow_negative_numbers = true
        )]
        values: Vec<f64>,

        /// One timestamp per value (epoch, RFC 3339 or local "YYYY-MM-DD HH:MM:SS")
        #[arg(long = "timestamp", short = 't', num_args = 1..)]
        timestamps: Vec<String>,

        /// Tag in k=v form, repeatable
        #[arg(long = "tag", num_args = 1..)]
        tags: Vec<String>,

        /// Write over the telnet protocol instead of HTTP
        #[arg(long)]
        telnet: bool,
    },

    /// Query one metric
    Query {
        #[arg(long, short = 'm')]
        metric: String,

        #[arg(long, short = 'a')]
        aggregator: Option<String>,

        #[arg(long, short = 's')]
        start: Option<String>,

        #[arg(long, short = 'e')]
        end: Option<String>,

        /// Tag filter in k=v form, repeatable
        #[arg(long = "tag", num_args = 1..)]
        tags: Vec<String>,

        /// Merge all series into one timeline
        #[arg(long)]
        union: bool,

        /// Ask the TSD for a query summary
        #[arg(long)]
        summary: bool,
    },

    /// Suggest metric names, tag keys or tag values
    Suggest {
        /// metrics, tagk or tagv
        #[arg(long, short = 'k', default_value = "metrics")]
        kind: SuggestKind,

        #[arg(long, short = 'q', default_value = "")]
        prefix: String,

        #[arg(long, default_value_t = 25)]
        max: usize,
    },

    /// TSD version information
    Version,

    /// Aggregation functions the TSD supports
    Aggregators,

    /// Show or edit the config file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration (file, environment and flags)
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file (with --host/--port applied)
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Set one setting, e.g. `write.batch_size 30`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let Args {
        config: config_path,
        host,
        port,
        command,
        ..
    } = args;
    let resolve = || settings::resolve_config(config_path.as_deref(), host.as_deref(), port);

    match command {
        Command::Put {
            metric,
            values,
            timestamps,
            tags,
            telnet,
        } => {
            let config = resolve()?;
            let input = commands::PutInput::parse(metric, values, &timestamps, &tags)?;
            let result = if telnet {
                commands::put_telnet(&config, &input).await?
            } else {
                commands::put_http(config, &input).await?
            };
            commands::print_json(&result)?;
            Ok(if result.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Command::Query {
            metric,
            aggregator,
            start,
            end,
            tags,
            union,
            summary,
        } => {
            let mut request = QueryRequest::new(metric).with_summary(summary);
            request.tags = settings::parse_tags(&tags)?;
            request.aggregator = aggregator;
            request.start = start;
            request.end = end;
            commands::query(resolve()?, &request, union).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Suggest { kind, prefix, max } => {
            commands::suggest(resolve()?, kind, &prefix, max).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => {
            commands::version(resolve()?).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Aggregators => {
            commands::aggregators(resolve()?).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { action } => {
            let target = || settings::config_target(config_path.as_deref());
            match action.unwrap_or(ConfigAction::Show) {
                ConfigAction::Show => commands::print_json(&resolve()?)?,
                ConfigAction::Path => println!("{}", target()?.display()),
                ConfigAction::Init { force } => {
                    commands::config_init(&target()?, host.as_deref(), port, force)?
                }
                ConfigAction::Set { key, value } => {
                    commands::config_set(&target()?, &key, &value)?
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
