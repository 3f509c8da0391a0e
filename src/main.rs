//! Reqlog CLI - persist parsed request logs into SQLite

use clap::{Parser, Subcommand};
use reqlog::config::{self, ReqlogConfig};
use reqlog::pipeline::{self, PipelineOptions};
use reqlog::storage::{existing_files, Database};
use reqlog::ui::{self, Icons};
use reqlog::{Aggregator, FormatDescription};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "reqlog")]
#[command(version)]
#[command(about = "Persist parsed request logs into SQLite with resumable ingestion")]
#[command(long_about = r#"
Reqlog creates tables for every line type of a log format and stores each
parsed request atomically. Re-running over the same input resumes from the
last committed position of every file.

Example usage:
  reqlog setup --format rails.toml --database logs.db
  my-parser production.log | reqlog ingest --format rails.toml --database logs.db
  reqlog files --database logs.db
"#)]
struct Cli {
    /// Enable verbose logging (schema creation, commits, retries)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the tables for a format description
    Setup {
        /// Format description (.toml or .json)
        #[arg(short, long)]
        format: Option<PathBuf>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Ingest newline-delimited parser events
    Ingest {
        /// Format description (.toml or .json)
        #[arg(short, long)]
        format: Option<PathBuf>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Event stream, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Ingest everything, ignoring stored file progress
        #[arg(long)]
        no_resume: bool,
    },

    /// Show the last committed position of every file
    Files {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Show row counts per table
    Stats {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
}

fn database_path(flag: Option<PathBuf>, config: &ReqlogConfig) -> PathBuf {
    flag.or_else(|| config.database.as_ref().map(PathBuf::from))
        .unwrap_or_else(config::default_database_path)
}

fn load_format(flag: Option<PathBuf>, config: &ReqlogConfig) -> anyhow::Result<FormatDescription> {
    let path = flag
        .or_else(|| config.format.as_ref().map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("no format description given (use --format or set `format` in reqlog.toml)"))?;
    Ok(FormatDescription::load(&path)?)
}

fn open_database(path: &Path, config: &ReqlogConfig) -> anyhow::Result<Database> {
    Ok(Database::open_with(path, config.database_options())?)
}

fn main() {
    if let Err(err) = run() {
        ui::error(&format!("{:#}", err));
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?.unwrap_or_default();

    // Initialize logging
    let filter = if cli.verbose || config.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Setup { format, database } => {
            let format = load_format(format, &config)?;
            let path = database_path(database, &config);
            let db = open_database(&path, &config)?;
            let agg = Aggregator::prepare(db, &format)?;

            ui::header("Schema ready");
            ui::info("Database", &path.display().to_string());
            for line_type in agg.registry().line_types() {
                println!("  {} {}_lines", Icons::WRENCH, line_type);
            }
        }

        Commands::Ingest { format, database, input, no_resume } => {
            let format = load_format(format, &config)?;
            let path = database_path(database, &config);
            let db = open_database(&path, &config)?;
            let agg = Aggregator::prepare(db, &format)?;

            let options = PipelineOptions {
                flush_every: config.flush_every.unwrap_or(pipeline::DEFAULT_FLUSH_EVERY),
                resume: !no_resume,
            };

            ui::header(&format!("Ingesting into {}", path.display()));
            let report = if input == "-" {
                pipeline::run(agg, std::io::stdin().lock(), &options)?
            } else {
                let file = std::fs::File::open(&input)?;
                pipeline::run(agg, BufReader::new(file), &options)?
            };

            let summary = &report.summary;
            ui::section("Summary");
            ui::summary_row("Requests:", &summary.requests.to_string());
            ui::summary_row("Lines:", &summary.lines.to_string());
            ui::summary_row("Warnings:", &summary.warnings.to_string());
            ui::summary_row("Files:", &summary.files.to_string());
            if report.resumed_units > 0 {
                ui::summary_row("Already committed:", &report.resumed_units.to_string());
            }
            if summary.skipped_lines > 0 || summary.dropped_fields > 0 {
                ui::warn(&format!(
                    "{} lines of unknown type skipped, {} unknown fields dropped",
                    summary.skipped_lines, summary.dropped_fields
                ));
            }
            if summary.retries > 0 {
                ui::summary_row("Busy retries:", &summary.retries.to_string());
            }
            ui::success("Ingestion complete");
        }

        Commands::Files { database } => {
            let path = database_path(database, &config);
            let db = open_database(&path, &config)?;
            let files = existing_files(&db)?;

            if files.is_empty() {
                println!("{} No files ingested yet.", Icons::FILE);
            } else {
                println!("{}", ui::files_table(&files));
            }
        }

        Commands::Stats { database } => {
            let path = database_path(database, &config);
            let db = open_database(&path, &config)?;
            let stats = db.stats()?;

            println!("{} Reqlog Statistics ({})", Icons::STATS, ui::dim(&path.display().to_string()));
            let rows: Vec<(String, String)> = stats
                .tables
                .iter()
                .map(|(name, rows)| (name.clone(), rows.to_string()))
                .collect();
            let borrowed: Vec<(&str, &str)> = rows.iter().map(|(n, r)| (n.as_str(), r.as_str())).collect();
            println!("{}", ui::stats_table(&borrowed));
        }
    }

    Ok(())
}
