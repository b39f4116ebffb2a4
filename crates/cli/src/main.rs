// xingsync - headless crossing reconciliation over drawing snapshots

mod commands;
mod exit_codes;
mod ui;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::{
    recon_exit_code, EXIT_CONFIG, EXIT_DRAWING_IO, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE,
};
use xingsync_recon::ReconError;

#[derive(Parser)]
#[command(name = "xingsync")]
#[command(about = "Reconcile crossing records across block instances and tables (headless)")]
#[command(version)]
#[command(long_version = long_version())]
struct Cli {
    /// Drawing snapshot (JSON) to operate on
    #[arg(long, global = true, env = "XINGSYNC_DRAWING")]
    drawing: Option<PathBuf>,

    /// Engine config (TOML). Default: <config dir>/xingsync/config.toml
    #[arg(long, global = true, env = "XINGSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build canonical records from the drawing's block instances
    #[command(after_help = "\
Examples:
  xingsync scan --drawing site.json
  xingsync scan --drawing site.json --json")]
    Scan {
        /// Output the scan report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify tables and persist the shape of header-classified ones
    #[command(after_help = "\
Examples:
  xingsync tables --drawing site.json
  xingsync tables --drawing site.json --dry-run --json")]
    Tables {
        #[arg(long)]
        json: bool,

        /// Classify without persisting shape tags
        #[arg(long)]
        dry_run: bool,
    },

    /// Write canonical records as a flat-record file
    #[command(after_help = "\
Examples:
  xingsync export --drawing site.json
  xingsync export --drawing site.json --output crossings.csv")]
    Export {
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Apply a flat-record file to the drawing
    #[command(after_help = "\
Examples:
  xingsync import crossings.csv --drawing site.json
  xingsync import crossings.csv --drawing site.json --dry-run")]
    Import {
        /// Flat-record file (CROSSING,OWNER,DESCRIPTION,LOCATION,DWG_REF,LAT,LONG,ZONE)
        file: PathBuf,

        #[arg(long)]
        json: bool,

        /// Apply in memory only; leave the snapshot unchanged
        #[arg(long)]
        dry_run: bool,
    },

    /// Resolve duplicate crossings (instances, or coordinates with --latlong)
    #[command(after_help = "\
Examples:
  xingsync duplicates --drawing site.json
  xingsync duplicates --drawing site.json --latlong
  xingsync duplicates --drawing site.json --choose X4=2 --choose X10=1
  xingsync duplicates --drawing site.json --accept-defaults --dry-run")]
    Duplicates {
        /// Resolve diverging coordinates instead of duplicate instances
        #[arg(long)]
        latlong: bool,

        /// Non-interactive choice: KEY=N picks candidate N (1-based)
        #[arg(long, value_name = "KEY=N")]
        choose: Vec<String>,

        /// Non-interactive: keep every pre-selected candidate
        #[arg(long)]
        accept_defaults: bool,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// Push canonical values into every classified table
    #[command(after_help = "\
Examples:
  xingsync sync --drawing site.json
  xingsync sync --drawing site.json --dry-run --json")]
    Sync {
        #[arg(long)]
        json: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// Treat one Main or Page table as ground truth for its instances
    #[command(after_help = "\
Examples:
  xingsync adopt --table 3 --drawing site.json
  xingsync tables --drawing site.json --json   # list table ids")]
    Adopt {
        /// Table id, as listed by `xingsync tables`
        #[arg(long)]
        table: u64,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        dry_run: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  xingsync-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = commands::Context::load(cli.drawing, cli.config).and_then(|ctx| match cli.command {
        Commands::Scan { json } => commands::cmd_scan(&ctx, json),
        Commands::Tables { json, dry_run } => commands::cmd_tables(&ctx, json, dry_run),
        Commands::Export { output } => commands::cmd_export(&ctx, output),
        Commands::Import { file, json, dry_run } => commands::cmd_import(&ctx, file, json, dry_run),
        Commands::Duplicates {
            latlong,
            choose,
            accept_defaults,
            json,
            dry_run,
        } => commands::cmd_duplicates(&ctx, latlong, choose, accept_defaults, json, dry_run),
        Commands::Sync { json, dry_run } => commands::cmd_sync(&ctx, json, dry_run),
        Commands::Adopt { table, json, dry_run } => commands::cmd_adopt(&ctx, table, json, dry_run),
    });

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(EXIT_CONFIG, msg)
    }

    pub fn drawing(msg: impl Into<String>) -> Self {
        Self::new(EXIT_DRAWING_IO, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let code = recon_exit_code(&err);
        let hint = match &err {
            ReconError::BlankKey { .. } | ReconError::DuplicateKey { .. } => {
                Some("every data line needs a unique, non-blank CROSSING".to_string())
            }
            ReconError::MissingBlockDefinition(_) => {
                Some("insert the block definition into the drawing, then retry".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }
}
