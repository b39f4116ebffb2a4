//! Command bodies. Each one loads the snapshot, runs one engine entry point
//! under its own `CommandLog`, and saves the snapshot back unless the run
//! was read-only or `--dry-run`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use xingsync_recon::engine;
use xingsync_recon::{
    CommandLog, DuplicateKind, EngineConfig, MemoryDrawing, ReconError, ResolutionUi, StoreError,
    TableId,
};

use crate::exit_codes::{EXIT_RESOLUTION_CANCELLED, EXIT_USAGE};
use crate::ui::{PromptUi, ScriptedUi};
use crate::CliError;

pub struct Context {
    pub drawing_path: PathBuf,
    pub config: EngineConfig,
}

impl Context {
    pub fn load(drawing: Option<PathBuf>, config: Option<PathBuf>) -> Result<Self, CliError> {
        let drawing_path = drawing.ok_or_else(|| {
            CliError::usage("no drawing snapshot given")
                .with_hint("pass --drawing <snapshot.json> or set XINGSYNC_DRAWING")
        })?;
        Ok(Self {
            drawing_path,
            config: load_config(config)?,
        })
    }

    fn load_drawing(&self) -> Result<MemoryDrawing, CliError> {
        let text = fs::read_to_string(&self.drawing_path).map_err(|e| {
            CliError::drawing(format!("cannot read {}: {e}", self.drawing_path.display()))
        })?;
        MemoryDrawing::from_json(&text).map_err(|e| {
            CliError::drawing(format!("{}: invalid snapshot: {e}", self.drawing_path.display()))
        })
    }

    fn save_drawing(&self, drawing: &MemoryDrawing, dry_run: bool) -> Result<(), CliError> {
        if dry_run {
            eprintln!("dry run: {} left unchanged", self.drawing_path.display());
            return Ok(());
        }
        let text = drawing
            .to_json()
            .map_err(|e| CliError::drawing(format!("cannot serialize snapshot: {e}")))?;
        fs::write(&self.drawing_path, text).map_err(|e| {
            CliError::drawing(format!("cannot write {}: {e}", self.drawing_path.display()))
        })
    }
}

/// `--config`, else the per-user config file if present, else defaults.
pub fn load_config(path: Option<PathBuf>) -> Result<EngineConfig, CliError> {
    let path = match path {
        Some(p) => p,
        None => match dirs::config_dir().map(|d| d.join("xingsync").join("config.toml")) {
            Some(p) if p.exists() => p,
            _ => return Ok(EngineConfig::default()),
        },
    };
    let text = fs::read_to_string(&path)
        .map_err(|e| CliError::config(format!("cannot read {}: {e}", path.display())))?;
    EngineConfig::from_toml(&text)
        .map_err(|e| CliError::config(format!("{}: {e}", path.display())))
}

fn print_json<T: serde::Serialize>(report: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(report)
        .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;
    println!("{text}");
    Ok(())
}

fn finish(mut log: CommandLog) {
    let warnings = log.warnings().count();
    log.finish();
    if warnings > 0 {
        eprintln!("{warnings} warning(s); run with RUST_LOG=debug for detail");
    }
}

// ============================================================================
// scan
// ============================================================================

pub fn cmd_scan(ctx: &Context, json: bool) -> Result<(), CliError> {
    let drawing = ctx.load_drawing()?;
    let mut log = CommandLog::start("scan");
    let (_, report) = engine::scan(&drawing, &ctx.config, &mut log);

    if json {
        print_json(&report)?;
    } else {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for r in &report.records {
            let v = &r.values;
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{} instance(s)",
                v.crossing,
                v.owner,
                v.description,
                v.location,
                r.all_instances.len()
            )
            .map_err(|e| CliError::general(e.to_string()))?;
        }
        let s = &report.stats;
        eprintln!(
            "{} instances, {} records, {} duplicate keys, {} blank keys, {} coordinate rows ({} unattached)",
            s.instances,
            s.records,
            s.duplicate_keys,
            s.blank_keys,
            s.coordinate_rows,
            s.coordinate_rows_unattached
        );
    }
    finish(log);
    Ok(())
}

// ============================================================================
// tables
// ============================================================================

pub fn cmd_tables(ctx: &Context, json: bool, dry_run: bool) -> Result<(), CliError> {
    let mut drawing = ctx.load_drawing()?;
    let mut log = CommandLog::start("tables");
    let report = engine::classify_tables(&mut drawing, &ctx.config, &mut log);

    if json {
        print_json(&report)?;
    } else {
        for t in &report.tables {
            let source = if t.from_tag { "tag" } else { "header" };
            println!(
                "{}\t{}\t{}x{}\tdata from row {} ({source})",
                t.table,
                t.shape,
                t.rows,
                t.cols,
                t.data_start + 1
            );
        }
    }
    if report.tags_persisted > 0 {
        ctx.save_drawing(&drawing, dry_run)?;
    }
    finish(log);
    Ok(())
}

// ============================================================================
// export / import
// ============================================================================

pub fn cmd_export(ctx: &Context, output: Option<PathBuf>) -> Result<(), CliError> {
    let drawing = ctx.load_drawing()?;
    let mut log = CommandLog::start("export");

    let count = match &output {
        Some(path) => {
            let file = fs::File::create(path)
                .map_err(|e| CliError::general(format!("cannot create {}: {e}", path.display())))?;
            engine::export_flat(&drawing, file, &ctx.config, &mut log)?
        }
        None => engine::export_flat(&drawing, io::stdout().lock(), &ctx.config, &mut log)?,
    };
    if let Some(path) = output {
        eprintln!("wrote {count} record(s) to {}", path.display());
    }
    finish(log);
    Ok(())
}

pub fn cmd_import(ctx: &Context, file: PathBuf, json: bool, dry_run: bool) -> Result<(), CliError> {
    let input = fs::File::open(&file)
        .map_err(|e| CliError::usage(format!("cannot open {}: {e}", file.display())))?;
    let mut drawing = ctx.load_drawing()?;
    let mut log = CommandLog::start("import");

    let report = engine::import_flat(&mut drawing, input, &ctx.config, &mut log)
        .map_err(|e| with_path(e, &file))?;

    if json {
        print_json(&report)?;
    } else {
        eprintln!(
            "{} record(s): {} updated, {} inserted, {} write failure(s)",
            report.records,
            report.updated,
            report.inserted.len(),
            report.write_failures
        );
    }
    ctx.save_drawing(&drawing, dry_run)?;
    finish(log);
    Ok(())
}

fn with_path(err: ReconError, file: &Path) -> CliError {
    let mut cli = CliError::from(err);
    cli.message = format!("{}: {}", file.display(), cli.message);
    cli
}

// ============================================================================
// duplicates
// ============================================================================

pub fn cmd_duplicates(
    ctx: &Context,
    latlong: bool,
    choose: Vec<String>,
    accept_defaults: bool,
    json: bool,
    dry_run: bool,
) -> Result<(), CliError> {
    let choices = choose
        .iter()
        .map(|c| ScriptedUi::parse_choice(c))
        .collect::<Result<Vec<_>, _>>()
        .map_err(CliError::usage)?;

    let mut ui: Box<dyn ResolutionUi> = if choices.is_empty() && !accept_defaults {
        Box::new(PromptUi)
    } else {
        Box::new(ScriptedUi::new(choices))
    };
    let kind = if latlong { DuplicateKind::LatLong } else { DuplicateKind::Instance };

    let mut drawing = ctx.load_drawing()?;
    let mut log = CommandLog::start("duplicates");
    let (_, report) =
        engine::resolve_duplicates(&mut drawing, kind, ui.as_mut(), &ctx.config, &mut log);

    if json {
        print_json(&report)?;
    } else if report.groups == 0 {
        eprintln!("no duplicates found");
    } else if !report.cancelled {
        for choice in &report.accepted {
            println!("{}\t{}", choice.crossing, choice.source);
        }
        let failures: usize = report.tables.iter().map(|t| t.failures).sum();
        eprintln!(
            "{} group(s) resolved, {} instance write failure(s), {} table cell failure(s)",
            report.accepted.len(),
            report.instance_write_failures,
            failures
        );
    }

    if report.cancelled {
        finish(log);
        return Err(CliError::new(EXIT_RESOLUTION_CANCELLED, "resolution cancelled, nothing applied"));
    }
    if report.groups > 0 {
        ctx.save_drawing(&drawing, dry_run)?;
    }
    finish(log);
    Ok(())
}

// ============================================================================
// sync / adopt
// ============================================================================

pub fn cmd_sync(ctx: &Context, json: bool, dry_run: bool) -> Result<(), CliError> {
    let mut drawing = ctx.load_drawing()?;
    let mut log = CommandLog::start("sync");
    let report = engine::sync_tables(&mut drawing, &ctx.config, &mut log);

    if json {
        print_json(&report)?;
    } else {
        for t in &report.tables {
            println!(
                "{}\t{}\t{} matched, {} changed, {} unmatched, {} ambiguous",
                t.table, t.shape, t.matched, t.changed, t.unmatched, t.ambiguous
            );
        }
        if !report.skipped.is_empty() {
            eprintln!("{} unclassified table(s) skipped", report.skipped.len());
        }
    }
    ctx.save_drawing(&drawing, dry_run)?;
    finish(log);
    Ok(())
}

pub fn cmd_adopt(ctx: &Context, table: u64, json: bool, dry_run: bool) -> Result<(), CliError> {
    let mut drawing = ctx.load_drawing()?;
    let mut log = CommandLog::start("adopt");
    let report = match engine::adopt_table(&mut drawing, TableId(table), &ctx.config, &mut log) {
        Ok(report) => report,
        Err(ReconError::Store(StoreError::NotFound(what))) => {
            return Err(CliError::new(EXIT_USAGE, format!("{what} not found"))
                .with_hint("run `xingsync tables` to list table ids"));
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(reason) = &report.skipped {
        return Err(CliError::usage(format!("table {}: {reason}", report.table))
            .with_hint("only Main and Page tables can be adopted"));
    }
    if json {
        print_json(&report)?;
    } else {
        for a in &report.adopted {
            println!("{}\trow {}\t{}", a.id, a.row + 1, a.crossing);
        }
        eprintln!(
            "{} instance(s) updated, {} unmatched, {} duplicate key(s) in table",
            report.adopted.len(),
            report.unmatched.len(),
            report.duplicate_keys.len()
        );
    }
    ctx.save_drawing(&drawing, dry_run)?;
    finish(log);
    Ok(())
}
