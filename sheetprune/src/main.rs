use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use sheetprune_core::{
    CancelToken, CellCoordinate, EditorConfig, EditorSession, NoProgress, SaveMode, Selection,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod formatter;

#[derive(Parser)]
#[command(name = "sheetprune")]
#[command(about = "Mark or remove pictures anchored to worksheet cells", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the XLSX file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Worksheet name (exact match)
    #[arg(short, long)]
    sheet: String,

    /// Scan window, as `B:K,7:34` or `B7:K34`
    #[arg(short, long)]
    range: String,

    /// Only recolour description cells instead of removing pictures
    #[arg(long)]
    dry_run: bool,

    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Toggle the picture anchored at this cell (repeatable)
    #[arg(short, long, value_name = "CELL")]
    delete: Vec<String>,

    /// Mark every picture in the range
    #[arg(long)]
    delete_all: bool,

    /// Print the entries before saving
    #[arg(short, long)]
    list: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    format: OutputFormat,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// JSON output for scripting
    Json,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sheetprune=info,sheetprune_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let config = EditorConfig::discover(cli.config.as_deref(), &cwd)
        .context("Failed to load configuration")?;

    let mode = if cli.dry_run {
        SaveMode::Annotate
    } else {
        SaveMode::Purge
    };

    let mut session = EditorSession::open(&cli.file, &cli.sheet, &cli.range, mode, config)
        .with_context(|| format!("Failed to open {}", cli.file.display()))?;
    session
        .load(&CancelToken::new(), &mut NoProgress)
        .with_context(|| format!("Failed to scan sheet '{}'", cli.sheet))?;

    if cli.delete_all {
        session.set_deleted_bulk(&Selection::All, true);
    }
    for cell_ref in &cli.delete {
        let Some(cell) = CellCoordinate::parse(cell_ref) else {
            bail!("'{cell_ref}' is not a cell reference");
        };
        session
            .toggle_deleted(cell)
            .with_context(|| format!("Cannot mark {cell_ref}"))?;
    }

    if cli.list {
        match cli.format {
            OutputFormat::Human => formatter::print_entries(&session),
            OutputFormat::Json => formatter::print_entries_json(&session)?,
        }
    }

    if !session.model().is_dirty() {
        if matches!(cli.format, OutputFormat::Human) {
            formatter::print_nothing_to_save();
        }
        return Ok(());
    }

    let report = session
        .save(&mut |value: usize, max: usize| tracing::debug!(value, max, "save progress"))
        .context("Save failed; the source file was not modified")?;

    match cli.format {
        OutputFormat::Human => formatter::print_report(&report),
        OutputFormat::Json => formatter::print_report_json(&report)?,
    }
    Ok(())
}
