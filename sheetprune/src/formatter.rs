//! Output formatters for entries and save reports

use anyhow::Result;
use colored::*;
use serde::Serialize;
use sheetprune_core::{EditorSession, ImageKind, SaveMode, SaveReport};

#[derive(Serialize)]
struct EntryView<'a> {
    cell: String,
    media: &'a str,
    kind: Option<ImageKind>,
    width: Option<u32>,
    height: Option<u32>,
    description: &'a str,
    deleted: bool,
}

#[derive(Serialize)]
struct EntriesView<'a> {
    file: String,
    sheet: &'a str,
    range: String,
    entries: Vec<EntryView<'a>>,
    warnings: Vec<String>,
}

/// Print entries as a colored table
pub fn print_entries(session: &EditorSession) {
    let model = session.model();
    println!(
        "{} {} {} {}",
        "Sheet:".bold(),
        session.sheet_name().cyan().bold(),
        "Range:".bold(),
        session.range().to_string().cyan()
    );
    println!();

    if model.is_empty() {
        println!("{}", "No pictures found in range".yellow());
    }

    for entry in model.entries() {
        let marker = if entry.deleted {
            "✗".red().bold()
        } else {
            "✓".green().bold()
        };
        let kind = entry
            .image
            .kind
            .map(|kind| kind.as_str().to_string())
            .unwrap_or_else(|| "?".to_string());
        let size = entry
            .image
            .dimensions
            .map(|(w, h)| format!("{w}x{h}"))
            .unwrap_or_default();
        println!(
            "  {} {:>8}  {:<28} {:<5} {:>9}  {}",
            marker,
            entry.coordinate.to_a1().yellow(),
            entry.media_path,
            kind,
            size,
            entry.description.dimmed()
        );
    }

    for warning in session.warnings() {
        println!(
            "  {} {}: {}",
            "warning".yellow().bold(),
            warning.coordinate.to_a1(),
            warning.error
        );
    }

    println!();
    println!(
        "{} {} kept, {} deleted",
        "Summary:".bold(),
        model.kept().count().to_string().green(),
        model.deleted().count().to_string().red()
    );
}

/// Print entries as JSON
pub fn print_entries_json(session: &EditorSession) -> Result<()> {
    let view = EntriesView {
        file: session.source().display().to_string(),
        sheet: session.sheet_name(),
        range: session.range().to_string(),
        entries: session
            .model()
            .entries()
            .iter()
            .map(|entry| EntryView {
                cell: entry.coordinate.to_a1(),
                media: &entry.media_path,
                kind: entry.image.kind,
                width: entry.image.dimensions.map(|(w, _)| w),
                height: entry.image.dimensions.map(|(_, h)| h),
                description: &entry.description,
                deleted: entry.deleted,
            })
            .collect(),
        warnings: session
            .warnings()
            .iter()
            .map(|warning| format!("{}: {}", warning.coordinate.to_a1(), warning.error))
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

pub fn print_nothing_to_save() {
    println!("{}", "Nothing marked, no file written".dimmed());
}

/// Print the outcome of a save
pub fn print_report(report: &SaveReport) {
    let verb = match report.mode {
        SaveMode::Annotate => "Annotated",
        SaveMode::Purge => "Purged",
    };
    println!(
        "{} {}",
        format!("✓ {verb}:").green().bold(),
        report.path.display()
    );
    if report.mode == SaveMode::Purge {
        println!(
            "  {} anchors, {} relationships, {} media files removed",
            report.removed_anchors.len(),
            report.removed_relationships.len(),
            report.removed_media.len()
        );
        for media in &report.removed_media {
            println!("    {}", media.dimmed());
        }
    }
}

/// Print the outcome of a save as JSON
pub fn print_report_json(report: &SaveReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
