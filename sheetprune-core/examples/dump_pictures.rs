use anyhow::Result;
use sheetprune_core::reader::ScanOptions;
use sheetprune_core::{NoProgress, PictureIndex};
use std::env;
use std::path::Path;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <file.xlsx> [sheet_name]", args[0]);
        std::process::exit(1);
    }

    let file_path = Path::new(&args[1]);
    let target_sheet = args.get(2).map(|s| s.as_str());

    println!("Reading package: {}", file_path.display());
    let index = PictureIndex::open(file_path)?;

    for sheet in index.sheets() {
        if let Some(target) = target_sheet {
            if sheet.name != target {
                continue;
            }
        }

        println!("\n=== Sheet: {} ({}) ===", sheet.name, sheet.part);
        let outcome = index.scan(sheet.index, &ScanOptions::default(), &mut NoProgress)?;

        if outcome.records.is_empty() {
            println!("No cell-anchored pictures");
            continue;
        }

        for record in &outcome.records {
            let kind = record.image.kind.map(|k| k.as_str()).unwrap_or("?");
            let size = record
                .image
                .dimensions
                .map(|(w, h)| format!("{w}x{h}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:>8}  {:<6} {:<28} {:<5} {:>9}  {} bytes",
                record.coordinate.to_a1(),
                record.relationship_id,
                record.media_path,
                kind,
                size,
                record.image.bytes.len()
            );
        }

        for warning in &outcome.warnings {
            println!("warning at {}: {}", warning.coordinate.to_a1(), warning.error);
        }
    }

    Ok(())
}
