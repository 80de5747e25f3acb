use anyhow::{Context, Result};
use std::path::Path;

use homechef_core::models::LibraryExport;
use homechef_core::service::HomeChefService;

use super::helpers::print_json;

pub(crate) fn cmd_library_export(
    service: &HomeChefService,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let export = service.export_library()?;
    let Some(path) = output else {
        return print_json(&export);
    };
    let data = serde_json::to_string_pretty(&export)?;
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "recipes": export.recipes.len(),
                "favorites": export.favorites.len(),
                "path": path,
            })
        );
    } else {
        println!(
            "Exported {} recipe(s) and {} favorite(s) to {}",
            export.recipes.len(),
            export.favorites.len(),
            path.display()
        );
    }
    Ok(())
}

pub(crate) fn cmd_library_import(service: &HomeChefService, file: &Path, json: bool) -> Result<()> {
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let export: LibraryExport = serde_json::from_str(&data)
        .with_context(|| format!("{} is not a HomeChef library export", file.display()))?;
    let summary = service.import_library(&export)?;
    if json {
        return print_json(&summary);
    }
    println!(
        "Imported library: {} new, {} updated, {} favorite(s)",
        summary.recipes_inserted, summary.recipes_updated, summary.favorites_set
    );
    Ok(())
}
