use anyhow::{Context, Result, bail};
use std::path::Path;

use homechef_core::export::{
    grocery_text, parse_grocery_csv, write_grocery_csv, write_grocery_csv_file, write_grocery_text,
};
use homechef_core::service::HomeChefService;

use super::helpers::{exit_empty, print_grocery_table, print_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum ListFormat {
    Txt,
    Csv,
}

impl ListFormat {
    /// Guess from a file extension, defaulting to text.
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ListFormat::Csv,
            _ => ListFormat::Txt,
        }
    }
}

pub(crate) fn cmd_grocery_list(service: &HomeChefService, json: bool) -> Result<()> {
    let items = service.list_grocery()?;
    if items.is_empty() {
        exit_empty("Grocery list is empty", json);
    }
    if json {
        return print_json(&items);
    }
    print_grocery_table(&items);
    let open = items.iter().filter(|i| !i.checked).count();
    println!("{open} of {} item(s) still to buy", items.len());
    Ok(())
}

/// `add` refuses names already on the list, `--update` changes the quantity instead.
pub(crate) fn cmd_grocery_add(
    service: &HomeChefService,
    name: &str,
    quantity: &str,
    upsert: bool,
    json: bool,
) -> Result<()> {
    let item = if upsert {
        service.upsert_grocery_item(name, quantity)?
    } else {
        service.add_grocery_item(name, quantity)?
    };
    if json {
        return print_json(&item);
    }
    println!("Grocery list: {}", item.name);
    Ok(())
}

pub(crate) fn cmd_grocery_check(
    service: &HomeChefService,
    names: &[String],
    checked: bool,
    json: bool,
) -> Result<()> {
    for name in names {
        service.set_grocery_checked(name, checked)?;
    }
    if json {
        println!("{}", serde_json::json!({ "items": names, "checked": checked }));
    } else {
        let marker = if checked { "[x]" } else { "[ ]" };
        for name in names {
            println!("{marker} {}", name.trim());
        }
    }
    Ok(())
}

pub(crate) fn cmd_grocery_rename(
    service: &HomeChefService,
    old_name: &str,
    new_name: &str,
    json: bool,
) -> Result<()> {
    let item = service.rename_grocery_item(old_name, new_name)?;
    if json {
        return print_json(&item);
    }
    println!("Renamed {} to {}", old_name.trim(), item.name);
    Ok(())
}

pub(crate) fn cmd_grocery_remove(service: &HomeChefService, name: &str, json: bool) -> Result<()> {
    service.remove_grocery_item(name)?;
    if json {
        println!("{}", serde_json::json!({ "removed": name.trim() }));
    } else {
        println!("Removed {} from the grocery list", name.trim());
    }
    Ok(())
}

pub(crate) fn cmd_grocery_clear(
    service: &HomeChefService,
    only_checked: bool,
    json: bool,
) -> Result<()> {
    let removed = service.clear_grocery(only_checked)?;
    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else if only_checked {
        println!("Removed {removed} checked item(s)");
    } else {
        println!("Removed {removed} item(s)");
    }
    Ok(())
}

pub(crate) fn cmd_grocery_from_recipe(
    service: &HomeChefService,
    recipe_id: i64,
    json: bool,
) -> Result<()> {
    let added = service.add_missing_to_grocery(recipe_id)?;
    if json {
        return print_json(&added);
    }
    if added.is_empty() {
        println!("Nothing to add: the pantry and grocery list already cover this recipe");
        return Ok(());
    }
    for item in &added {
        if item.quantity.is_empty() {
            println!("+ {}", item.name);
        } else {
            println!("+ {} — {}", item.name, item.quantity);
        }
    }
    println!("Added {} item(s) to the grocery list", added.len());
    Ok(())
}

pub(crate) fn cmd_grocery_export(
    service: &HomeChefService,
    output: Option<&Path>,
    format: Option<ListFormat>,
    json: bool,
) -> Result<()> {
    let items = service.list_grocery()?;
    if items.is_empty() {
        exit_empty("Grocery list is empty", json);
    }
    let Some(path) = output else {
        match format.unwrap_or(ListFormat::Txt) {
            ListFormat::Txt => print!("{}", grocery_text(&items)),
            ListFormat::Csv => write_grocery_csv(&items, std::io::stdout().lock())?,
        }
        return Ok(());
    };

    match format.unwrap_or_else(|| ListFormat::from_path(path)) {
        ListFormat::Txt => write_grocery_text(&items, path)?,
        ListFormat::Csv => write_grocery_csv_file(&items, path)?,
    }
    if json {
        println!("{}", serde_json::json!({ "exported": items.len(), "path": path }));
    } else {
        println!("Exported {} item(s) to {}", items.len(), path.display());
    }
    Ok(())
}

pub(crate) fn cmd_grocery_import(service: &HomeChefService, file: &Path, json: bool) -> Result<()> {
    if ListFormat::from_path(file) != ListFormat::Csv {
        bail!("Grocery import expects a .csv file with an 'item' column");
    }
    let reader = std::fs::File::open(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let items = parse_grocery_csv(reader)?;
    let added = service.import_grocery(&items)?;
    let skipped = items.len() - added;
    if json {
        println!("{}", serde_json::json!({ "added": added, "skipped": skipped }));
    } else {
        println!("Imported {added} item(s), skipped {skipped} already on the list");
    }
    Ok(())
}
