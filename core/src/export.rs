use std::fmt::Write as _;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::models::{GroceryItem, NewGroceryItem, Recipe};

// --- Grocery list ---

/// One line per item: `[ ] item — quantity`, `[x]` when checked.
#[must_use]
pub fn grocery_text(items: &[GroceryItem]) -> String {
    let mut out = String::new();
    for item in items {
        let marker = if item.checked { "[x]" } else { "[ ]" };
        if item.quantity.trim().is_empty() {
            let _ = writeln!(out, "{marker} {}", item.name);
        } else {
            let _ = writeln!(out, "{marker} {} — {}", item.name, item.quantity);
        }
    }
    out
}

pub fn write_grocery_text(items: &[GroceryItem], path: &Path) -> Result<()> {
    fs::write(path, grocery_text(items))
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Writes `item,quantity,checked` rows with a header.
pub fn write_grocery_csv<W: Write>(items: &[GroceryItem], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["item", "quantity", "checked"])?;
    for item in items {
        wtr.write_record([
            item.name.as_str(),
            item.quantity.as_str(),
            if item.checked { "true" } else { "false" },
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_grocery_csv_file(items: &[GroceryItem], path: &Path) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_grocery_csv(items, file)
}

/// Parse a grocery CSV with at least an `item` column. `quantity` and
/// `checked` are optional.
pub fn parse_grocery_csv<R: Read>(reader: R) -> Result<Vec<NewGroceryItem>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let Some(idx_item) = col("item") else {
        bail!("Missing required column: item");
    };
    let idx_quantity = col("quantity");
    let idx_checked = col("checked");

    let mut items = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;
        let name = record.get(idx_item).unwrap_or("").to_string();
        if name.is_empty() {
            continue;
        }
        let quantity = idx_quantity
            .and_then(|i| record.get(i))
            .unwrap_or("")
            .to_string();
        let checked = idx_checked
            .and_then(|i| record.get(i))
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "x"));
        items.push(NewGroceryItem {
            name,
            quantity,
            checked,
        });
    }
    Ok(items)
}

// --- Recipes ---

#[must_use]
pub fn recipe_text(recipe: &Recipe) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", recipe.title);
    let _ = writeln!(out, "{}", "=".repeat(recipe.title.chars().count().max(1)));

    let mut meta = vec![format!("{} min", recipe.time_minutes)];
    if !recipe.difficulty.is_empty() {
        meta.push(recipe.difficulty.clone());
    }
    if !recipe.categories.is_empty() {
        meta.push(recipe.categories.join(", "));
    }
    let _ = writeln!(out, "{}", meta.join(" | "));

    if !recipe.description.is_empty() {
        let _ = writeln!(out, "\n{}", recipe.description);
    }

    out.push_str("\nIngredients:\n");
    for ingredient in &recipe.ingredients {
        if ingredient.quantity.is_empty() {
            let _ = writeln!(out, "- {}", ingredient.name);
        } else {
            let _ = writeln!(out, "- {} — {}", ingredient.name, ingredient.quantity);
        }
    }

    out.push_str("\nSteps:\n");
    for (i, step) in recipe.steps.iter().enumerate() {
        let _ = writeln!(out, "{}. {step}", i + 1);
    }
    out
}

pub fn write_recipe_text(recipe: &Recipe, path: &Path) -> Result<()> {
    fs::write(path, recipe_text(recipe))
        .with_context(|| format!("Failed to write {}", path.display()))
}
