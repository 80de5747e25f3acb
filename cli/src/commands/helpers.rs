use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use homechef_core::error::SuggestError;
use homechef_core::models::{GroceryItem, Ingredient, PantryItem, Recipe};

/// Parse `name:quantity` (quantity optional) from a command-line argument.
pub(crate) fn parse_ingredient_arg(s: &str) -> Result<Ingredient> {
    let (name, quantity) = s.split_once(':').unwrap_or((s, ""));
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid ingredient '{s}'. Use 'name' or 'name:quantity'");
    }
    Ok(Ingredient::new(name, quantity.trim()))
}

/// Turn a 1-based position typed by the user into an index into `len` items.
pub(crate) fn pick_index(position: usize, len: usize, what: &str) -> Result<usize> {
    if position == 0 || position > len {
        bail!("No {what} #{position} (choose 1-{len})");
    }
    Ok(position - 1)
}

/// Print an empty-state message and exit with code 2.
pub(crate) fn exit_empty(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

/// `EmptyResult` is an empty state, everything else becomes a command error.
pub(crate) fn suggest_failure(err: SuggestError, json: bool) -> anyhow::Error {
    if err.is_empty_result() {
        exit_empty("No suggestions found. Try adding more ingredients.", json);
    }
    anyhow::Error::new(err)
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

pub(crate) fn print_recipe_table(recipes: &[Recipe], favorites: &std::collections::HashSet<i64>) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Difficulty")]
        difficulty: String,
        #[tabled(rename = "Categories")]
        categories: String,
        #[tabled(rename = "Fav")]
        favorite: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            title: truncate(&r.title, 40),
            time: format!("{} min", r.time_minutes),
            difficulty: r.difficulty.clone(),
            categories: truncate(&r.categories.join(", "), 30),
            favorite: if favorites.contains(&r.id) { "*".into() } else { String::new() },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_pantry_table(items: &[PantryItem]) {
    #[derive(Tabled)]
    struct PantryRow {
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
    }

    let rows: Vec<PantryRow> = items
        .iter()
        .map(|i| PantryRow {
            name: truncate(&i.name, 35),
            quantity: i.quantity.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

pub(crate) fn print_grocery_table(items: &[GroceryItem]) {
    #[derive(Tabled)]
    struct GroceryRow {
        #[tabled(rename = " ")]
        checked: String,
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
    }

    let rows: Vec<GroceryRow> = items
        .iter()
        .map(|i| GroceryRow {
            checked: if i.checked { "[x]".into() } else { "[ ]".into() },
            name: truncate(&i.name, 35),
            quantity: i.quantity.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
