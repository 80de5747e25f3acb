use anyhow::Result;

use homechef_core::service::HomeChefService;

use super::helpers::{exit_empty, print_json, print_pantry_table};

pub(crate) fn cmd_pantry_list(service: &HomeChefService, json: bool) -> Result<()> {
    let items = service.list_pantry()?;
    if items.is_empty() {
        exit_empty("Pantry is empty. Add items with: homechef pantry add <item>", json);
    }
    if json {
        return print_json(&items);
    }
    print_pantry_table(&items);
    Ok(())
}

/// `add` refuses names already in the pantry, `set` adds or updates.
pub(crate) fn cmd_pantry_add(
    service: &HomeChefService,
    name: &str,
    quantity: &str,
    upsert: bool,
    json: bool,
) -> Result<()> {
    let item = if upsert {
        service.set_pantry_item(name, quantity)?
    } else {
        service.add_pantry_item(name, quantity)?
    };
    if json {
        return print_json(&item);
    }
    if item.quantity.is_empty() {
        println!("Pantry: {}", item.name);
    } else {
        println!("Pantry: {} — {}", item.name, item.quantity);
    }
    Ok(())
}

pub(crate) fn cmd_pantry_remove(service: &HomeChefService, name: &str, json: bool) -> Result<()> {
    service.remove_pantry_item(name)?;
    if json {
        println!("{}", serde_json::json!({ "removed": name.trim() }));
    } else {
        println!("Removed {} from the pantry", name.trim());
    }
    Ok(())
}
