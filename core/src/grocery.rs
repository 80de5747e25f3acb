use std::collections::HashSet;

use crate::models::{GroceryItem, Ingredient, NewGroceryItem, Recipe, ingredient_key};

/// Ingredients of `recipe` not covered by the pantry, in recipe order.
#[must_use]
pub fn missing_ingredients(recipe: &Recipe, pantry_names: &[String]) -> Vec<Ingredient> {
    let pantry: HashSet<String> = pantry_names.iter().map(|n| ingredient_key(n)).collect();
    let mut seen = HashSet::new();
    recipe
        .ingredients
        .iter()
        .filter(|i| {
            let key = ingredient_key(&i.name);
            !key.is_empty() && !pantry.contains(&key) && seen.insert(key)
        })
        .cloned()
        .collect()
}

/// Grocery items to add for `recipe`: its missing ingredients minus anything
/// already on the list. Existing items are left alone, so a second call with
/// the same state returns nothing.
#[must_use]
pub fn reconcile(
    recipe: &Recipe,
    pantry_names: &[String],
    existing: &[GroceryItem],
) -> Vec<NewGroceryItem> {
    let listed: HashSet<String> = existing.iter().map(|g| ingredient_key(&g.name)).collect();
    missing_ingredients(recipe, pantry_names)
        .into_iter()
        .filter(|i| !listed.contains(&ingredient_key(&i.name)))
        .map(|i| NewGroceryItem::unchecked(&i.name, &i.quantity))
        .collect()
}
