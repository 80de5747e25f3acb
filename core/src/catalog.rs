use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::db::Database;
use crate::models::{Recipe, RecipeFilter};

/// Read-through view of the stored recipes.
///
/// The snapshot is reloaded only when the store's recipe write counter has
/// moved since the last load.
#[derive(Debug, Default)]
pub struct RecipeCatalog {
    snapshot: Option<Snapshot>,
    loads: u64,
}

#[derive(Debug)]
struct Snapshot {
    generation: u64,
    recipes: Arc<Vec<Recipe>>,
}

impl RecipeCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recipes ordered by title, shared so they can be handed to a worker task.
    pub fn recipes(&mut self, db: &Database) -> Result<Arc<Vec<Recipe>>> {
        let generation = db.recipe_generation();
        if let Some(snapshot) = &self.snapshot {
            if snapshot.generation == generation {
                return Ok(Arc::clone(&snapshot.recipes));
            }
        }
        let recipes = Arc::new(db.list_recipes()?);
        self.loads += 1;
        debug!(count = recipes.len(), generation, "Loaded recipe catalog");
        self.snapshot = Some(Snapshot {
            generation,
            recipes: Arc::clone(&recipes),
        });
        Ok(recipes)
    }

    /// Recipes matching `filter`, ordered by time then title.
    pub fn search(&mut self, db: &Database, filter: &RecipeFilter) -> Result<Vec<Recipe>> {
        let favorites = if filter.favorites_only {
            Some(db.favorite_ids()?)
        } else {
            None
        };
        let recipes = self.recipes(db)?;
        let mut found: Vec<Recipe> = recipes
            .iter()
            .filter(|r| favorites.as_ref().is_none_or(|ids| ids.contains(&r.id)))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.time_minutes
                .cmp(&b.time_minutes)
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ingredient, NewRecipe};

    fn new_recipe(title: &str, minutes: i64, difficulty: &str, categories: &[&str]) -> NewRecipe {
        NewRecipe {
            title: title.to_string(),
            description: format!("{title} description"),
            ingredients: vec![Ingredient::new("salt", "")],
            steps: vec!["Cook".to_string()],
            time_minutes: minutes,
            difficulty: difficulty.to_string(),
            image_path: None,
            categories: categories.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_recipe(&new_recipe("Risotto", 40, "Medium", &["Italian", "Vegetarian"]))
            .unwrap();
        db.insert_recipe(&new_recipe("Bruschetta", 15, "Easy", &["Italian"]))
            .unwrap();
        db.insert_recipe(&new_recipe("Tacos", 15, "Easy", &["Mexican"]))
            .unwrap();
        db
    }

    #[test]
    fn test_snapshot_reused_until_write() {
        let db = seeded();
        let mut catalog = RecipeCatalog::new();
        assert_eq!(catalog.recipes(&db).unwrap().len(), 3);
        assert_eq!(catalog.recipes(&db).unwrap().len(), 3);
        assert_eq!(catalog.loads, 1);

        db.insert_recipe(&new_recipe("Pho", 60, "Hard", &["Vietnamese"]))
            .unwrap();
        assert_eq!(catalog.recipes(&db).unwrap().len(), 4);
        assert_eq!(catalog.loads, 2);

        catalog.recipes(&db).unwrap();
        assert_eq!(catalog.loads, 2);
    }

    #[test]
    fn test_search_orders_by_time_then_title() {
        let db = seeded();
        let mut catalog = RecipeCatalog::new();
        let titles: Vec<String> = catalog
            .search(&db, &RecipeFilter::default())
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Bruschetta", "Tacos", "Risotto"]);
    }

    #[test]
    fn test_search_filters() {
        let db = seeded();
        let mut catalog = RecipeCatalog::new();

        let italian = RecipeFilter {
            categories: vec!["italian".to_string()],
            ..RecipeFilter::default()
        };
        assert_eq!(catalog.search(&db, &italian).unwrap().len(), 2);

        let quick_italian = RecipeFilter {
            max_time: Some(20),
            ..italian
        };
        let found = catalog.search(&db, &quick_italian).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Bruschetta");

        let hard = RecipeFilter {
            difficulty: Some("Hard".to_string()),
            ..RecipeFilter::default()
        };
        assert!(catalog.search(&db, &hard).unwrap().is_empty());
    }

    #[test]
    fn test_search_favorites_only() {
        let db = seeded();
        let mut catalog = RecipeCatalog::new();
        let tacos = db.find_recipes_by_titles(&["Tacos".to_string()]).unwrap();
        db.set_favorite(tacos[0].id, true).unwrap();

        let favorites = RecipeFilter {
            favorites_only: true,
            ..RecipeFilter::default()
        };
        let found = catalog.search(&db, &favorites).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Tacos");
    }
}
