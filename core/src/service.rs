use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::RecipeCatalog;
use crate::db::Database;
use crate::error::ValidationError;
use crate::grocery;
use crate::models::{
    GroceryItem, Ingredient, LibraryExport, LibraryImportSummary, NewGroceryItem, NewRecipe,
    PantryItem, Recipe, RecipeFilter, SeedFile, canonical_difficulty, validate_item_name,
    validate_new_recipe,
};
use crate::orchestrator::SubstitutionCandidate;

const SEED_RECIPES: &str = include_str!("../data/seed_recipes.json");

/// Library, pantry and grocery operations over one local store.
pub struct HomeChefService {
    db: Database,
    catalog: RefCell<RecipeCatalog>,
}

impl HomeChefService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self::with_database(db))
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::with_database(db))
    }

    fn with_database(db: Database) -> Self {
        Self {
            db,
            catalog: RefCell::new(RecipeCatalog::new()),
        }
    }

    // --- Recipes ---

    /// Shared snapshot of every recipe, for handing to suggestion requests.
    pub fn catalog(&self) -> Result<Arc<Vec<Recipe>>> {
        self.catalog.borrow_mut().recipes(&self.db)
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        Ok(self.catalog()?.as_ref().clone())
    }

    pub fn search_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>> {
        self.catalog.borrow_mut().search(&self.db, filter)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.db.get_recipe(id)
    }

    pub fn find_recipes_by_titles(&self, titles: &[String]) -> Result<Vec<Recipe>> {
        self.db.find_recipes_by_titles(titles)
    }

    pub fn add_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let recipe = prepare_recipe(recipe)?;
        self.db.insert_recipe(&recipe)
    }

    pub fn update_recipe(&self, id: i64, recipe: &NewRecipe) -> Result<Recipe> {
        let recipe = prepare_recipe(recipe)?;
        self.db.update_recipe(id, &recipe)
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        self.db.delete_recipe(id)
    }

    /// Promote a generated suggestion into the library.
    pub fn save_generated_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let saved = self.add_recipe(recipe)?;
        info!(id = saved.id, title = %saved.title, "Saved generated recipe");
        Ok(saved)
    }

    /// Load the bundled recipes when the library is empty. Returns how many were added.
    pub fn seed_if_empty(&self) -> Result<usize> {
        if self.db.count_recipes()? > 0 {
            return Ok(0);
        }
        let seed: SeedFile =
            serde_json::from_str(SEED_RECIPES).context("Failed to parse bundled seed recipes")?;
        for recipe in &seed.recipes {
            self.add_recipe(recipe)?;
        }
        info!(count = seed.recipes.len(), "Seeded recipe library");
        Ok(seed.recipes.len())
    }

    // --- Favorites ---

    pub fn set_favorite(&self, recipe_id: i64, favorite: bool) -> Result<()> {
        if favorite && self.db.get_recipe(recipe_id).is_err() {
            return Err(ValidationError::UnknownRecipe(recipe_id).into());
        }
        self.db.set_favorite(recipe_id, favorite)
    }

    pub fn is_favorite(&self, recipe_id: i64) -> Result<bool> {
        self.db.is_favorite(recipe_id)
    }

    pub fn list_favorites(&self) -> Result<Vec<Recipe>> {
        self.db.list_favorite_recipes()
    }

    // --- Pantry ---

    pub fn list_pantry(&self) -> Result<Vec<PantryItem>> {
        self.db.list_pantry()
    }

    pub fn pantry_names(&self) -> Result<Vec<String>> {
        self.db.pantry_names()
    }

    /// Add a new pantry item. An existing item with the same normalized name
    /// is a validation error.
    pub fn add_pantry_item(&self, name: &str, quantity: &str) -> Result<PantryItem> {
        let name = validate_item_name(name)?;
        self.db
            .insert_pantry_item(&name, quantity)
            .map_err(|e| on_unique_violation(e, ValidationError::DuplicatePantryItem(name.clone())))
    }

    /// Add or update a pantry item's quantity.
    pub fn set_pantry_item(&self, name: &str, quantity: &str) -> Result<PantryItem> {
        let name = validate_item_name(name)?;
        self.db.upsert_pantry_item(&name, quantity)
    }

    pub fn remove_pantry_item(&self, name: &str) -> Result<()> {
        if !self.db.remove_pantry_item(name)? {
            return Err(ValidationError::UnknownPantryItem(name.trim().to_string()).into());
        }
        Ok(())
    }

    /// Accepting a substitution puts the substitute in the pantry. An item
    /// already there keeps its quantity.
    pub fn accept_substitution(&self, candidate: &SubstitutionCandidate) -> Result<PantryItem> {
        let name = validate_item_name(&candidate.substitute)?;
        if let Some(existing) = self.db.get_pantry_item(&name)? {
            return Ok(existing);
        }
        let item = self.db.insert_pantry_item(&name, "")?;
        info!(substitute = %item.name, replaces = %candidate.replaces, "Accepted substitution");
        Ok(item)
    }

    // --- Grocery ---

    pub fn list_grocery(&self) -> Result<Vec<GroceryItem>> {
        self.db.list_grocery()
    }

    /// Add an item, or update the quantity of an item already on the list.
    pub fn upsert_grocery_item(&self, name: &str, quantity: &str) -> Result<GroceryItem> {
        let name = validate_item_name(name)?;
        self.db.upsert_grocery_item(&name, quantity)
    }

    /// Add a new item. An existing item with the same normalized name is a
    /// validation error.
    pub fn add_grocery_item(&self, name: &str, quantity: &str) -> Result<GroceryItem> {
        let name = validate_item_name(name)?;
        self.db
            .insert_grocery_item(&NewGroceryItem::unchecked(&name, quantity))
            .map_err(|e| on_unique_violation(e, ValidationError::DuplicateGroceryItem(name.clone())))
    }

    pub fn set_grocery_checked(&self, name: &str, checked: bool) -> Result<()> {
        if !self.db.set_grocery_checked(name, checked)? {
            return Err(ValidationError::UnknownGroceryItem(name.trim().to_string()).into());
        }
        Ok(())
    }

    pub fn rename_grocery_item(&self, old_name: &str, new_name: &str) -> Result<GroceryItem> {
        let new_name = validate_item_name(new_name)?;
        let renamed = self
            .db
            .rename_grocery_item(old_name, &new_name)
            .map_err(|e| {
                on_unique_violation(e, ValidationError::DuplicateGroceryItem(new_name.clone()))
            })?;
        if !renamed {
            return Err(ValidationError::UnknownGroceryItem(old_name.trim().to_string()).into());
        }
        self.db
            .get_grocery_item(&new_name)?
            .context("Grocery item not found")
    }

    pub fn remove_grocery_item(&self, name: &str) -> Result<()> {
        if !self.db.remove_grocery_item(name)? {
            return Err(ValidationError::UnknownGroceryItem(name.trim().to_string()).into());
        }
        Ok(())
    }

    pub fn clear_grocery(&self, only_checked: bool) -> Result<usize> {
        self.db.clear_grocery(only_checked)
    }

    /// Add a recipe's missing ingredients to the grocery list. Returns the
    /// items that were added.
    pub fn add_missing_to_grocery(&self, recipe_id: i64) -> Result<Vec<NewGroceryItem>> {
        let recipe = self.recipe_or_validation_error(recipe_id)?;
        let pantry = self.db.pantry_names()?;
        let existing = self.db.list_grocery()?;
        let candidates = grocery::reconcile(&recipe, &pantry, &existing);
        let mut added = Vec::with_capacity(candidates.len());
        for item in candidates {
            if self.db.insert_grocery_if_absent(&item)? {
                added.push(item);
            }
        }
        info!(recipe = %recipe.title, added = added.len(), "Added missing ingredients to grocery list");
        Ok(added)
    }

    /// Insert items from an imported list, skipping names already present.
    pub fn import_grocery(&self, items: &[NewGroceryItem]) -> Result<usize> {
        let mut added = 0;
        for item in items {
            let name = validate_item_name(&item.name)?;
            let item = NewGroceryItem {
                name,
                quantity: item.quantity.clone(),
                checked: item.checked,
            };
            if self.db.insert_grocery_if_absent(&item)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Ingredients of a recipe not covered by the pantry, in recipe order.
    pub fn missing_ingredients(&self, recipe_id: i64) -> Result<Vec<Ingredient>> {
        let recipe = self.recipe_or_validation_error(recipe_id)?;
        let pantry = self.db.pantry_names()?;
        Ok(grocery::missing_ingredients(&recipe, &pantry))
    }

    fn recipe_or_validation_error(&self, recipe_id: i64) -> Result<Recipe> {
        self.db
            .get_recipe(recipe_id)
            .map_err(|_| ValidationError::UnknownRecipe(recipe_id).into())
    }

    // --- Export / Import ---

    pub fn export_library(&self) -> Result<LibraryExport> {
        self.db.export_library()
    }

    pub fn import_library(&self, data: &LibraryExport) -> Result<LibraryImportSummary> {
        let summary = self.db.import_library(data)?;
        info!(
            inserted = summary.recipes_inserted,
            updated = summary.recipes_updated,
            favorites = summary.favorites_set,
            "Imported recipe library"
        );
        Ok(summary)
    }
}

/// Trim text fields and canonicalize the difficulty, then validate.
fn prepare_recipe(recipe: &NewRecipe) -> Result<NewRecipe> {
    validate_new_recipe(recipe)?;
    let mut prepared = recipe.clone();
    prepared.title = recipe.title.trim().to_string();
    prepared.difficulty = canonical_difficulty(&recipe.difficulty)
        .unwrap_or_default()
        .to_string();
    prepared.ingredients = recipe
        .ingredients
        .iter()
        .map(|i| Ingredient::new(&i.name, &i.quantity))
        .collect();
    prepared.steps = recipe
        .steps
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    prepared.categories = recipe
        .categories
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    Ok(prepared)
}

fn on_unique_violation(err: anyhow::Error, validation: ValidationError) -> anyhow::Error {
    let is_constraint = err
        .downcast_ref::<rusqlite::Error>()
        .and_then(rusqlite::Error::sqlite_error_code)
        == Some(rusqlite::ErrorCode::ConstraintViolation);
    if is_constraint { validation.into() } else { err }
}
