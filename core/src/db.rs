use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    GroceryItem, Ingredient, LibraryExport, LibraryImportSummary, NewGroceryItem, NewRecipe,
    PantryItem, Recipe, normalize_name, parse_categories,
};

const RECIPE_COLUMNS: &str = "id, uuid, title, description, ingredients_json, steps_json, \
     time_minutes, difficulty, image_path, categories, created_at, updated_at";

pub const LIBRARY_EXPORT_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
    recipe_writes: Cell<u64>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database {
            conn,
            recipe_writes: Cell::new(0),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn,
            recipe_writes: Cell::new(0),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    ingredients_json TEXT NOT NULL DEFAULT '[]',
                    steps_json TEXT NOT NULL DEFAULT '[]',
                    time_minutes INTEGER NOT NULL DEFAULT 0,
                    difficulty TEXT NOT NULL DEFAULT '',
                    image_path TEXT,
                    categories TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS favorites (
                    recipe_id INTEGER PRIMARY KEY REFERENCES recipes(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pantry (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    item TEXT NOT NULL,
                    item_key TEXT NOT NULL UNIQUE,
                    quantity TEXT NOT NULL DEFAULT '',
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS grocery (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    item TEXT NOT NULL,
                    item_key TEXT NOT NULL UNIQUE,
                    quantity TEXT NOT NULL DEFAULT '',
                    checked INTEGER NOT NULL DEFAULT 0 CHECK (checked IN (0, 1)),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_recipes_title ON recipes(title);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    /// Incremented on every write to the recipes table, so caches can tell
    /// when they are stale.
    #[must_use]
    pub fn recipe_generation(&self) -> u64 {
        self.recipe_writes.get()
    }

    fn bump_recipe_generation(&self) {
        self.recipe_writes.set(self.recipe_writes.get() + 1);
    }

    // --- Row mapping helpers ---

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        let ingredients_json: String = row.get(4)?;
        let steps_json: String = row.get(5)?;
        let categories: String = row.get(9)?;
        Ok(Recipe {
            id: row.get(0)?,
            uuid: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            ingredients: json_column::<Vec<Ingredient>>(4, &ingredients_json)?,
            steps: json_column::<Vec<String>>(5, &steps_json)?,
            time_minutes: row.get(6)?,
            difficulty: row.get(7)?,
            image_path: row.get(8)?,
            categories: parse_categories(&categories),
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn pantry_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<PantryItem> {
        Ok(PantryItem {
            id: row.get(0)?,
            name: row.get(1)?,
            quantity: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn grocery_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<GroceryItem> {
        Ok(GroceryItem {
            id: row.get(0)?,
            name: row.get(1)?,
            quantity: row.get(2)?,
            checked: row.get::<_, i64>(3)? != 0,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    // --- Recipes ---

    pub fn insert_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.insert_recipe_row(&uuid, recipe, &now, &now)
    }

    fn insert_recipe_row(
        &self,
        uuid: &str,
        recipe: &NewRecipe,
        created_at: &str,
        updated_at: &str,
    ) -> Result<Recipe> {
        self.conn.execute(
            "INSERT INTO recipes (uuid, title, description, ingredients_json, steps_json,
             time_minutes, difficulty, image_path, categories, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                uuid,
                recipe.title.trim(),
                recipe.description.trim(),
                serde_json::to_string(&recipe.ingredients)?,
                serde_json::to_string(&recipe.steps)?,
                recipe.time_minutes,
                recipe.difficulty.trim(),
                recipe.image_path,
                recipe.categories.join(","),
                created_at,
                updated_at,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.bump_recipe_generation();
        self.get_recipe(id)
    }

    pub fn update_recipe(&self, id: i64, recipe: &NewRecipe) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE recipes SET title = ?1, description = ?2, ingredients_json = ?3,
             steps_json = ?4, time_minutes = ?5, difficulty = ?6, image_path = ?7,
             categories = ?8, updated_at = ?9 WHERE id = ?10",
            params![
                recipe.title.trim(),
                recipe.description.trim(),
                serde_json::to_string(&recipe.ingredients)?,
                serde_json::to_string(&recipe.steps)?,
                recipe.time_minutes,
                recipe.difficulty.trim(),
                recipe.image_path,
                recipe.categories.join(","),
                now,
                id,
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("Recipe not found");
        }
        self.bump_recipe_generation();
        self.get_recipe(id)
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        if deleted > 0 {
            self.bump_recipe_generation();
        }
        Ok(deleted > 0)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .context("Recipe not found")
    }

    pub fn get_recipe_by_uuid(&self, uuid: &str) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE uuid = ?1"),
                params![uuid],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes ORDER BY title COLLATE NOCASE, id"
        ))?;
        let recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn count_recipes(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM recipes", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Recipes whose title matches one of `titles` (case-insensitive), in
    /// the order the titles were given. Unknown titles are skipped.
    pub fn find_recipes_by_titles(&self, titles: &[String]) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE title = ?1 COLLATE NOCASE ORDER BY id LIMIT 1"
        ))?;
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for title in titles {
            let title = title.trim();
            if title.is_empty() {
                continue;
            }
            if let Some(recipe) = stmt
                .query_row(params![title], Self::recipe_from_row)
                .optional()?
            {
                if seen.insert(recipe.id) {
                    found.push(recipe);
                }
            }
        }
        Ok(found)
    }

    // --- Favorites ---

    pub fn set_favorite(&self, recipe_id: i64, favorite: bool) -> Result<()> {
        if favorite {
            let now = Local::now().to_rfc3339();
            self.conn.execute(
                "INSERT INTO favorites (recipe_id, created_at) VALUES (?1, ?2)
                 ON CONFLICT(recipe_id) DO NOTHING",
                params![recipe_id, now],
            )?;
        } else {
            self.conn.execute(
                "DELETE FROM favorites WHERE recipe_id = ?1",
                params![recipe_id],
            )?;
        }
        Ok(())
    }

    pub fn is_favorite(&self, recipe_id: i64) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM favorites WHERE recipe_id = ?1",
                params![recipe_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    pub fn favorite_ids(&self) -> Result<HashSet<i64>> {
        let mut stmt = self.conn.prepare("SELECT recipe_id FROM favorites")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<i64>, _>>()?;
        Ok(ids)
    }

    pub fn list_favorite_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.uuid, r.title, r.description, r.ingredients_json, r.steps_json,
                    r.time_minutes, r.difficulty, r.image_path, r.categories, r.created_at, r.updated_at
             FROM recipes r
             JOIN favorites f ON f.recipe_id = r.id
             ORDER BY r.title COLLATE NOCASE, r.id",
        )?;
        let recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    // --- Pantry ---

    pub fn list_pantry(&self) -> Result<Vec<PantryItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, item, quantity, updated_at FROM pantry ORDER BY item_key",
        )?;
        let items = stmt
            .query_map([], Self::pantry_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn pantry_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT item FROM pantry ORDER BY item_key")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn get_pantry_item(&self, name: &str) -> Result<Option<PantryItem>> {
        let item = self
            .conn
            .query_row(
                "SELECT id, item, quantity, updated_at FROM pantry WHERE item_key = ?1",
                params![normalize_name(name)],
                Self::pantry_item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Fails with a constraint violation when the normalized name already exists.
    pub fn insert_pantry_item(&self, name: &str, quantity: &str) -> Result<PantryItem> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO pantry (item, item_key, quantity, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![name.trim(), normalize_name(name), quantity.trim(), now],
        )?;
        self.get_pantry_item(name)?.context("Pantry item not found")
    }

    pub fn upsert_pantry_item(&self, name: &str, quantity: &str) -> Result<PantryItem> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO pantry (item, item_key, quantity, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(item_key) DO UPDATE SET quantity = excluded.quantity,
                                                 updated_at = excluded.updated_at",
            params![name.trim(), normalize_name(name), quantity.trim(), now],
        )?;
        self.get_pantry_item(name)?.context("Pantry item not found")
    }

    pub fn remove_pantry_item(&self, name: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM pantry WHERE item_key = ?1",
            params![normalize_name(name)],
        )?;
        Ok(deleted > 0)
    }

    // --- Grocery ---

    /// Unchecked items first, then by name.
    pub fn list_grocery(&self) -> Result<Vec<GroceryItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, item, quantity, checked, created_at, updated_at
             FROM grocery ORDER BY checked, item_key",
        )?;
        let items = stmt
            .query_map([], Self::grocery_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn get_grocery_item(&self, name: &str) -> Result<Option<GroceryItem>> {
        let item = self
            .conn
            .query_row(
                "SELECT id, item, quantity, checked, created_at, updated_at
                 FROM grocery WHERE item_key = ?1",
                params![normalize_name(name)],
                Self::grocery_item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Fails with a constraint violation when the normalized name already exists.
    pub fn insert_grocery_item(&self, item: &NewGroceryItem) -> Result<GroceryItem> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO grocery (item, item_key, quantity, checked, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                item.name.trim(),
                normalize_name(&item.name),
                item.quantity.trim(),
                i64::from(item.checked),
                now,
            ],
        )?;
        self.get_grocery_item(&item.name)?
            .context("Grocery item not found")
    }

    /// Returns false when an item with the same normalized name is already listed.
    pub fn insert_grocery_if_absent(&self, item: &NewGroceryItem) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT INTO grocery (item, item_key, quantity, checked, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(item_key) DO NOTHING",
            params![
                item.name.trim(),
                normalize_name(&item.name),
                item.quantity.trim(),
                i64::from(item.checked),
                now,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Insert, or update the quantity of an existing item. The checked flag of
    /// an existing item is kept.
    pub fn upsert_grocery_item(&self, name: &str, quantity: &str) -> Result<GroceryItem> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO grocery (item, item_key, quantity, checked, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)
             ON CONFLICT(item_key) DO UPDATE SET quantity = excluded.quantity,
                                                 updated_at = excluded.updated_at",
            params![name.trim(), normalize_name(name), quantity.trim(), now],
        )?;
        self.get_grocery_item(name)?
            .context("Grocery item not found")
    }

    pub fn set_grocery_checked(&self, name: &str, checked: bool) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE grocery SET checked = ?1, updated_at = ?2 WHERE item_key = ?3",
            params![i64::from(checked), now, normalize_name(name)],
        )?;
        Ok(changed > 0)
    }

    /// Fails with a constraint violation when `new_name` collides with another item.
    pub fn rename_grocery_item(&self, old_name: &str, new_name: &str) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE grocery SET item = ?1, item_key = ?2, updated_at = ?3 WHERE item_key = ?4",
            params![
                new_name.trim(),
                normalize_name(new_name),
                now,
                normalize_name(old_name)
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn remove_grocery_item(&self, name: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM grocery WHERE item_key = ?1",
            params![normalize_name(name)],
        )?;
        Ok(deleted > 0)
    }

    pub fn clear_grocery(&self, only_checked: bool) -> Result<usize> {
        let deleted = if only_checked {
            self.conn.execute("DELETE FROM grocery WHERE checked = 1", [])?
        } else {
            self.conn.execute("DELETE FROM grocery", [])?
        };
        Ok(deleted)
    }

    // --- Export / Import ---

    pub fn export_library(&self) -> Result<LibraryExport> {
        let recipes = self.list_recipes()?;
        let favorites = self
            .list_favorite_recipes()?
            .into_iter()
            .map(|r| r.uuid)
            .collect();
        Ok(LibraryExport {
            version: LIBRARY_EXPORT_VERSION,
            exported_at: Local::now().to_rfc3339(),
            recipes,
            favorites,
        })
    }

    /// Merge an exported library by recipe uuid: unknown uuids are inserted,
    /// known ones are overwritten when the incoming copy is newer.
    pub fn import_library(&self, data: &LibraryExport) -> Result<LibraryImportSummary> {
        if data.version > LIBRARY_EXPORT_VERSION {
            anyhow::bail!(
                "Unsupported library version {} (expected {LIBRARY_EXPORT_VERSION} or lower)",
                data.version
            );
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut summary = LibraryImportSummary::default();
        let mut uuid_to_id: HashMap<&str, i64> = HashMap::new();
        let now = Local::now().to_rfc3339();

        for recipe in &data.recipes {
            crate::models::validate_new_recipe(&recipe.to_new())
                .with_context(|| format!("Invalid recipe '{}'", recipe.title))?;
            let uuid = if recipe.uuid.trim().is_empty() {
                Uuid::new_v4().to_string()
            } else {
                recipe.uuid.clone()
            };
            let created_at = if recipe.created_at.is_empty() { &now } else { &recipe.created_at };
            let updated_at = if recipe.updated_at.is_empty() { &now } else { &recipe.updated_at };

            let id = if let Some(existing) = self.get_recipe_by_uuid(&uuid)? {
                if *updated_at > existing.updated_at {
                    self.conn.execute(
                        "UPDATE recipes SET title = ?1, description = ?2, ingredients_json = ?3,
                         steps_json = ?4, time_minutes = ?5, difficulty = ?6, image_path = ?7,
                         categories = ?8, updated_at = ?9 WHERE id = ?10",
                        params![
                            recipe.title.trim(),
                            recipe.description.trim(),
                            serde_json::to_string(&recipe.ingredients)?,
                            serde_json::to_string(&recipe.steps)?,
                            recipe.time_minutes,
                            recipe.difficulty.trim(),
                            recipe.image_path,
                            recipe.categories.join(","),
                            updated_at,
                            existing.id,
                        ],
                    )?;
                    self.bump_recipe_generation();
                    summary.recipes_updated += 1;
                }
                existing.id
            } else {
                let inserted =
                    self.insert_recipe_row(&uuid, &recipe.to_new(), created_at, updated_at)?;
                summary.recipes_inserted += 1;
                inserted.id
            };
            uuid_to_id.insert(recipe.uuid.as_str(), id);
        }

        for uuid in &data.favorites {
            let id = match uuid_to_id.get(uuid.as_str()) {
                Some(id) => Some(*id),
                None => self.get_recipe_by_uuid(uuid)?.map(|r| r.id),
            };
            if let Some(id) = id {
                if !self.is_favorite(id)? {
                    self.set_favorite(id, true)?;
                    summary.favorites_set += 1;
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }
}

fn json_column<T: serde::de::DeserializeOwned>(index: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}
