use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// One line of a recipe's ingredient list.
///
/// Stored recipes and provider replies use either a bare string (`"2 eggs"`)
/// or an object (`{"name": "egg", "quantity": "2"}`); both deserialize here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IngredientRepr")]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub quantity: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IngredientRepr {
    Plain(String),
    Full {
        name: String,
        #[serde(default)]
        quantity: Option<String>,
    },
}

impl From<IngredientRepr> for Ingredient {
    fn from(repr: IngredientRepr) -> Self {
        match repr {
            IngredientRepr::Plain(name) => Ingredient {
                name,
                quantity: String::new(),
            },
            IngredientRepr::Full { name, quantity } => Ingredient {
                name,
                quantity: quantity.unwrap_or_default(),
            },
        }
    }
}

impl Ingredient {
    pub fn new(name: &str, quantity: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            quantity: quantity.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    #[serde(default)]
    pub uuid: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub time_minutes: i64,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Recipe {
    /// Normalized ingredient names, in recipe order.
    pub fn ingredient_keys(&self) -> Vec<String> {
        self.ingredients
            .iter()
            .map(|i| normalize_name(&i.name))
            .filter(|k| !k.is_empty())
            .collect()
    }

    #[must_use]
    pub fn to_new(&self) -> NewRecipe {
        NewRecipe {
            title: self.title.clone(),
            description: self.description.clone(),
            ingredients: self.ingredients.clone(),
            steps: self.steps.clone(),
            time_minutes: self.time_minutes,
            difficulty: self.difficulty.clone(),
            image_path: self.image_path.clone(),
            categories: self.categories.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecipe {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub time_minutes: i64,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PantryItem {
    pub id: i64,
    pub name: String,
    pub quantity: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroceryItem {
    pub id: i64,
    pub name: String,
    pub quantity: String,
    pub checked: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewGroceryItem {
    pub name: String,
    pub quantity: String,
    pub checked: bool,
}

impl NewGroceryItem {
    pub fn unchecked(name: &str, quantity: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            quantity: quantity.trim().to_string(),
            checked: false,
        }
    }
}

/// In-memory catalog filter. Every populated field must match.
#[derive(Debug, Clone, Default)]
pub struct RecipeFilter {
    pub text: Option<String>,
    pub categories: Vec<String>,
    pub max_time: Option<i64>,
    pub difficulty: Option<String>,
    pub favorites_only: bool,
}

impl RecipeFilter {
    #[must_use]
    pub fn matches(&self, recipe: &Recipe) -> bool {
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            if !recipe.title.to_lowercase().contains(&needle)
                && !recipe.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        for wanted in &self.categories {
            let wanted = normalize_name(wanted);
            if wanted.is_empty() {
                continue;
            }
            if !recipe
                .categories
                .iter()
                .any(|c| normalize_name(c).contains(&wanted))
            {
                return false;
            }
        }
        if let Some(max) = self.max_time {
            if recipe.time_minutes > max {
                return false;
            }
        }
        if let Some(difficulty) = self.difficulty.as_deref().filter(|d| !d.is_empty()) {
            if !recipe.difficulty.eq_ignore_ascii_case(difficulty) {
                return false;
            }
        }
        true
    }
}

// --- Export / Import types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryExport {
    pub version: i64,
    pub exported_at: String,
    pub recipes: Vec<Recipe>,
    /// Recipe uuids marked as favorite.
    #[serde(default)]
    pub favorites: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryImportSummary {
    pub recipes_inserted: i64,
    pub recipes_updated: i64,
    pub favorites_set: i64,
}

/// Bundled seed file layout (`{"recipes": [...]}`).
#[derive(Debug, Clone, Deserialize)]
pub struct SeedFile {
    pub recipes: Vec<NewRecipe>,
}

pub const DIFFICULTIES: &[&str] = &["Easy", "Medium", "Hard"];

/// Normalize an ingredient or item name for equality and lookup:
/// trim, collapse inner whitespace, lowercase.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Matching key for ingredient presence: the normalized name with a simple
/// plural fold on the last word, so "Eggs" and "egg" compare equal.
#[must_use]
pub fn ingredient_key(name: &str) -> String {
    let normalized = normalize_name(name);
    let (head, last) = match normalized.rsplit_once(' ') {
        Some((head, last)) => (Some(head), last),
        None => (None, normalized.as_str()),
    };
    let singular = singularize(last);
    match head {
        Some(head) => format!("{head} {singular}"),
        None => singular,
    }
}

fn singularize(word: &str) -> String {
    if word.len() <= 3 || !word.ends_with('s') || word.ends_with("ss") {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["oes", "ches", "shes", "xes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    word[..word.len() - 1].to_string()
}

/// Canonical spelling of a difficulty label, case-insensitive.
#[must_use]
pub fn canonical_difficulty(label: &str) -> Option<&'static str> {
    let trimmed = label.trim();
    DIFFICULTIES
        .iter()
        .find(|d| d.eq_ignore_ascii_case(trimmed))
        .copied()
}

/// Split a comma-joined category column into tags.
#[must_use]
pub fn parse_categories(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

pub fn validate_item_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("Item name must not be empty");
    }
    Ok(trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Validate a recipe before it is written: non-empty title, non-negative
/// time, known difficulty (or none), no blank ingredient names.
pub fn validate_new_recipe(recipe: &NewRecipe) -> Result<()> {
    if recipe.title.trim().is_empty() {
        bail!("Recipe title must not be empty");
    }
    if recipe.time_minutes < 0 {
        bail!("Recipe time must not be negative");
    }
    if !recipe.difficulty.trim().is_empty() && canonical_difficulty(&recipe.difficulty).is_none() {
        bail!(
            "Invalid difficulty '{}'. Must be one of: {}",
            recipe.difficulty,
            DIFFICULTIES.join(", ")
        );
    }
    if recipe.ingredients.iter().any(|i| i.name.trim().is_empty()) {
        bail!("Ingredient names must not be empty");
    }
    if recipe.categories.iter().any(|c| c.contains(',')) {
        bail!("Category tags must not contain commas");
    }
    Ok(())
}
