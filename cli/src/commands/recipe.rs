use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use homechef_core::export::{recipe_text, write_recipe_text};
use homechef_core::models::{NewRecipe, Recipe, RecipeFilter, parse_categories};
use homechef_core::service::HomeChefService;

use super::helpers::{exit_empty, parse_ingredient_arg, print_json, print_recipe_table};

/// Field values for `recipe add` and `recipe edit`. Unset fields keep their
/// current value when editing.
#[derive(Debug, Default)]
pub(crate) struct RecipeFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
    pub time: Option<i64>,
    pub difficulty: Option<String>,
    pub categories: Option<String>,
    pub image: Option<String>,
}

impl RecipeFields {
    fn apply(self, recipe: &mut NewRecipe) -> Result<()> {
        if let Some(title) = self.title {
            recipe.title = title;
        }
        if let Some(description) = self.description {
            recipe.description = description;
        }
        if !self.ingredients.is_empty() {
            recipe.ingredients = self
                .ingredients
                .iter()
                .map(|s| parse_ingredient_arg(s))
                .collect::<Result<_>>()?;
        }
        if !self.steps.is_empty() {
            recipe.steps = self.steps;
        }
        if let Some(time) = self.time {
            recipe.time_minutes = time;
        }
        if let Some(difficulty) = self.difficulty {
            recipe.difficulty = difficulty;
        }
        if let Some(categories) = self.categories {
            recipe.categories = parse_categories(&categories);
        }
        if let Some(image) = self.image {
            recipe.image_path = Some(image).filter(|p| !p.trim().is_empty());
        }
        Ok(())
    }
}

/// A recipe file holds one recipe object or an array of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecipeFile {
    Many(Vec<NewRecipe>),
    One(NewRecipe),
}

fn favorite_ids(service: &HomeChefService) -> Result<HashSet<i64>> {
    Ok(service.list_favorites()?.into_iter().map(|r| r.id).collect())
}

pub(crate) fn cmd_recipe_list(
    service: &HomeChefService,
    filter: &RecipeFilter,
    json: bool,
) -> Result<()> {
    let recipes = service.search_recipes(filter)?;
    if recipes.is_empty() {
        exit_empty("No recipes found", json);
    }
    if json {
        return print_json(&recipes);
    }
    print_recipe_table(&recipes, &favorite_ids(service)?);
    Ok(())
}

pub(crate) fn cmd_recipe_show(service: &HomeChefService, id: i64, json: bool) -> Result<()> {
    let recipe = service.get_recipe(id)?;
    if json {
        return print_json(&recipe);
    }
    print!("{}", recipe_text(&recipe));
    if service.is_favorite(id)? {
        println!("\n* Favorite");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_add(
    service: &HomeChefService,
    fields: RecipeFields,
    json: bool,
) -> Result<()> {
    if fields.title.is_none() {
        bail!("A recipe needs a --title (or use `homechef recipe import <file>`)");
    }
    let mut recipe = NewRecipe {
        title: String::new(),
        description: String::new(),
        ingredients: Vec::new(),
        steps: Vec::new(),
        time_minutes: 0,
        difficulty: String::new(),
        image_path: None,
        categories: Vec::new(),
    };
    fields.apply(&mut recipe)?;
    let saved = service.add_recipe(&recipe)?;
    if json {
        return print_json(&saved);
    }
    println!("Added recipe: {} (id: {})", saved.title, saved.id);
    Ok(())
}

pub(crate) fn cmd_recipe_edit(
    service: &HomeChefService,
    id: i64,
    fields: RecipeFields,
    json: bool,
) -> Result<()> {
    let mut recipe = service.get_recipe(id)?.to_new();
    fields.apply(&mut recipe)?;
    let saved = service.update_recipe(id, &recipe)?;
    if json {
        return print_json(&saved);
    }
    println!("Updated recipe: {} (id: {})", saved.title, saved.id);
    Ok(())
}

pub(crate) fn read_recipe_file(path: &Path) -> Result<Vec<NewRecipe>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed: RecipeFile = serde_json::from_str(&data)
        .with_context(|| format!("{} is not a recipe JSON file", path.display()))?;
    Ok(match parsed {
        RecipeFile::Many(recipes) => recipes,
        RecipeFile::One(recipe) => vec![recipe],
    })
}

pub(crate) fn cmd_recipe_import(service: &HomeChefService, file: &Path, json: bool) -> Result<()> {
    let recipes = read_recipe_file(file)?;
    let mut saved: Vec<Recipe> = Vec::with_capacity(recipes.len());
    for recipe in &recipes {
        let added = service
            .add_recipe(recipe)
            .with_context(|| format!("Failed to import '{}'", recipe.title))?;
        saved.push(added);
    }
    if json {
        return print_json(&saved);
    }
    for recipe in &saved {
        println!("Imported: {} (id: {})", recipe.title, recipe.id);
    }
    println!("{} recipe(s) imported", saved.len());
    Ok(())
}

pub(crate) fn cmd_recipe_export(
    service: &HomeChefService,
    id: i64,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let recipe = service.get_recipe(id)?;
    match output {
        Some(path) => {
            write_recipe_text(&recipe, path)?;
            if json {
                println!("{}", serde_json::json!({ "exported": recipe.id, "path": path }));
            } else {
                println!("Exported {} to {}", recipe.title, path.display());
            }
        }
        None if json => print_json(&serde_json::json!({ "text": recipe_text(&recipe) }))?,
        None => print!("{}", recipe_text(&recipe)),
    }
    Ok(())
}

pub(crate) fn cmd_recipe_delete(service: &HomeChefService, id: i64, json: bool) -> Result<()> {
    if !service.delete_recipe(id)? {
        exit_empty(&format!("Recipe {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted recipe {id}");
    }
    Ok(())
}

// --- Favorites ---

pub(crate) fn cmd_favorite_set(
    service: &HomeChefService,
    id: i64,
    favorite: bool,
    json: bool,
) -> Result<()> {
    service.set_favorite(id, favorite)?;
    if json {
        println!("{}", serde_json::json!({ "recipe_id": id, "favorite": favorite }));
    } else if favorite {
        println!("Added recipe {id} to favorites");
    } else {
        println!("Removed recipe {id} from favorites");
    }
    Ok(())
}

pub(crate) fn cmd_favorite_list(service: &HomeChefService, json: bool) -> Result<()> {
    let recipes = service.list_favorites()?;
    if recipes.is_empty() {
        exit_empty("No favorite recipes yet", json);
    }
    if json {
        return print_json(&recipes);
    }
    let ids = recipes.iter().map(|r| r.id).collect();
    print_recipe_table(&recipes, &ids);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> HomeChefService {
        HomeChefService::new_in_memory().unwrap()
    }

    #[test]
    fn test_add_from_fields() {
        let service = service();
        let fields = RecipeFields {
            title: Some("Toast".to_string()),
            ingredients: vec!["bread:2 slices".to_string(), "butter".to_string()],
            steps: vec!["Toast the bread".to_string(), "Butter it".to_string()],
            time: Some(5),
            difficulty: Some("easy".to_string()),
            categories: Some("Breakfast, Quick".to_string()),
            ..RecipeFields::default()
        };
        cmd_recipe_add(&service, fields, true).unwrap();

        let recipes = service.list_recipes().unwrap();
        assert_eq!(recipes.len(), 1);
        let toast = &recipes[0];
        assert_eq!(toast.ingredients.len(), 2);
        assert_eq!(toast.ingredients[0].quantity, "2 slices");
        assert_eq!(toast.difficulty, "Easy");
        assert_eq!(toast.categories, vec!["Breakfast", "Quick"]);
    }

    #[test]
    fn test_edit_keeps_unset_fields() {
        let service = service();
        cmd_recipe_add(
            &service,
            RecipeFields {
                title: Some("Toast".to_string()),
                steps: vec!["Toast the bread".to_string()],
                time: Some(5),
                ..RecipeFields::default()
            },
            true,
        )
        .unwrap();
        let id = service.list_recipes().unwrap()[0].id;

        cmd_recipe_edit(
            &service,
            id,
            RecipeFields {
                time: Some(7),
                ..RecipeFields::default()
            },
            true,
        )
        .unwrap();
        let toast = service.get_recipe(id).unwrap();
        assert_eq!(toast.time_minutes, 7);
        assert_eq!(toast.steps, vec!["Toast the bread"]);
    }

    #[test]
    fn test_import_single_and_array_files() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one.json");
        std::fs::write(
            &one,
            r#"{"title": "Salad", "ingredients": ["lettuce", {"name": "tomato", "quantity": "2"}]}"#,
        )
        .unwrap();
        let many = dir.path().join("many.json");
        std::fs::write(&many, r#"[{"title": "Soup"}, {"title": "Stew", "time_minutes": 90}]"#)
            .unwrap();

        let service = service();
        cmd_recipe_import(&service, &one, true).unwrap();
        cmd_recipe_import(&service, &many, true).unwrap();

        let titles: Vec<String> = service
            .list_recipes()
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Salad", "Soup", "Stew"]);
    }

    #[test]
    fn test_import_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json").unwrap();
        assert!(read_recipe_file(&bad).is_err());
    }

    #[test]
    fn test_export_to_file() {
        let service = service();
        service.seed_if_empty().unwrap();
        let recipe = service.list_recipes().unwrap().remove(0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe.txt");
        cmd_recipe_export(&service, recipe.id, Some(&path), true).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(&recipe.title));
    }
}
