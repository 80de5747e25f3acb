mod assistant;
mod grocery;
mod helpers;
mod library;
mod pantry;
mod recipe;

pub(crate) use assistant::{
    Assistant, cmd_chat, cmd_cook, cmd_recipe_missing, cmd_substitute, cmd_suggest, cmd_tip,
};
pub(crate) use grocery::{
    ListFormat, cmd_grocery_add, cmd_grocery_check, cmd_grocery_clear, cmd_grocery_export,
    cmd_grocery_from_recipe, cmd_grocery_import, cmd_grocery_list, cmd_grocery_remove,
    cmd_grocery_rename,
};
pub(crate) use library::{cmd_library_export, cmd_library_import};
pub(crate) use pantry::{cmd_pantry_add, cmd_pantry_list, cmd_pantry_remove};
pub(crate) use recipe::{
    RecipeFields, cmd_favorite_list, cmd_favorite_set, cmd_recipe_add, cmd_recipe_delete,
    cmd_recipe_edit, cmd_recipe_export, cmd_recipe_import, cmd_recipe_list, cmd_recipe_show,
};
