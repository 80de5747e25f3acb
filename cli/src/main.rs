mod commands;
mod config;
mod gemini;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::commands::{
    Assistant, ListFormat, RecipeFields, cmd_chat, cmd_cook, cmd_favorite_list, cmd_favorite_set,
    cmd_grocery_add, cmd_grocery_check, cmd_grocery_clear, cmd_grocery_export,
    cmd_grocery_from_recipe, cmd_grocery_import, cmd_grocery_list, cmd_grocery_remove,
    cmd_grocery_rename, cmd_library_export, cmd_library_import, cmd_pantry_add, cmd_pantry_list,
    cmd_pantry_remove, cmd_recipe_add, cmd_recipe_delete, cmd_recipe_edit, cmd_recipe_export,
    cmd_recipe_import, cmd_recipe_list, cmd_recipe_missing, cmd_recipe_show, cmd_substitute,
    cmd_suggest, cmd_tip,
};
use crate::config::Config;
use crate::gemini::GeminiClient;
use homechef_core::models::RecipeFilter;
use homechef_core::service::HomeChefService;

#[derive(Parser)]
#[command(
    name = "homechef",
    version,
    about = "Your recipe library, pantry and grocery list, with an AI sous-chef",
    long_about = "\n\n  _                            _           __
 | |__   ___  _ __ ___   ___  ___| |__   ___ / _|
 | '_ \\ / _ \\| '_ ` _ \\ / _ \\/ __| '_ \\ / _ \\ |_
 | | | | (_) | | | | | |  __/ (__| | | |  __/  _|
 |_| |_|\\___/|_| |_| |_|\\___|\\___|_| |_|\\___|_|
        cook with what you have.
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the recipe library
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Mark recipes as favorites
    Favorite {
        #[command(subcommand)]
        command: FavoriteCommands,
    },
    /// Track what you have at home
    Pantry {
        #[command(subcommand)]
        command: PantryCommands,
    },
    /// Manage the grocery list
    Grocery {
        #[command(subcommand)]
        command: GroceryCommands,
    },
    /// Suggest recipes for the ingredients you have
    Suggest {
        /// Ingredients on hand
        ingredients: Vec<String>,
        /// Include everything in the pantry
        #[arg(long)]
        from_pantry: bool,
        /// Save suggestion number N (a new idea) to the library
        #[arg(long, value_name = "N")]
        save: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask for substitutes for an ingredient
    Substitute {
        /// Ingredient to replace
        ingredient: String,
        /// Recipe ID to give the substitution context
        #[arg(long)]
        recipe: Option<i64>,
        /// Add substitute number N to the pantry
        #[arg(long, value_name = "N")]
        accept: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Get a tip for one step of a recipe
    Tip {
        /// Recipe ID
        recipe: i64,
        /// Step number (starting at 1)
        step: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Chat with the cooking assistant
    Chat {
        /// Print each reply as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export or import the whole recipe library
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },
}

#[derive(Args)]
struct RecipeArgs {
    /// Recipe title
    #[arg(long)]
    title: Option<String>,
    /// Short description
    #[arg(long)]
    description: Option<String>,
    /// Ingredient as "name" or "name:quantity" (repeatable)
    #[arg(short, long = "ingredient", value_name = "NAME[:QTY]")]
    ingredients: Vec<String>,
    /// Step text, in order (repeatable)
    #[arg(short, long = "step", value_name = "TEXT")]
    steps: Vec<String>,
    /// Total time in minutes
    #[arg(long)]
    time: Option<i64>,
    /// Easy, Medium or Hard
    #[arg(long)]
    difficulty: Option<String>,
    /// Comma-separated categories (e.g. "Italian, Vegetarian")
    #[arg(long)]
    categories: Option<String>,
    /// Path to an image of the dish
    #[arg(long)]
    image: Option<String>,
}

impl From<RecipeArgs> for RecipeFields {
    fn from(args: RecipeArgs) -> Self {
        RecipeFields {
            title: args.title,
            description: args.description,
            ingredients: args.ingredients,
            steps: args.steps,
            time: args.time,
            difficulty: args.difficulty,
            categories: args.categories,
            image: args.image,
        }
    }
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List or filter recipes
    List {
        /// Text to look for in title or description
        #[arg(short, long)]
        search: Option<String>,
        /// Category tag (repeatable, all must match)
        #[arg(short, long = "category")]
        categories: Vec<String>,
        /// Maximum time in minutes
        #[arg(long)]
        max_time: Option<i64>,
        /// Easy, Medium or Hard
        #[arg(long)]
        difficulty: Option<String>,
        /// Only favorites
        #[arg(long)]
        favorites: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe
    Show {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a recipe from flags
    Add {
        #[command(flatten)]
        fields: RecipeArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a recipe
    Edit {
        /// Recipe ID
        id: i64,
        #[command(flatten)]
        fields: RecipeArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import recipes from a JSON file (one recipe or an array)
    Import {
        /// Path to the JSON file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export a recipe as text
    Export {
        /// Recipe ID
        id: i64,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which ingredients are not in the pantry
    Missing {
        /// Recipe ID
        id: i64,
        /// Also ask the assistant for substitutes
        #[arg(long)]
        substitutes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cook a recipe step by step
    Cook {
        /// Recipe ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum FavoriteCommands {
    /// Mark a recipe as favorite
    Add {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Unmark a favorite
    Remove {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List favorite recipes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PantryCommands {
    /// List pantry items
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a new pantry item
    Add {
        /// Item name
        name: String,
        /// Quantity (free text, e.g. "6" or "500 g")
        #[arg(default_value = "")]
        quantity: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an item or update its quantity
    Set {
        /// Item name
        name: String,
        /// Quantity (free text)
        #[arg(default_value = "")]
        quantity: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a pantry item
    Remove {
        /// Item name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GroceryCommands {
    /// Show the grocery list
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an item
    Add {
        /// Item name
        name: String,
        /// Quantity (free text)
        #[arg(default_value = "")]
        quantity: String,
        /// Update the quantity if the item is already listed
        #[arg(long)]
        update: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check items off
    Check {
        /// Item names
        #[arg(required = true)]
        names: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Uncheck items
    Uncheck {
        /// Item names
        #[arg(required = true)]
        names: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename an item
    Rename {
        /// Current name
        from: String,
        /// New name
        to: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an item
    Remove {
        /// Item name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove all items, or only checked ones
    Clear {
        /// Only remove checked items
        #[arg(long)]
        checked: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add the ingredients a recipe needs that the pantry lacks
    FromRecipe {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export the list as text or CSV
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format (default: from the file extension, else txt)
        #[arg(long, value_enum)]
        format: Option<ListFormat>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import items from a CSV file with an "item" column
    Import {
        /// Path to the CSV file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum LibraryCommands {
    /// Export all recipes and favorites as JSON
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a library export, updating recipes by uuid
    Import {
        /// Path to the export file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: could not install logger: {e}");
    }
}

fn assistant(config: &Config) -> Result<Assistant> {
    let client = GeminiClient::new(&config.gemini)?;
    debug!(model = %client.model(), "Using Gemini");
    Ok(Assistant::new(Arc::new(client), config.orchestrator.clone()))
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    debug!(data_dir = %config.data_dir.display(), db = %config.db_path.display(), "Loaded config");
    let service = HomeChefService::new(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    service.seed_if_empty()?;

    match cli.command {
        Commands::Recipe { command } => match command {
            RecipeCommands::List {
                search,
                categories,
                max_time,
                difficulty,
                favorites,
                json,
            } => {
                let filter = RecipeFilter {
                    text: search,
                    categories,
                    max_time,
                    difficulty,
                    favorites_only: favorites,
                };
                cmd_recipe_list(&service, &filter, json)
            }
            RecipeCommands::Show { id, json } => cmd_recipe_show(&service, id, json),
            RecipeCommands::Add { fields, json } => cmd_recipe_add(&service, fields.into(), json),
            RecipeCommands::Edit { id, fields, json } => {
                cmd_recipe_edit(&service, id, fields.into(), json)
            }
            RecipeCommands::Import { file, json } => cmd_recipe_import(&service, &file, json),
            RecipeCommands::Export { id, output, json } => {
                cmd_recipe_export(&service, id, output.as_deref(), json)
            }
            RecipeCommands::Delete { id, json } => cmd_recipe_delete(&service, id, json),
            RecipeCommands::Missing {
                id,
                substitutes,
                json,
            } => {
                let mut helper = if substitutes {
                    Some(assistant(&config)?)
                } else {
                    None
                };
                cmd_recipe_missing(&service, helper.as_mut(), id, json).await
            }
            RecipeCommands::Cook { id } => {
                cmd_cook(&service, &mut assistant(&config)?, id).await
            }
        },
        Commands::Favorite { command } => match command {
            FavoriteCommands::Add { id, json } => cmd_favorite_set(&service, id, true, json),
            FavoriteCommands::Remove { id, json } => cmd_favorite_set(&service, id, false, json),
            FavoriteCommands::List { json } => cmd_favorite_list(&service, json),
        },
        Commands::Pantry { command } => match command {
            PantryCommands::List { json } => cmd_pantry_list(&service, json),
            PantryCommands::Add {
                name,
                quantity,
                json,
            } => cmd_pantry_add(&service, &name, &quantity, false, json),
            PantryCommands::Set {
                name,
                quantity,
                json,
            } => cmd_pantry_add(&service, &name, &quantity, true, json),
            PantryCommands::Remove { name, json } => cmd_pantry_remove(&service, &name, json),
        },
        Commands::Grocery { command } => match command {
            GroceryCommands::List { json } => cmd_grocery_list(&service, json),
            GroceryCommands::Add {
                name,
                quantity,
                update,
                json,
            } => cmd_grocery_add(&service, &name, &quantity, update, json),
            GroceryCommands::Check { names, json } => {
                cmd_grocery_check(&service, &names, true, json)
            }
            GroceryCommands::Uncheck { names, json } => {
                cmd_grocery_check(&service, &names, false, json)
            }
            GroceryCommands::Rename { from, to, json } => {
                cmd_grocery_rename(&service, &from, &to, json)
            }
            GroceryCommands::Remove { name, json } => cmd_grocery_remove(&service, &name, json),
            GroceryCommands::Clear { checked, json } => cmd_grocery_clear(&service, checked, json),
            GroceryCommands::FromRecipe { id, json } => {
                cmd_grocery_from_recipe(&service, id, json)
            }
            GroceryCommands::Export {
                output,
                format,
                json,
            } => cmd_grocery_export(&service, output.as_deref(), format, json),
            GroceryCommands::Import { file, json } => cmd_grocery_import(&service, &file, json),
        },
        Commands::Suggest {
            ingredients,
            from_pantry,
            save,
            json,
        } => {
            cmd_suggest(
                &service,
                &mut assistant(&config)?,
                ingredients,
                from_pantry,
                save,
                json,
            )
            .await
        }
        Commands::Substitute {
            ingredient,
            recipe,
            accept,
            json,
        } => {
            cmd_substitute(
                &service,
                &mut assistant(&config)?,
                &ingredient,
                recipe,
                accept,
                json,
            )
            .await
        }
        Commands::Tip { recipe, step, json } => {
            cmd_tip(&service, &mut assistant(&config)?, recipe, step, json).await
        }
        Commands::Chat { json } => cmd_chat(&mut assistant(&config)?, json).await,
        Commands::Library { command } => match command {
            LibraryCommands::Export { output, json } => {
                cmd_library_export(&service, output.as_deref(), json)
            }
            LibraryCommands::Import { file, json } => cmd_library_import(&service, &file, json),
        },
    }
}
