use anyhow::{Result, bail};
use std::io::Write as _;
use std::sync::Arc;
use tabled::{Table, Tabled, settings::Style};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

use homechef_core::error::SuggestError;
use homechef_core::orchestrator::{Orchestrator, OrchestratorConfig, Suggestion};
use homechef_core::provider::{CompletionProvider, Role};
use homechef_core::service::HomeChefService;
use homechef_core::session::{AssistantReply, AssistantSession, Completion, Ticket};

use super::helpers::{pick_index, print_json, suggest_failure, truncate};

/// Session plus its completion channel, for commands that talk to the AI provider.
pub(crate) struct Assistant {
    session: AssistantSession,
    rx: UnboundedReceiver<Completion>,
}

impl Assistant {
    pub(crate) fn new(provider: Arc<dyn CompletionProvider>, config: OrchestratorConfig) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(provider, config));
        let (session, rx) = AssistantSession::new(orchestrator, Handle::current());
        Self { session, rx }
    }

    /// Wait for the reply to `ticket`, applying any other completions on the way.
    async fn wait(&mut self, ticket: Ticket) -> Result<AssistantReply, SuggestError> {
        while let Some(completion) = self.rx.recv().await {
            if let Some((done, outcome)) = self.session.handle(completion) {
                if done == ticket {
                    return outcome;
                }
            }
        }
        Err(SuggestError::ProviderUnavailable(
            "assistant stopped before replying".to_string(),
        ))
    }
}

fn unexpected(reply: &AssistantReply) -> anyhow::Error {
    anyhow::anyhow!("Unexpected assistant reply: {reply:?}")
}

// --- Suggestions ---

pub(crate) async fn cmd_suggest(
    service: &HomeChefService,
    assistant: &mut Assistant,
    mut ingredients: Vec<String>,
    from_pantry: bool,
    save: Option<usize>,
    json: bool,
) -> Result<()> {
    if from_pantry {
        ingredients.extend(service.pantry_names()?);
    }
    if ingredients.iter().all(|i| i.trim().is_empty()) {
        bail!("Name some ingredients or use --from-pantry");
    }

    let ticket = assistant
        .session
        .request_suggestions(ingredients, service.catalog()?);
    let set = match assistant.wait(ticket).await {
        Ok(AssistantReply::Suggestions(set)) => set,
        Ok(other) => return Err(unexpected(&other)),
        Err(e) => return Err(suggest_failure(e, json)),
    };
    let suggestions = &set.suggestions;

    let saved = match save {
        Some(position) => {
            let chosen = &suggestions[pick_index(position, suggestions.len(), "suggestion")?];
            match chosen {
                Suggestion::GeneratedRecipe { recipe, .. } => {
                    Some(service.save_generated_recipe(recipe)?)
                }
                Suggestion::CatalogMatch { recipe, .. } => {
                    bail!("'{}' is already in your library (id: {})", recipe.title, recipe.id)
                }
            }
        }
        None => None,
    };

    if json {
        return match saved {
            Some(recipe) => print_json(&serde_json::json!({
                "suggestions": suggestions,
                "tips": set.tips,
                "saved": recipe,
            })),
            None => print_json(&set),
        };
    }

    print_suggestion_table(suggestions);
    if !set.tips.is_empty() {
        println!("\nTips:");
        for tip in &set.tips {
            println!("  - {tip}");
        }
    }
    match saved {
        Some(recipe) => println!("Saved '{}' to your library (id: {})", recipe.title, recipe.id),
        None if suggestions.iter().any(Suggestion::is_generated) => {
            println!("Save a new idea with: homechef suggest ... --save <#>");
        }
        None => {}
    }
    Ok(())
}

fn print_suggestion_table(suggestions: &[Suggestion]) {
    #[derive(Tabled)]
    struct SuggestionRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "Recipe")]
        title: String,
        #[tabled(rename = "Source")]
        source: String,
        #[tabled(rename = "Match")]
        score: String,
        #[tabled(rename = "Missing")]
        missing: String,
    }

    let rows: Vec<SuggestionRow> = suggestions
        .iter()
        .enumerate()
        .map(|(i, s)| SuggestionRow {
            idx: i + 1,
            title: truncate(s.title(), 40),
            source: match s {
                Suggestion::CatalogMatch { recipe, .. } => format!("library #{}", recipe.id),
                Suggestion::GeneratedRecipe { .. } => "new idea".to_string(),
            },
            score: format!("{:.0}%", s.score() * 100.0),
            missing: truncate(&s.missing().join(", "), 40),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

// --- Substitutions ---

pub(crate) async fn cmd_substitute(
    service: &HomeChefService,
    assistant: &mut Assistant,
    ingredient: &str,
    recipe_id: Option<i64>,
    accept: Option<usize>,
    json: bool,
) -> Result<()> {
    let recipe = recipe_id.map(|id| service.get_recipe(id)).transpose()?;
    let ticket = assistant
        .session
        .request_substitutes(ingredient.to_string(), recipe);
    let candidates = match assistant.wait(ticket).await {
        Ok(AssistantReply::Substitutions(list)) => list,
        Ok(other) => return Err(unexpected(&other)),
        Err(e) => return Err(suggest_failure(e, json)),
    };

    let accepted = match accept {
        Some(position) => {
            let chosen = &candidates[pick_index(position, candidates.len(), "substitute")?];
            Some(service.accept_substitution(chosen)?)
        }
        None => None,
    };

    if json {
        return match accepted {
            Some(item) => print_json(&serde_json::json!({
                "substitutions": candidates,
                "accepted": item,
            })),
            None => print_json(&candidates),
        };
    }

    print_substitutions(&candidates);
    if let Some(item) = accepted {
        println!("Added {} to the pantry", item.name);
    }
    Ok(())
}

fn print_substitutions(candidates: &[homechef_core::orchestrator::SubstitutionCandidate]) {
    for (i, c) in candidates.iter().enumerate() {
        let ratio = c.ratio.as_deref().map_or(String::new(), |r| format!(" ({r})"));
        println!("{}. {} instead of {}{ratio}", i + 1, c.substitute, c.replaces);
        if !c.rationale.is_empty() {
            println!("   {}", c.rationale);
        }
    }
}

/// Missing ingredients for a recipe, with AI substitutes when an assistant is given.
pub(crate) async fn cmd_recipe_missing(
    service: &HomeChefService,
    assistant: Option<&mut Assistant>,
    recipe_id: i64,
    json: bool,
) -> Result<()> {
    let recipe = service.get_recipe(recipe_id)?;
    let missing = service.missing_ingredients(recipe_id)?;

    let substitutions = match assistant {
        Some(assistant) if !missing.is_empty() => {
            let names = missing.iter().map(|i| i.name.clone()).collect();
            let ticket = assistant
                .session
                .request_missing_substitutes(recipe.clone(), names);
            match assistant.wait(ticket).await {
                Ok(AssistantReply::Substitutions(list)) => list,
                Ok(other) => return Err(unexpected(&other)),
                Err(e) if e.is_empty_result() => Vec::new(),
                Err(e) => return Err(e.into()),
            }
        }
        _ => Vec::new(),
    };

    if json {
        return print_json(&serde_json::json!({
            "recipe_id": recipe.id,
            "missing": missing,
            "substitutions": substitutions,
        }));
    }

    if missing.is_empty() {
        println!("Your pantry covers everything for {}", recipe.title);
        return Ok(());
    }
    println!("Missing for {}:", recipe.title);
    for ingredient in &missing {
        if ingredient.quantity.is_empty() {
            println!("  - {}", ingredient.name);
        } else {
            println!("  - {} — {}", ingredient.name, ingredient.quantity);
        }
    }
    if !substitutions.is_empty() {
        println!("\nSubstitutes:");
        print_substitutions(&substitutions);
    }
    Ok(())
}

// --- Cooking ---

pub(crate) async fn cmd_tip(
    service: &HomeChefService,
    assistant: &mut Assistant,
    recipe_id: i64,
    step: usize,
    json: bool,
) -> Result<()> {
    let recipe = service.get_recipe(recipe_id)?;
    let index = pick_index(step, recipe.steps.len(), "step")?;
    let ticket = assistant.session.request_step_tip(recipe, index);
    let tip = match assistant.wait(ticket).await {
        Ok(AssistantReply::Tip(tip)) => tip,
        Ok(other) => return Err(unexpected(&other)),
        Err(e) => return Err(suggest_failure(e, json)),
    };
    if json {
        println!("{}", serde_json::json!({ "recipe_id": recipe_id, "step": step, "tip": tip }));
    } else {
        println!("Tip for step {step}: {tip}");
    }
    Ok(())
}

/// Walk through a recipe one step at a time. Tips are fetched on request.
pub(crate) async fn cmd_cook(
    service: &HomeChefService,
    assistant: &mut Assistant,
    recipe_id: i64,
) -> Result<()> {
    let recipe = service.get_recipe(recipe_id)?;
    if recipe.steps.is_empty() {
        bail!("'{}' has no steps to cook", recipe.title);
    }
    let missing = service.missing_ingredients(recipe_id)?;
    println!("Cooking {} ({} min)", recipe.title, recipe.time_minutes);
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|i| i.name.as_str()).collect();
        println!("Heads up, not in your pantry: {}", names.join(", "));
    }

    let total = recipe.steps.len();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut index = 0;
    let mut show_step = true;
    loop {
        if show_step {
            println!("\nStep {}/{total}: {}", index + 1, recipe.steps[index]);
        }
        show_step = true;
        eprint!("[enter] next  [b]ack  [t]ip  [q]uit > ");
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim().to_lowercase().as_str() {
            "" | "n" | "next" => {
                if index + 1 == total {
                    println!("\nAll done. Enjoy your {}!", recipe.title);
                    break;
                }
                index += 1;
            }
            "b" | "back" => index = index.saturating_sub(1),
            "t" | "tip" => {
                let ticket = assistant.session.request_step_tip(recipe.clone(), index);
                match assistant.wait(ticket).await {
                    Ok(AssistantReply::Tip(tip)) => println!("Tip: {tip}"),
                    Ok(other) => return Err(unexpected(&other)),
                    Err(e) => eprintln!("Tip unavailable: {e}"),
                }
                show_step = false;
            }
            "q" | "quit" => break,
            other => {
                eprintln!("Unknown command '{other}'");
                show_step = false;
            }
        }
    }
    Ok(())
}

// --- Chat ---

/// Interactive chat. Messages typed while a reply is pending are queued and
/// sent in order.
pub(crate) async fn cmd_chat(assistant: &mut Assistant, json: bool) -> Result<()> {
    let Assistant { session, rx } = assistant;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    if !json {
        println!("Ask me anything about cooking. Commands: /history /clear /quit");
    }

    while stdin_open || session.chat_busy() {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                match line.trim() {
                    "" => {}
                    "/quit" | "/exit" => break,
                    "/clear" => {
                        session.clear_history();
                        if !json {
                            println!("Conversation cleared.");
                        }
                    }
                    "/history" => {
                        for turn in session.history() {
                            let who = match turn.role {
                                Role::User => "you",
                                Role::Assistant => "chef",
                            };
                            println!("{who}: {}", turn.text);
                        }
                    }
                    message => {
                        session.send_chat(message.to_string());
                        if session.pending_chat() > 0 && !json {
                            eprintln!("(queued, {} message(s) ahead)", session.pending_chat());
                        }
                    }
                }
            }
            Some(completion) = rx.recv() => {
                let Some((_, outcome)) = session.handle(completion) else {
                    continue;
                };
                match outcome {
                    Ok(AssistantReply::Chat(reply)) if json => print_json(&reply)?,
                    Ok(AssistantReply::Chat(reply)) => {
                        println!("chef: {}", reply.text);
                        if let Some(step) = reply.step_reference {
                            println!("      (about step {})", step + 1);
                        }
                    }
                    Ok(other) => return Err(unexpected(&other)),
                    Err(e) if e.is_empty_result() => eprintln!("chef: (no answer)"),
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
        }
    }

    Ok(())
}
