use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, SuggestError};
use crate::models::{Ingredient, NewRecipe, Recipe, canonical_difficulty, ingredient_key};
use crate::provider::{ChatTurn, CompletionProvider, ProviderRequest, Role};

// --- Limits on provider output ---

const MAX_MATCH_TITLES: usize = 20;
const MAX_IDEAS: usize = 10;
const MAX_TITLE_CHARS: usize = 120;
const MAX_DESCRIPTION_CHARS: usize = 2000;
const MAX_INGREDIENT_CHARS: usize = 120;
const MAX_STEPS: usize = 30;
const MAX_DIFFICULTY_CHARS: usize = 20;
const MAX_CATEGORIES: usize = 10;
const MAX_SUBSTITUTIONS: usize = 20;
const MAX_TIP_CHARS: usize = 300;

const ASSISTANT_SYSTEM: &str = "You are HomeChef, a friendly and practical home cooking assistant. \
Keep answers short, concrete and safe to follow in a home kitchen.";

const JSON_SYSTEM: &str = "You are HomeChef, a home cooking assistant. \
Reply with a single JSON object only. No markdown, no commentary.";

const STRICT_JSON_REMINDER: &str = "Your previous reply could not be parsed. \
Return ONLY one valid JSON object matching the requested schema. \
Do not wrap it in code fences and do not add any text before or after it.";

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*```$").expect("fence pattern is valid")
});

static STEP_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstep\s+#?(\d+)\b").expect("step pattern is valid"));

/// Tunable thresholds and retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Minimum local score for a stored recipe to count as a catalog match.
    /// Inclusive: a recipe scoring exactly this much matches.
    pub min_match_score: f64,
    /// Retries after the first attempt for transient provider failures.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Most turns sent per chat request, the new message included. Older turns
    /// are dropped so the window still opens on a user turn.
    pub chat_max_turns: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_match_score: 0.5,
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(8),
            chat_max_turns: 20,
        }
    }
}

impl OrchestratorConfig {
    /// Delay before retry number `attempt` (1-based): base doubled per attempt, capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}

// --- Results ---

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suggestion {
    CatalogMatch {
        recipe: Recipe,
        score: f64,
        missing: Vec<String>,
    },
    GeneratedRecipe {
        recipe: NewRecipe,
        score: f64,
        missing: Vec<String>,
    },
}

impl Suggestion {
    #[must_use]
    pub fn score(&self) -> f64 {
        match self {
            Suggestion::CatalogMatch { score, .. } | Suggestion::GeneratedRecipe { score, .. } => {
                *score
            }
        }
    }

    #[must_use]
    pub fn missing(&self) -> &[String] {
        match self {
            Suggestion::CatalogMatch { missing, .. }
            | Suggestion::GeneratedRecipe { missing, .. } => missing,
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Suggestion::CatalogMatch { recipe, .. } => &recipe.title,
            Suggestion::GeneratedRecipe { recipe, .. } => &recipe.title,
        }
    }

    #[must_use]
    pub fn is_generated(&self) -> bool {
        matches!(self, Suggestion::GeneratedRecipe { .. })
    }
}

/// Ranked suggestions plus general swap tips from the provider.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestionSet {
    pub suggestions: Vec<Suggestion>,
    /// Short "if you lack X, use Y" hints. Empty when the library answered locally.
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubstitutionCandidate {
    /// Ingredient being replaced.
    pub replaces: String,
    pub substitute: String,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub text: String,
    /// Zero-based step index when the reply mentions "step N".
    pub step_reference: Option<usize>,
}

// --- Provider payloads ---

/// Structural check run after a reply deserializes. A failure is treated
/// like unparseable JSON.
trait ReplyShape {
    fn check_shape(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize)]
struct SuggestionPayload {
    #[serde(default)]
    match_titles: Option<Vec<String>>,
    #[serde(default)]
    ideas: Option<Vec<IdeaPayload>>,
    #[serde(default)]
    substitutions: Option<Vec<String>>,
}

impl ReplyShape for SuggestionPayload {
    fn check_shape(&self) -> Result<(), String> {
        if self.match_titles.is_none() && self.ideas.is_none() {
            return Err("expected a \"match_titles\" or \"ideas\" key".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IdeaPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    ingredients: Vec<Ingredient>,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default, deserialize_with = "lenient_minutes")]
    time_minutes: i64,
    #[serde(default)]
    difficulty: String,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubstitutionPayload {
    substitutions: Vec<SubstitutionItem>,
}

impl ReplyShape for SubstitutionPayload {
    fn check_shape(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SubstitutionItem {
    #[serde(default)]
    ingredient: String,
    #[serde(default, alias = "name")]
    substitute: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    ratio: Option<String>,
}

/// Accepts `25`, `25.0` or `"25"` and ignores anything else.
fn lenient_minutes<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let minutes = match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        _ => 0,
    };
    Ok(minutes.max(0))
}

#[derive(Serialize)]
struct CatalogEntry<'a> {
    title: &'a str,
    ingredients: Vec<&'a str>,
    time_minutes: i64,
    difficulty: &'a str,
    categories: &'a [String],
}

// --- Matching ---

/// Normalized, deduplicated ingredient keys in input order.
#[must_use]
pub fn normalize_ingredients(ingredients: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ingredients
        .iter()
        .map(|i| ingredient_key(i))
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}

/// Fraction of `ingredients` covered by `have`, and the uncovered names in order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score_ingredients(ingredients: &[Ingredient], have: &HashSet<String>) -> (f64, Vec<String>) {
    let listed: Vec<&Ingredient> = ingredients
        .iter()
        .filter(|i| !i.name.trim().is_empty())
        .collect();
    if listed.is_empty() {
        return (0.0, Vec::new());
    }
    let missing: Vec<String> = listed
        .iter()
        .filter(|i| !have.contains(&ingredient_key(&i.name)))
        .map(|i| i.name.trim().to_string())
        .collect();
    let present = listed.len() - missing.len();
    (present as f64 / listed.len() as f64, missing)
}

fn rank(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| {
        b.score()
            .total_cmp(&a.score())
            .then_with(|| a.missing().len().cmp(&b.missing().len()))
            .then_with(|| a.title().to_lowercase().cmp(&b.title().to_lowercase()))
    });
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.trim().chars().take(max).collect::<String>().trim_end().to_string()
}

// --- Response parsing ---

/// First JSON object in a provider reply, tolerating code fences and surrounding prose.
fn json_object(raw: &str) -> Result<serde_json::Value, String> {
    let trimmed = raw.trim();
    let mut candidates = vec![trimmed];
    if let Some(inner) = FENCED.captures(trimmed).and_then(|c| c.get(1)) {
        candidates.push(inner.as_str());
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            candidates.push(&trimmed[start..=end]);
        }
    }

    let mut first_error = None;
    for candidate in candidates {
        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value) if value.is_object() => return Ok(value),
            Ok(_) => {
                first_error.get_or_insert_with(|| "expected a JSON object".to_string());
            }
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    Err(first_error.unwrap_or_else(|| "empty reply".to_string()))
}

/// Parse a provider reply into `T` and check it has the expected shape.
fn parse_json<T: DeserializeOwned + ReplyShape>(raw: &str) -> Result<T, String> {
    let value: T = serde_json::from_value(json_object(raw)?).map_err(|e| e.to_string())?;
    value.check_shape()?;
    Ok(value)
}

/// Zero-based step index for the first "step N" mention, if any.
#[must_use]
pub fn step_reference(text: &str) -> Option<usize> {
    STEP_MENTION
        .captures(text)
        .and_then(|c| c[1].parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
}

/// Turns one user intent into one logical provider call and typed results.
pub struct Orchestrator {
    provider: Arc<dyn CompletionProvider>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: OrchestratorConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // --- Suggestions ---

    pub async fn suggest_from_ingredients(
        &self,
        ingredients: &[String],
        catalog: &[Recipe],
    ) -> Result<SuggestionSet, SuggestError> {
        let keys = normalize_ingredients(ingredients);
        if keys.is_empty() {
            return Err(SuggestError::InvalidInput(
                "at least one ingredient is required".to_string(),
            ));
        }
        let have: HashSet<String> = keys.iter().cloned().collect();

        let mut matches: Vec<Suggestion> = catalog
            .iter()
            .filter_map(|recipe| {
                let (score, missing) = score_ingredients(&recipe.ingredients, &have);
                (score > 0.0 && score >= self.config.min_match_score).then(|| {
                    Suggestion::CatalogMatch {
                        recipe: recipe.clone(),
                        score,
                        missing,
                    }
                })
            })
            .collect();
        if !matches.is_empty() {
            debug!(matches = matches.len(), "Catalog covers the pantry, skipping provider");
            rank(&mut matches);
            return Ok(SuggestionSet {
                suggestions: matches,
                tips: Vec::new(),
            });
        }

        let prompt = suggestion_prompt(&keys, catalog);
        debug!(
            ingredients = keys.len(),
            catalog = catalog.len(),
            prompt_chars = prompt.len(),
            "Requesting recipe ideas"
        );
        let payload: SuggestionPayload = self
            .request_json(ProviderRequest::json(JSON_SYSTEM, prompt))
            .await?;

        let mut results = Vec::new();
        let mut seen_ids = HashSet::new();
        let match_titles = payload.match_titles.unwrap_or_default();
        for title in match_titles.iter().take(MAX_MATCH_TITLES) {
            let wanted = title.trim().to_lowercase();
            let Some(recipe) = catalog
                .iter()
                .find(|r| r.title.trim().to_lowercase() == wanted)
            else {
                continue;
            };
            if !seen_ids.insert(recipe.id) {
                continue;
            }
            let (score, missing) = score_ingredients(&recipe.ingredients, &have);
            results.push(Suggestion::CatalogMatch {
                recipe: recipe.clone(),
                score,
                missing,
            });
        }
        for idea in payload.ideas.unwrap_or_default().into_iter().take(MAX_IDEAS) {
            let Some(recipe) = idea_to_recipe(idea) else {
                continue;
            };
            let (score, missing) = score_ingredients(&recipe.ingredients, &have);
            results.push(Suggestion::GeneratedRecipe {
                recipe,
                score,
                missing,
            });
        }

        if results.is_empty() {
            return Err(SuggestError::EmptyResult);
        }
        rank(&mut results);

        let tips = payload
            .substitutions
            .unwrap_or_default()
            .iter()
            .map(|tip| truncate_chars(tip, MAX_TIP_CHARS))
            .filter(|tip| !tip.is_empty())
            .take(MAX_SUBSTITUTIONS)
            .collect();
        Ok(SuggestionSet {
            suggestions: results,
            tips,
        })
    }

    // --- Substitutions ---

    pub async fn substitute(
        &self,
        ingredient: &str,
        context: Option<&Recipe>,
    ) -> Result<Vec<SubstitutionCandidate>, SuggestError> {
        let ingredient = ingredient.split_whitespace().collect::<Vec<_>>().join(" ");
        if ingredient.is_empty() {
            return Err(SuggestError::InvalidInput(
                "ingredient must not be empty".to_string(),
            ));
        }

        let mut prompt = format!(
            "Suggest practical substitutes for \"{ingredient}\" in home cooking.\n"
        );
        if let Some(recipe) = context {
            prompt.push_str(&format!(
                "It is needed for the recipe \"{}\" with ingredients: {}.\n",
                recipe.title,
                ingredient_list(&recipe.ingredients)
            ));
        }
        prompt.push_str(
            "Return JSON: {\"substitutions\": [{\"substitute\": string, \"rationale\": string, \
             \"ratio\": string or null}]}. Best option first, at most 5 entries.",
        );

        let mut request = ProviderRequest::json(JSON_SYSTEM, prompt);
        request.temperature = 0.4;
        request.max_output_tokens = 512;
        let payload: SubstitutionPayload = self.request_json(request).await?;
        collect_substitutions(payload, Some(&ingredient))
    }

    /// Substitutes for every missing ingredient of a recipe in one call.
    pub async fn substitutions_for_missing(
        &self,
        recipe: &Recipe,
        missing: &[String],
    ) -> Result<Vec<SubstitutionCandidate>, SuggestError> {
        let missing: Vec<&str> = missing
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .collect();
        if missing.is_empty() {
            return Err(SuggestError::InvalidInput(
                "no missing ingredients to substitute".to_string(),
            ));
        }

        let prompt = format!(
            "Recipe: {}\nIngredients: {}\nThe cook is missing: {}.\n\
             For each missing ingredient suggest one common substitute.\n\
             Return JSON: {{\"substitutions\": [{{\"ingredient\": string, \"substitute\": string, \
             \"rationale\": string, \"ratio\": string or null}}]}}.",
            recipe.title,
            ingredient_list(&recipe.ingredients),
            missing.join(", ")
        );
        let mut request = ProviderRequest::json(JSON_SYSTEM, prompt);
        request.temperature = 0.4;
        request.max_output_tokens = 512;
        let payload: SubstitutionPayload = self.request_json(request).await?;
        collect_substitutions(payload, None)
    }

    // --- Chat ---

    pub async fn chat(
        &self,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<ChatReply, SuggestError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SuggestError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        let limit = self.config.chat_max_turns.max(1);
        let keep_history = limit - 1;
        let mut start = history.len().saturating_sub(keep_history);
        // The window has to open on a user turn.
        while history.get(start).is_some_and(|turn| turn.role == Role::Assistant) {
            start += 1;
        }
        let mut turns: Vec<ChatTurn> = history[start..].to_vec();
        turns.push(ChatTurn::user(message));

        let mut request = ProviderRequest::text(ASSISTANT_SYSTEM, message);
        request.turns = turns;
        request.temperature = 0.7;
        request.max_output_tokens = 768;
        debug!(turns = request.turns.len(), "Sending chat message");

        let text = self.send_with_retry(&request).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SuggestError::EmptyResult);
        }
        Ok(ChatReply {
            text: text.to_string(),
            step_reference: step_reference(text),
        })
    }

    // --- Step tips ---

    pub async fn step_tip(&self, recipe: &Recipe, step_index: usize) -> Result<String, SuggestError> {
        let Some(step) = recipe.steps.get(step_index) else {
            return Err(SuggestError::InvalidInput(format!(
                "step {} is out of range, '{}' has {} steps",
                step_index + 1,
                recipe.title,
                recipe.steps.len()
            )));
        };

        let prompt = format!(
            "Recipe: {}\nCurrent Step: {}\n\nGive one short, practical tip that helps \
             a home cook get this step right.",
            recipe.title,
            step.trim()
        );
        let text = self
            .send_with_retry(&ProviderRequest::text(ASSISTANT_SYSTEM, prompt))
            .await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SuggestError::EmptyResult);
        }
        Ok(text.to_string())
    }

    // --- Provider plumbing ---

    /// Send with retries, parse as JSON, and on a parse failure resend once
    /// with a stricter instruction.
    async fn request_json<T: DeserializeOwned + ReplyShape>(
        &self,
        request: ProviderRequest,
    ) -> Result<T, SuggestError> {
        let raw = self.send_with_retry(&request).await?;
        let first_error = match parse_json(&raw) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        warn!(error = %first_error, "Provider reply did not match the expected JSON, retrying with a stricter prompt");

        let mut strict = request;
        strict.system = format!("{}\n{STRICT_JSON_REMINDER}", strict.system);
        strict.temperature = 0.0;
        let raw = self.send_with_retry(&strict).await?;
        parse_json(&raw).map_err(|e| {
            warn!(error = %e, "Provider reply still malformed after corrective retry");
            SuggestError::ProviderFormat(e)
        })
    }

    async fn send_with_retry(&self, request: &ProviderRequest) -> Result<String, SuggestError> {
        let mut attempt: u32 = 0;
        loop {
            match self.provider.send(request).await {
                Ok(text) => return Ok(text),
                Err(ProviderError::Auth(message)) => return Err(SuggestError::Auth(message)),
                Err(ProviderError::Rejected(message)) => {
                    return Err(SuggestError::ProviderUnavailable(message));
                }
                Err(ProviderError::Transient(message)) => {
                    if attempt >= self.config.max_retries {
                        warn!(attempts = attempt + 1, error = %message, "Provider retries exhausted");
                        return Err(SuggestError::ProviderUnavailable(message));
                    }
                    attempt += 1;
                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %message,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn suggestion_prompt(keys: &[String], catalog: &[Recipe]) -> String {
    let entries: Vec<CatalogEntry> = catalog
        .iter()
        .map(|r| CatalogEntry {
            title: &r.title,
            ingredients: r.ingredients.iter().map(|i| i.name.as_str()).collect(),
            time_minutes: r.time_minutes,
            difficulty: &r.difficulty,
            categories: &r.categories,
        })
        .collect();
    let catalog_json = serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string());

    format!(
        "Available ingredients: {}\n\
         Recipe library: {catalog_json}\n\n\
         Pick library titles that fit the available ingredients and propose new recipe ideas \
         that use mostly those ingredients.\n\
         Return JSON: {{\"match_titles\": [string], \"ideas\": [{{\"title\": string, \
         \"description\": string, \"ingredients\": [{{\"name\": string, \"quantity\": string}}], \
         \"steps\": [string], \"time_minutes\": integer, \"difficulty\": \"Easy\"|\"Medium\"|\"Hard\", \
         \"categories\": [string]}}], \"substitutions\": [string]}}. At most {MAX_IDEAS} ideas. \
         \"substitutions\" holds short general swap tips such as \"If missing butter, use oil\".",
        keys.join(", ")
    )
}

fn ingredient_list(ingredients: &[Ingredient]) -> String {
    ingredients
        .iter()
        .map(|i| i.name.trim())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn idea_to_recipe(idea: IdeaPayload) -> Option<NewRecipe> {
    let title = truncate_chars(&idea.title, MAX_TITLE_CHARS);
    if title.is_empty() {
        return None;
    }
    let ingredients = idea
        .ingredients
        .iter()
        .map(|i| {
            Ingredient::new(
                &truncate_chars(&i.name, MAX_INGREDIENT_CHARS),
                &truncate_chars(&i.quantity, MAX_INGREDIENT_CHARS),
            )
        })
        .filter(|i| !i.name.is_empty())
        .collect();
    let difficulty = canonical_difficulty(&idea.difficulty).map_or_else(
        || {
            let raw = truncate_chars(&idea.difficulty, MAX_DIFFICULTY_CHARS);
            if raw.is_empty() { "Easy".to_string() } else { raw }
        },
        String::from,
    );
    Some(NewRecipe {
        title,
        description: truncate_chars(&idea.description, MAX_DESCRIPTION_CHARS),
        ingredients,
        steps: idea
            .steps
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(MAX_STEPS)
            .collect(),
        time_minutes: idea.time_minutes,
        difficulty,
        image_path: None,
        categories: idea
            .categories
            .iter()
            .map(|c| truncate_chars(&c.replace(',', " "), MAX_TITLE_CHARS))
            .filter(|c| !c.is_empty())
            .take(MAX_CATEGORIES)
            .collect(),
    })
}

fn collect_substitutions(
    payload: SubstitutionPayload,
    replaces: Option<&str>,
) -> Result<Vec<SubstitutionCandidate>, SuggestError> {
    let candidates: Vec<SubstitutionCandidate> = payload
        .substitutions
        .into_iter()
        .filter_map(|item| {
            let substitute = truncate_chars(&item.substitute, MAX_INGREDIENT_CHARS);
            if substitute.is_empty() {
                return None;
            }
            Some(SubstitutionCandidate {
                replaces: replaces.map_or_else(
                    || truncate_chars(&item.ingredient, MAX_INGREDIENT_CHARS),
                    String::from,
                ),
                substitute,
                rationale: item.rationale.trim().to_string(),
                ratio: item
                    .ratio
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty()),
            })
        })
        .take(MAX_SUBSTITUTIONS)
        .collect();
    if candidates.is_empty() {
        return Err(SuggestError::EmptyResult);
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::ScriptedProvider;
    use crate::provider::ResponseShape;

    fn recipe(id: i64, title: &str, ingredients: &[&str]) -> Recipe {
        Recipe {
            id,
            uuid: format!("uuid-{id}"),
            title: title.to_string(),
            description: String::new(),
            ingredients: ingredients.iter().map(|n| Ingredient::new(n, "")).collect(),
            steps: vec!["Prep".to_string(), "Cook".to_string(), "Serve".to_string()],
            time_minutes: 20,
            difficulty: "Easy".to_string(),
            image_path: None,
            categories: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            backoff_base: Duration::ZERO,
            ..OrchestratorConfig::default()
        }
    }

    fn orchestrator(provider: &Arc<ScriptedProvider>) -> Orchestrator {
        Orchestrator::new(provider.clone(), fast_config())
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn timeout() -> Result<String, ProviderError> {
        Err(ProviderError::Transient("timed out".to_string()))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_millis(500));
        assert_eq!(config.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(config.backoff_for(10), Duration::from_secs(8));
    }

    #[test]
    fn test_score_ingredients() {
        let have: HashSet<String> = ["egg", "milk"].iter().map(|s| (*s).to_string()).collect();
        let ingredients = vec![
            Ingredient::new("Eggs", "2"),
            Ingredient::new("Milk", "1 cup"),
            Ingredient::new("Flour", "200 g"),
            Ingredient::new("Sugar", "1 tbsp"),
        ];
        let (score, missing) = score_ingredients(&ingredients, &have);
        assert!((score - 0.5).abs() < f64::EPSILON);
        assert_eq!(missing, vec!["Flour", "Sugar"]);

        let (score, missing) = score_ingredients(&[], &have);
        assert!(score.abs() < f64::EPSILON);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_normalize_ingredients_dedupes() {
        let keys = normalize_ingredients(&strings(&[" Eggs", "egg", "", "  ", "Olive  Oil"]));
        assert_eq!(keys, vec!["egg", "olive oil"]);
    }

    #[test]
    fn test_parse_json_tolerates_fences_and_prose() {
        let direct: SubstitutionPayload = parse_json(r#"{"substitutions": []}"#).unwrap();
        assert!(direct.substitutions.is_empty());

        let fenced: SubstitutionPayload =
            parse_json("```json\n{\"substitutions\": [{\"name\": \"yogurt\"}]}\n```").unwrap();
        assert_eq!(fenced.substitutions[0].substitute, "yogurt");

        let prose: SubstitutionPayload = parse_json(
            "Sure! Here you go: {\"substitutions\": [{\"substitute\": \"honey\"}]} Enjoy.",
        )
        .unwrap();
        assert_eq!(prose.substitutions[0].substitute, "honey");

        assert!(parse_json::<SubstitutionPayload>("no json at all").is_err());
        assert!(parse_json::<SubstitutionPayload>("[]").is_err());
        assert!(parse_json::<SubstitutionPayload>(r#"{"answer": "use oil"}"#).is_err());
        assert!(parse_json::<SuggestionPayload>(r#"{"recipes": []}"#).is_err());
        assert!(parse_json::<SuggestionPayload>(r#"{"ideas": []}"#).is_ok());
    }

    #[test]
    fn test_step_reference() {
        assert_eq!(step_reference("In step 3, fold gently."), Some(2));
        assert_eq!(step_reference("See Step #1 again"), Some(0));
        assert_eq!(step_reference("Step 0 is not a thing"), None);
        assert_eq!(step_reference("Stir well"), None);
    }

    #[test]
    fn test_lenient_minutes() {
        let idea: IdeaPayload = serde_json::from_str(r#"{"title": "a", "time_minutes": "25 min"}"#).unwrap();
        assert_eq!(idea.time_minutes, 25);
        let idea: IdeaPayload = serde_json::from_str(r#"{"title": "a", "time_minutes": 12.6}"#).unwrap();
        assert_eq!(idea.time_minutes, 13);
        let idea: IdeaPayload = serde_json::from_str(r#"{"title": "a", "time_minutes": null}"#).unwrap();
        assert_eq!(idea.time_minutes, 0);
    }

    #[tokio::test]
    async fn test_catalog_matches_skip_provider() {
        let provider = Arc::new(ScriptedProvider::always(timeout()));
        let catalog = vec![
            recipe(1, "Pancakes", &["egg", "milk", "flour"]),
            recipe(2, "Omelette", &["egg", "milk"]),
            recipe(3, "Curry", &["chicken", "rice", "curry paste", "onion"]),
            recipe(4, "Custard", &["egg", "milk", "sugar", "vanilla"]),
        ];
        let set = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["Eggs", "milk"]), &catalog)
            .await
            .unwrap();
        assert!(set.tips.is_empty());
        let results = set.suggestions;

        assert_eq!(provider.calls(), 0);
        let titles: Vec<&str> = results.iter().map(Suggestion::title).collect();
        // Custard sits exactly on the threshold.
        assert_eq!(titles, vec!["Omelette", "Pancakes", "Custard"]);
        assert!((results[0].score() - 1.0).abs() < f64::EPSILON);
        for pair in results.windows(2) {
            assert!(pair[0].score() >= pair[1].score());
        }
        assert_eq!(results[1].missing(), ["flour"]);
    }

    #[tokio::test]
    async fn test_ties_break_on_missing_then_title() {
        let provider = Arc::new(ScriptedProvider::always(timeout()));
        let catalog = vec![
            recipe(1, "beta", &["egg", "milk", "ham", "cheese"]),
            recipe(2, "Alpha", &["egg", "ham"]),
            recipe(3, "gamma", &["egg", "cheese"]),
        ];
        let results = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["egg", "milk"]), &catalog)
            .await
            .unwrap()
            .suggestions;
        let titles: Vec<&str> = results.iter().map(Suggestion::title).collect();
        assert_eq!(titles, vec!["Alpha", "gamma", "beta"]);
    }

    #[tokio::test]
    async fn test_empty_ingredients_is_invalid_input() {
        let provider = Arc::new(ScriptedProvider::always(timeout()));
        let err = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["  ", ""]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::InvalidInput(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_generated_ideas_when_catalog_misses() {
        let reply = r#"{
            "match_titles": ["curry", "Unknown Dish"],
            "ideas": [
                {"title": "Egg Fried Rice", "description": "Quick",
                 "ingredients": [{"name": "egg", "quantity": "2"}, {"name": "rice", "quantity": "1 cup"}],
                 "steps": ["Fry", " ", "Serve"], "time_minutes": 15, "difficulty": "easy",
                 "categories": ["Asian"]},
                {"title": "   ", "ingredients": []}
            ]
        }"#;
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(reply.to_string())]));
        let catalog = vec![recipe(7, "Curry", &["chicken", "rice", "curry paste", "onion"])];
        let results = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["eggs", "rice"]), &catalog)
            .await
            .unwrap()
            .suggestions;

        assert_eq!(provider.calls(), 1);
        let request = &provider.requests()[0];
        assert_eq!(request.shape, ResponseShape::Json);
        assert!(request.prompt().contains("egg, rice"));
        assert!(request.prompt().contains("\"title\":\"Curry\""));

        assert_eq!(results.len(), 2);
        match &results[0] {
            Suggestion::GeneratedRecipe { recipe, score, missing } => {
                assert_eq!(recipe.title, "Egg Fried Rice");
                assert_eq!(recipe.difficulty, "Easy");
                assert_eq!(recipe.steps, vec!["Fry", "Serve"]);
                assert!((score - 1.0).abs() < f64::EPSILON);
                assert!(missing.is_empty());
            }
            other => panic!("expected generated recipe, got {other:?}"),
        }
        match &results[1] {
            Suggestion::CatalogMatch { recipe, score, .. } => {
                assert_eq!(recipe.id, 7);
                assert!((score - 0.25).abs() < f64::EPSILON);
            }
            other => panic!("expected catalog match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idea_fields_are_capped() {
        let long_title = "x".repeat(500);
        let steps: Vec<String> = (0..50).map(|i| format!("step {i}")).collect();
        let reply = serde_json::json!({
            "ideas": [{"title": long_title, "steps": steps, "difficulty": ""}]
        })
        .to_string();
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(reply)]));
        let results = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["egg"]), &[])
            .await
            .unwrap()
            .suggestions;
        let Suggestion::GeneratedRecipe { recipe, .. } = &results[0] else {
            panic!("expected generated recipe");
        };
        assert_eq!(recipe.title.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(recipe.steps.len(), MAX_STEPS);
        assert_eq!(recipe.difficulty, "Easy");
    }

    #[tokio::test]
    async fn test_empty_payload_is_empty_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"match_titles": [], "ideas": []}"#.to_string(),
        )]));
        let err = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["egg"]), &[])
            .await
            .unwrap_err();
        assert!(err.is_empty_result());
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_retries() {
        let provider = Arc::new(ScriptedProvider::always(timeout()));
        let err = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["egg"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::ProviderUnavailable(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            timeout(),
            Ok(r#"{"substitutions": [{"substitute": "Greek yogurt", "rationale": "tangy", "ratio": "1:1"}]}"#.to_string()),
        ]));
        let result = orchestrator(&provider)
            .substitute("sour cream", None)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(
            result,
            vec![SubstitutionCandidate {
                replaces: "sour cream".to_string(),
                substitute: "Greek yogurt".to_string(),
                rationale: "tangy".to_string(),
                ratio: Some("1:1".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::always(Err(ProviderError::Auth(
            "missing key".to_string(),
        ))));
        let err = orchestrator(&provider)
            .substitute("butter", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::Auth(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::always(Err(ProviderError::Rejected(
            "HTTP 400".to_string(),
        ))));
        let err = orchestrator(&provider)
            .substitute("butter", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::ProviderUnavailable(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_retries_once_then_format_error() {
        let provider = Arc::new(ScriptedProvider::always(Ok("I think you should use oil".to_string())));
        let err = orchestrator(&provider)
            .substitute("butter", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::ProviderFormat(_)));
        assert_eq!(provider.calls(), 2);
        let requests = provider.requests();
        assert!(requests[1].system.contains("could not be parsed"));
    }

    #[tokio::test]
    async fn test_wrong_shape_suggestions_retry_then_format_error() {
        let provider = Arc::new(ScriptedProvider::always(Ok(
            r#"{"recipes": [{"name": "Egg Fried Rice"}]}"#.to_string(),
        )));
        let err = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["egg"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::ProviderFormat(_)));
        assert_eq!(provider.calls(), 2);
        assert!((provider.requests()[1].temperature).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_wrong_shape_substitutions_retry_then_format_error() {
        let provider = Arc::new(ScriptedProvider::always(Ok(
            r#"{"answer": "use oil"}"#.to_string(),
        )));
        let err = orchestrator(&provider)
            .substitute("butter", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::ProviderFormat(_)));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_object_reply_is_format_error() {
        let provider = Arc::new(ScriptedProvider::always(Ok("[]".to_string())));
        let err = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["egg"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::ProviderFormat(_)));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_suggestion_tips_after_corrective_retry() {
        let long_tip = "y".repeat(1000);
        let reply = serde_json::json!({
            "match_titles": [],
            "ideas": [{"title": "Egg Drop Soup", "ingredients": [{"name": "egg", "quantity": "2"}]}],
            "substitutions": [" If missing butter, use oil ", "  ", long_tip],
        })
        .to_string();
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(r#"{"answer": "soup"}"#.to_string()),
            Ok(reply),
        ]));
        let set = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["egg"]), &[])
            .await
            .unwrap();
        assert_eq!(provider.calls(), 2);
        assert!(provider.requests()[0].prompt().contains("\"substitutions\": [string]"));
        assert_eq!(set.suggestions.len(), 1);
        assert_eq!(set.tips.len(), 2);
        assert_eq!(set.tips[0], "If missing butter, use oil");
        assert_eq!(set.tips[1].chars().count(), MAX_TIP_CHARS);
    }

    #[tokio::test]
    async fn test_tips_are_capped() {
        let tips: Vec<String> = (0..40).map(|i| format!("tip {i}")).collect();
        let reply = serde_json::json!({
            "ideas": [{"title": "Boiled Egg", "ingredients": [{"name": "egg"}]}],
            "substitutions": tips,
        })
        .to_string();
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(reply)]));
        let set = orchestrator(&provider)
            .suggest_from_ingredients(&strings(&["egg"]), &[])
            .await
            .unwrap();
        assert_eq!(set.tips.len(), MAX_SUBSTITUTIONS);
        assert_eq!(set.tips[0], "tip 0");
    }

    #[tokio::test]
    async fn test_corrective_retry_recovers() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("not json".to_string()),
            Ok(r#"{"substitutions": [{"substitute": "margarine"}]}"#.to_string()),
        ]));
        let result = orchestrator(&provider)
            .substitute("butter", None)
            .await
            .unwrap();
        assert_eq!(result[0].substitute, "margarine");
        assert_eq!(result[0].ratio, None);
    }

    #[tokio::test]
    async fn test_substitute_rejects_blank_ingredient() {
        let provider = Arc::new(ScriptedProvider::always(timeout()));
        let err = orchestrator(&provider).substitute("   ", None).await.unwrap_err();
        assert!(matches!(err, SuggestError::InvalidInput(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_substitute_with_recipe_context() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"substitutions": [{"substitute": "buttermilk"}]}"#.to_string(),
        )]));
        let pancakes = recipe(1, "Pancakes", &["egg", "milk", "flour"]);
        orchestrator(&provider)
            .substitute("milk", Some(&pancakes))
            .await
            .unwrap();
        let prompt = provider.requests()[0].prompt().to_string();
        assert!(prompt.contains("Pancakes"));
        assert!(prompt.contains("egg, milk, flour"));
    }

    #[tokio::test]
    async fn test_substitutions_for_missing() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(r#"{"substitutions": [
            {"ingredient": "flour", "substitute": "oat flour", "rationale": "gluten free"},
            {"ingredient": "sugar", "substitute": ""}
        ]}"#
            .to_string())]));
        let pancakes = recipe(1, "Pancakes", &["egg", "milk", "flour", "sugar"]);
        let result = orchestrator(&provider)
            .substitutions_for_missing(&pancakes, &strings(&["flour", "sugar"]))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].replaces, "flour");
        assert!(provider.requests()[0].prompt().contains("missing: flour, sugar"));

        let err = orchestrator(&provider)
            .substitutions_for_missing(&pancakes, &strings(&[" "]))
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_substitutions_is_empty_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"substitutions": []}"#.to_string(),
        )]));
        let err = orchestrator(&provider)
            .substitute("saffron", None)
            .await
            .unwrap_err();
        assert_eq!(err, SuggestError::EmptyResult);
    }

    #[tokio::test]
    async fn test_chat_truncates_history() {
        let provider = Arc::new(ScriptedProvider::always(Ok("Sure, see step 2.".to_string())));
        let history: Vec<ChatTurn> = (0..50)
            .map(|i| {
                if i % 2 == 0 {
                    ChatTurn::user(format!("question {i}"))
                } else {
                    ChatTurn::assistant(format!("answer {i}"))
                }
            })
            .collect();
        let reply = orchestrator(&provider)
            .chat(&history, "What next?")
            .await
            .unwrap();

        assert_eq!(reply.text, "Sure, see step 2.");
        assert_eq!(reply.step_reference, Some(1));
        let request = &provider.requests()[0];
        // 19 history turns would open on "answer 31", so that one is dropped too.
        assert_eq!(request.turns.len(), 19);
        assert_eq!(request.turns[0].role, Role::User);
        assert_eq!(request.turns[0].text, "question 32");
        let last = request.turns.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.text, "What next?");
        assert_eq!(request.shape, ResponseShape::Text);
    }

    #[tokio::test]
    async fn test_chat_window_opens_on_user_turn() {
        let provider = Arc::new(ScriptedProvider::always(Ok("Yes.".to_string())));
        let history = vec![
            ChatTurn::user("q1"),
            ChatTurn::assistant("a1"),
            ChatTurn::user("q2"),
            ChatTurn::assistant("a2"),
        ];
        let config = OrchestratorConfig {
            chat_max_turns: 4,
            ..fast_config()
        };
        Orchestrator::new(provider.clone(), config)
            .chat(&history, "q3")
            .await
            .unwrap();
        let texts: Vec<String> = provider.requests()[0]
            .turns
            .iter()
            .map(|t| t.text.clone())
            .collect();
        assert_eq!(texts, vec!["q2", "a2", "q3"]);
    }

    #[tokio::test]
    async fn test_chat_short_history_sent_whole() {
        let provider = Arc::new(ScriptedProvider::always(Ok("Hello!".to_string())));
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("hey")];
        let reply = orchestrator(&provider).chat(&history, "thanks").await.unwrap();
        assert_eq!(reply.step_reference, None);
        assert_eq!(provider.requests()[0].turns.len(), 3);
    }

    #[tokio::test]
    async fn test_chat_blank_reply_is_empty_result() {
        let provider = Arc::new(ScriptedProvider::always(Ok("  \n".to_string())));
        let err = orchestrator(&provider).chat(&[], "hi").await.unwrap_err();
        assert!(err.is_empty_result());
        let err = orchestrator(&provider).chat(&[], "  ").await.unwrap_err();
        assert!(matches!(err, SuggestError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_step_tip() {
        let provider = Arc::new(ScriptedProvider::always(Ok(" Keep the pan hot. ".to_string())));
        let omelette = recipe(2, "Omelette", &["egg"]);
        let tip = orchestrator(&provider).step_tip(&omelette, 1).await.unwrap();
        assert_eq!(tip, "Keep the pan hot.");
        let prompt = provider.requests()[0].prompt().to_string();
        assert!(prompt.contains("Recipe: Omelette\nCurrent Step: Cook"));

        let err = orchestrator(&provider).step_tip(&omelette, 3).await.unwrap_err();
        assert!(matches!(err, SuggestError::InvalidInput(_)));
        assert_eq!(provider.calls(), 1);
    }
}
