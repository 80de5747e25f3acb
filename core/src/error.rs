use thiserror::Error;

/// Failure of one orchestrator operation, returned to the presentation layer
/// as a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SuggestError {
    /// Caller precondition violated. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Network, timeout or rate-limit failures outlasted the retry budget.
    #[error("AI provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The reply did not match the expected shape, even after a corrective retry.
    #[error("AI provider returned an unexpected response: {0}")]
    ProviderFormat(String),
    /// The reply was well formed but carried nothing usable.
    #[error("No suggestions found")]
    EmptyResult,
    /// Missing or rejected credential. Never retried.
    #[error("AI provider authentication failed: {0}")]
    Auth(String),
}

impl SuggestError {
    /// `EmptyResult` is a "nothing to show" state rather than a failure.
    #[must_use]
    pub fn is_empty_result(&self) -> bool {
        matches!(self, SuggestError::EmptyResult)
    }
}

/// Failure reported by a `CompletionProvider` for a single attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Worth retrying: connection failures, timeouts, HTTP 429 and 5xx.
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("credential missing or rejected: {0}")]
    Auth(String),
    /// The provider refused the request outright (bad request, unknown model).
    #[error("request rejected by provider: {0}")]
    Rejected(String),
}

/// User-facing validation failures from the pantry/grocery/favorites layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{0}' is already in the pantry")]
    DuplicatePantryItem(String),
    #[error("'{0}' is already on the grocery list")]
    DuplicateGroceryItem(String),
    #[error("'{0}' is not in the pantry")]
    UnknownPantryItem(String),
    #[error("'{0}' is not on the grocery list")]
    UnknownGroceryItem(String),
    #[error("Recipe {0} does not exist")]
    UnknownRecipe(i64),
}
