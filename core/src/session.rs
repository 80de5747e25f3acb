use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::error::SuggestError;
use crate::models::Recipe;
use crate::orchestrator::{ChatReply, Orchestrator, SubstitutionCandidate, SuggestionSet};
use crate::provider::ChatTurn;

/// One logical request stream of the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    Suggestions,
    Substitutions,
    Chat,
    StepTip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub surface: Surface,
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub enum AssistantReply {
    Suggestions(SuggestionSet),
    Substitutions(Vec<SubstitutionCandidate>),
    Chat(ChatReply),
    Tip(String),
}

/// Result of one background request, delivered on the session's channel.
#[derive(Debug)]
pub struct Completion {
    pub ticket: Ticket,
    pub outcome: Result<AssistantReply, SuggestError>,
}

/// Conversation state and in-flight tickets for one front end.
///
/// Requests run as tasks on the given runtime and report back through the
/// receiver returned by [`AssistantSession::new`]; feed each received
/// completion to [`AssistantSession::handle`]. A newer suggestion,
/// substitution or step-tip request supersedes the previous one on its
/// surface. Chat messages are queued and sent one at a time.
pub struct AssistantSession {
    orchestrator: Arc<Orchestrator>,
    runtime: Handle,
    tx: UnboundedSender<Completion>,
    history: Vec<ChatTurn>,
    chat_queue: VecDeque<(Ticket, String)>,
    chat_in_flight: Option<(Ticket, String)>,
    latest: HashMap<Surface, u64>,
    next_seq: u64,
}

impl AssistantSession {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        runtime: Handle,
    ) -> (Self, UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            orchestrator,
            runtime,
            tx,
            history: Vec::new(),
            chat_queue: VecDeque::new(),
            chat_in_flight: None,
            latest: HashMap::new(),
            next_seq: 0,
        };
        (session, rx)
    }

    #[must_use]
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Chat messages waiting behind the one in flight.
    #[must_use]
    pub fn pending_chat(&self) -> usize {
        self.chat_queue.len()
    }

    #[must_use]
    pub fn chat_busy(&self) -> bool {
        self.chat_in_flight.is_some()
    }

    /// Forget the conversation. A reply still in flight is discarded.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.chat_queue.clear();
        self.chat_in_flight = None;
    }

    fn issue(&mut self, surface: Surface) -> Ticket {
        self.next_seq += 1;
        let ticket = Ticket {
            surface,
            seq: self.next_seq,
        };
        if surface != Surface::Chat {
            self.latest.insert(surface, ticket.seq);
        }
        ticket
    }

    /// Whether a completion for `ticket` would still be delivered.
    #[must_use]
    pub fn is_current(&self, ticket: Ticket) -> bool {
        match ticket.surface {
            Surface::Chat => self
                .chat_in_flight
                .as_ref()
                .is_some_and(|(t, _)| *t == ticket),
            surface => self.latest.get(&surface) == Some(&ticket.seq),
        }
    }

    // --- Requests ---

    pub fn request_suggestions(&mut self, ingredients: Vec<String>, catalog: Arc<Vec<Recipe>>) -> Ticket {
        let ticket = self.issue(Surface::Suggestions);
        let orchestrator = Arc::clone(&self.orchestrator);
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let outcome = orchestrator
                .suggest_from_ingredients(&ingredients, &catalog)
                .await
                .map(AssistantReply::Suggestions);
            let _ = tx.send(Completion { ticket, outcome });
        });
        ticket
    }

    pub fn request_substitutes(&mut self, ingredient: String, context: Option<Recipe>) -> Ticket {
        let ticket = self.issue(Surface::Substitutions);
        let orchestrator = Arc::clone(&self.orchestrator);
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let outcome = orchestrator
                .substitute(&ingredient, context.as_ref())
                .await
                .map(AssistantReply::Substitutions);
            let _ = tx.send(Completion { ticket, outcome });
        });
        ticket
    }

    pub fn request_missing_substitutes(&mut self, recipe: Recipe, missing: Vec<String>) -> Ticket {
        let ticket = self.issue(Surface::Substitutions);
        let orchestrator = Arc::clone(&self.orchestrator);
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let outcome = orchestrator
                .substitutions_for_missing(&recipe, &missing)
                .await
                .map(AssistantReply::Substitutions);
            let _ = tx.send(Completion { ticket, outcome });
        });
        ticket
    }

    pub fn request_step_tip(&mut self, recipe: Recipe, step_index: usize) -> Ticket {
        let ticket = self.issue(Surface::StepTip);
        let orchestrator = Arc::clone(&self.orchestrator);
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let outcome = orchestrator
                .step_tip(&recipe, step_index)
                .await
                .map(AssistantReply::Tip);
            let _ = tx.send(Completion { ticket, outcome });
        });
        ticket
    }

    /// Queue a chat message. It is sent right away when no other message is
    /// waiting for a reply.
    pub fn send_chat(&mut self, message: String) -> Ticket {
        let ticket = self.issue(Surface::Chat);
        self.chat_queue.push_back((ticket, message));
        if self.chat_in_flight.is_none() {
            self.dispatch_next_chat();
        }
        ticket
    }

    fn dispatch_next_chat(&mut self) {
        let Some((ticket, message)) = self.chat_queue.pop_front() else {
            return;
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        let tx = self.tx.clone();
        let history = self.history.clone();
        let text = message.clone();
        debug!(seq = ticket.seq, turns = history.len(), "Dispatching chat message");
        self.runtime.spawn(async move {
            let outcome = orchestrator
                .chat(&history, &text)
                .await
                .map(AssistantReply::Chat);
            let _ = tx.send(Completion { ticket, outcome });
        });
        self.chat_in_flight = Some((ticket, message));
    }

    // --- Completions ---

    /// Apply a completion. Returns `None` when it belongs to a superseded or
    /// cleared request and must not be shown.
    pub fn handle(
        &mut self,
        completion: Completion,
    ) -> Option<(Ticket, Result<AssistantReply, SuggestError>)> {
        let Completion { ticket, outcome } = completion;
        if !self.is_current(ticket) {
            debug!(?ticket, "Discarding stale completion");
            return None;
        }

        if ticket.surface == Surface::Chat {
            if let Some((_, message)) = self.chat_in_flight.take() {
                if let Ok(AssistantReply::Chat(reply)) = &outcome {
                    self.history.push(ChatTurn::user(message));
                    self.history.push(ChatTurn::assistant(reply.text.clone()));
                    let limit = self.orchestrator.config().chat_max_turns.max(2);
                    if self.history.len() > limit {
                        let excess = self.history.len() - limit;
                        self.history.drain(..excess);
                    }
                }
            }
            self.dispatch_next_chat();
        } else {
            self.latest.remove(&ticket.surface);
        }
        Some((ticket, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::models::Ingredient;
    use crate::orchestrator::OrchestratorConfig;
    use crate::provider::Role;
    use crate::provider::mock::ScriptedProvider;
    use std::time::Duration;

    fn recipe() -> Recipe {
        Recipe {
            id: 1,
            uuid: "r1".to_string(),
            title: "Omelette".to_string(),
            description: String::new(),
            ingredients: vec![Ingredient::new("egg", "3")],
            steps: vec!["Beat".to_string(), "Cook".to_string()],
            time_minutes: 10,
            difficulty: "Easy".to_string(),
            image_path: None,
            categories: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn session(
        provider: &Arc<ScriptedProvider>,
    ) -> (AssistantSession, UnboundedReceiver<Completion>) {
        let config = OrchestratorConfig {
            backoff_base: Duration::ZERO,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(provider.clone(), config));
        AssistantSession::new(orchestrator, Handle::current())
    }

    #[tokio::test]
    async fn test_superseded_step_tip_is_discarded() {
        let provider = Arc::new(ScriptedProvider::always(Ok("Use low heat.".to_string())));
        let (mut session, mut rx) = session(&provider);

        let first = session.request_step_tip(recipe(), 0);
        let second = session.request_step_tip(recipe(), 1);
        assert!(!session.is_current(first));

        let mut delivered = Vec::new();
        for _ in 0..2 {
            let completion = rx.recv().await.unwrap();
            if let Some((ticket, outcome)) = session.handle(completion) {
                delivered.push((ticket, outcome));
            }
        }
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, second);
        assert!(matches!(&delivered[0].1, Ok(AssistantReply::Tip(t)) if t == "Use low heat."));
    }

    #[tokio::test]
    async fn test_surfaces_are_independent() {
        let provider = Arc::new(ScriptedProvider::always(Ok("tip".to_string())));
        let (mut session, mut rx) = session(&provider);

        let tip = session.request_step_tip(recipe(), 0);
        let suggestions = session.request_suggestions(Vec::new(), Arc::new(Vec::new()));

        let mut delivered = Vec::new();
        for _ in 0..2 {
            let completion = rx.recv().await.unwrap();
            delivered.push(session.handle(completion).unwrap());
        }
        let suggestion_outcome = delivered
            .iter()
            .find(|(t, _)| *t == suggestions)
            .map(|(_, o)| o)
            .unwrap();
        assert!(matches!(suggestion_outcome, Err(SuggestError::InvalidInput(_))));
        assert!(delivered.iter().any(|(t, _)| *t == tip));
    }

    #[tokio::test]
    async fn test_chat_messages_are_queued_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("First reply".to_string()),
            Ok("Second reply, see step 2".to_string()),
        ]));
        let (mut session, mut rx) = session(&provider);

        let first = session.send_chat("hi".to_string());
        let second = session.send_chat("what next?".to_string());
        assert!(session.chat_busy());
        assert_eq!(session.pending_chat(), 1);

        let (ticket, outcome) = session.handle(rx.recv().await.unwrap()).unwrap();
        assert_eq!(ticket, first);
        assert!(matches!(outcome, Ok(AssistantReply::Chat(ref r)) if r.text == "First reply"));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.pending_chat(), 0);

        let (ticket, outcome) = session.handle(rx.recv().await.unwrap()).unwrap();
        assert_eq!(ticket, second);
        let Ok(AssistantReply::Chat(reply)) = outcome else {
            panic!("expected chat reply");
        };
        assert_eq!(reply.step_reference, Some(1));
        assert!(!session.chat_busy());

        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], ChatTurn::user("what next?"));
        assert_eq!(history[3].role, Role::Assistant);

        let requests = provider.requests();
        assert_eq!(requests[0].turns.len(), 1);
        assert_eq!(requests[1].turns.len(), 3);
        assert_eq!(requests[1].turns[1].text, "First reply");
    }

    #[tokio::test]
    async fn test_failed_chat_keeps_history_and_continues() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Auth("no key".to_string())),
            Ok("Hello".to_string()),
        ]));
        let (mut session, mut rx) = session(&provider);
        session.send_chat("one".to_string());
        session.send_chat("two".to_string());

        let (_, outcome) = session.handle(rx.recv().await.unwrap()).unwrap();
        assert!(matches!(outcome, Err(SuggestError::Auth(_))));
        assert!(session.history().is_empty());

        let (_, outcome) = session.handle(rx.recv().await.unwrap()).unwrap();
        assert!(outcome.is_ok());
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_history_discards_in_flight_reply() {
        let provider = Arc::new(ScriptedProvider::always(Ok("late".to_string())));
        let (mut session, mut rx) = session(&provider);
        session.send_chat("hello".to_string());
        session.clear_history();

        assert!(session.handle(rx.recv().await.unwrap()).is_none());
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let provider = Arc::new(ScriptedProvider::always(Ok("ok".to_string())));
        let config = OrchestratorConfig {
            backoff_base: Duration::ZERO,
            chat_max_turns: 4,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(provider.clone(), config));
        let (mut session, mut rx) = AssistantSession::new(orchestrator, Handle::current());

        for i in 0..5 {
            session.send_chat(format!("message {i}"));
        }
        for _ in 0..5 {
            session.handle(rx.recv().await.unwrap()).unwrap();
        }
        assert_eq!(session.history().len(), 4);
        assert_eq!(session.history()[0].text, "message 3");
    }
}
