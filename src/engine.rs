//! The three-phase conversation state machine.
//!
//! `ConversationEngine::handle_turn` is a function of the user's input and the
//! `WorkflowState` the caller passes in. The engine keeps nothing between
//! calls; the caller owns the state and replaces it only when a turn succeeds.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::catalog::BlocksCatalog;
use crate::constants;
use crate::error::EngineError;
use crate::llm_interaction::{ChatMessage, LlmClient};
use crate::prompts::PromptTemplates;
use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Clarification,
    DesignProposal,
    BlockRecommendation,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Clarification => "clarification",
            Phase::DesignProposal => "design_proposal",
            Phase::BlockRecommendation => "block_recommendation",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowState {
    pub phase: Phase,
    pub base_request: String,
    pub requirement_messages: Vec<ChatMessage>,
    pub design_proposal: Option<String>,
    pub design_feedback: Vec<String>,
}

impl WorkflowState {
    fn advance(&mut self, next: Phase) {
        debug_assert!(next >= self.phase, "phase moved backwards");
        if next > self.phase {
            debug!(from = self.phase.as_str(), to = next.as_str(), "Phase transition");
            self.phase = next;
        }
    }
}

/// Result of a successful turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub assistant_messages: Vec<String>,
    pub state: WorkflowState,
}

/// Recognizes the token the clarification prompt asks the model to emit once
/// every technical check is satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessMarker {
    token: String,
}

impl Default for ReadinessMarker {
    fn default() -> Self {
        Self::new(constants::DEFAULT_READY_MARKER)
    }
}

impl ReadinessMarker {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().trim().to_string(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn is_marker_line(&self, line: &str) -> bool {
        if self.token.is_empty() {
            return false;
        }
        let line = line.trim();
        if line == self.token {
            return true;
        }
        // Compare with decoration removed on both sides so tokens such as
        // "[READY]" or "DONE." still match their decorated forms.
        let token = undecorated(&self.token);
        !token.is_empty() && undecorated(line) == token
    }

    /// True when some line of `reply` consists of the token alone (markdown
    /// emphasis, brackets and a trailing period tolerated).
    pub fn is_ready(&self, reply: &str) -> bool {
        reply.lines().any(|line| self.is_marker_line(line))
    }

    /// The reply with marker lines removed.
    pub fn strip(&self, reply: &str) -> String {
        reply
            .lines()
            .filter(|line| !self.is_marker_line(line))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

fn undecorated(text: &str) -> &str {
    text.trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`' | '[' | ']' | '.'))
        .trim()
}

const CLOSING_MESSAGE: &str = "The block recommendation is final. Describe any further changes to regenerate it, or reset the conversation to start a new request.";

const CONFIRMATIONS: &[&str] = &[
    "confirmed",
    "confirm",
    "ok",
    "okay",
    "yes",
    "looks good",
    "lgtm",
    "approved",
    "done",
];

fn is_confirmation(input: &str) -> bool {
    let normalized = input
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .trim()
        .to_lowercase();
    CONFIRMATIONS.contains(&normalized.as_str())
}

pub struct ConversationEngine {
    settings: Arc<SettingsStore>,
    catalog: Arc<BlocksCatalog>,
    llm: Arc<dyn LlmClient>,
    templates: PromptTemplates,
    marker: ReadinessMarker,
    fallback_api_key: String,
}

impl ConversationEngine {
    pub fn new(
        settings: Arc<SettingsStore>,
        catalog: Arc<BlocksCatalog>,
        llm: Arc<dyn LlmClient>,
        marker: ReadinessMarker,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            settings,
            catalog,
            llm,
            templates: PromptTemplates::new()?,
            marker,
            fallback_api_key: String::new(),
        })
    }

    /// Key used when none has been saved in settings.
    pub fn with_fallback_api_key(mut self, key: impl Into<String>) -> Self {
        self.fallback_api_key = key.into().trim().to_string();
        self
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn catalog(&self) -> &Arc<BlocksCatalog> {
        &self.catalog
    }

    /// Discard the whole conversation.
    pub fn reset(&self) -> WorkflowState {
        info!("Conversation reset");
        WorkflowState::default()
    }

    fn api_key(&self, stored: &str) -> Result<String, EngineError> {
        let stored = stored.trim();
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }
        if !self.fallback_api_key.is_empty() {
            return Ok(self.fallback_api_key.clone());
        }
        Err(EngineError::Configuration(
            "Please save your OpenAI API key in Settings.".to_string(),
        ))
    }

    /// Process one user message against `state`. On error the caller keeps
    /// its state as it was and may resubmit the same input.
    #[instrument(skip_all, fields(phase = state.phase.as_str()))]
    pub async fn handle_turn(&self, user_input: &str, state: &WorkflowState) -> Result<TurnReply, EngineError> {
        let input = user_input.trim();
        if input.is_empty() {
            return Err(EngineError::EmptyInput);
        }

        let settings = self.settings.load();
        let api_key = self.api_key(&settings.api_key)?;

        let mut next = state.clone();
        let mut messages = Vec::new();

        match state.phase {
            Phase::Clarification => {
                if next.base_request.is_empty() {
                    next.base_request = input.to_string();
                }
                next.requirement_messages.push(ChatMessage::user(input));

                let ready = if settings.technical_checks.trim().is_empty() {
                    debug!("No technical checks configured, skipping clarification");
                    true
                } else {
                    let prompt = self.templates.clarification(
                        self.marker.token(),
                        &settings.technical_checks,
                        &next.requirement_messages,
                    )?;
                    let reply = self.llm.generate(&api_key, &prompt).await.map_err(|e| {
                        warn!(error = %e, "Clarification call failed");
                        e
                    })?;
                    let ready = self.marker.is_ready(&reply);
                    let text = self.marker.strip(&reply);
                    if !text.is_empty() {
                        next.requirement_messages.push(ChatMessage::assistant(text.clone()));
                        messages.push(text);
                    }
                    ready
                };

                if ready {
                    let prompt = self
                        .templates
                        .design_proposal(&next.base_request, &next.requirement_messages)?;
                    let proposal = self.llm.generate(&api_key, &prompt).await.map_err(|e| {
                        warn!(error = %e, "Design proposal call failed");
                        e
                    })?;
                    next.design_proposal = Some(proposal.clone());
                    next.advance(Phase::DesignProposal);
                    messages.push(proposal);
                } else if messages.is_empty() {
                    // Nothing left to show once marker lines were stripped.
                    messages.push(
                        "Some technical checks are still unclear. Please provide the missing details."
                            .to_string(),
                    );
                }
            }
            Phase::DesignProposal => {
                next.design_feedback.push(input.to_string());
                let recommendation = self.recommend_blocks(&api_key, &next).await?;
                next.advance(Phase::BlockRecommendation);
                messages.push(recommendation);
            }
            Phase::BlockRecommendation => {
                if is_confirmation(input) {
                    debug!("Recommendation confirmed, nothing to regenerate");
                    messages.push(CLOSING_MESSAGE.to_string());
                    return Ok(TurnReply {
                        assistant_messages: messages,
                        state: next,
                    });
                }
                next.design_feedback.push(input.to_string());
                messages.push(self.recommend_blocks(&api_key, &next).await?);
            }
        }

        info!(
            from = state.phase.as_str(),
            to = next.phase.as_str(),
            replies = messages.len(),
            "Turn completed"
        );
        Ok(TurnReply {
            assistant_messages: messages,
            state: next,
        })
    }

    async fn recommend_blocks(&self, api_key: &str, state: &WorkflowState) -> Result<String, EngineError> {
        let blocks = self.catalog.load();
        let proposal = state.design_proposal.as_deref().unwrap_or("(no design proposal recorded)");
        let prompt = self.templates.block_recommendation(
            &state.base_request,
            &state.requirement_messages,
            proposal,
            &state.design_feedback,
            &blocks,
        )?;
        debug!(blocks = blocks.len(), "Requesting block recommendation");
        self.llm.generate(api_key, &prompt).await.map_err(|e| {
            warn!(error = %e, "Block recommendation call failed");
            EngineError::from(e)
        })
    }
}
