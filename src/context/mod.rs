//! Completion context assembly.
//!
//! This module turns a stored or submitted conversation into the message list
//! sent to the completion provider:
//! - [`budget`] trims the history to a token budget
//! - [`directives`] builds the system messages appended after trimming
//!
//! [`ContextBuilder`] ties both together and applies the configured
//! [`BudgetPolicy`](budget::BudgetPolicy).

pub mod budget;
pub mod directives;

use std::sync::Arc;

use crate::types::Message;
use crate::utils::toml_config::ContextConfig;
use budget::{total_cost, trim_with_cost, BudgetPolicy, CharRatioEstimator, TokenEstimator};

/// The messages for one completion call plus their budget accounting.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    /// Everything sent to the provider: persona, trimmed history, directives
    pub messages: Vec<Message>,
    /// The trimmed history on its own
    pub history: Vec<Message>,
    pub history_cost: usize,
    pub directive_cost: usize,
    /// Number of older history messages left out
    pub dropped: usize,
}

#[derive(Clone)]
pub struct ContextBuilder {
    max_budget: usize,
    policy: BudgetPolicy,
    estimator: Arc<dyn TokenEstimator>,
    system_prompt: Option<String>,
}

impl ContextBuilder {
    pub fn new(max_budget: usize, policy: BudgetPolicy, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            max_budget,
            policy,
            estimator,
            system_prompt: None,
        }
    }

    pub fn from_config(config: &ContextConfig, system_prompt: Option<String>) -> Self {
        Self::new(
            config.max_budget,
            config.budget_policy,
            Arc::new(CharRatioEstimator::new(config.chars_per_token)),
        )
        .with_system_prompt(system_prompt)
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn max_budget(&self) -> usize {
        self.max_budget
    }

    pub fn policy(&self) -> BudgetPolicy {
        self.policy
    }

    /// Trim `history` and surround it with the persona and `directives`.
    pub fn build(&self, history: &[Message], directives: Vec<Message>) -> CompletionContext {
        let persona = self.system_prompt.as_deref().map(directives::persona);

        let directive_cost = persona
            .iter()
            .chain(directives.iter())
            .fold(0usize, |acc, m| acc.saturating_add(self.estimator.estimate(m)));
        let history_budget = self.policy.history_budget(self.max_budget, directive_cost);

        let trimmed = trim_with_cost(history, history_budget, self.estimator.as_ref());
        if trimmed.dropped > 0 {
            tracing::debug!(
                dropped = trimmed.dropped,
                kept = trimmed.messages.len(),
                history_cost = trimmed.cost,
                directive_cost,
                "Trimmed conversation history"
            );
        }

        let mut messages = Vec::with_capacity(trimmed.messages.len() + directives.len() + 1);
        messages.extend(persona);
        messages.extend(trimmed.messages.iter().cloned());
        messages.extend(directives);

        CompletionContext {
            messages,
            history: trimmed.messages,
            history_cost: trimmed.cost,
            directive_cost,
            dropped: trimmed.dropped,
        }
    }

    pub fn cost(&self, messages: &[Message]) -> usize {
        total_cost(messages, self.estimator.as_ref())
    }
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("max_budget", &self.max_budget)
            .field("policy", &self.policy)
            .field("system_prompt", &self.system_prompt.is_some())
            .finish()
    }
}
