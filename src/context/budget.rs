//! Token-budget trimming.
//!
//! [`trim`] walks a conversation from the newest message backwards and keeps
//! the longest contiguous suffix whose estimated cost fits the budget. The
//! first message that would overflow the budget stops the walk, so the result
//! never has gaps and a single oversized newest message yields an empty list.
//!
//! ```ignore
//! use bonlivre::context::budget::{trim, CharRatioEstimator};
//!
//! let kept = trim(&history, 12_000, &CharRatioEstimator::default());
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageRole};

/// Characters per token assumed by [`CharRatioEstimator::default`].
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 2.5;

/// Default history budget in token-equivalent units.
pub const DEFAULT_MAX_BUDGET: usize = 12_000;

/// Estimates the token cost of one message.
///
/// Closures of the form `Fn(&Message) -> usize` implement this trait, which
/// keeps tests and alternative tokenizers cheap to plug in.
pub trait TokenEstimator: Send + Sync {
    /// Estimated cost of `message` in token-equivalent units
    fn estimate(&self, message: &Message) -> usize;
}

impl<F> TokenEstimator for F
where
    F: Fn(&Message) -> usize + Send + Sync,
{
    fn estimate(&self, message: &Message) -> usize {
        self(message)
    }
}

/// The payload shape sent to the completion provider. Costs are computed
/// over this view so that local metadata such as timestamps does not skew
/// the estimate.
#[derive(Serialize)]
struct WireMessage<'a> {
    role: MessageRole,
    content: &'a str,
}

/// `ceil(serialized_length / chars_per_token)` over the JSON form of a message.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: f64,
}

impl CharRatioEstimator {
    /// Non-positive or non-finite ratios fall back to [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    fn serialized_len(message: &Message) -> usize {
        let wire = WireMessage {
            role: message.role,
            content: &message.content,
        };
        match serde_json::to_string(&wire) {
            Ok(json) => json.chars().count(),
            // Serializing a role and a string cannot fail; fall back to raw content
            Err(_) => message.content.chars().count(),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, message: &Message) -> usize {
        let len = Self::serialized_len(message) as f64;
        (len / self.chars_per_token).ceil() as usize
    }
}

/// Whether directives appended after trimming count against the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPolicy {
    /// Directives are appended on top of a full history budget. The final
    /// payload may exceed `max_budget` by the directives' cost.
    #[default]
    Soft,
    /// The directives' cost is reserved up front so the whole payload stays
    /// within `max_budget`.
    Strict,
}

impl BudgetPolicy {
    /// Budget left for history once `reserved` units are set aside for directives
    pub fn history_budget(&self, max_budget: usize, reserved: usize) -> usize {
        match self {
            BudgetPolicy::Soft => max_budget,
            BudgetPolicy::Strict => max_budget.saturating_sub(reserved),
        }
    }
}

/// Result of a trim, with the accounting that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Trimmed {
    pub messages: Vec<Message>,
    /// Total estimated cost of `messages`
    pub cost: usize,
    /// Number of older messages left out
    pub dropped: usize,
}

/// Keep the longest suffix of `messages` whose estimated cost fits `max_budget`.
pub fn trim<E>(messages: &[Message], max_budget: usize, estimator: &E) -> Vec<Message>
where
    E: TokenEstimator + ?Sized,
{
    trim_with_cost(messages, max_budget, estimator).messages
}

/// Like [`trim`], but also reports the cost used and how many messages were dropped.
pub fn trim_with_cost<E>(messages: &[Message], max_budget: usize, estimator: &E) -> Trimmed
where
    E: TokenEstimator + ?Sized,
{
    let mut total: usize = 0;
    let mut start = messages.len();

    for (index, message) in messages.iter().enumerate().rev() {
        let cost = estimator.estimate(message);
        match total.checked_add(cost) {
            Some(next) if next <= max_budget => {
                total = next;
                start = index;
            }
            _ => {
                tracing::debug!(
                    index,
                    cost,
                    used = total,
                    max_budget,
                    "Budget exhausted, dropping older messages"
                );
                break;
            }
        }
    }

    Trimmed {
        messages: messages[start..].to_vec(),
        cost: total,
        dropped: start,
    }
}

/// Total estimated cost of `messages`, saturating instead of overflowing.
pub fn total_cost<E>(messages: &[Message], estimator: &E) -> usize
where
    E: TokenEstimator + ?Sized,
{
    messages
        .iter()
        .fold(0usize, |acc, m| acc.saturating_add(estimator.estimate(m)))
}
