//! Context assembly — fits rolling history into a hard token budget.
//!
//! The assembled prompt is, in order:
//!
//! 1. **System preamble**: always included (skipped when empty)
//! 2. **History**: the most recent turns that fit, oldest first
//! 3. **New user prompt** + the template's generation cue: always included
//!
//! `reserved_output_tokens` are held back for the answer. History is walked
//! newest → oldest and the walk stops at the first turn that does not fit;
//! turns are never partially truncated.
//!
//! # Determinism
//!
//! Identical inputs always produce identical prompts, which is what makes
//! the response cache's fingerprints meaningful.

use crate::context::template::PromptTemplate;
use crate::context::token::TokenEstimator;
use localcoder_core::error::CoordinatorError;
use localcoder_core::session::{Role, Turn};
use serde::{Deserialize, Serialize};

// ── Types ─────────────────────────────────────────────────────────────────

/// Token budget configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    /// Upper bound on prompt + generated tokens.
    pub max_context_tokens: usize,
    /// Tokens kept free for the model's answer.
    pub reserved_output_tokens: usize,
}

impl TokenBudget {
    /// Tokens the assembled prompt may use.
    pub fn available(&self) -> usize {
        self.max_context_tokens
            .saturating_sub(self.reserved_output_tokens)
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            max_context_tokens: 2048,
            reserved_output_tokens: 512,
        }
    }
}

/// The assembled prompt, ready for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub text: String,
    pub metadata: AssemblyMetadata,
}

/// Token accounting for one assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    /// Estimated tokens of the assembled prompt (sum of its chunks).
    pub prompt_tokens: usize,
    /// Tokens available to the prompt (`max_context - reserved`).
    pub budget: usize,
    pub preamble_tokens: usize,
    pub user_tokens: usize,
    pub history_tokens: usize,
    pub turns_included: usize,
    /// Turns in the session that did not make it into the prompt.
    pub turns_dropped: usize,
}

/// Errors from context assembly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    /// Preamble + new prompt alone exceed the budget.
    #[error(
        "System preamble ({preamble_tokens} tokens) + prompt ({prompt_tokens} tokens) exceed budget ({budget} tokens)"
    )]
    BudgetExceeded {
        preamble_tokens: usize,
        prompt_tokens: usize,
        budget: usize,
    },
}

impl From<AssemblyError> for CoordinatorError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::BudgetExceeded {
                preamble_tokens,
                prompt_tokens,
                budget,
            } => CoordinatorError::ContextTooLarge {
                preamble_tokens,
                prompt_tokens,
                budget,
            },
        }
    }
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless: create one and reuse it.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    estimator: TokenEstimator,
    template: PromptTemplate,
    budget: TokenBudget,
    max_history_turns: usize,
}

impl ContextAssembler {
    pub fn new(
        estimator: TokenEstimator,
        template: PromptTemplate,
        budget: TokenBudget,
        max_history_turns: usize,
    ) -> Self {
        Self {
            estimator,
            template,
            budget,
            max_history_turns,
        }
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn template(&self) -> PromptTemplate {
        self.template
    }

    /// Cost of a turn as it will be rendered into a prompt.
    pub fn turn_cost(&self, role: Role, text: &str) -> usize {
        turn_cost(&self.estimator, self.template, role, text)
    }

    /// Assemble a prompt from a preamble, the session history (oldest
    /// first), and the new user prompt.
    pub fn assemble(
        &self,
        preamble: &str,
        history: &[Turn],
        prompt: &str,
    ) -> Result<AssembledPrompt, AssemblyError> {
        let available = self.budget.available();

        let system_chunk = self.template.render_system(preamble);
        let preamble_tokens = self.estimator.estimate(&system_chunk);

        let mut user_chunk = self.template.render_turn(Role::User, prompt);
        user_chunk.push_str(self.template.generation_cue());
        let user_tokens = self.estimator.estimate(&user_chunk);

        let fixed = preamble_tokens + user_tokens;
        if fixed > available {
            return Err(AssemblyError::BudgetExceeded {
                preamble_tokens,
                prompt_tokens: user_tokens,
                budget: available,
            });
        }

        // Walk newest → oldest over the eligible window.
        let window_start = history.len().saturating_sub(self.max_history_turns);
        let window = &history[window_start..];
        let mut remaining = available - fixed;
        let mut kept = 0;
        let mut history_tokens = 0;

        for turn in window.iter().rev() {
            if turn.token_count > remaining {
                break;
            }
            remaining -= turn.token_count;
            history_tokens += turn.token_count;
            kept += 1;
        }

        let included = &window[window.len() - kept..];

        let mut text = system_chunk;
        for turn in included {
            text.push_str(&self.template.render_turn(turn.role, &turn.text));
        }
        text.push_str(&user_chunk);

        Ok(AssembledPrompt {
            text,
            metadata: AssemblyMetadata {
                prompt_tokens: fixed + history_tokens,
                budget: available,
                preamble_tokens,
                user_tokens,
                history_tokens,
                turns_included: kept,
                turns_dropped: history.len() - kept,
            },
        })
    }
}

/// Shared turn-costing rule, also used by the context store at insertion.
pub fn turn_cost(
    estimator: &TokenEstimator,
    template: PromptTemplate,
    role: Role,
    text: &str,
) -> usize {
    estimator.estimate(&template.render_turn(role, text))
}
