//! Token budget tracking for a planning session.
//!
//! Every Reasoning Provider call (planning and summarization) and every Tool
//! Registry call reports a token cost that is charged here. The planner only
//! consults [`TokenBudget::exceeded()`] at the top of a turn, so a call that
//! is already in flight always completes and is charged in full.

use serde::{Deserialize, Serialize};

/// Characters per token used when a call reports no usage.
pub const TOKEN_ESTIMATION_DIVISOR: usize = 4;

/// Estimate the token cost of a piece of text (`chars / 4`, rounded up).
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(TOKEN_ESTIMATION_DIVISOR) as u64
}

/// The token ledger of one session.
///
/// `used_tokens` only ever grows; [`charge`](Self::charge) saturates instead
/// of wrapping.
///
/// ```
/// use replan::context::TokenBudget;
///
/// let mut budget = TokenBudget::new(1000);
/// budget.charge(600);
/// assert!(!budget.exceeded());
/// budget.charge(400);
/// assert!(budget.exceeded());
/// assert_eq!(budget.remaining(), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    max_tokens: u64,
    used_tokens: u64,
}

impl TokenBudget {
    pub fn new(max_tokens: u64) -> Self {
        Self {
            max_tokens,
            used_tokens: 0,
        }
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    pub fn used_tokens(&self) -> u64 {
        self.used_tokens
    }

    /// Add a reported or estimated cost. Returns the new total.
    pub fn charge(&mut self, tokens: u64) -> u64 {
        self.used_tokens = self.used_tokens.saturating_add(tokens);
        self.used_tokens
    }

    /// `used_tokens >= max_tokens`. Pure query.
    pub fn exceeded(&self) -> bool {
        self.used_tokens >= self.max_tokens
    }

    pub fn remaining(&self) -> u64 {
        self.max_tokens.saturating_sub(self.used_tokens)
    }

    /// Fraction of the budget consumed, clamped to `[0, 1]`.
    pub fn fraction_used(&self) -> f64 {
        if self.max_tokens == 0 {
            return 1.0;
        }
        (self.used_tokens as f64 / self.max_tokens as f64).min(1.0)
    }

    /// Format for logging, e.g. `"tokens: 600/1000 (60.0%)"`.
    pub fn to_log_string(&self) -> String {
        format!(
            "tokens: {}/{} ({:.1}%)",
            self.used_tokens,
            self.max_tokens,
            self.fraction_used() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeded_at_exact_limit() {
        let mut budget = TokenBudget::new(1000);
        budget.charge(999);
        assert!(!budget.exceeded());
        budget.charge(1);
        assert_eq!(budget.used_tokens(), 1000);
        assert!(budget.exceeded());
    }

    #[test]
    fn charge_is_monotonic_and_saturates() {
        let mut budget = TokenBudget::new(10);
        let mut last = 0;
        for cost in [0, 3, 0, 7, 100] {
            let total = budget.charge(cost);
            assert!(total >= last);
            last = total;
        }
        budget.charge(u64::MAX);
        assert_eq!(budget.used_tokens(), u64::MAX);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn fraction_and_log_string() {
        let mut budget = TokenBudget::new(200);
        budget.charge(50);
        assert!((budget.fraction_used() - 0.25).abs() < f64::EPSILON);
        assert_eq!(budget.to_log_string(), "tokens: 50/200 (25.0%)");
    }

    #[test]
    fn zero_budget_is_immediately_exceeded() {
        let budget = TokenBudget::new(0);
        assert!(budget.exceeded());
        assert_eq!(budget.fraction_used(), 1.0);
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }
}
