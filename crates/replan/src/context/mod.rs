//! Token accounting and the session's turn log.
//!
//! - **[`budget`]**: [`TokenBudget`] ledger and token estimation for calls
//!   that report no usage.
//! - **[`history`]**: the append-only [`History`] and its summarization
//!   trigger.
//! - **[`summarizer`]**: prompts for condensing the oldest history block.

pub mod budget;
pub mod history;
pub mod summarizer;

pub use budget::{TOKEN_ESTIMATION_DIVISOR, TokenBudget, estimate_tokens};
pub use history::{EntryKind, History, HistoryConfig, HistoryEntry};
pub use summarizer::SummarizerConfig;
