//! Outbound call support.
//!
//! - [`retry`]: transient error detection (429, 5xx, network timeouts) with
//!   configurable exponential backoff and jitter. Used by the HTTP tool
//!   registry and by the planner's Propose retry policy.

pub mod retry;

pub use retry::RetryConfig;
