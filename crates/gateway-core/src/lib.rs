//! Admission-gated, batched translation scheduling.
//!
//! [`tokenbucket`] paces admission; [`session`] does one LLM round trip;
//! [`split`] and [`merge`] are the two ingress flows built on top of them;
//! [`limiter`] is the hard concurrency ceiling behind both.

pub mod limiter;
pub mod merge;
pub mod session;
pub mod split;
pub mod tokenbucket;
pub mod types;

pub use limiter::ConcurrencyLimiter;
pub use merge::MergeScheduler;
pub use session::{SessionResult, TranslationSession};
pub use split::SplitScheduler;
pub use tokenbucket::AdaptiveTokenBucket;
pub use types::{TranslateRequest, TranslateResponse};
