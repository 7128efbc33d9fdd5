//! Reusable failure-handling patterns

pub mod cancel;
pub mod retry;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use retry::{retry, BackoffStrategy, RetryConfig};
