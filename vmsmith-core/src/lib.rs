//! Shared foundations for the vmsmith VirtualBox driver: the error taxonomy,
//! the retry policy with cancellation, and driver configuration.

pub mod config;
pub mod error;
pub mod patterns;

pub use config::{DriverConfig, DriverConfigBuilder, RetryPolicyConfig};
pub use error::{VmsmithError, VmsmithResult};
pub use patterns::{cancel_pair, retry, CancelHandle, CancelSignal, RetryConfig};
