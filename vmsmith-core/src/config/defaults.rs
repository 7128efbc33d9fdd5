//! Default configuration values for vmsmith
//!
//! This module centralizes all default values to make them easy to find and modify.

// Delete retry defaults
pub const DEFAULT_DELETE_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_DELETE_RETRY_INITIAL_DELAY_SECS: u64 = 1;
pub const DEFAULT_DELETE_RETRY_MAX_DELAY_SECS: u64 = 1;
pub const DEFAULT_DELETE_RETRY_MULTIPLIER: f64 = 2.0;

// Grace period after `controlvm poweroff` so the session lock is released
pub const DEFAULT_STOP_GRACE_PERIOD_SECS: u64 = 2;

// Logging
pub const DEFAULT_LOG_FILTER: &str = "vmsmith=info";

// Environment variable names
pub const ENV_VBOXMANAGE_PATH: &str = "VMSMITH_VBOXMANAGE_PATH";
pub const ENV_DELETE_RETRY_ATTEMPTS: &str = "VMSMITH_DELETE_RETRY_ATTEMPTS";
pub const ENV_DELETE_RETRY_DELAY_SECS: &str = "VMSMITH_DELETE_RETRY_DELAY_SECS";
pub const ENV_STOP_GRACE_PERIOD_SECS: &str = "VMSMITH_STOP_GRACE_PERIOD_SECS";
pub const ENV_LOG_FILTER: &str = "VMSMITH_LOG";
