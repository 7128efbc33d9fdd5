//! Core error types for vmsmith
//!
//! This module contains the main VmsmithError enum with all error variants
//! and associated type aliases for Result types.

use thiserror::Error;

/// Error type for every driver operation
///
/// # Error Categories
///
/// - **Execution Errors**: the management tool could not be started
/// - **Tool Errors**: the tool ran and reported a failure, either through its
///   exit status or through an error banner on a zero exit status
/// - **Parse Errors**: the tool succeeded but its output lacked an expected pattern
/// - **Setup Errors**: the host environment is broken; never retried
/// - **Logic Errors**: validation and configuration problems on the caller side
/// - **Cancellation**: a retry loop observed its cancel signal
#[derive(Error, Debug)]
pub enum VmsmithError {
    // Subprocess Errors
    #[error("Failed to execute {program}: {source}")]
    Execution {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("VBoxManage error: {message}")]
    ToolReported { message: String },

    #[error("VBoxManage error: {message}")]
    SilentToolError { message: String },

    // Output Errors
    #[error("Failed to parse {what}: {raw}")]
    Parse { what: String, raw: String },

    #[error("VirtualBox is not properly setup: {message}")]
    Setup { message: String },

    // Caller Errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },
}

/// Result type alias using VmsmithError
pub type VmsmithResult<T> = std::result::Result<T, VmsmithError>;

impl VmsmithError {
    /// True for failures the tool itself reported, whatever the exit status was
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            VmsmithError::ToolReported { .. } | VmsmithError::SilentToolError { .. }
        )
    }

    /// Errors that must abort the calling workflow
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmsmithError::Setup { .. })
    }

    /// Whether repeating the same operation could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            VmsmithError::Setup { .. }
                | VmsmithError::Validation { .. }
                | VmsmithError::ConfigurationError { .. }
                | VmsmithError::Cancelled { .. }
        )
    }

    /// Message the tool wrote to stderr, when the error came from the tool
    pub fn tool_message(&self) -> Option<&str> {
        match self {
            VmsmithError::ToolReported { message } | VmsmithError::SilentToolError { message } => {
                Some(message)
            }
            _ => None,
        }
    }
}
