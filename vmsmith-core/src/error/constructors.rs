//! Constructor methods for VmsmithError

use super::types::VmsmithError;

impl VmsmithError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use vmsmith_core::error::VmsmithError;
    ///
    /// let err = VmsmithError::configuration("delete_retry.max_attempts", "must be at least 1");
    /// assert!(err.to_string().contains("delete_retry.max_attempts"));
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        VmsmithError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a validation error for a caller-supplied argument
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        VmsmithError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a parse error carrying the raw output for diagnosis
    pub fn parse(what: impl Into<String>, raw: impl Into<String>) -> Self {
        VmsmithError::Parse {
            what: what.into(),
            raw: raw.into(),
        }
    }

    pub fn execution(program: impl Into<String>, source: std::io::Error) -> Self {
        VmsmithError::Execution {
            program: program.into(),
            source,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        VmsmithError::Cancelled {
            operation: operation.into(),
        }
    }
}

/// Reject an empty identifier argument with a validation error
pub fn require_non_empty(field: &str, value: &str) -> Result<(), VmsmithError> {
    if value.trim().is_empty() {
        return Err(VmsmithError::validation(field, "must not be empty"));
    }
    Ok(())
}
