//! Error handling for vmsmith
//!
//! Every driver operation returns [`VmsmithResult`]. Errors are returned to the
//! immediate caller; nothing here panics on bad input.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    vmsmith Error Taxonomy                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Subprocess            │  Output            │  Caller        │
//! │  • Execution           │  • Parse           │  • Validation  │
//! │  • ToolReported        │  • Setup (fatal)   │  • Config      │
//! │  • SilentToolError     │                    │  • Cancelled   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod constructors;
pub mod types;

pub use constructors::require_non_empty;
pub use types::{VmsmithError, VmsmithResult};
