pub mod discovery;
pub mod driver;
pub mod executor;
pub mod snapshot;
pub mod types;
pub mod version;

pub use discovery::locate_vboxmanage;
pub use driver::{Driver, VBoxManageDriver};
pub use executor::{CommandExecutor, CommandOutput, SystemCommandExecutor, VBoxManage};
pub use snapshot::{parse_snapshot_list, Snapshot};
pub use version::{sata_port_count_flag, ToolVersion, VersionGated};

pub use types::*;

// Re-export core types for convenience
pub use vmsmith_core::{
    config::DriverConfig,
    error::{VmsmithError, VmsmithResult},
    patterns::{cancel_pair, CancelHandle, CancelSignal},
};
