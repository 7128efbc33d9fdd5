//! Locating the VBoxManage binary

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;
use vmsmith_core::config::DriverConfig;
use vmsmith_core::error::{VmsmithError, VmsmithResult};

#[cfg(windows)]
pub const VBOXMANAGE_BINARY: &str = "VBoxManage.exe";
#[cfg(not(windows))]
pub const VBOXMANAGE_BINARY: &str = "VBoxManage";

/// Install-location variables checked before `PATH`
pub const INSTALL_PATH_VARS: [&str; 2] = ["VBOX_INSTALL_PATH", "VBOX_MSI_INSTALL_PATH"];

/// Resolve the tool path: configured path first, then install variables, then `PATH`
pub fn locate_vboxmanage(config: &DriverConfig) -> VmsmithResult<PathBuf> {
    locate_with(config, |key| std::env::var_os(key), |path| path.is_file())
}

/// Lookup with injectable environment and filesystem checks
pub fn locate_with<E, F>(config: &DriverConfig, env: E, exists: F) -> VmsmithResult<PathBuf>
where
    E: Fn(&str) -> Option<OsString>,
    F: Fn(&Path) -> bool,
{
    if let Some(path) = &config.vboxmanage_path {
        debug!("Using configured VBoxManage at {}", path.display());
        return Ok(path.clone());
    }

    let search_vars = INSTALL_PATH_VARS.iter().copied().chain(["PATH"]);
    for var in search_vars {
        let Some(value) = env(var) else {
            continue;
        };
        for dir in std::env::split_paths(&value) {
            let candidate = dir.join(VBOXMANAGE_BINARY);
            if exists(&candidate) {
                debug!("Found VBoxManage via {} at {}", var, candidate.display());
                return Ok(candidate);
            }
        }
    }

    Err(VmsmithError::configuration(
        "vboxmanage_path",
        format!(
            "{} not found in {} or PATH; set vboxmanage_path",
            VBOXMANAGE_BINARY,
            INSTALL_PATH_VARS.join(", ")
        ),
    ))
}
