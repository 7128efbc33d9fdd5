//! VM operations composed from VBoxManage invocations

use crate::discovery::locate_vboxmanage;
use crate::executor::{args, classify, VBoxManage};
use crate::snapshot::{parse_snapshot_list, Snapshot, NO_SNAPSHOTS_SENTINEL};
use crate::types::{ControllerSpec, VmState};
use crate::version::{parse_version_output, sata_port_count_flag, ToolVersion, DRIVER_MALFUNCTION_MARKER};
use async_trait::async_trait;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use vmsmith_core::config::DriverConfig;
use vmsmith_core::error::{require_non_empty, VmsmithError, VmsmithResult};
use vmsmith_core::patterns::{retry, CancelSignal, RetryConfig};

static ADDITIONS_ISO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Default Guest Additions ISO:(.+)").expect("additions ISO pattern is valid")
});

/// Operations an image build needs from the hypervisor
///
/// Every method that takes a VM or snapshot name rejects an empty one with
/// [`VmsmithError::Validation`] before running anything.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Add a SATA controller; the port count flag follows the tool version
    async fn create_sata_controller(
        &self,
        vm_name: &str,
        name: &str,
        port_count: u32,
    ) -> VmsmithResult<()>;

    /// Add an LSILogic SCSI controller
    async fn create_scsi_controller(&self, vm_name: &str, name: &str) -> VmsmithResult<()>;

    /// Unregister the VM and delete its files, retrying while a session
    /// still holds the machine lock
    async fn delete(&self, vm_name: &str) -> VmsmithResult<()>;

    /// Import an appliance as `vm_name`; `flags` are appended unmodified
    async fn import(&self, vm_name: &str, path: &Path, flags: &[String]) -> VmsmithResult<()>;

    /// Path of the default Guest Additions ISO
    async fn iso(&self) -> VmsmithResult<String>;

    /// True while the VM is running, stopping or paused
    async fn is_running(&self, vm_name: &str) -> VmsmithResult<bool>;

    /// Power the VM off, then wait the configured grace period so the
    /// session lock is released before the next operation
    async fn stop(&self, vm_name: &str) -> VmsmithResult<()>;

    /// Silence the GUI's first-run and update nags
    async fn suppress_messages(&self) -> VmsmithResult<()>;

    /// Run VBoxManage with arbitrary arguments
    async fn manage(&self, args: &[String]) -> VmsmithResult<()>;

    async fn manage_with_output(&self, args: &[String]) -> VmsmithResult<String>;

    /// Fail early if the host installation is unusable
    async fn verify(&self) -> VmsmithResult<()>;

    async fn version(&self) -> VmsmithResult<ToolVersion>;

    /// The VM's snapshot tree, or `None` if it has no snapshots
    async fn load_snapshots(&self, vm_name: &str) -> VmsmithResult<Option<Snapshot>>;

    async fn create_snapshot(&self, vm_name: &str, snapshot_name: &str) -> VmsmithResult<()>;

    async fn has_snapshots(&self, vm_name: &str) -> VmsmithResult<bool>;

    async fn current_snapshot(&self, vm_name: &str) -> VmsmithResult<Option<Snapshot>>;

    async fn restore_snapshot(&self, vm_name: &str, snapshot: &Snapshot) -> VmsmithResult<()>;

    async fn delete_snapshot(&self, vm_name: &str, snapshot: &Snapshot) -> VmsmithResult<()>;

    /// Create a controller from its spec
    async fn create_controller(&self, spec: &ControllerSpec) -> VmsmithResult<()> {
        match spec.kind {
            crate::types::ControllerKind::Sata { port_count } => {
                self.create_sata_controller(&spec.vm_name, &spec.name, port_count)
                    .await
            }
            crate::types::ControllerKind::Scsi => {
                self.create_scsi_controller(&spec.vm_name, &spec.name).await
            }
        }
    }

    /// Teardown: stop the VM if it is up, then delete it.
    ///
    /// Failures while stopping are logged and teardown continues; the
    /// result of the delete is returned.
    async fn cleanup(&self, vm_name: &str) -> VmsmithResult<()> {
        require_non_empty("vm_name", vm_name)?;

        match self.is_running(vm_name).await {
            Ok(true) => {
                if let Err(e) = self.stop(vm_name).await {
                    warn!("Failed to stop VM '{}' during cleanup: {}", vm_name, e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to query state of VM '{}' during cleanup: {}", vm_name, e),
        }

        self.delete(vm_name).await
    }
}

/// [`Driver`] backed by the VBoxManage command-line tool
#[derive(Debug, Clone)]
pub struct VBoxManageDriver {
    tool: VBoxManage,
    config: DriverConfig,
    cancel: CancelSignal,
}

impl VBoxManageDriver {
    /// Locate VBoxManage from the configuration and environment
    pub fn new(config: DriverConfig) -> VmsmithResult<Self> {
        config.validate()?;
        let path = locate_vboxmanage(&config)?;
        info!("Using VBoxManage at {}", path.display());
        Ok(Self::with_tool(VBoxManage::new(path), config))
    }

    /// Create a driver around an existing tool handle (for testing)
    pub fn with_tool(tool: VBoxManage, config: DriverConfig) -> Self {
        Self {
            tool,
            config,
            cancel: CancelSignal::never(),
        }
    }

    /// Signal that aborts the delete retry loop
    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tool(&self) -> &VBoxManage {
        &self.tool
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Machine state from `showvminfo --machinereadable`
    pub async fn vm_state(&self, vm_name: &str) -> VmsmithResult<VmState> {
        require_non_empty("vm_name", vm_name)?;

        let info = self
            .tool
            .run(&args(["showvminfo", vm_name, "--machinereadable"]))
            .await?;
        VmState::from_vm_info(&info)
    }

    /// Global extra-data written by [`Driver::suppress_messages`]
    pub fn suppressed_messages_extra_data() -> BTreeMap<&'static str, String> {
        let next_year = chrono::Local::now().year() + 1;
        BTreeMap::from([
            ("GUI/RegistrationData", "triesLeft=0".to_string()),
            (
                "GUI/SuppressMessages",
                "confirmInputCapture,remindAboutAutoCapture,remindAboutMouseIntegrationOff,remindAboutMouseIntegrationOn,remindAboutWrongColorDepth".to_string(),
            ),
            ("GUI/UpdateDate", format!("1 d, {}-01-01, stable", next_year)),
            ("GUI/UpdateCheckCount", "60".to_string()),
        ])
    }

    fn require_snapshot_uuid(snapshot: &Snapshot) -> VmsmithResult<&str> {
        if snapshot.uuid.trim().is_empty() {
            return Err(VmsmithError::validation(
                "snapshot",
                format!("snapshot '{}' has no UUID", snapshot.name),
            ));
        }
        Ok(&snapshot.uuid)
    }
}

/// Value of the `Default Guest Additions ISO:` line in `list systemproperties`
pub fn parse_additions_iso(properties: &str) -> VmsmithResult<String> {
    properties
        .lines()
        .map(|line| line.trim_end_matches([' ', '\r']))
        .find_map(|line| {
            ADDITIONS_ISO_RE
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim_matches([' ', '\r', '\n']).to_string())
        })
        .filter(|iso| !iso.is_empty())
        .ok_or_else(|| VmsmithError::parse("Default Guest Additions ISO", properties))
}

#[async_trait]
impl Driver for VBoxManageDriver {
    async fn create_sata_controller(
        &self,
        vm_name: &str,
        name: &str,
        port_count: u32,
    ) -> VmsmithResult<()> {
        let spec = ControllerSpec::sata(vm_name, name, port_count);
        spec.validate()?;

        let version = self.version().await?;
        let flag = sata_port_count_flag(&version);
        debug!("Using SATA port count flag {} for VirtualBox {}", flag, version);

        self.tool.exec(&spec.to_args(flag)).await
    }

    async fn create_scsi_controller(&self, vm_name: &str, name: &str) -> VmsmithResult<()> {
        let spec = ControllerSpec::scsi(vm_name, name);
        spec.validate()?;

        self.tool.exec(&spec.to_args("")).await
    }

    async fn delete(&self, vm_name: &str) -> VmsmithResult<()> {
        require_non_empty("vm_name", vm_name)?;
        info!("Deleting VM '{}'", vm_name);

        let config = RetryConfig::from_policy(&self.config.delete_retry)
            .with_operation_name(format!("delete {}", vm_name));
        let command = args(["unregistervm", vm_name, "--delete"]);
        let command = &command;
        let tool = &self.tool;

        retry(&config, &self.cancel, move || tool.exec(command)).await
    }

    async fn import(&self, vm_name: &str, path: &Path, flags: &[String]) -> VmsmithResult<()> {
        require_non_empty("vm_name", vm_name)?;
        info!("Importing {} as VM '{}'", path.display(), vm_name);

        let mut command = args([
            "import".to_string(),
            path.to_string_lossy().into_owned(),
            "--vsys".to_string(),
            "0".to_string(),
            "--vmname".to_string(),
            vm_name.to_string(),
        ]);
        command.extend(flags.iter().cloned());

        self.tool.exec(&command).await
    }

    async fn iso(&self) -> VmsmithResult<String> {
        let properties = self
            .tool
            .run(&args(["list", "systemproperties"]))
            .await?;
        let iso = parse_additions_iso(&properties)?;
        info!("Found Default Guest Additions ISO: {}", iso);
        Ok(iso)
    }

    async fn is_running(&self, vm_name: &str) -> VmsmithResult<bool> {
        Ok(self.vm_state(vm_name).await?.is_running())
    }

    async fn stop(&self, vm_name: &str) -> VmsmithResult<()> {
        require_non_empty("vm_name", vm_name)?;
        info!("Stopping VM '{}'", vm_name);

        self.tool
            .exec(&args(["controlvm", vm_name, "poweroff"]))
            .await?;

        debug!(
            "Waiting {:?} for VM '{}' session to unlock",
            self.config.stop_grace_period, vm_name
        );
        sleep(self.config.stop_grace_period).await;
        Ok(())
    }

    async fn suppress_messages(&self) -> VmsmithResult<()> {
        for (key, value) in Self::suppressed_messages_extra_data() {
            self.tool
                .exec(&args(["setextradata".to_string(), "global".to_string(), key.to_string(), value]))
                .await?;
        }
        Ok(())
    }

    async fn manage(&self, args: &[String]) -> VmsmithResult<()> {
        self.tool.exec(args).await
    }

    async fn manage_with_output(&self, args: &[String]) -> VmsmithResult<String> {
        self.tool.run(args).await
    }

    async fn verify(&self) -> VmsmithResult<()> {
        let version = self.version().await?;
        debug!("Verified VirtualBox {}", version);
        Ok(())
    }

    async fn version(&self) -> VmsmithResult<ToolVersion> {
        let output = self.tool.output(&args(["--version"])).await?;
        let stdout = output.stdout_trimmed();
        let stderr = output.stderr_trimmed();
        debug!("VBoxManage --version output: {}", stdout);

        if stderr.contains(DRIVER_MALFUNCTION_MARKER) {
            return Err(VmsmithError::Setup { message: stderr });
        }
        if !output.status.success() && !stdout.contains(DRIVER_MALFUNCTION_MARKER) {
            return Err(VmsmithError::ToolReported { message: stderr });
        }

        let version = parse_version_output(&stdout)?;
        info!("VirtualBox version: {}", version);
        Ok(version)
    }

    async fn load_snapshots(&self, vm_name: &str) -> VmsmithResult<Option<Snapshot>> {
        require_non_empty("vm_name", vm_name)?;
        debug!("Loading snapshots of VM '{}'", vm_name);

        let output = self
            .tool
            .output(&args(["snapshot", vm_name, "list", "--machinereadable"]))
            .await?;

        // Newer releases exit non-zero alongside the sentinel
        if output.stdout_trimmed() == NO_SNAPSHOTS_SENTINEL {
            return Ok(None);
        }

        let listing = classify(&output)?;
        parse_snapshot_list(&listing)
    }

    async fn create_snapshot(&self, vm_name: &str, snapshot_name: &str) -> VmsmithResult<()> {
        require_non_empty("vm_name", vm_name)?;
        require_non_empty("snapshot_name", snapshot_name)?;
        info!("Taking snapshot '{}' of VM '{}'", snapshot_name, vm_name);

        self.tool
            .exec(&args(["snapshot", vm_name, "take", snapshot_name]))
            .await
    }

    async fn has_snapshots(&self, vm_name: &str) -> VmsmithResult<bool> {
        Ok(self.load_snapshots(vm_name).await?.is_some())
    }

    async fn current_snapshot(&self, vm_name: &str) -> VmsmithResult<Option<Snapshot>> {
        let tree = self.load_snapshots(vm_name).await?;
        Ok(tree.and_then(|root| root.current().cloned()))
    }

    async fn restore_snapshot(&self, vm_name: &str, snapshot: &Snapshot) -> VmsmithResult<()> {
        require_non_empty("vm_name", vm_name)?;
        let uuid = Self::require_snapshot_uuid(snapshot)?;
        info!("Restoring VM '{}' to snapshot {}", vm_name, uuid);

        self.tool
            .exec(&args(["snapshot", vm_name, "restore", uuid]))
            .await
    }

    async fn delete_snapshot(&self, vm_name: &str, snapshot: &Snapshot) -> VmsmithResult<()> {
        require_non_empty("vm_name", vm_name)?;
        let uuid = Self::require_snapshot_uuid(snapshot)?;
        info!("Deleting snapshot {} of VM '{}'", uuid, vm_name);

        self.tool
            .exec(&args(["snapshot", vm_name, "delete", uuid]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_additions_iso_found() {
        let properties = "API version:                     6_1\r\nDefault Guest Additions ISO:     /usr/share/virtualbox/VBoxGuestAdditions.iso  \r\nLogging Level:                   all\r\n";
        assert_eq!(
            parse_additions_iso(properties).unwrap(),
            "/usr/share/virtualbox/VBoxGuestAdditions.iso"
        );
    }

    #[test]
    fn test_additions_iso_missing_or_blank() {
        let err = parse_additions_iso("API version: 6_1\n").unwrap_err();
        assert!(matches!(err, VmsmithError::Parse { .. }));

        assert!(parse_additions_iso("Default Guest Additions ISO:     \n").is_err());
    }

    #[test]
    fn test_suppressed_messages_keys() {
        let data = VBoxManageDriver::suppressed_messages_extra_data();
        let keys: Vec<&str> = data.keys().copied().collect();
        assert_eq!(
            keys,
            vec![
                "GUI/RegistrationData",
                "GUI/SuppressMessages",
                "GUI/UpdateCheckCount",
                "GUI/UpdateDate"
            ]
        );
        let next_year = chrono::Local::now().year() + 1;
        assert_eq!(data["GUI/UpdateDate"], format!("1 d, {}-01-01, stable", next_year));
    }

    #[test]
    fn test_snapshot_without_uuid_is_rejected() {
        let snapshot = Snapshot::new("base", "");
        let err = VBoxManageDriver::require_snapshot_uuid(&snapshot).unwrap_err();
        assert!(matches!(err, VmsmithError::Validation { .. }));
    }
}
