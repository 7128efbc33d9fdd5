use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use vmsmith_core::error::{require_non_empty, VmsmithError, VmsmithResult};

/// Storage controller bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerKind {
    Sata { port_count: u32 },
    Scsi,
}

impl std::fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerKind::Sata { .. } => write!(f, "sata"),
            ControllerKind::Scsi => write!(f, "scsi"),
        }
    }
}

/// SCSI controllers are always created with this chipset
pub const SCSI_CONTROLLER_TYPE: &str = "LSILogic";

/// A storage controller to attach to a VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSpec {
    pub vm_name: String,
    pub name: String,
    pub kind: ControllerKind,
}

impl ControllerSpec {
    pub fn sata(vm_name: impl Into<String>, name: impl Into<String>, port_count: u32) -> Self {
        Self {
            vm_name: vm_name.into(),
            name: name.into(),
            kind: ControllerKind::Sata { port_count },
        }
    }

    pub fn scsi(vm_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            name: name.into(),
            kind: ControllerKind::Scsi,
        }
    }

    pub fn validate(&self) -> VmsmithResult<()> {
        require_non_empty("vm_name", &self.vm_name)?;
        require_non_empty("controller_name", &self.name)?;
        if let ControllerKind::Sata { port_count: 0 } = self.kind {
            return Err(VmsmithError::validation(
                "port_count",
                "SATA controller needs at least one port",
            ));
        }
        Ok(())
    }

    /// `storagectl` arguments for this controller.
    ///
    /// `port_count_flag` is the version-appropriate spelling and is only
    /// used for SATA.
    pub fn to_args(&self, port_count_flag: &str) -> Vec<String> {
        let mut args = vec![
            "storagectl".to_string(),
            self.vm_name.clone(),
            "--name".to_string(),
            self.name.clone(),
            "--add".to_string(),
            self.kind.to_string(),
        ];

        match self.kind {
            ControllerKind::Sata { port_count } => {
                args.push(port_count_flag.to_string());
                args.push(port_count.to_string());
            }
            ControllerKind::Scsi => {
                args.push("--controller".to_string());
                args.push(SCSI_CONTROLLER_TYPE.to_string());
            }
        }

        args
    }
}

/// Machine state as reported by `showvminfo --machinereadable`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmState {
    Running,
    Stopping,
    Paused,
    Other(String),
}

static VM_STATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^VMState="([^"]*)"$"#).expect("VMState pattern is valid"));

impl VmState {
    pub fn from_state(state: &str) -> Self {
        match state {
            "running" => VmState::Running,
            "stopping" => VmState::Stopping,
            "paused" => VmState::Paused,
            other => VmState::Other(other.to_string()),
        }
    }

    /// Stopping and paused count as running so callers wait them out
    /// instead of racing a transitional state.
    pub fn is_running(&self) -> bool {
        matches!(self, VmState::Running | VmState::Stopping | VmState::Paused)
    }

    /// Find the `VMState` line in machine-readable VM info
    pub fn from_vm_info(info: &str) -> VmsmithResult<Self> {
        info.lines()
            .map(|line| line.trim_end_matches('\r'))
            .find_map(|line| VM_STATE_RE.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|state| Self::from_state(state.as_str()))
            .ok_or_else(|| VmsmithError::parse("VMState", info))
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Running => write!(f, "running"),
            VmState::Stopping => write!(f, "stopping"),
            VmState::Paused => write!(f, "paused"),
            VmState::Other(state) => write!(f, "{}", state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_state_mapping() {
        for state in ["running", "stopping", "paused"] {
            assert!(VmState::from_state(state).is_running(), "{state}");
        }
        for state in ["poweroff", "saved", "aborted", "starting", "Running", ""] {
            assert!(!VmState::from_state(state).is_running(), "{state}");
        }
    }

    #[test]
    fn test_state_from_vm_info() {
        let info = "name=\"packer-ubuntu\"\r\nostype=\"Ubuntu (64-bit)\"\r\nVMState=\"paused\"\r\nVMStateChangeTime=\"2024-01-01T00:00:00.000000000\"\r\n";
        assert_eq!(VmState::from_vm_info(info).unwrap(), VmState::Paused);

        let err = VmState::from_vm_info("name=\"x\"").unwrap_err();
        assert!(matches!(err, VmsmithError::Parse { .. }));
    }

    #[test]
    fn test_scsi_args() {
        let spec = ControllerSpec::scsi("packer-vm", "SCSI Controller");
        assert_eq!(
            spec.to_args("--ignored"),
            vec![
                "storagectl",
                "packer-vm",
                "--name",
                "SCSI Controller",
                "--add",
                "scsi",
                "--controller",
                "LSILogic"
            ]
        );
    }

    #[test]
    fn test_validation() {
        assert!(ControllerSpec::sata("vm", "SATA", 1).validate().is_ok());
        assert!(ControllerSpec::sata("", "SATA", 1).validate().is_err());
        assert!(ControllerSpec::sata("vm", "", 1).validate().is_err());
        assert!(ControllerSpec::sata("vm", "SATA", 0).validate().is_err());
    }
}
