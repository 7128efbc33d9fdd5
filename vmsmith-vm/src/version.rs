//! VirtualBox version parsing and version-gated command syntax

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use vmsmith_core::error::{VmsmithError, VmsmithResult};

/// Substring VBoxManage prints when the kernel driver is missing or broken
pub const DRIVER_MALFUNCTION_MARKER: &str = "vboxdrv";

/// Leading dotted-numeric run, optionally followed by `_RC<n>` or `_OSEr<n>`
static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([.0-9]+)(?:_(?:RC|OSEr)[0-9]+)?").expect("version pattern is valid")
});

/// A dotted numeric version.
///
/// Missing trailing segments compare as zero, so `4.3` equals `4.3.0`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolVersion {
    segments: Vec<u64>,
}

impl ToolVersion {
    pub fn new(segments: Vec<u64>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    pub fn major(&self) -> u64 {
        self.segment(0)
    }

    pub fn minor(&self) -> u64 {
        self.segment(1)
    }

    fn segment(&self, index: usize) -> u64 {
        self.segments.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for ToolVersion {
    type Err = VmsmithError;

    /// Parse the leading version run; a release tag after `_` is dropped
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let run = VERSION_RE
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| VmsmithError::parse("version", trimmed))?;

        let segments = run
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VmsmithError::parse("version", trimmed))?;

        if segments.is_empty() {
            return Err(VmsmithError::parse("version", trimmed));
        }

        Ok(Self { segments })
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ToolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ToolVersion {}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Interpret the output of `VBoxManage --version`.
///
/// A driver-malfunction marker anywhere in the output is a setup error,
/// whether or not a version could also be read.
pub fn parse_version_output(output: &str) -> VmsmithResult<ToolVersion> {
    let output = output.trim();

    if output.contains(DRIVER_MALFUNCTION_MARKER) {
        return Err(VmsmithError::Setup {
            message: output.to_string(),
        });
    }

    output.parse()
}

/// Ordered table of values keyed by the first version they apply to.
///
/// Lookup picks the entry with the highest threshold not exceeding the
/// resolved version. Adding a future syntax change is one more entry.
#[derive(Debug, Clone)]
pub struct VersionGated<T> {
    entries: Vec<(ToolVersion, T)>,
}

impl<T> VersionGated<T> {
    pub fn new(entries: impl IntoIterator<Item = (ToolVersion, T)>) -> Self {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    /// Value in force at `version`, or `None` if it predates every entry
    pub fn select(&self, version: &ToolVersion) -> Option<&T> {
        self.entries
            .iter()
            .rev()
            .find(|(threshold, _)| threshold <= version)
            .map(|(_, value)| value)
    }
}

/// Spelling of the SATA port count flag for `storagectl --add sata`
pub static SATA_PORT_COUNT_FLAG: Lazy<VersionGated<&'static str>> = Lazy::new(|| {
    VersionGated::new([
        (ToolVersion::new(vec![0]), "--sataportcount"),
        (ToolVersion::new(vec![4, 3]), "--portcount"),
    ])
});

/// The SATA port count flag for a resolved tool version
pub fn sata_port_count_flag(version: &ToolVersion) -> &'static str {
    SATA_PORT_COUNT_FLAG
        .select(version)
        .copied()
        .unwrap_or("--sataportcount")
}
