//! Snapshot tree reconstruction from `VBoxManage snapshot <vm> list --machinereadable`
//!
//! The listing is flat. Each record key carries a path suffix such as
//! `SnapshotName-1-2`; the number of `-` separators is the node depth.
//! Records arrive in pre-order, so the tree is rebuilt with a stack of
//! ancestors local to one parse:
//!
//! ```text
//! SnapshotName="base"            depth 0  root
//! SnapshotName-1="configured"    depth 1  push base, parent = base
//! SnapshotName-1-1="patched"     depth 2  push configured, parent = configured
//! SnapshotName-2="alt"           depth 1  pop (2 - 1) entries, parent = base
//! CurrentSnapshotName="alt"               marks the node parsed last
//! ```
//!
//! On a depth decrease the stack is popped `current_depth - 1` times,
//! whatever the new depth is. That reproduces VBoxManage-driver behaviour
//! exactly; it is correct when returning to depth 1 and attaches deeper
//! nodes to the root on other multi-level unwinds.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use vmsmith_core::error::{VmsmithError, VmsmithResult};

/// Entire listing content for a VM with no snapshots
pub const NO_SNAPSHOTS_SENTINEL: &str = "This machine does not have any snapshots";

/// Key prefix of the records naming the current snapshot
const CURRENT_MARKER: &str = "Current";

static RECORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^Snapshot(Name|UUID|Description)((?:-[0-9]+)*)="(.*)"$"#)
        .expect("snapshot record pattern is valid")
});

/// One snapshot and the snapshots taken from it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub name: String,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The VM's disk state is currently based on this snapshot
    pub current: bool,
    pub children: Vec<Snapshot>,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
            ..Default::default()
        }
    }

    pub fn with_child(mut self, child: Snapshot) -> Self {
        self.children.push(child);
        self
    }

    pub fn marked_current(mut self) -> Self {
        self.current = true;
        self
    }

    /// Pre-order walk over this node and all descendants
    pub fn iter(&self) -> SnapshotIter<'_> {
        SnapshotIter { stack: vec![self] }
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// The node flagged as current, if any
    pub fn current(&self) -> Option<&Snapshot> {
        self.iter().find(|node| node.current)
    }

    /// Snapshot names are not unique; every match is returned in pre-order
    pub fn find_by_name(&self, name: &str) -> Vec<&Snapshot> {
        self.iter().filter(|node| node.name == name).collect()
    }

    pub fn find_by_uuid(&self, uuid: &str) -> Option<&Snapshot> {
        self.iter().find(|node| node.uuid == uuid)
    }

    /// Parent of the node with `uuid`; `None` for the root or an unknown UUID
    pub fn parent_of(&self, uuid: &str) -> Option<&Snapshot> {
        self.iter()
            .find(|node| node.children.iter().any(|child| child.uuid == uuid))
    }

    /// Distance from this node to the node with `uuid`
    pub fn depth_of(&self, uuid: &str) -> Option<usize> {
        if self.uuid == uuid {
            return Some(0);
        }
        self.children
            .iter()
            .find_map(|child| child.depth_of(uuid))
            .map(|depth| depth + 1)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Snapshot;
    type IntoIter = SnapshotIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Pre-order iterator over a snapshot tree
pub struct SnapshotIter<'a> {
    stack: Vec<&'a Snapshot>,
}

impl<'a> Iterator for SnapshotIter<'a> {
    type Item = &'a Snapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Name,
    Uuid,
    Description,
}

#[derive(Debug)]
struct Record<'a> {
    kind: RecordKind,
    path: &'a str,
    value: &'a str,
}

fn parse_record(line: &str) -> Option<Record<'_>> {
    let caps = RECORD_RE.captures(line)?;
    let kind = match caps.get(1)?.as_str() {
        "Name" => RecordKind::Name,
        "UUID" => RecordKind::Uuid,
        _ => RecordKind::Description,
    };
    Some(Record {
        kind,
        path: caps.get(2).map_or("", |m| m.as_str()),
        value: caps.get(3).map_or("", |m| m.as_str()),
    })
}

/// Node under construction; children are indices into the arena
#[derive(Default)]
struct PendingNode {
    snapshot: Snapshot,
    children: Vec<usize>,
}

#[derive(Default)]
struct TreeBuilder {
    nodes: Vec<PendingNode>,
    current: Option<usize>,
    current_depth: usize,
    ancestors: Vec<usize>,
}

impl TreeBuilder {
    fn feed(&mut self, line: &str) -> VmsmithResult<()> {
        let line = line.trim_end_matches('\r');

        let key = match line.find('=') {
            Some(idx) if idx > 0 => &line[..idx],
            _ => {
                debug!("Invalid key,value pair [{}]", line);
                return Ok(());
            }
        };

        if key.starts_with(CURRENT_MARKER) {
            match self.current {
                Some(index) => self.nodes[index].snapshot.current = true,
                None => warn!("Current snapshot marker before any snapshot: [{}]", line),
            }
            return Ok(());
        }

        let Some(record) = parse_record(line) else {
            debug!("Skipping snapshot record [{}]", line);
            return Ok(());
        };

        match record.kind {
            RecordKind::Name => self.add_node(record.path, record.value, line),
            RecordKind::Uuid => {
                self.with_current(line, |node| node.uuid = record.value.to_string());
                Ok(())
            }
            RecordKind::Description => {
                self.with_current(line, |node| {
                    node.description = Some(record.value.to_string())
                });
                Ok(())
            }
        }
    }

    fn with_current(&mut self, line: &str, update: impl FnOnce(&mut Snapshot)) {
        match self.current {
            Some(index) => update(&mut self.nodes[index].snapshot),
            None => warn!("Snapshot attribute before any snapshot name: [{}]", line),
        }
    }

    fn add_node(&mut self, path: &str, name: &str, line: &str) -> VmsmithResult<()> {
        let index = self.nodes.len();

        match self.current {
            None => {
                self.current_depth = 0;
            }
            Some(current) => {
                let depth = path.matches('-').count();

                if depth > self.current_depth {
                    self.ancestors.push(current);
                } else if depth < self.current_depth {
                    for _ in 0..self.current_depth - 1 {
                        self.ancestors.pop();
                    }
                }

                let parent = *self
                    .ancestors
                    .last()
                    .ok_or_else(|| VmsmithError::parse("snapshot listing (no parent for record)", line))?;

                self.nodes[parent].children.push(index);
                self.current_depth = depth;
            }
        }

        self.nodes.push(PendingNode {
            snapshot: Snapshot {
                name: name.to_string(),
                ..Default::default()
            },
            children: Vec::new(),
        });
        self.current = Some(index);
        Ok(())
    }

    fn finish(mut self) -> Option<Snapshot> {
        if self.nodes.is_empty() {
            return None;
        }
        Some(assemble(&mut self.nodes, 0))
    }
}

fn assemble(nodes: &mut [PendingNode], index: usize) -> Snapshot {
    let children = std::mem::take(&mut nodes[index].children);
    let mut snapshot = std::mem::take(&mut nodes[index].snapshot);
    snapshot.children = children
        .into_iter()
        .map(|child| assemble(nodes, child))
        .collect();
    snapshot
}

/// Rebuild the snapshot tree from a machine-readable listing.
///
/// Returns `Ok(None)` when the VM has no snapshots. Lines without `=` and
/// records other than Name/UUID/Description are skipped.
pub fn parse_snapshot_list(listing: &str) -> VmsmithResult<Option<Snapshot>> {
    let listing = listing.trim();
    if listing == NO_SNAPSHOTS_SENTINEL {
        return Ok(None);
    }

    let mut builder = TreeBuilder::default();
    for line in listing.lines() {
        builder.feed(line)?;
    }
    Ok(builder.finish())
}
