//! Field-level change sets between two revisions of a record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What happened to a field between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl ChangeKind {
    /// Returns the lowercase string form used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Modified => "modified",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One changed field, with both values flattened for display.
///
/// Composite values (objects, lists) arrive as a single readable string
/// rather than a recursive diff; the compare view shows clinicians clean
/// prose, not structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    #[serde(rename = "changeType")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
}

/// A complete change set between two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    /// Older of the two revisions compared. Zero when the local copy has
    /// never been saved.
    pub from_version: u64,
    pub to_version: u64,
    /// One-line description suitable for a header, e.g.
    /// "2 fields changed between v3 and v5".
    pub summary: String,
    pub changes: Vec<FieldChange>,
}
