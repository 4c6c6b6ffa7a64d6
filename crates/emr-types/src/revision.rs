//! Revision metadata: who did what to a record, and when.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Controlled vocabulary for what a revision did to the record.
///
/// `Restored` appears in audit trails written server-side; the engine
/// never issues a restore itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionAction {
    Created,
    Updated,
    Signed,
    Amended,
    Restored,
}

impl RevisionAction {
    /// Returns the lowercase string form used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionAction::Created => "created",
            RevisionAction::Updated => "updated",
            RevisionAction::Signed => "signed",
            RevisionAction::Amended => "amended",
            RevisionAction::Restored => "restored",
        }
    }
}

impl fmt::Display for RevisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a record's revision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionEntry {
    /// Version the record reached with this revision.
    pub version: u64,
    /// Actor id of whoever made the write.
    pub actor: String,
    pub at: DateTime<Utc>,
    pub action: RevisionAction,
    /// Free-text reason or summary, where one was supplied (amendments
    /// always carry their reason here).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// The ordered revision list for one record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RevisionHistory {
    pub revisions: Vec<RevisionEntry>,
}
