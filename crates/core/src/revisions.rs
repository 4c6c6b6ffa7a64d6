//! Read-only access to a record's revision trail.
//!
//! The browser borrows an endpoint and never touches session state, so
//! opening the history panel can never dirty the document or disturb an
//! in-flight save.

use emr_types::{DiffReport, RecordId, RevisionHistory};

use crate::endpoint::RecordEndpoint;
use crate::error::{SessionError, SessionResult};

pub struct RevisionBrowser<'a, E: RecordEndpoint + ?Sized> {
    endpoint: &'a E,
    identity: &'a RecordId,
}

impl<'a, E: RecordEndpoint + ?Sized> RevisionBrowser<'a, E> {
    pub fn new(endpoint: &'a E, identity: &'a RecordId) -> Self {
        Self { endpoint, identity }
    }

    /// Full revision list, oldest first regardless of how the endpoint
    /// happens to order it.
    pub async fn history(&self) -> SessionResult<RevisionHistory> {
        let mut history = self.endpoint.history(self.identity).await?;
        history.revisions.sort_by_key(|entry| entry.version);
        Ok(history)
    }

    /// Changes between any two revisions, reported oldest to newest
    /// even when the caller picks them the other way round.
    pub async fn compare(&self, from: u64, to: u64) -> SessionResult<DiffReport> {
        if from == to {
            return Err(SessionError::InvalidInput(
                "cannot compare a revision with itself".to_owned(),
            ));
        }
        let (from, to) = if from < to { (from, to) } else { (to, from) };
        Ok(self.endpoint.diff(self.identity, from, to).await?)
    }

    /// Changes a single revision introduced over its predecessor.
    pub async fn compare_with_previous(&self, version: u64) -> SessionResult<DiffReport> {
        if version < 2 {
            return Err(SessionError::InvalidInput(
                "the first revision has no predecessor to compare with".to_owned(),
            ));
        }
        Ok(self.endpoint.diff(self.identity, version - 1, version).await?)
    }
}
