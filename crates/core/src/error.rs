use emr_types::ReasonError;

/// Failures from the record endpoint: transport and server trouble only.
///
/// Version conflicts and signed refusals are deliberately not here; the
/// endpoint returns those as [`SaveOutcome`](crate::endpoint::SaveOutcome)
/// values so callers are forced to branch on them.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("session expired")]
    SessionExpired,
    #[error("not permitted to write this record")]
    Forbidden,
    #[error("server rejected the request ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to decode server response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether backing off and retrying could plausibly succeed.
    ///
    /// Session expiry, permission refusals, and undecodable responses will
    /// fail the same way on every retry; outages and 5xx responses may
    /// clear up.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Server { status, .. } => *status >= 500,
            ApiError::SessionExpired | ApiError::Forbidden | ApiError::Decode(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid amendment reason: {0}")]
    InvalidReason(#[from] ReasonError),
    #[error("a save is already in flight")]
    SaveInFlight,
    #[error("an unresolved conflict is blocking saves")]
    ConflictPending,
    #[error("no conflict to resolve")]
    NoConflict,
    #[error("forced overwrite has not been armed")]
    ForceNotArmed,
    #[error("record is not signed; amendment applies to signed records only")]
    AmendRequiresSignature,
    #[error("record endpoint error: {0}")]
    Api(#[from] ApiError),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
