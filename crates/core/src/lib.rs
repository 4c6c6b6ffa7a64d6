//! # EMR Core
//!
//! Client-side editing and concurrency-control engine for clinical
//! documents.
//!
//! This crate contains the pure state machinery and the session facade:
//! - Versioned record state with bounded undo/redo and dirty tracking
//! - Optimistic-lock save flow where conflicts come back as values
//! - Poll-driven autosave with debounce, long-stop, backoff, and pause
//! - Conflict resolution limited to reload, compare, amend, and a
//!   two-action forced overwrite
//! - Read-only revision history and diff access
//!
//! **No wire concerns**: HTTP transport, authentication headers, and
//! payload shapes belong in `api-client`. The engine only sees the
//! [`RecordEndpoint`] trait.

pub mod autosave;
pub mod config;
pub mod diff;
pub mod endpoint;
pub mod error;
pub mod guard;
pub mod memory;
pub mod resolver;
pub mod revisions;
pub mod session;
pub mod state;

pub use config::SessionConfig;
pub use endpoint::{RecordEndpoint, SaveOutcome, WriteRequest};
pub use error::{ApiError, SessionError, SessionResult};
pub use guard::LeaveDecision;
pub use memory::InMemoryRecordEndpoint;
pub use resolver::ResolutionOptions;
pub use revisions::RevisionBrowser;
pub use session::{AutosaveTick, DocumentSession, StatusLine};
pub use state::{SessionState, SessionStatus};
