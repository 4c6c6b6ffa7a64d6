//! The clinical record and its lifecycle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors that can occur when creating a validated record identity.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The input was empty or contained only whitespace
    #[error("record identity cannot be empty")]
    Empty,
}

/// Stable identity of a clinical record: the key of the encounter it
/// belongs to.
///
/// The identity is issued elsewhere (encounter management is not this
/// engine's concern); this type only guarantees it is non-empty and
/// trimmed, so it is always safe to embed in a request path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a new `RecordId` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the
    /// trimmed result is empty, an error is returned.
    ///
    /// # Arguments
    ///
    /// * `input` - Any type that can be converted to a string reference
    ///
    /// # Returns
    ///
    /// Returns `Ok(RecordId)` if the trimmed input is non-empty, or
    /// `Err(IdentityError::Empty)` otherwise.
    pub fn new(input: impl AsRef<str>) -> Result<Self, IdentityError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for RecordId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RecordId::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle of a clinical record.
///
/// A record only ever moves forward: `Draft` → `Signed` → `Amended`. Once
/// signed its content is immutable except through the amend operation,
/// which records a new revision without reverting the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Draft,
    Signed,
    Amended,
}

impl LifecycleState {
    /// Returns the lowercase string form used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Draft => "draft",
            LifecycleState::Signed => "signed",
            LifecycleState::Amended => "amended",
        }
    }

    fn rank(self) -> u8 {
        match self {
            LifecycleState::Draft => 0,
            LifecycleState::Signed => 1,
            LifecycleState::Amended => 2,
        }
    }

    /// Whether this state is as far or further along than `other`.
    ///
    /// The lifecycle never moves backward, so a server response carrying an
    /// earlier state than the client already holds is stale.
    pub fn is_at_least(self, other: LifecycleState) -> bool {
        self.rank() >= other.rank()
    }

    /// Whether plain saves are refused for a record in this state.
    pub fn is_signed_or_later(self) -> bool {
        self.rank() >= LifecycleState::Signed.rank()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working clinical content: a mapping from section name to value.
///
/// Values are free text, structured sub-objects, or scalar codes; the
/// engine treats them opaquely apart from structural equality and dotted
/// path addressing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordData(BTreeMap<String, Value>);

impl RecordData {
    /// Creates empty record content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a top-level field, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a top-level field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Returns the value at a dotted path, if every segment resolves.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Sets the value at a dotted path.
    ///
    /// Missing intermediate objects are created; an intermediate that is
    /// not an object is replaced by one, the way a form library writes
    /// through a path. A path without dots behaves exactly like [`set`].
    ///
    /// [`set`]: RecordData::set
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segments = path.split('.');
        let first = match segments.next() {
            Some(s) => s.to_owned(),
            None => return,
        };
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            self.0.insert(first, value);
            return;
        }

        let root = self
            .0
            .entry(first)
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let mut current = root;
        for segment in &rest[..rest.len() - 1] {
            if !current.is_object() {
                *current = Value::Object(serde_json::Map::new());
            }
            current = current
                .as_object_mut()
                .expect("value was just made an object")
                .entry((*segment).to_owned())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        current
            .as_object_mut()
            .expect("value was just made an object")
            .insert(rest[rest.len() - 1].to_owned(), value);
    }

    /// Iterates the top-level fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for RecordData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A versioned clinical record as the server holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable key of the encounter this record belongs to.
    pub identity: RecordId,
    /// Clinical content by section.
    pub data: RecordData,
    /// Monotonically increasing counter the server assigns on every
    /// successful write.
    pub version: u64,
    /// Optimistic-lock token. Echoes `version` after a successful write
    /// and is otherwise returned unchanged.
    pub row_version: u64,
    #[serde(rename = "lifecycleState")]
    pub lifecycle: LifecycleState,
    pub last_edited_by: String,
    pub last_edited_at: DateTime<Utc>,
}

/// What the server knew when it refused a write over a version mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    /// Version currently on the server.
    pub server_version: u64,
    /// Version the refused write was based on.
    pub your_version: u64,
    pub last_edited_by: String,
    pub last_edited_at: DateTime<Utc>,
}
