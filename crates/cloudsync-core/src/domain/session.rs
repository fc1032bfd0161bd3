//! MultipartSession domain entity
//!
//! Tracks one provider-side multipart transaction from initiation until it is
//! completed or aborted. A session belongs to exactly one orchestration call.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::errors::DomainError;
use super::object::{CompletedPart, ObjectRef};

/// Lifecycle state of a multipart session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Initiated; no part accepted yet
    #[default]
    Created,
    /// At least one part has been accepted
    InProgress,
    /// "Complete multipart upload" succeeded
    Completed,
    /// "Abort multipart upload" was issued
    Aborted,
}

impl SessionState {
    /// Returns true once the session can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::InProgress => write!(f, "in_progress"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Aborted => write!(f, "aborted"),
        }
    }
}

/// A provider-side multipart upload owned by a single transfer
#[derive(Debug, Clone)]
pub struct MultipartSession {
    upload_id: String,
    target: ObjectRef,
    started_at: DateTime<Utc>,
    expiry: Option<DateTime<Utc>>,
    parts: BTreeMap<u32, CompletedPart>,
    state: SessionState,
}

impl MultipartSession {
    /// Create a session for an upload the provider has just initiated
    pub fn new(upload_id: impl Into<String>, target: ObjectRef) -> Self {
        Self {
            upload_id: upload_id.into(),
            target,
            started_at: Utc::now(),
            expiry: None,
            parts: BTreeMap::new(),
            state: SessionState::Created,
        }
    }

    /// Set the provider-reported abort date
    pub fn with_expiry(mut self, expiry: Option<DateTime<Utc>>) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Completed parts in part-number order
    pub fn parts(&self) -> Vec<CompletedPart> {
        self.parts.values().cloned().collect()
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Record a part accepted by the provider
    ///
    /// Re-recording a part number replaces the earlier ETag, which is what the
    /// provider does when a part is uploaded twice.
    pub fn record_part(&mut self, part: CompletedPart) -> Result<(), DomainError> {
        self.ensure_open("in_progress")?;
        if part.part_number == 0 {
            return Err(DomainError::ValidationFailed(
                "part numbers start at 1".to_string(),
            ));
        }
        self.parts.insert(part.part_number, part);
        self.state = SessionState::InProgress;
        Ok(())
    }

    /// Transition to `Completed`
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.ensure_open("completed")?;
        self.state = SessionState::Completed;
        Ok(())
    }

    /// Transition to `Aborted`
    pub fn abort(&mut self) -> Result<(), DomainError> {
        self.ensure_open("aborted")?;
        self.state = SessionState::Aborted;
        Ok(())
    }

    fn ensure_open(&self, to: &str) -> Result<(), DomainError> {
        if self.state.is_terminal() {
            return Err(DomainError::InvalidState {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}
