use serde::Serialize;
use thiserror::Error;

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SessionOutcome {
    ArtifactLink(String),
    ErrorMessage(String),
}

impl SessionOutcome {
    pub fn artifact_link(&self) -> Option<&str> {
        match self {
            SessionOutcome::ArtifactLink(link) => Some(link),
            SessionOutcome::ErrorMessage(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            SessionOutcome::ErrorMessage(message) => Some(message),
            SessionOutcome::ArtifactLink(_) => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("session already resolved to {existing:?}")]
    AlreadyResolved { existing: SessionOutcome },
}

/// Holds the outcome of one session; it can be resolved once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultHandler {
    outcome: Option<SessionOutcome>,
}

impl ResultHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, outcome: SessionOutcome) -> Result<(), ResolveError> {
        if let Some(existing) = &self.outcome {
            return Err(ResolveError::AlreadyResolved {
                existing: existing.clone(),
            });
        }
        self.outcome = Some(outcome);
        Ok(())
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}
