use pail_proto::{FrameUpdate, ParsedFrame, WorkerFrame};
use serde::Serialize;
use tracing::{debug, warn};

use super::SessionId;
use super::log::{self, LogAggregator};
use super::outcome::{ResultHandler, SessionOutcome};
use super::progress::ProgressTracker;
use crate::transport::{ConnectionEventKind, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingResponse,
    InProgress,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Read-only view of the current session handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub url: String,
    pub state: SessionState,
    pub busy: bool,
    pub progress: u8,
    pub logs: Vec<String>,
    pub result: Option<SessionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,
}

/// One user-initiated attempt to turn a URL into an archive. Mutated only by
/// connection events once started.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    url: String,
    state: SessionState,
    busy: bool,
    log: LogAggregator,
    progress: ProgressTracker,
    result: ResultHandler,
    artifact_name: Option<String>,
}

impl Session {
    pub fn idle() -> Self {
        Self {
            id: SessionId::NONE,
            url: String::new(),
            state: SessionState::Idle,
            busy: false,
            log: LogAggregator::new(),
            progress: ProgressTracker::new(),
            result: ResultHandler::new(),
            artifact_name: None,
        }
    }

    pub fn begin(id: SessionId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            state: SessionState::Connecting,
            busy: true,
            log: LogAggregator::for_new_session(),
            progress: ProgressTracker::new(),
            result: ResultHandler::new(),
            artifact_name: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn logs(&self) -> &[String] {
        self.log.lines()
    }

    pub fn progress(&self) -> u8 {
        self.progress.get()
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.result.outcome()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            url: self.url.clone(),
            state: self.state,
            busy: self.busy,
            progress: self.progress.get(),
            logs: self.log.lines().to_vec(),
            result: self.result.outcome().cloned(),
            artifact_name: self.artifact_name.clone(),
        }
    }

    /// Applies one connection event. Returns whether anything observable
    /// changed; events reaching a settled session are ignored.
    pub fn apply(&mut self, event: ConnectionEventKind) -> bool {
        if !self.busy {
            debug!(
                target: "beach_pail::session",
                session_id = %self.id,
                event = ?event,
                "ignoring event for settled session"
            );
            return false;
        }

        match event {
            ConnectionEventKind::Opened => {
                if self.state != SessionState::Connecting {
                    return false;
                }
                self.log.append(log::CONNECTED);
                self.log.append(log::SENDING_REQUEST);
                self.state = SessionState::AwaitingResponse;
                true
            }
            ConnectionEventKind::ConnectFailed(err) => {
                warn!(target: "beach_pail::session", session_id = %self.id, error = %err, "backend unreachable");
                self.fail(log::BACKEND_UNREACHABLE);
                true
            }
            ConnectionEventKind::ConnectTimedOut => {
                self.fail(log::CONNECT_TIMED_OUT);
                true
            }
            ConnectionEventKind::ResponseTimedOut => {
                self.fail(log::NO_RESPONSE);
                true
            }
            ConnectionEventKind::Lost(err) => {
                warn!(target: "beach_pail::session", session_id = %self.id, error = %err, "connection lost");
                self.fail(log::CONNECTION_LOST);
                true
            }
            ConnectionEventKind::Closed => {
                warn!(target: "beach_pail::session", session_id = %self.id, "worker closed the connection before finishing");
                self.fail(log::CONNECTION_LOST);
                true
            }
            ConnectionEventKind::Frame(payload) => self.apply_frame(payload),
        }
    }

    /// Returns whether the frame changed anything observable.
    fn apply_frame(&mut self, payload: Payload) -> bool {
        let before = (self.state, self.log.len(), self.progress.get());
        if self.state == SessionState::AwaitingResponse {
            self.state = SessionState::InProgress;
        }

        let payload_len = payload.len();
        let parsed = match payload {
            Payload::Text(text) => WorkerFrame::parse(&text),
            Payload::Binary(bytes) => WorkerFrame::parse_bytes(&bytes),
        };
        let ParsedFrame { frame, invalid } = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(
                    target: "beach_pail::session",
                    session_id = %self.id,
                    error = %err,
                    payload_len,
                    "ignoring malformed worker frame"
                );
                self.log.append(log::MALFORMED_FRAME);
                return true;
            }
        };

        for field in &invalid {
            warn!(
                target: "beach_pail::session",
                session_id = %self.id,
                field = field.name,
                found = field.found,
                "ignoring mistyped frame field"
            );
            self.log.append(log::malformed_field_line(field.name));
        }

        for update in frame.into_updates() {
            if !self.busy {
                debug!(
                    target: "beach_pail::session",
                    session_id = %self.id,
                    update = ?update,
                    "dropping update after terminal transition"
                );
                break;
            }
            self.apply_update(update);
        }

        before != (self.state, self.log.len(), self.progress.get())
    }

    fn apply_update(&mut self, update: FrameUpdate) {
        match update {
            FrameUpdate::Status(status) => {
                self.log.append(log::status_line(&status));
            }
            FrameUpdate::Progress(reported) => {
                let stored = self.progress.set(reported);
                debug!(target: "beach_pail::session", session_id = %self.id, reported, stored, "progress update");
            }
            FrameUpdate::ArtifactReady { url, filename } => {
                self.log.append(log::ARCHIVE_CREATED);
                self.log.append(log::AWAITING_CONFIRMATION);
                self.resolve(SessionOutcome::ArtifactLink(url));
                self.artifact_name = filename;
                self.settle(SessionState::Completed);
            }
            FrameUpdate::Failed(message) => {
                self.log.append(log::error_line(&message));
                self.resolve(SessionOutcome::ErrorMessage(message));
                self.settle(SessionState::Failed);
            }
        }
    }

    fn resolve(&mut self, outcome: SessionOutcome) {
        if let Err(err) = self.result.resolve(outcome) {
            warn!(target: "beach_pail::session", session_id = %self.id, error = %err, "ignoring second resolution");
        }
    }

    fn fail(&mut self, line: &str) {
        self.log.append(line);
        self.settle(SessionState::Failed);
    }

    /// Abandons a busy session without resolving it.
    pub fn cancel(&mut self) -> bool {
        if !self.busy {
            return false;
        }
        self.fail(log::CANCELLED);
        true
    }

    fn settle(&mut self, state: SessionState) {
        self.state = state;
        self.busy = false;
    }
}
