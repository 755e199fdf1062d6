//! Session lifecycle: one logical session per user request, driven by the
//! events of its worker connection until it settles on an outcome.
//!
//! [`SessionController`] owns the single current [`Session`]. Starting a new
//! session supersedes the previous one; every connection event carries the
//! id of the session that opened it and events for superseded sessions are
//! dropped before they can touch state.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::transport::{ConnectionEvent, ConnectionEventKind, ConnectionHandle, ConnectionManager, Connector};

pub mod log;
pub mod outcome;
pub mod progress;
pub mod state;

pub use log::LogAggregator;
pub use outcome::{ResolveError, ResultHandler, SessionOutcome};
pub use progress::ProgressTracker;
pub use state::{Session, SessionSnapshot, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Id of the placeholder session a controller starts with.
    pub const NONE: SessionId = SessionId(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a resource url is required")]
    EmptyUrl,
    #[error("session {current} is still running")]
    Busy { current: SessionId },
}

/// Orchestrates sessions against one worker endpoint. Cloning yields another
/// handle to the same controller.
pub struct SessionController<C: Connector> {
    inner: Arc<ControllerInner<C>>,
}

struct ControllerInner<C: Connector> {
    connections: ConnectionManager<C>,
    next_id: AtomicU64,
    current: Mutex<Current>,
    snapshots: watch::Sender<SessionSnapshot>,
}

struct Current {
    session: Session,
    dispatcher: Option<JoinHandle<()>>,
}

impl<C: Connector> Clone for SessionController<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> SessionController<C> {
    pub fn new(connector: C, config: ClientConfig) -> Self {
        let session = Session::idle();
        let (snapshots, _) = watch::channel(session.snapshot());
        Self {
            inner: Arc::new(ControllerInner {
                connections: ConnectionManager::new(connector, config),
                next_id: AtomicU64::new(0),
                current: Mutex::new(Current {
                    session,
                    dispatcher: None,
                }),
                snapshots,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.connections.config()
    }

    /// Starts a session for `url`, superseding whatever settled session came
    /// before it. Rejected without touching state when the url is blank or a
    /// session is still busy. Must be called from within a Tokio runtime.
    pub fn start(&self, url: &str) -> Result<SessionId, StartError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StartError::EmptyUrl);
        }

        let mut current = self.inner.current.lock();
        if current.session.busy() {
            debug!(
                target: "beach_pail::session",
                session_id = %current.session.id(),
                "start rejected; session still busy"
            );
            return Err(StartError::Busy {
                current: current.session.id(),
            });
        }

        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        if let Some(stale) = current.dispatcher.take() {
            stale.abort();
        }
        current.session = Session::begin(id, url);
        self.publish(&current.session);
        info!(target: "beach_pail::session", session_id = %id, url = %url, "session started");

        let handle = self.inner.connections.open(id, url);
        current.dispatcher = Some(tokio::spawn(self.clone().dispatch(handle)));
        Ok(id)
    }

    /// Forcibly abandons the busy session, closing its connection. Returns
    /// false when there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut current = self.inner.current.lock();
        if !current.session.cancel() {
            return false;
        }
        if let Some(dispatcher) = current.dispatcher.take() {
            dispatcher.abort();
        }
        info!(target: "beach_pail::session", session_id = %current.session.id(), "session cancelled");
        self.publish(&current.session);
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Receives a fresh snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.current.lock().session.busy()
    }

    /// Resolves once session `id` has settled or been superseded.
    pub async fn wait_settled(&self, id: SessionId) -> SessionSnapshot {
        let mut updates = self.subscribe();
        loop {
            {
                let snapshot = updates.borrow_and_update();
                if snapshot.id != id || !snapshot.busy {
                    return snapshot.clone();
                }
            }
            if updates.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    /// Applies one event to the current session. Returns true once the
    /// event's session needs no further events.
    pub fn handle_event(&self, event: ConnectionEvent) -> bool {
        let mut current = self.inner.current.lock();
        if event.session != current.session.id() {
            debug!(
                target: "beach_pail::session",
                session_id = %event.session,
                current_session = %current.session.id(),
                "discarding event for superseded session"
            );
            return true;
        }
        if current.session.apply(event.kind) {
            self.publish(&current.session);
        }
        !current.session.busy()
    }

    async fn dispatch(self, mut handle: ConnectionHandle) {
        let session = handle.session();
        let mut settled = false;
        while let Some(event) = handle.next_event().await {
            if self.handle_event(event) {
                settled = true;
                break;
            }
        }
        if !settled {
            // The connection task ended without reporting why.
            self.handle_event(ConnectionEvent {
                session,
                kind: ConnectionEventKind::Closed,
            });
        }
        handle.close().await;
        debug!(target: "beach_pail::session", session_id = %session, "dispatcher finished");
    }

    fn publish(&self, session: &Session) {
        self.inner.snapshots.send_replace(session.snapshot());
    }
}
