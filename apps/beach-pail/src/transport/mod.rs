use async_trait::async_trait;
use pail_proto::{FrameError, SessionRequest};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite;
use tracing::{Instrument, debug, info_span, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::session::SessionId;

pub mod mock;
pub mod websocket;

pub use websocket::WebSocketConnector;

/// How long `ConnectionHandle::close` waits for the socket to shut down
/// before the connection task is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("failed to encode request: {0}")]
    Encode(#[from] FrameError),
}

/// Opens links to the packaging worker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn WorkerLink>, TransportError>;
}

/// One open connection to the worker.
#[async_trait]
pub trait WorkerLink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound payload, or `None` once the worker closed the connection.
    async fn recv(&mut self) -> Option<Result<Payload, TransportError>>;

    async fn close(&mut self);
}

/// One inbound data message, undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something that happened on a session's connection.
#[derive(Debug)]
pub struct ConnectionEvent {
    pub session: SessionId,
    pub kind: ConnectionEventKind,
}

#[derive(Debug)]
pub enum ConnectionEventKind {
    /// Transport is open; the request frame goes out right after.
    Opened,
    ConnectFailed(TransportError),
    ConnectTimedOut,
    Frame(Payload),
    /// No inbound frame arrived in time after the request was sent.
    ResponseTimedOut,
    Lost(TransportError),
    /// Worker closed the connection.
    Closed,
}

/// Owns the worker connections, one per session.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    config: ClientConfig,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
        }
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, config: ClientConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Spawns the connection task for `session`. Must be called from within a
    /// Tokio runtime.
    pub fn open(&self, session: SessionId, url: &str) -> ConnectionHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let span = info_span!("connection", session_id = %session, endpoint = %self.config.endpoint);
        let task = tokio::spawn(
            run_connection(
                Arc::clone(&self.connector),
                self.config.clone(),
                SessionRequest::new(url),
                EventSink {
                    session,
                    tx: events_tx,
                },
                close_rx,
            )
            .instrument(span),
        );
        ConnectionHandle {
            session,
            events: events_rx,
            close: Some(close_tx),
            task: Some(task),
        }
    }
}

/// Receiving end of one session's connection. Dropping the handle aborts the
/// connection task.
pub struct ConnectionHandle {
    session: SessionId,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    close: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Asks the connection task to close the socket and waits for it briefly.
    pub async fn close(mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        if let Some(mut task) = self.task.take() {
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!(session_id = %self.session, "connection did not close in time; aborting");
                task.abort();
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSink {
    fn emit(&self, kind: ConnectionEventKind) {
        let event = ConnectionEvent {
            session: self.session,
            kind,
        };
        if self.tx.send(event).is_err() {
            debug!(session_id = %self.session, "session dispatcher gone; dropping event");
        }
    }
}

enum Inbound {
    Data(Payload),
    TimedOut,
    Closed,
    Failed(TransportError),
}

async fn run_connection<C: Connector>(
    connector: Arc<C>,
    config: ClientConfig,
    request: SessionRequest,
    sink: EventSink,
    mut close_rx: oneshot::Receiver<()>,
) {
    let connect = timeout(config.connect_timeout, connector.connect(&config.endpoint));
    let mut link = tokio::select! {
        _ = &mut close_rx => {
            debug!("connection abandoned before it opened");
            return;
        }
        result = connect => match result {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => {
                warn!(error = %err, "worker connection failed");
                sink.emit(ConnectionEventKind::ConnectFailed(err));
                return;
            }
            Err(_) => {
                warn!(timeout_ms = config.connect_timeout.as_millis() as u64, "worker connection timed out");
                sink.emit(ConnectionEventKind::ConnectTimedOut);
                return;
            }
        }
    };

    sink.emit(ConnectionEventKind::Opened);

    let payload = match request.to_text() {
        Ok(payload) => payload,
        Err(err) => {
            sink.emit(ConnectionEventKind::Lost(err.into()));
            link.close().await;
            return;
        }
    };
    if let Err(err) = link.send_text(payload).await {
        warn!(error = %err, "failed to send session request");
        sink.emit(ConnectionEventKind::Lost(err));
        return;
    }
    debug!(url = %request.url, "session request sent");

    let mut awaiting_response = true;
    loop {
        let deadline = awaiting_response.then_some(config.response_timeout);
        let inbound = tokio::select! {
            _ = &mut close_rx => None,
            inbound = next_inbound(link.as_mut(), deadline) => Some(inbound),
        };
        let Some(inbound) = inbound else {
            debug!("closing worker connection");
            link.close().await;
            return;
        };
        match inbound {
            Inbound::Data(payload) => {
                awaiting_response = false;
                sink.emit(ConnectionEventKind::Frame(payload));
            }
            Inbound::TimedOut => {
                warn!(
                    timeout_ms = config.response_timeout.as_millis() as u64,
                    "worker did not respond in time"
                );
                sink.emit(ConnectionEventKind::ResponseTimedOut);
                link.close().await;
                return;
            }
            Inbound::Closed => {
                debug!("worker closed the connection");
                sink.emit(ConnectionEventKind::Closed);
                return;
            }
            Inbound::Failed(err) => {
                warn!(error = %err, "worker connection lost");
                sink.emit(ConnectionEventKind::Lost(err));
                return;
            }
        }
    }
}

async fn next_inbound(link: &mut dyn WorkerLink, deadline: Option<Duration>) -> Inbound {
    let next = match deadline {
        Some(limit) => match timeout(limit, link.recv()).await {
            Ok(next) => next,
            Err(_) => return Inbound::TimedOut,
        },
        None => link.recv().await,
    };
    match next {
        Some(Ok(payload)) => Inbound::Data(payload),
        Some(Err(err)) => Inbound::Failed(err),
        None => Inbound::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{ConnectPlan, MockConnector};
    use super::*;
    use pail_proto::WorkerFrame;

    fn manager(connector: MockConnector) -> ConnectionManager<MockConnector> {
        let config = ClientConfig::new("ws://127.0.0.1:8000/ws")
            .expect("config")
            .with_connect_timeout(Duration::from_secs(1))
            .with_response_timeout(Duration::from_secs(5));
        ConnectionManager::new(connector, config)
    }

    #[test_timeout::tokio_timeout_test]
    async fn sends_one_request_and_forwards_frames_in_order() {
        let (connector, mut workers) = MockConnector::new();
        let mut handle = manager(connector).open(SessionId::new(7), "https://example.test/list");
        let mut worker = workers.accept().await.expect("worker");

        assert_eq!(
            worker.request().await.as_deref(),
            Some(r#"{"url":"https://example.test/list"}"#)
        );
        worker.send_frame(&WorkerFrame::status("analyzing link..."));
        worker.send_frame(&WorkerFrame::progress(50.0));
        worker.hang_up();

        let mut kinds = Vec::new();
        while let Some(event) = handle.next_event().await {
            assert_eq!(event.session, SessionId::new(7));
            kinds.push(event.kind);
        }
        assert!(matches!(kinds[0], ConnectionEventKind::Opened));
        assert!(matches!(&kinds[1], ConnectionEventKind::Frame(Payload::Text(text)) if text.contains("analyzing")));
        assert!(matches!(&kinds[2], ConnectionEventKind::Frame(Payload::Text(text)) if text.contains("50")));
        assert!(matches!(kinds[3], ConnectionEventKind::Closed));
        assert_eq!(kinds.len(), 4);
        assert!(worker.no_more_requests());
    }

    #[test_timeout::tokio_timeout_test]
    async fn refused_connection_reports_connect_failure() {
        let (connector, _workers) = MockConnector::new();
        connector.plan(ConnectPlan::Refuse);
        let mut handle = manager(connector).open(SessionId::new(1), "https://example.test");

        let event = handle.next_event().await.expect("event");
        assert!(matches!(
            event.kind,
            ConnectionEventKind::ConnectFailed(TransportError::Connect { .. })
        ));
        assert!(handle.next_event().await.is_none());
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn hanging_connect_times_out() {
        let (connector, _workers) = MockConnector::new();
        connector.plan(ConnectPlan::Hang);
        let mut handle = manager(connector).open(SessionId::new(1), "https://example.test");

        let event = handle.next_event().await.expect("event");
        assert!(matches!(event.kind, ConnectionEventKind::ConnectTimedOut));
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn silent_worker_times_out_and_is_closed() {
        let (connector, mut workers) = MockConnector::new();
        let mut handle = manager(connector).open(SessionId::new(3), "https://example.test");
        let mut worker = workers.accept().await.expect("worker");
        worker.request().await.expect("request");

        assert!(matches!(
            handle.next_event().await.map(|event| event.kind),
            Some(ConnectionEventKind::Opened)
        ));
        assert!(matches!(
            handle.next_event().await.map(|event| event.kind),
            Some(ConnectionEventKind::ResponseTimedOut)
        ));
        assert!(handle.next_event().await.is_none());
        assert!(worker.client_closed());
    }

    #[test_timeout::tokio_timeout_test]
    async fn close_shuts_the_link_down() {
        let (connector, mut workers) = MockConnector::new();
        let mut handle = manager(connector).open(SessionId::new(9), "https://example.test");
        let mut worker = workers.accept().await.expect("worker");
        worker.request().await.expect("request");
        worker.send_frame(&WorkerFrame::ready("/files/x.zip"));

        assert!(matches!(
            handle.next_event().await.map(|event| event.kind),
            Some(ConnectionEventKind::Opened)
        ));
        assert!(matches!(
            handle.next_event().await.map(|event| event.kind),
            Some(ConnectionEventKind::Frame(_))
        ));
        handle.close().await;
        assert!(worker.client_closed());
    }

    #[test_timeout::tokio_timeout_test]
    async fn binary_frames_are_forwarded_untouched() {
        let (connector, mut workers) = MockConnector::new();
        let mut handle = manager(connector).open(SessionId::new(5), "https://example.test");
        let mut worker = workers.accept().await.expect("worker");
        worker.request().await.expect("request");
        worker.send_binary(b"{\"status\":\"ok \xff\"}".to_vec());

        assert!(matches!(
            handle.next_event().await.map(|event| event.kind),
            Some(ConnectionEventKind::Opened)
        ));
        match handle.next_event().await.map(|event| event.kind) {
            Some(ConnectionEventKind::Frame(Payload::Binary(bytes))) => {
                assert_eq!(bytes, b"{\"status\":\"ok \xff\"}");
            }
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn transport_error_after_open_reports_lost() {
        let (connector, mut workers) = MockConnector::new();
        let mut handle = manager(connector).open(SessionId::new(4), "https://example.test");
        let mut worker = workers.accept().await.expect("worker");
        worker.request().await.expect("request");
        worker.fail();

        assert!(matches!(
            handle.next_event().await.map(|event| event.kind),
            Some(ConnectionEventKind::Opened)
        ));
        assert!(matches!(
            handle.next_event().await.map(|event| event.kind),
            Some(ConnectionEventKind::Lost(TransportError::WebSocket(_)))
        ));
        assert!(handle.next_event().await.is_none());
    }
}
