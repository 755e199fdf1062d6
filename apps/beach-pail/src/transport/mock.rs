//! In-process stand-in for the packaging worker, used to drive sessions in
//! tests without a network.

use async_trait::async_trait;
use pail_proto::WorkerFrame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use url::Url;

use super::{Connector, Payload, TransportError, WorkerLink};

/// What the next `connect` call does. Calls without a queued plan accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPlan {
    Accept,
    Refuse,
    Hang,
}

pub struct MockConnector {
    plans: Mutex<VecDeque<ConnectPlan>>,
    workers: mpsc::UnboundedSender<MockWorker>,
}

/// Worker ends of accepted connections, in connect order.
pub struct MockWorkers {
    rx: mpsc::UnboundedReceiver<MockWorker>,
}

impl MockWorkers {
    pub async fn accept(&mut self) -> Option<MockWorker> {
        self.rx.recv().await
    }
}

impl MockConnector {
    pub fn new() -> (Self, MockWorkers) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                plans: Mutex::new(VecDeque::new()),
                workers: tx,
            },
            MockWorkers { rx },
        )
    }

    pub fn plan(&self, plan: ConnectPlan) {
        self.plans.lock().push_back(plan);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn WorkerLink>, TransportError> {
        let plan = self.plans.lock().pop_front().unwrap_or(ConnectPlan::Accept);
        match plan {
            ConnectPlan::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let closed = Arc::new(AtomicBool::new(false));
                let _ = self.workers.send(MockWorker {
                    outbound: outbound_rx,
                    inbound: Some(inbound_tx),
                    closed: Arc::clone(&closed),
                });
                Ok(Box::new(MockLink {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                    closed,
                }))
            }
            ConnectPlan::Refuse => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                source: tungstenite::Error::Io(io::ErrorKind::ConnectionRefused.into()),
            }),
            ConnectPlan::Hang => {
                std::future::pending::<Result<Box<dyn WorkerLink>, TransportError>>().await
            }
        }
    }
}

enum MockInbound {
    Data(Payload),
    Fail,
}

struct MockLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<MockInbound>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl WorkerLink for MockLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::WebSocket(tungstenite::Error::AlreadyClosed))
    }

    async fn recv(&mut self) -> Option<Result<Payload, TransportError>> {
        match self.inbound.recv().await? {
            MockInbound::Data(payload) => Some(Ok(payload)),
            MockInbound::Fail => Some(Err(TransportError::WebSocket(tungstenite::Error::Io(
                io::ErrorKind::ConnectionReset.into(),
            )))),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound.close();
    }
}

/// Worker side of one mock connection.
pub struct MockWorker {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<MockInbound>>,
    closed: Arc<AtomicBool>,
}

impl MockWorker {
    /// Next frame the client sent.
    pub async fn request(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    pub fn no_more_requests(&mut self) -> bool {
        self.outbound.try_recv().is_err()
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.push(MockInbound::Data(Payload::Text(text.into())));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.push(MockInbound::Data(Payload::Binary(bytes)));
    }

    pub fn send_frame(&self, frame: &WorkerFrame) {
        if let Ok(text) = frame.to_text() {
            self.send_text(text);
        }
    }

    /// Breaks the connection with a transport error.
    pub fn fail(&self) {
        self.push(MockInbound::Fail);
    }

    /// Closes the connection from the worker side.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push(&self, inbound: MockInbound) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(inbound);
        }
    }
}
