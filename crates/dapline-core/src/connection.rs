//! TCP connections to DAP backends: registry and request correlation
//!
//! One [`Connection`] per [`Endpoint`], created lazily and reused. Each
//! connection runs a background read task that decodes frames and routes
//! them: responses settle pending request waiters, events go to the
//! [`EventDispatcher`].
//!
//! Correlation is deliberately "next response on this connection": waiters
//! form a FIFO queue and an incoming response settles the oldest one,
//! without matching `response.request_seq` against the sent `seq`. Callers
//! issuing overlapping requests on one connection must serialize them; the
//! queue only guarantees arrival-order matching.

use crate::codec::{encode, FrameDecoder};
use crate::error::{RelayError, RelayResult};
use crate::events::EventDispatcher;
use crate::protocol::{DapMessage, DapRequest, DapResponse, Seq, SeqAllocator};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default window for request/response correlation
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// (host, port) identity of a DAP backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

type Waiter = (Seq, oneshot::Sender<RelayResult<DapResponse>>);

/// One live duplex stream to a backend.
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Arc<Mutex<VecDeque<Waiter>>>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Connect to the endpoint and start the read pump.
    async fn establish(
        endpoint: Endpoint,
        dispatcher: Arc<EventDispatcher>,
        connections: Arc<DashMap<Endpoint, Arc<Connection>>>,
    ) -> RelayResult<Arc<Self>> {
        let stream = TcpStream::connect(endpoint.addr()).await.map_err(|e| {
            RelayError::connection(format!("failed to connect to {}: {}", endpoint, e))
        })?;
        let (read_half, write_half) = stream.into_split();

        let pending: Arc<Mutex<VecDeque<Waiter>>> = Arc::new(Mutex::new(VecDeque::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_pump(
            read_half,
            endpoint.clone(),
            dispatcher,
            Arc::clone(&pending),
            Arc::clone(&closed),
            connections,
        ));

        info!(endpoint = %endpoint, "connected to DAP backend");
        Ok(Arc::new(Self {
            endpoint,
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            closed,
            reader,
        }))
    }

    /// Whether the connection has been closed (locally or by the peer)
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The endpoint this connection is bound to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send one request and await the next response on this connection.
    ///
    /// Events observed while waiting are dispatched and do not satisfy the
    /// wait. On timeout the waiter is removed and the connection stays
    /// open and reusable.
    pub async fn send_request(
        &self,
        seq: Seq,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> RelayResult<DapResponse> {
        if self.is_closed() {
            return Err(RelayError::connection(format!(
                "connection to {} is closed",
                self.endpoint
            )));
        }

        let mut request = DapRequest::new(seq, command);
        if let Some(arguments) = arguments {
            request = request.with_arguments(arguments);
        }
        let frame = match encode(&DapMessage::Request(request)) {
            Ok(frame) => frame,
            Err(e) => return Err(e),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().push_back((seq, tx));

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                self.remove_waiter(seq);
                return Err(RelayError::connection(format!(
                    "write to {} failed: {}",
                    self.endpoint, e
                )));
            }
            if let Err(e) = writer.flush().await {
                self.remove_waiter(seq);
                return Err(RelayError::connection(format!(
                    "flush to {} failed: {}",
                    self.endpoint, e
                )));
            }
        }
        debug!(endpoint = %self.endpoint, seq, command, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::connection(format!(
                "connection to {} closed while awaiting response",
                self.endpoint
            ))),
            Err(_) => {
                self.remove_waiter(seq);
                warn!(endpoint = %self.endpoint, seq, command, "request timed out");
                Err(RelayError::timeout(timeout.as_secs()))
            }
        }
    }

    fn remove_waiter(&self, seq: Seq) {
        self.pending.lock().retain(|(s, _)| *s != seq);
    }

    /// Close the connection, rejecting every pending waiter.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        reject_pending(
            &self.pending,
            RelayError::connection(format!("connection to {} closed", self.endpoint)),
        );
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        self.reader.abort();
    }
}

fn reject_pending(pending: &Mutex<VecDeque<Waiter>>, error: RelayError) {
    for (_, tx) in pending.lock().drain(..) {
        let _ = tx.send(Err(error.clone()));
    }
}

/// Background task: decode inbound frames and route them.
async fn read_pump(
    mut read_half: OwnedReadHalf,
    endpoint: Endpoint,
    dispatcher: Arc<EventDispatcher>,
    pending: Arc<Mutex<VecDeque<Waiter>>>,
    closed: Arc<AtomicBool>,
    connections: Arc<DashMap<Endpoint, Arc<Connection>>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(endpoint = %endpoint, "backend closed the connection");
                break;
            }
            Ok(n) => {
                for frame in decoder.feed(&buf[..n]) {
                    route_frame(&endpoint, frame, &dispatcher, &pending);
                }
            }
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    warn!(endpoint = %endpoint, error = %e, "read error on DAP connection");
                }
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    reject_pending(
        &pending,
        RelayError::connection(format!("connection to {} lost", endpoint)),
    );
    // Deregister, but only if the registry still holds this connection
    connections.remove_if(&endpoint, |_, conn| {
        Arc::ptr_eq(&conn.closed, &closed)
    });
}

fn route_frame(
    endpoint: &Endpoint,
    frame: RelayResult<DapMessage>,
    dispatcher: &EventDispatcher,
    pending: &Mutex<VecDeque<Waiter>>,
) {
    match frame {
        Ok(DapMessage::Response(response)) => {
            let waiter = pending.lock().pop_front();
            match waiter {
                Some((_, tx)) => {
                    let _ = tx.send(Ok(response));
                }
                None => warn!(
                    endpoint = %endpoint,
                    request_seq = response.request_seq,
                    "response arrived with no pending request"
                ),
            }
        }
        Ok(DapMessage::Event(event)) => {
            debug!(endpoint = %endpoint, event = %event.event, "event received");
            dispatcher.dispatch(&event);
        }
        Ok(DapMessage::Request(request)) => {
            // Reverse requests (e.g. runInTerminal) are out of scope
            warn!(
                endpoint = %endpoint,
                command = %request.command,
                "ignoring reverse request from backend"
            );
        }
        Err(e) => {
            // A bad frame aborts only the current correlated request
            warn!(endpoint = %endpoint, error = %e, "discarding unparsable frame");
            if let Some((_, tx)) = pending.lock().pop_front() {
                let _ = tx.send(Err(e));
            }
        }
    }
}

/// Registry of live backend connections, keyed by endpoint.
///
/// Owned by the [`crate::context::RelayContext`]; independent contexts
/// never share connections, subscriptions, or sequence numbers.
pub struct ConnectionRegistry {
    connections: Arc<DashMap<Endpoint, Arc<Connection>>>,
    dispatcher: Arc<EventDispatcher>,
    seq: SeqAllocator,
    request_timeout: Duration,
    // Serializes connection establishment so two callers racing on the
    // same endpoint cannot create two connections.
    connect_lock: tokio::sync::Mutex<()>,
}

impl ConnectionRegistry {
    /// Create a registry with the default request timeout
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self::with_request_timeout(dispatcher, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a registry with a custom request timeout
    pub fn with_request_timeout(
        dispatcher: Arc<EventDispatcher>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            dispatcher,
            seq: SeqAllocator::new(),
            request_timeout,
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Return the live connection for the endpoint, connecting if needed.
    pub async fn ensure_connection(&self, endpoint: &Endpoint) -> RelayResult<Arc<Connection>> {
        if let Some(conn) = self.get_live(endpoint) {
            return Ok(conn);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(conn) = self.get_live(endpoint) {
            return Ok(conn);
        }

        let conn = Connection::establish(
            endpoint.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.connections),
        )
        .await?;
        self.connections.insert(endpoint.clone(), Arc::clone(&conn));
        Ok(conn)
    }

    fn get_live(&self, endpoint: &Endpoint) -> Option<Arc<Connection>> {
        let conn = self.connections.get(endpoint).map(|c| Arc::clone(&c))?;
        if conn.is_closed() {
            self.connections
                .remove_if(endpoint, |_, existing| existing.is_closed());
            return None;
        }
        Some(conn)
    }

    /// Send a request to the endpoint and await its response.
    pub async fn send_request(
        &self,
        endpoint: &Endpoint,
        command: &str,
        arguments: Option<Value>,
    ) -> RelayResult<DapResponse> {
        let conn = self.ensure_connection(endpoint).await?;
        conn.send_request(self.seq.next_seq(), command, arguments, self.request_timeout)
            .await
    }

    /// Close and deregister one connection; returns whether it existed.
    pub async fn disconnect(&self, endpoint: &Endpoint) -> bool {
        match self.connections.remove(endpoint) {
            Some((_, conn)) => {
                conn.close().await;
                info!(endpoint = %endpoint, "disconnected from DAP backend");
                true
            }
            None => false,
        }
    }

    /// Close every connection, clear the registry, and clear all
    /// subscriptions. This is a process-wide hard reset for the context.
    pub async fn close_all(&self) -> usize {
        let endpoints: Vec<Endpoint> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut closed = 0;
        for endpoint in endpoints {
            if self.disconnect(&endpoint).await {
                closed += 1;
            }
        }
        self.connections.clear();
        self.dispatcher.clear_subscriptions();
        closed
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
