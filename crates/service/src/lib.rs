//! ## Asynchronous RADIUS query scheduler
//!
//! [RFC2865]: https://tools.ietf.org/html/rfc2865
//!
//! The client engine behind the codec: a multi-server, multi-socket
//! UDP request/response scheduler.  Each worker owns per-family socket
//! pools whose sockets multiplex up to 256 outstanding queries through
//! the one-octet RADIUS identifier; a per-query state machine drives
//! retransmission with randomized backoff per [RFC2865] Section 9 and
//! fails over across the configured server table; replies are matched
//! by identifier, source address and Response Authenticator before the
//! originator sees them.
//!
//! Submission and completion cross task boundaries over channels: the
//! worker acknowledges the slot allocation synchronously, and the
//! returned [`QueryHandle`] resolves on the originating task once an
//! authenticated response arrives or every server budget is spent.

pub mod schedule;
pub mod servers;
pub mod stats;

mod pool;
mod query;
mod socket;
mod worker;

pub use self::{
    query::Response,
    servers::{ServerOptions, ServerTable},
    worker::WorkerStatus,
};

use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::{
    sync::{mpsc::UnboundedSender, oneshot},
    task::JoinHandle,
};

use codec::packet::Packet;

use crate::{
    stats::{Number, Statistics},
    worker::{Message, Submit, Worker},
};

#[derive(Debug)]
pub enum Error {
    /// Malformed request buffer, oversized secret, zero-sized pool.
    InvalidInput,
    /// The server table is full.
    TooManyServers,
    /// No enabled server to send to.
    NoServer,
    /// Identifier capacity exhausted for the address family; the
    /// caller queues and retries.
    Busy,
    /// Every server's retry budget was spent without an answer.
    TimedOut,
    /// The client was shut down while the query was in flight.
    Interrupted,
    /// The handle observed its own cancellation.
    Cancelled,
    Codec(codec::Error),
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<codec::Error> for Error {
    fn from(value: codec::Error) -> Self {
        Self::Codec(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// The identifier mode of a submission: let the scheduler pick a free
/// identifier, or insist on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryId {
    Auto,
    Fixed(u8),
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Worker tasks; each owns its pools outright.
    pub workers: usize,
    /// Server table capacity.
    pub servers_max: usize,
    /// Per-worker, per-family pool floor; drained sockets above it are
    /// closed.
    pub sockets_min: usize,
    /// Per-worker, per-family pool ceiling; with 256 identifiers per
    /// socket this bounds outstanding queries.
    pub sockets_max: usize,
    /// Best-effort SO_SNDBUF.
    pub send_buffer_size: Option<usize>,
    /// Best-effort SO_RCVBUF.
    pub recv_buffer_size: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            servers_max: 32,
            sockets_min: 1,
            sockets_max: 4,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

struct WorkerHandle {
    queue: UnboundedSender<Message>,
    join: Option<JoinHandle<()>>,
}

/// The RADIUS client.
///
/// Create it inside a tokio runtime; workers are spawned eagerly,
/// sockets lazily.  Submissions are spread over the workers round-
/// robin; a query lives on one worker for its whole lifetime and its
/// completion travels back to the task that submitted it.
pub struct Client {
    servers: Arc<ServerTable>,
    stats: Arc<Statistics>,
    workers: Vec<WorkerHandle>,
    cursor: AtomicUsize,
}

impl Client {
    pub fn new(options: ClientOptions) -> Result<Self, Error> {
        if options.workers == 0
            || options.sockets_max == 0
            || options.sockets_min > options.sockets_max
        {
            return Err(Error::InvalidInput);
        }

        let servers = Arc::new(ServerTable::new(options.servers_max));
        let stats = Arc::new(Statistics::default());

        let workers = (0..options.workers)
            .map(|index| {
                let (queue, join) = Worker::spawn(index, &options, servers.clone(), stats.clone());
                WorkerHandle {
                    queue,
                    join: Some(join),
                }
            })
            .collect();

        Ok(Self {
            servers,
            stats,
            workers,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Append a server to the table; position is priority.
    pub fn add_server(&self, options: ServerOptions) -> Result<(), Error> {
        self.servers.add(options)
    }

    /// Remove a server by address.  In-flight queries keep their
    /// resolved entry; the next failover walks the updated table.
    pub fn remove_server(&self, address: &SocketAddr) -> bool {
        self.servers.remove(address)
    }

    pub fn servers(&self) -> &ServerTable {
        &self.servers
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// Submit a request.
    ///
    /// `request` is the encoded, unsigned packet; the scheduler signs
    /// it per server and rewrites the identifier octet when `Auto`
    /// allocation picks the slot.  Errors at submission - no enabled
    /// server, identifier capacity, a first send that failed on every
    /// server - surface here; everything later arrives through the
    /// returned handle.
    pub async fn query(&self, request: Bytes, id: QueryId) -> Result<QueryHandle, Error> {
        Packet::check(&request).map_err(|_| Error::InvalidInput)?;

        let worker =
            &self.workers[self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len()];

        let cancelled = Arc::new(AtomicBool::new(false));
        let (done, receiver) = oneshot::channel();
        let (ack, acknowledged) = oneshot::channel();

        worker
            .queue
            .send(Message::Query(Submit {
                request,
                id,
                cancelled: cancelled.clone(),
                done,
                ack,
            }))
            .map_err(|_| Error::Interrupted)?;

        let identifier = acknowledged.await.map_err(|_| Error::Interrupted)??;
        self.stats.queries.add(1);

        Ok(QueryHandle {
            identifier,
            cancelled,
            done: receiver,
        })
    }

    /// Snapshot every worker's pool sizes and outstanding queries.
    pub async fn status(&self) -> Vec<WorkerStatus> {
        let mut out = Vec::with_capacity(self.workers.len());

        for worker in &self.workers {
            let (reply, received) = oneshot::channel();
            if worker.queue.send(Message::Status(reply)).is_ok() {
                if let Ok(status) = received.await {
                    out.push(status);
                }
            }
        }

        out
    }

    /// Tear the client down.
    ///
    /// Every worker frees its sockets on its own task and completes
    /// each bound query with `Interrupted` first; no query outlives
    /// the client.
    pub async fn shutdown(mut self) {
        for worker in &mut self.workers {
            let _ = worker.queue.send(Message::Shutdown);
        }

        for worker in &mut self.workers {
            if let Some(join) = worker.join.take() {
                let _ = join.await;
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // best-effort when the caller skipped `shutdown`; the workers
        // wind down detached.
        for worker in &self.workers {
            let _ = worker.queue.send(Message::Shutdown);
        }
    }
}

/// The originator's side of one in-flight query.
///
/// Awaiting it yields the authenticated response or the final error;
/// `cancel` latches a flag the worker observes on the query's next
/// state transition, after which the query is destroyed without ever
/// completing.  Cancelling is idempotent and non-blocking.
#[derive(Debug)]
pub struct QueryHandle {
    identifier: u8,
    cancelled: Arc<AtomicBool>,
    done: oneshot::Receiver<Result<Response, Error>>,
}

impl QueryHandle {
    /// The identifier the query went out with.
    pub fn identifier(&self) -> u8 {
        self.identifier
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Future for QueryHandle {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match Pin::new(&mut this.done).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(
                if this.cancelled.load(Ordering::Acquire) {
                    Error::Cancelled
                } else {
                    Error::Interrupted
                },
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}
