use std::{
    net::SocketAddr,
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};

use codec::{crypto, packet::Packet};

use crate::{
    ClientOptions, Error, QueryId,
    pool::Pool,
    query::{Query, Response},
    schedule::Schedule,
    servers::ServerTable,
    socket::{Family, transmit},
    stats::{Number, Statistics},
};

pub(crate) enum Message {
    Query(Submit),
    Datagram {
        token: u64,
        source: SocketAddr,
        bytes: BytesMut,
    },
    Expired {
        token: u64,
        slot: u8,
        generation: u64,
    },
    Status(oneshot::Sender<WorkerStatus>),
    Shutdown,
}

pub(crate) struct Submit {
    pub request: Bytes,
    pub id: QueryId,
    pub cancelled: Arc<AtomicBool>,
    pub done: oneshot::Sender<Result<Response, Error>>,
    pub ack: oneshot::Sender<Result<u8, Error>>,
}

/// Pool sizes and outstanding queries of one worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStatus {
    pub index: usize,
    pub sockets_v4: usize,
    pub sockets_v6: usize,
    pub queries: usize,
}

/// One scheduler worker.
///
/// Owns its socket pools, their slot tables and the retransmit timers
/// of every query bound to them; nothing here is shared, every event
/// funnels through the worker's queue and handlers run to completion.
/// Submissions, received datagrams, timer expirations and shutdown are
/// therefore serialized, which is what makes the slot bookkeeping
/// lock-free.
pub(crate) struct Worker {
    index: usize,
    servers: Arc<ServerTable>,
    stats: Arc<Statistics>,
    buffers: (Option<usize>, Option<usize>),
    queue: UnboundedSender<Message>,
    tokens: u64,
    v4: Pool,
    v6: Pool,
}

impl Worker {
    pub fn spawn(
        index: usize,
        options: &ClientOptions,
        servers: Arc<ServerTable>,
        stats: Arc<Statistics>,
    ) -> (UnboundedSender<Message>, JoinHandle<()>) {
        let (queue, inbox) = mpsc::unbounded_channel();

        let worker = Worker {
            index,
            servers,
            stats,
            buffers: (options.send_buffer_size, options.recv_buffer_size),
            queue: queue.clone(),
            tokens: 0,
            v4: Pool::new(Family::V4, options.sockets_min, options.sockets_max),
            v6: Pool::new(Family::V6, options.sockets_min, options.sockets_max),
        };

        (queue, tokio::spawn(worker.run(inbox)))
    }

    async fn run(mut self, mut inbox: UnboundedReceiver<Message>) {
        while let Some(message) = inbox.recv().await {
            match message {
                Message::Query(submit) => self.on_query(submit).await,
                Message::Datagram { token, source, bytes } => {
                    self.on_datagram(token, source, bytes)
                }
                Message::Expired { token, slot, generation } => {
                    self.on_expired(token, slot, generation).await
                }
                Message::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                Message::Shutdown => break,
            }
        }

        self.close();
    }

    async fn on_query(&mut self, submit: Submit) {
        let Some((server_index, server)) = self.servers.next_enabled(0) else {
            let _ = submit.ack.send(Err(Error::NoServer));
            return;
        };

        let schedule = Schedule::new(server.retransmit);
        let query = Query {
            request: submit.request,
            wire: BytesMut::new(),
            server_index,
            server,
            schedule,
            identifier: 0,
            fixed: matches!(submit.id, QueryId::Fixed(_)),
            cancelled: submit.cancelled,
            done: Some(submit.done),
            timer: None,
        };

        match self.send_new(query, submit.id, 0, None).await {
            Ok(identifier) => {
                let _ = submit.ack.send(Ok(identifier));
            }
            Err((query, error)) => {
                drop(query);
                let _ = submit.ack.send(Err(error));
            }
        }
    }

    /// Bind the query to a slot in the matching family pool, sign it
    /// against the next enabled server at or after `from` and put it
    /// on the wire, advancing to the following server while the
    /// attempt fails on transport.  Capacity exhaustion aborts the
    /// walk so the caller sees the backpressure undiluted.
    async fn send_new(
        &mut self,
        mut query: Query,
        id: QueryId,
        from: usize,
        mut last: Option<Error>,
    ) -> Result<u8, (Query, Error)> {
        let queue = self.queue.clone();
        let mut index = from;

        loop {
            let Some((server_index, server)) = self.servers.next_enabled(index) else {
                let error = last.take().unwrap_or(Error::NoServer);
                return Err((query, error));
            };

            let family = Family::of(&server.address);
            let pool = match family {
                Family::V4 => &mut self.v4,
                Family::V6 => &mut self.v6,
            };

            let (token, slot) = match pool.allocate(id, self.buffers, &queue, &mut self.tokens) {
                Ok(reserved) => reserved,
                Err(Error::Busy) => return Err((query, Error::Busy)),
                Err(error) => {
                    log::warn!("udp socket open failed: family={:?}, error={:?}", family, error);
                    last = Some(error);
                    index = server_index + 1;
                    continue;
                }
            };

            query.identifier = slot;
            query.server_index = server_index;
            query.server = server.clone();

            if let Err(error) =
                crypto::sign_request(&query.request, &mut query.wire, slot, server.secret.as_bytes())
            {
                return Err((query, Error::Codec(error)));
            }

            let Some(socket) = pool.find(token) else {
                last = Some(Error::Interrupted);
                index = server_index + 1;
                continue;
            };

            match socket.send(&query.wire, server.address).await {
                Ok(()) => {
                    query.schedule = Schedule::new(server.retransmit);
                    let interval = query.schedule.first();

                    let generation = socket.bind(slot, query);
                    let timer = arm(&queue, token, slot, generation, interval);
                    if let Some(bound) = socket.get_mut(slot) {
                        bound.timer = Some(timer);
                    }

                    self.stats.transmits.add(1);
                    log::trace!(
                        "query sent: worker={}, server={:?}, id={}, interval={}ms",
                        self.index,
                        server.address,
                        slot,
                        interval
                    );

                    return Ok(slot);
                }
                Err(error) => {
                    log::warn!("udp socket send error: {:?}", error);
                    last = Some(Error::Io(error));
                    index = server_index + 1;
                }
            }
        }
    }

    /// Advance the query past the server it has given up on.
    async fn failover(&mut self, query: Query, last: Option<Error>) {
        let from = query.server_index + 1;
        let id = if query.fixed {
            QueryId::Fixed(query.identifier)
        } else {
            QueryId::Auto
        };

        match self.send_new(query, id, from, last).await {
            Ok(identifier) => {
                log::debug!("query failed over: worker={}, id={}", self.index, identifier);
            }
            Err((query, error)) => {
                if matches!(error, Error::TimedOut) {
                    self.stats.timeouts.add(1);
                }

                query.complete(Err(error));
            }
        }

        self.shrink();
    }

    fn on_datagram(&mut self, token: u64, source: SocketAddr, bytes: BytesMut) {
        if Packet::check(&bytes).is_err() {
            self.stats.dropped.add(1);
            log::trace!("malformed datagram dropped: addr={:?}", source);
            return;
        }

        let identifier = bytes[1];

        let socket = match self.v4.find(token) {
            Some(socket) => Some(socket),
            None => self.v6.find(token),
        };

        let Some(socket) = socket else {
            log::trace!("datagram for a closed socket dropped: addr={:?}", source);
            return;
        };

        let Some(query) = socket.get(identifier) else {
            self.stats.dropped.add(1);
            log::trace!(
                "datagram for a free slot dropped: id={}, addr={:?}",
                identifier,
                source
            );
            return;
        };

        if query.is_cancelled() {
            drop(socket.unbind(identifier));
            self.shrink();
            log::trace!("cancelled query unlinked: id={}", identifier);
            return;
        }

        if query.server.address != source {
            self.stats.dropped.add(1);
            log::warn!(
                "datagram source mismatch dropped: id={}, addr={:?}",
                identifier,
                source
            );
            return;
        }

        if !crypto::verify_response(&query.wire, &bytes, query.server.secret.as_bytes()) {
            self.stats.dropped.add(1);
            log::warn!(
                "response authenticator mismatch dropped: id={}, addr={:?}",
                identifier,
                source
            );
            return;
        }

        let Some(query) = socket.unbind(identifier) else {
            return;
        };

        let response = Response {
            packet: bytes.freeze(),
            server: source,
            retransmits: query.schedule.count(),
        };

        self.shrink();
        query.complete(Ok(response));
        self.stats.responses.add(1);
        log::trace!("query completed: id={}, addr={:?}", identifier, source);
    }

    async fn on_expired(&mut self, token: u64, slot: u8, generation: u64) {
        let queue = self.queue.clone();

        let socket = match self.v4.find(token) {
            Some(socket) => Some(socket),
            None => self.v6.find(token),
        };

        let Some(socket) = socket else {
            return;
        };

        // a fire that lost the race against a response or a rebind.
        if socket.generation(slot) != generation {
            return;
        }

        let io = socket.io();
        let Some(mut query) = socket.unbind(slot) else {
            return;
        };

        if query.is_cancelled() {
            drop(query);
            self.shrink();
            log::trace!("cancelled query unlinked: id={}", slot);
            return;
        }

        match query.schedule.advance() {
            Some(interval) => {
                match transmit(&io, &query.wire, query.server.address).await {
                    Ok(()) => {
                        let address = query.server.address;

                        let generation = socket.bind(slot, query);
                        let timer = arm(&queue, token, slot, generation, interval);
                        if let Some(bound) = socket.get_mut(slot) {
                            bound.timer = Some(timer);
                        }

                        self.stats.transmits.add(1);
                        self.stats.retransmits.add(1);
                        log::trace!(
                            "query retransmitted: id={}, addr={:?}, interval={}ms",
                            slot,
                            address,
                            interval
                        );
                    }
                    Err(error) => {
                        log::warn!("udp socket send error: {:?}", error);
                        self.failover(query, Some(Error::Io(error))).await;
                    }
                }
            }
            None => {
                log::trace!(
                    "server budget exhausted: id={}, addr={:?}, tries={}",
                    slot,
                    query.server.address,
                    query.schedule.count()
                );

                self.failover(query, Some(Error::TimedOut)).await;
            }
        }
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            index: self.index,
            sockets_v4: self.v4.len(),
            sockets_v6: self.v6.len(),
            queries: self.v4.queries() + self.v6.queries(),
        }
    }

    fn shrink(&mut self) {
        self.v4.shrink();
        self.v6.shrink();
    }

    /// Teardown on the worker's own task: every bound query completes
    /// with `Interrupted` before its socket closes.
    fn close(&mut self) {
        for query in self.v4.drain().into_iter().chain(self.v6.drain()) {
            query.complete(Err(Error::Interrupted));
        }

        log::info!("radius client worker closed: index={}", self.index);
    }
}

/// Arm one retransmit timer; the expiry posts back into the worker's
/// queue and is validated against the slot generation on arrival.
fn arm(
    queue: &UnboundedSender<Message>,
    token: u64,
    slot: u8,
    generation: u64,
    interval: u64,
) -> JoinHandle<()> {
    let queue = queue.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(interval)).await;
        let _ = queue.send(Message::Expired { token, slot, generation });
    })
}
