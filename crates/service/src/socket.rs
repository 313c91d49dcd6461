use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use bytes::BytesMut;
use socket2::{Domain, Protocol, Type};
use tokio::{net::UdpSocket, sync::mpsc::UnboundedSender, task::JoinHandle};

use codec::{HEADER_LEN, PACKET_MAX_LEN};

use crate::{QueryId, query::Query, worker::Message};

/// Identifier space multiplexed over one socket: the RADIUS `Id` field
/// is a single octet.
pub const SLOTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(address: &SocketAddr) -> Self {
        if address.is_ipv4() { Self::V4 } else { Self::V6 }
    }

    fn domain(self) -> Domain {
        match self {
            Self::V4 => Domain::IPV4,
            Self::V6 => Domain::IPV6,
        }
    }

    fn unspecified(self) -> SocketAddr {
        match self {
            Self::V4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            Self::V6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        }
    }
}

struct Slot {
    query: Option<Query>,
    generation: u64,
}

/// A bound UDP endpoint and its identifier table.
///
/// Each slot either holds a pending query or is free; a timer event
/// carries the generation observed at bind time so a fire that lost
/// the race against a response or a rebind identifies itself as stale.
/// The receive path runs in a separate reader task that copies every
/// datagram out of its scratch buffer and forwards it to the owning
/// worker's queue.
pub(crate) struct Socket {
    token: u64,
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
    slots: Vec<Slot>,
    queries_count: usize,
    queries_index: usize,
}

impl Socket {
    /// Open a non-blocking UDP socket of the requested family, tune
    /// its buffers best-effort, and start its reader task.
    pub fn open(
        token: u64,
        family: Family,
        buffers: (Option<usize>, Option<usize>),
        queue: UnboundedSender<Message>,
    ) -> io::Result<Self> {
        let socket = socket2::Socket::new(family.domain(), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;

        if let Some(size) = buffers.0 {
            if let Err(error) = socket.set_send_buffer_size(size) {
                log::warn!("udp socket send buffer tuning failed: size={}, error={:?}", size, error);
            }
        }

        if let Some(size) = buffers.1 {
            if let Err(error) = socket.set_recv_buffer_size(size) {
                log::warn!("udp socket recv buffer tuning failed: size={}, error={:?}", size, error);
            }
        }

        socket.bind(&family.unspecified().into())?;

        let socket = Arc::new(UdpSocket::from_std(socket.into())?);
        let reader = tokio::spawn(Self::forward(token, socket.clone(), queue));

        Ok(Self {
            token,
            socket,
            reader,
            slots: (0..SLOTS).map(|_| Slot { query: None, generation: 0 }).collect(),
            queries_count: 0,
            queries_index: 0,
        })
    }

    /// Reader task: drain datagrams into the owning worker's queue.
    async fn forward(token: u64, socket: Arc<UdpSocket>, queue: UnboundedSender<Message>) {
        let mut buffer = vec![0u8; PACKET_MAX_LEN];

        loop {
            let (size, source) = match socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                // A previous send to a dead port reports here on some
                // platforms; the socket itself is fine.
                Err(error) if error.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(error) => {
                    log::warn!("udp socket receive error: {:?}", error);
                    break;
                }
            };

            log::trace!("udp socket receive: size={}, addr={:?}", size, source);

            if size < HEADER_LEN {
                continue;
            }

            let bytes = BytesMut::from(&buffer[..size]);
            if queue.send(Message::Datagram { token, source, bytes }).is_err() {
                break;
            }
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn io(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Transmit one datagram, requiring the full buffer to go out.
    pub async fn send(&self, bytes: &[u8], address: SocketAddr) -> io::Result<()> {
        transmit(&self.socket, bytes, address).await
    }

    /// Find a free slot for the requested identifier mode.
    ///
    /// Explicit identifiers address their slot directly; automatic
    /// allocation scans from the rotating cursor, wrapping once, and
    /// advances the cursor past the taken slot.
    pub fn alloc(&mut self, id: QueryId) -> Option<u8> {
        match id {
            QueryId::Fixed(index) => self.slots[index as usize].query.is_none().then_some(index),
            QueryId::Auto => {
                if self.queries_count >= SLOTS {
                    return None;
                }

                for offset in 0..SLOTS {
                    let index = (self.queries_index + offset) % SLOTS;
                    if self.slots[index].query.is_none() {
                        self.queries_index = (index + 1) % SLOTS;
                        return Some(index as u8);
                    }
                }

                None
            }
        }
    }

    /// Bind a query into a free slot, returning the new generation.
    pub fn bind(&mut self, index: u8, query: Query) -> u64 {
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.query.is_none());

        slot.query = Some(query);
        slot.generation += 1;
        self.queries_count += 1;
        slot.generation
    }

    /// Release a slot, handing its query back.
    pub fn unbind(&mut self, index: u8) -> Option<Query> {
        let slot = &mut self.slots[index as usize];
        let query = slot.query.take()?;

        slot.generation += 1;
        self.queries_count -= 1;
        Some(query)
    }

    pub fn get(&self, index: u8) -> Option<&Query> {
        self.slots[index as usize].query.as_ref()
    }

    pub fn get_mut(&mut self, index: u8) -> Option<&mut Query> {
        self.slots[index as usize].query.as_mut()
    }

    pub fn generation(&self, index: u8) -> u64 {
        self.slots[index as usize].generation
    }

    pub fn len(&self) -> usize {
        self.queries_count
    }

    pub fn is_empty(&self) -> bool {
        self.queries_count == 0
    }

    /// Take every bound query out, for teardown.
    pub fn drain(&mut self) -> Vec<Query> {
        let queries = self
            .slots
            .iter_mut()
            .filter_map(|slot| {
                slot.generation += 1;
                slot.query.take()
            })
            .collect::<Vec<_>>();

        self.queries_count = 0;
        queries
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Transmit one datagram, requiring the full buffer to go out.
pub(crate) async fn transmit(socket: &UdpSocket, bytes: &[u8], address: SocketAddr) -> io::Result<()> {
    let size = socket.send_to(bytes, address).await?;
    if size != bytes.len() {
        return Err(io::Error::new(io::ErrorKind::WriteZero, "partial datagram write"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::query::test_query as query;

    fn open() -> (Socket, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Socket::open(0, Family::V4, (None, None), tx).unwrap(), rx)
    }

    #[tokio::test]
    async fn automatic_allocation_covers_the_identifier_space() {
        let (mut socket, _queue) = open();

        for expected in 0..SLOTS {
            let index = socket.alloc(QueryId::Auto).unwrap();
            assert_eq!(index as usize, expected);
            socket.bind(index, query());
        }

        assert_eq!(socket.len(), SLOTS);
        assert!(socket.alloc(QueryId::Auto).is_none());
        assert!(socket.alloc(QueryId::Fixed(17)).is_none());
    }

    #[tokio::test]
    async fn the_cursor_wraps_over_freed_slots() {
        let (mut socket, _queue) = open();

        for _ in 0..SLOTS {
            let index = socket.alloc(QueryId::Auto).unwrap();
            socket.bind(index, query());
        }

        socket.unbind(3).unwrap();
        assert_eq!(socket.len(), SLOTS - 1);

        // the scan restarts at the wrapped cursor and lands on the
        // only free slot.
        assert_eq!(socket.alloc(QueryId::Auto), Some(3));
    }

    #[tokio::test]
    async fn explicit_identifiers_address_their_slot() {
        let (mut socket, _queue) = open();

        let index = socket.alloc(QueryId::Fixed(42)).unwrap();
        socket.bind(index, query());

        assert!(socket.alloc(QueryId::Fixed(42)).is_none());
        assert_eq!(socket.alloc(QueryId::Fixed(43)), Some(43));

        // automatic allocation steps around the taken slot.
        for _ in 0..SLOTS - 1 {
            let index = socket.alloc(QueryId::Auto).unwrap();
            assert_ne!(index, 42);
            socket.bind(index, query());
        }

        assert_eq!(socket.len(), SLOTS);
    }

    #[tokio::test]
    async fn generations_move_on_every_bind_and_unbind() {
        let (mut socket, _queue) = open();

        let first = socket.bind(9, query());
        socket.unbind(9).unwrap();
        let second = socket.bind(9, query());

        assert!(second > first);
        assert_eq!(socket.generation(9), second);
    }
}
