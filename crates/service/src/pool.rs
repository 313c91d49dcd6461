use tokio::sync::mpsc::UnboundedSender;

use crate::{
    Error, QueryId,
    query::Query,
    socket::{Family, Socket},
    worker::Message,
};

/// Per-worker, per-family socket pool.
///
/// Grows one socket at a time when every existing socket is saturated
/// for the requested identifier mode, up to `max`; shrinks tail-only
/// when the tail socket drains, down to `min`, which keeps the indices
/// of the surviving sockets stable.
pub(crate) struct Pool {
    family: Family,
    sockets: Vec<Socket>,
    min: usize,
    max: usize,
}

impl Pool {
    pub fn new(family: Family, min: usize, max: usize) -> Self {
        Self {
            family,
            sockets: Vec::with_capacity(max.min(16)),
            min,
            max,
        }
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn queries(&self) -> usize {
        self.sockets.iter().map(|socket| socket.len()).sum()
    }

    pub fn find(&mut self, token: u64) -> Option<&mut Socket> {
        self.sockets.iter_mut().find(|socket| socket.token() == token)
    }

    /// Reserve a slot, growing the pool when every socket is saturated.
    ///
    /// Nothing is bound yet; the caller binds once the packet is signed
    /// and on the wire.  `Busy` reports the hard capacity limit, for
    /// the caller to surface as backpressure.
    pub fn allocate(
        &mut self,
        id: QueryId,
        buffers: (Option<usize>, Option<usize>),
        queue: &UnboundedSender<Message>,
        tokens: &mut u64,
    ) -> Result<(u64, u8), Error> {
        for socket in self.sockets.iter_mut() {
            if let Some(slot) = socket.alloc(id) {
                return Ok((socket.token(), slot));
            }
        }

        if self.sockets.len() >= self.max {
            return Err(Error::Busy);
        }

        let token = *tokens;
        *tokens += 1;

        let mut socket = Socket::open(token, self.family, buffers, queue.clone())?;
        let Some(slot) = socket.alloc(id) else {
            // a fresh socket has every slot free.
            return Err(Error::Busy);
        };

        self.sockets.push(socket);
        log::debug!(
            "socket pool grown: family={:?}, size={}",
            self.family,
            self.sockets.len()
        );

        Ok((token, slot))
    }

    /// Tail-only shrink: close drained sockets from the back while the
    /// pool stays above its floor.
    pub fn shrink(&mut self) {
        while self.sockets.len() > self.min {
            match self.sockets.last() {
                Some(socket) if socket.is_empty() => {
                    self.sockets.pop();
                    log::debug!(
                        "socket pool shrunk: family={:?}, size={}",
                        self.family,
                        self.sockets.len()
                    );
                }
                _ => break,
            }
        }
    }

    /// Take every bound query out of every socket and drop the
    /// sockets, for teardown.
    pub fn drain(&mut self) -> Vec<Query> {
        self.sockets
            .drain(..)
            .flat_map(|mut socket| socket.drain())
            .collect()
    }
}
