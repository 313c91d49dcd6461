use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{Error, schedule::Schedule, servers::Server};

/// An authenticated server reply, handed back to the originator.
#[derive(Debug)]
pub struct Response {
    /// The verified reply datagram.
    pub packet: Bytes,
    /// The server that answered.
    pub server: SocketAddr,
    /// Retransmissions it took to get the answer.
    pub retransmits: u32,
}

/// One in-flight query, owned by the slot it is bound to.
///
/// `request` is the caller's unsigned packet and survives failover;
/// `wire` is the image signed against the current server and is what
/// retransmissions resend verbatim.
pub(crate) struct Query {
    pub request: Bytes,
    pub wire: BytesMut,
    pub server_index: usize,
    pub server: Arc<Server>,
    pub schedule: Schedule,
    pub identifier: u8,
    pub fixed: bool,
    pub cancelled: Arc<AtomicBool>,
    pub done: Option<oneshot::Sender<Result<Response, Error>>>,
    pub timer: Option<JoinHandle<()>>,
}

impl Query {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Deliver the final verdict to the originator and consume the
    /// query.  A cancelled query is destroyed silently; a gone
    /// originator only costs a log line, the unlink already happened.
    pub fn complete(mut self, result: Result<Response, Error>) {
        self.disarm();

        if self.is_cancelled() {
            return;
        }

        if let Some(done) = self.done.take() {
            if done.send(result).is_err() {
                log::debug!("query completion dropped by the originator");
            }
        }
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
pub(crate) fn test_query() -> Query {
    let policy = crate::schedule::RetransmitPolicy::default();
    let (done, _) = oneshot::channel();

    Query {
        request: Default::default(),
        wire: Default::default(),
        server_index: 0,
        server: Arc::new(Server {
            address: "127.0.0.1:1812".parse().unwrap(),
            secret: "secret".to_string(),
            retransmit: policy,
            enabled: true,
        }),
        schedule: Schedule::new(policy),
        identifier: 0,
        fixed: false,
        cancelled: Arc::new(AtomicBool::new(false)),
        done: Some(done),
        timer: None,
    }
}
