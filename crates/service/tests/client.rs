use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use tokio::{net::UdpSocket, sync::mpsc, time::sleep};

use codec::{
    Attributes,
    attributes::{MessageAuthenticator, ReplyMessage, UserName, UserPassword},
    crypto::sign_response,
    packet::{Code, Packet, PacketEncoder},
};
use radius_client_service::{
    Client, ClientOptions, Error, QueryId, ServerOptions,
    schedule::RetransmitPolicy,
    stats::Number,
};

fn access_request(username: &str) -> Bytes {
    let mut bytes = BytesMut::with_capacity(1024);
    let mut encoder = PacketEncoder::new(Code::AccessRequest, 0, &mut bytes);
    encoder.append::<UserName>(username).unwrap();
    encoder.append::<UserPassword>(b"arctangent").unwrap();
    encoder.append::<MessageAuthenticator>(&[0u8; 16]).unwrap();
    encoder.flush().unwrap();
    bytes.freeze()
}

fn accept_reply(request: &[u8], secret: &[u8]) -> BytesMut {
    let authenticator: [u8; 16] = request[4..20].try_into().unwrap();

    let mut reply = BytesMut::with_capacity(512);
    let mut encoder = PacketEncoder::new(Code::AccessAccept, request[1], &mut reply);
    encoder.append::<ReplyMessage>("welcome").unwrap();
    encoder.flush().unwrap();
    sign_response(&mut reply, &authenticator, secret).unwrap();
    reply
}

fn policy(
    init: u64,
    max: Option<u64>,
    duration: Option<u64>,
    count: Option<u32>,
) -> RetransmitPolicy {
    RetransmitPolicy {
        time_init: init,
        time_max: max,
        duration_max: duration,
        count_max: count,
    }
}

fn server(address: SocketAddr, secret: &str, retransmit: RetransmitPolicy) -> ServerOptions {
    ServerOptions {
        address,
        secret: secret.to_string(),
        retransmit,
        enabled: true,
    }
}

async fn bind_mock() -> (Arc<UdpSocket>, SocketAddr) {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let address = socket.local_addr().unwrap();
    (socket, address)
}

fn client(options: ClientOptions) -> Client {
    Client::new(options).unwrap()
}

#[tokio::test]
async fn the_happy_path_completes_on_the_originator() -> Result<()> {
    let (socket, address) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        let (size, source) = socket.recv_from(&mut buffer).await.unwrap();
        let reply = accept_reply(&buffer[..size], b"abc");
        socket.send_to(&reply, source).await.unwrap();
    });

    let client = client(ClientOptions::default());
    client.add_server(server(address, "abc", RetransmitPolicy::default()))?;

    let handle = client.query(access_request("panda"), QueryId::Auto).await?;
    let response = handle.await?;

    assert_eq!(response.server, address);

    let mut attributes = Attributes::default();
    let packet = Packet::decode(&response.packet, &mut attributes)?;
    assert_eq!(packet.code(), Code::AccessAccept);
    assert_eq!(packet.get::<ReplyMessage>(), Some("welcome"));

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_lost_datagram_is_retransmitted_once() -> Result<()> {
    let (socket, address) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];

        // lose the first transmission, answer the second.
        let _ = socket.recv_from(&mut buffer).await.unwrap();
        let (size, source) = socket.recv_from(&mut buffer).await.unwrap();
        let reply = accept_reply(&buffer[..size], b"abc");
        socket.send_to(&reply, source).await.unwrap();
    });

    let client = client(ClientOptions::default());
    client.add_server(server(address, "abc", policy(100, Some(1000), None, None)))?;

    let handle = client.query(access_request("panda"), QueryId::Auto).await?;
    let response = handle.await?;

    assert_eq!(response.retransmits, 1);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_silent_server_times_out_after_the_try_ceiling() -> Result<()> {
    let (socket, address) = bind_mock().await;
    let received = Arc::new(AtomicUsize::new(0));

    let counter = received.clone();
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        loop {
            let _ = socket.recv_from(&mut buffer).await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let client = client(ClientOptions::default());
    client.add_server(server(address, "abc", policy(50, Some(100), None, Some(3))))?;

    let handle = client.query(access_request("panda"), QueryId::Auto).await?;
    let error = handle.await.unwrap_err();

    assert!(matches!(error, Error::TimedOut));

    // three transmits total: the original and two retransmissions.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(received.load(Ordering::SeqCst), 3);
    assert_eq!(client.stats().timeouts.get(), 1);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_dead_server_fails_over_to_the_next_one() -> Result<()> {
    let (silent, first) = bind_mock().await;
    let received = Arc::new(AtomicUsize::new(0));

    let counter = received.clone();
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        loop {
            let _ = silent.recv_from(&mut buffer).await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let (socket, second) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        let (size, source) = socket.recv_from(&mut buffer).await.unwrap();
        let reply = accept_reply(&buffer[..size], b"def");
        socket.send_to(&reply, source).await.unwrap();
    });

    let client = client(ClientOptions::default());
    client.add_server(server(first, "abc", policy(50, Some(100), None, Some(2))))?;
    client.add_server(server(second, "def", RetransmitPolicy::default()))?;

    let handle = client.query(access_request("panda"), QueryId::Auto).await?;
    let response = handle.await?;

    // the first server burned its whole budget, the second answered.
    assert_eq!(response.server, second);
    assert_eq!(received.load(Ordering::SeqCst), 2);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failover_walks_the_table_in_order_and_never_backtracks() -> Result<()> {
    let (order_tx, mut order_rx) = mpsc::unbounded_channel();

    let mut addresses = Vec::new();
    for index in 0..3usize {
        let (socket, address) = bind_mock().await;
        addresses.push(address);

        let order = order_tx.clone();
        tokio::spawn(async move {
            let mut buffer = vec![0u8; 4096];
            loop {
                let _ = socket.recv_from(&mut buffer).await.unwrap();
                let _ = order.send(index);
            }
        });
    }

    let client = client(ClientOptions::default());
    for address in &addresses {
        client.add_server(server(*address, "abc", policy(50, None, None, Some(1))))?;
    }

    let handle = client.query(access_request("panda"), QueryId::Auto).await?;
    let error = handle.await.unwrap_err();
    assert!(matches!(error, Error::TimedOut));

    // one transmit per server, strictly in table order.
    sleep(Duration::from_millis(50)).await;
    let mut visits = Vec::new();
    while let Ok(index) = order_rx.try_recv() {
        visits.push(index);
    }
    assert_eq!(visits, vec![0, 1, 2]);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_spoofed_reply_is_dropped_and_the_genuine_one_accepted() -> Result<()> {
    let (socket, address) = bind_mock().await;
    let (spoofer, _) = bind_mock().await;

    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        let (size, source) = socket.recv_from(&mut buffer).await.unwrap();

        // a correctly signed reply from the wrong source address goes
        // out first.
        let reply = accept_reply(&buffer[..size], b"abc");
        spoofer.send_to(&reply, source).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        socket.send_to(&reply, source).await.unwrap();
    });

    let client = client(ClientOptions::default());
    client.add_server(server(address, "abc", RetransmitPolicy::default()))?;

    let handle = client.query(access_request("panda"), QueryId::Auto).await?;
    let response = handle.await?;

    assert_eq!(response.server, address);
    assert!(client.stats().dropped.get() >= 1);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancellation_suppresses_the_callback_and_frees_the_slot() -> Result<()> {
    let (socket, address) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        loop {
            let (size, source) = socket.recv_from(&mut buffer).await.unwrap();
            let reply = accept_reply(&buffer[..size], b"abc");

            let socket = socket.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                let _ = socket.send_to(&reply, source).await;
            });
        }
    });

    let client = client(ClientOptions::default());
    client.add_server(server(address, "abc", RetransmitPolicy::default()))?;

    let handle = client.query(access_request("panda"), QueryId::Auto).await?;
    assert_eq!(handle.identifier(), 0);

    sleep(Duration::from_millis(10)).await;
    handle.cancel();
    handle.cancel();

    let error = handle.await.unwrap_err();
    assert!(matches!(error, Error::Cancelled));

    // the late reply releases the slot; the same identifier is
    // allocatable again afterwards.
    sleep(Duration::from_millis(150)).await;

    let handle = client.query(access_request("bamboo"), QueryId::Fixed(0)).await?;
    let response = handle.await?;
    assert_eq!(response.server, address);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn capacity_exhaustion_surfaces_as_busy() -> Result<()> {
    let (socket, address) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        loop {
            let _ = socket.recv_from(&mut buffer).await.unwrap();
        }
    });

    let client = client(ClientOptions {
        workers: 1,
        sockets_min: 1,
        sockets_max: 1,
        ..Default::default()
    });

    // no retry budget so the slots stay bound for the whole test.
    client.add_server(server(address, "abc", policy(60000, None, None, None)))?;

    let request = access_request("panda");
    let mut identifiers = Vec::with_capacity(256);
    for _ in 0..256 {
        let handle = client.query(request.clone(), QueryId::Auto).await?;
        identifiers.push(handle.identifier());
    }

    identifiers.sort_unstable();
    identifiers.dedup();
    assert_eq!(identifiers.len(), 256);

    let error = client.query(request.clone(), QueryId::Auto).await.unwrap_err();
    assert!(matches!(error, Error::Busy));

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn the_pool_grows_past_one_socket_under_load() -> Result<()> {
    let (socket, address) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        loop {
            let _ = socket.recv_from(&mut buffer).await.unwrap();
        }
    });

    let client = client(ClientOptions {
        workers: 1,
        sockets_min: 1,
        sockets_max: 2,
        ..Default::default()
    });

    client.add_server(server(address, "abc", policy(60000, None, None, None)))?;

    let request = access_request("panda");
    for _ in 0..257 {
        client.query(request.clone(), QueryId::Auto).await?;
    }

    let status = client.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].sockets_v4, 2);
    assert_eq!(status[0].queries, 257);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn the_pool_shrinks_back_to_its_floor_once_drained() -> Result<()> {
    let (socket, address) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        let mut pending = std::collections::HashMap::new();

        // hold every reply until the full burst has arrived, so the
        // pool has to grow to its second socket; retransmissions of a
        // query it has already seen do not count towards the barrier.
        while pending.len() < 257 {
            let (size, source) = socket.recv_from(&mut buffer).await.unwrap();
            pending.insert((source, buffer[1]), (accept_reply(&buffer[..size], b"abc"), source));
        }

        for (reply, source) in pending.into_values() {
            socket.send_to(&reply, source).await.unwrap();
        }
    });

    let client = client(ClientOptions {
        workers: 1,
        sockets_min: 1,
        sockets_max: 2,
        ..Default::default()
    });

    client.add_server(server(address, "abc", policy(60000, None, None, None)))?;

    let request = access_request("panda");
    let mut handles = Vec::with_capacity(257);
    for _ in 0..257 {
        handles.push(client.query(request.clone(), QueryId::Auto).await?);
    }

    for handle in handles {
        handle.await?;
    }

    let status = client.status().await;
    assert_eq!(status[0].queries, 0);
    assert_eq!(status[0].sockets_v4, 1);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_fixed_identifier_collision_is_busy_when_the_pool_cannot_grow() -> Result<()> {
    let (socket, address) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        loop {
            let _ = socket.recv_from(&mut buffer).await.unwrap();
        }
    });

    let client = client(ClientOptions {
        workers: 1,
        sockets_min: 1,
        sockets_max: 1,
        ..Default::default()
    });

    client.add_server(server(address, "abc", policy(60000, None, None, None)))?;

    let request = access_request("panda");
    let handle = client.query(request.clone(), QueryId::Fixed(5)).await?;
    assert_eq!(handle.identifier(), 5);

    let error = client.query(request.clone(), QueryId::Fixed(5)).await.unwrap_err();
    assert!(matches!(error, Error::Busy));

    // a different identifier still fits on the same socket.
    client.query(request.clone(), QueryId::Fixed(6)).await?;

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn submission_errors_are_synchronous() -> Result<()> {
    let client = client(ClientOptions::default());

    // nothing configured.
    let error = client
        .query(access_request("panda"), QueryId::Auto)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::NoServer));

    // malformed request buffer.
    client.add_server(server("127.0.0.1:1812".parse()?, "abc", RetransmitPolicy::default()))?;
    let error = client
        .query(Bytes::from_static(&[1, 0, 0]), QueryId::Auto)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::InvalidInput));

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_interrupts_in_flight_queries() -> Result<()> {
    let (socket, address) = bind_mock().await;
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        loop {
            let _ = socket.recv_from(&mut buffer).await.unwrap();
        }
    });

    let client = client(ClientOptions::default());
    client.add_server(server(address, "abc", policy(60000, None, None, None)))?;

    let handle = client.query(access_request("panda"), QueryId::Auto).await?;
    client.shutdown().await;

    let error = handle.await.unwrap_err();
    assert!(matches!(error, Error::Interrupted));
    Ok(())
}
