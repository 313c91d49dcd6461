pub mod config;

use anyhow::Result;

use service::{Client, ClientOptions, ServerOptions};

use self::config::Config;

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "radius-client.",
    env!("CARGO_PKG_VERSION")
);

/// Build a running client from the configuration.
///
/// The binary is a thin shell around this so integration tests can
/// stand the whole client up in-process.
pub fn startup(config: &Config) -> Result<Client> {
    let client = Client::new(ClientOptions {
        workers: config.workers,
        servers_max: config.servers_max,
        sockets_min: config.pool.sockets_min,
        sockets_max: config.pool.sockets_max,
        send_buffer_size: config.socket.send_buffer_size,
        recv_buffer_size: config.socket.recv_buffer_size,
    })?;

    for server in &config.servers {
        client.add_server(ServerOptions {
            address: server.address,
            secret: server.secret.clone(),
            retransmit: server.retransmit(),
            enabled: server.enabled,
        })?;
    }

    log::info!("{} workers number: {}", SOFTWARE, config.workers);
    log::info!("radius client servers configured: {}", config.servers.len());

    Ok(client)
}
