#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use bytes::BytesMut;
use clap::Parser;

use codec::{
    Attributes,
    attributes::{MessageAuthenticator, NasIdentifier, ReplyMessage, UserName, UserPassword},
    packet::{Code, Packet, PacketEncoder},
};
use radius_client::config::Config;
use service::QueryId;

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: radius-client --config /etc/radius-client/config.toml
    ///
    #[arg(long, short)]
    config: Option<String>,
    ///
    /// User-Name for the Access-Request.
    ///
    #[arg(long, short)]
    username: String,
    ///
    /// User-Password for the Access-Request.
    ///
    #[arg(long, short)]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.servers.is_empty() {
        log::warn!(
            "No servers are configured, there is nobody to ask, it's just a program without any functionality :-)"
        );

        return Ok(());
    }

    let client = radius_client::startup(&config)?;

    let mut request = BytesMut::with_capacity(1024);
    let mut encoder = PacketEncoder::new(Code::AccessRequest, 0, &mut request);
    encoder.append::<UserName>(&cli.username)?;
    encoder.append::<UserPassword>(cli.password.as_bytes())?;

    if let Some(nas) = &config.nas_identifier {
        encoder.append::<NasIdentifier>(nas.as_bytes())?;
    }

    encoder.append::<MessageAuthenticator>(&[0u8; 16])?;
    encoder.flush()?;

    let handle = client.query(request.freeze(), QueryId::Auto).await?;
    log::info!("access request sent: id={}", handle.identifier());

    let response = handle.await?;
    log::info!(
        "response received: server={:?}, retransmits={}",
        response.server,
        response.retransmits
    );

    let mut attributes = Attributes::default();
    let packet = Packet::decode(&response.packet, &mut attributes)?;

    for message in packet.get_all::<ReplyMessage>() {
        log::info!("reply message: {}", message);
    }

    match packet.code() {
        Code::AccessAccept => log::info!("access accepted"),
        Code::AccessReject => log::warn!("access rejected"),
        code => log::warn!("unexpected response code: {:?}", code),
    }

    client.shutdown().await;
    Ok(())
}
