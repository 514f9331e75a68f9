//! Demo listener answering client PreLogin packets.
//!
//! Each connection gets its own task, option set and encoder. A connection
//! sends one PreLogin packet, receives ours, and is closed.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::encoder::PreLoginEncoder;
use crate::error::{PreLoginError, PreLoginResult, Stage};
use crate::header::{HEADER_SIZE, PacketHeader};
use crate::inspect::{DecodedPacket, decode};
use crate::option::OptionSet;
use crate::transmit::transmit_async;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Bind the configured address and answer connections until the process
/// exits. Only a failed bind is returned.
pub async fn serve(config: ServerConfig, encoder: PreLoginEncoder) -> PreLoginResult<()> {
    let listener = TcpListener::bind(&config.listen_addr).await.map_err(|e| {
        PreLoginError::Config(format!("failed to bind {}: {}", config.listen_addr, e))
    })?;
    info!("Listening on {}", config.listen_addr);

    let instance: Arc<str> = Arc::from(config.instance_name.as_str());
    let read_timeout = config.read_timeout();

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "client connected");
                let instance = Arc::clone(&instance);
                let encoder = encoder.clone();
                tokio::spawn(async move {
                    match handle_connection(stream, &encoder, &instance, read_timeout).await {
                        Ok(_) => info!(%peer, "prelogin exchange complete"),
                        Err(e) => warn!(%peer, "prelogin exchange failed: {}", e),
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                // Errors such as EMFILE repeat until something is released.
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Read one client PreLogin packet, then answer with this server's.
///
/// Returns the client's packet.
pub async fn handle_connection<S>(
    mut stream: S,
    encoder: &PreLoginEncoder,
    instance: &str,
    read_timeout: Duration,
) -> PreLoginResult<DecodedPacket>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw = tokio::time::timeout(read_timeout, read_packet(&mut stream))
        .await
        .map_err(|_| {
            PreLoginError::io(
                Stage::Receive,
                io::Error::new(io::ErrorKind::TimedOut, "no prelogin packet from client"),
            )
        })??;

    let request = decode(&raw)?;
    debug!(
        kinds = ?request.descriptors.iter().map(|d| d.kind).collect::<Vec<_>>(),
        "client prelogin"
    );

    let options = OptionSet::server_defaults(instance)?;
    let packet = encoder.encode(&options)?;
    transmit_async(&packet, &mut stream).await?;
    Ok(request)
}

async fn read_packet<R: AsyncRead + Unpin>(stream: &mut R) -> PreLoginResult<Vec<u8>> {
    let mut buf = vec![0u8; HEADER_SIZE];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| PreLoginError::io(Stage::Receive, e))?;

    let header = PacketHeader::decode(&buf)
        .ok_or_else(|| PreLoginError::malformed("short packet header"))?;
    let length = header.length as usize;
    if length < HEADER_SIZE {
        return Err(PreLoginError::malformed(format!(
            "header declares {} bytes, less than the header itself",
            length
        )));
    }

    buf.resize(length, 0);
    stream
        .read_exact(&mut buf[HEADER_SIZE..])
        .await
        .map_err(|e| PreLoginError::io(Stage::Receive, e))?;
    Ok(buf)
}
