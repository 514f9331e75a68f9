//! Delivery of encoded packets to a byte sink.
//!
//! The packet is handed over in one `write_all`. Failures are returned
//! wrapped with [`Stage::Transmit`]; retry and reconnect belong to whoever
//! owns the connection.

use std::io::Write;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::encoder::{Packet, PreLoginEncoder};
use crate::error::{PreLoginError, PreLoginResult, Stage};
use crate::option::OptionSet;

/// Write a packet to a blocking sink and flush it.
pub fn transmit<W: Write + ?Sized>(packet: &Packet, sink: &mut W) -> PreLoginResult<()> {
    sink.write_all(packet.as_bytes())
        .map_err(|e| PreLoginError::io(Stage::Transmit, e))?;
    sink.flush()
        .map_err(|e| PreLoginError::io(Stage::Transmit, e))?;
    debug!(len = packet.len(), "sent prelogin packet");
    Ok(())
}

/// Write a packet to an async sink and flush it.
pub async fn transmit_async<W>(packet: &Packet, sink: &mut W) -> PreLoginResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    sink.write_all(packet.as_bytes())
        .await
        .map_err(|e| PreLoginError::io(Stage::Transmit, e))?;
    sink.flush()
        .await
        .map_err(|e| PreLoginError::io(Stage::Transmit, e))?;
    debug!(len = packet.len(), "sent prelogin packet");
    Ok(())
}

/// Encode the server's default options for `instance` and send them.
///
/// Nothing reaches the sink unless encoding succeeds.
pub fn write_prelogin<W: Write + ?Sized>(sink: &mut W, instance: &str) -> PreLoginResult<()> {
    let options = OptionSet::server_defaults(instance)?;
    let packet = PreLoginEncoder::new().encode(&options)?;
    transmit(&packet, sink)
}

/// Async counterpart of [`write_prelogin`].
pub async fn write_prelogin_async<W>(sink: &mut W, instance: &str) -> PreLoginResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let options = OptionSet::server_defaults(instance)?;
    let packet = PreLoginEncoder::new().encode(&options)?;
    transmit_async(&packet, sink).await
}
