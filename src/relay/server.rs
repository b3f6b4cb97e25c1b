//! TCP side of the relay: accept pipeline connections, read framed
//! envelopes, and drain queued dashboard envelopes back out.

use std::net::SocketAddr;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, EnvelopeKind, EnvelopeSubmission};
use crate::error::Result;
use crate::metrics;
use crate::relay::frame;
use crate::relay::hub::RelayHub;

/// Accept pipeline connections and relay their envelopes until the
/// surrounding task is dropped.
pub async fn serve(listener: TcpListener, hub: RelayHub, max_frame_len: u64) -> Result<()> {
    info!("Relay listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        metrics::relay::connection_opened();
        debug!("Pipeline connection from {}", peer);
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(error) = handle_connection(stream, peer, hub, max_frame_len).await {
                warn!("Relay connection from {} failed: {}", peer, error);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: RelayHub,
    max_frame_len: u64,
) -> Result<()> {
    let conn = Uuid::new_v4();
    let (mut reader, writer) = stream.into_split();

    // Dashboard envelopes for this pipeline land here via RelayHub::push and
    // leave through the writer task. Writes get their own task so a slow
    // dashboard push can never interleave with a half-read frame.
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Envelope>();
    let writer_task = tokio::spawn(drain_outbound(writer, outbound_rx, peer));

    let mut registered: Option<String> = None;
    let result: Result<()> = loop {
        let bytes = match frame::read_frame(&mut reader, max_frame_len).await {
            Ok(Some(bytes)) => bytes,
            // Peer closed between frames, the normal way out.
            Ok(None) => break Ok(()),
            Err(error) => break Err(error),
        };

        let envelope = match EnvelopeSubmission::from_slice(&bytes)
            .and_then(EnvelopeSubmission::validate)
        {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!("Dropping malformed envelope from {}: {}", peer, error);
                metrics::relay::envelope_rejected();
                continue;
            }
        };

        if envelope.kind() == EnvelopeKind::Pipeline {
            if let Some(previous) = registered.take() {
                if previous != envelope.uuid() {
                    hub.unregister(&previous, conn);
                }
            }
            hub.register(&envelope, peer, conn, outbound_tx.clone());
            registered = Some(envelope.uuid().to_string());
        }
        hub.publish(envelope, peer);
    };

    if let Some(uuid) = registered {
        hub.unregister(&uuid, conn);
    }
    // Closing the channel lets the writer flush whatever is queued and stop.
    drop(outbound_tx);
    let _ = writer_task.await;
    debug!("Relay connection from {} closed", peer);
    result
}

async fn drain_outbound(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    peer: SocketAddr,
) {
    while let Some(envelope) = outbound.recv().await {
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!("Could not encode dashboard envelope for {}: {}", peer, error);
                continue;
            }
        };
        if let Err(error) = frame::write_frame(&mut writer, &bytes).await {
            warn!("Could not deliver dashboard envelope to {}: {}", peer, error);
            break;
        }
    }
}
