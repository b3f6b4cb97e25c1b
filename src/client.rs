//! Framed TCP client for the relay. The `send` command uses it, and it
//! doubles as the reference implementation for producers.

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::envelope::{Envelope, EnvelopeSubmission};
use crate::error::Result;
use crate::relay::frame::{self, MAX_FRAME_LEN};

pub struct RelayClient {
    stream: TcpStream,
}

impl RelayClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Send one envelope as a single frame.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        let bytes = serde_json::to_vec(envelope)?;
        frame::write_frame(&mut self.stream, &bytes).await
    }

    /// Wait for the next envelope pushed to this connection. `Ok(None)`
    /// means the relay closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        let bytes = match frame::read_frame(&mut self.stream, MAX_FRAME_LEN).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let envelope = EnvelopeSubmission::from_slice(&bytes)?.validate()?;
        Ok(Some(envelope))
    }
}
