//! Minimal producer and viewer clients for the TCP front end

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use rill_core::{RillResult, SessionId};
use rill_wire::{Frame, FrameDecoder, HelloReply, IngestHello, ViewerHello, WireStart};

/// Largest payload a viewer client accepts
pub const MAX_CLIENT_PAYLOAD: usize = 64 * 1024 * 1024;

async fn read_reply(stream: &mut TcpStream) -> RillResult<()> {
    let mut buf = [0u8; HelloReply::SIZE];
    stream.read_exact(&mut buf).await?;
    HelloReply::parse(&buf)?.into_result()
}

/// Streams media bytes into one session
pub struct ProducerClient {
    stream: TcpStream,
}

impl ProducerClient {
    pub async fn connect(addr: SocketAddr, session: SessionId) -> RillResult<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&IngestHello::new(session).to_bytes()).await?;
        read_reply(&mut stream).await?;
        Ok(ProducerClient { stream })
    }

    pub async fn send(&mut self, data: &[u8]) -> RillResult<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// End the stream cleanly; the session terminates
    pub async fn finish(mut self) -> RillResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Receives frames for one session
pub struct ViewerClient {
    stream: TcpStream,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl ViewerClient {
    pub async fn connect(
        addr: SocketAddr,
        session: SessionId,
        start: WireStart,
    ) -> RillResult<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream
            .write_all(&ViewerHello::new(session, start).to_bytes())
            .await?;
        read_reply(&mut stream).await?;
        Ok(ViewerClient {
            stream,
            buf: BytesMut::with_capacity(64 * 1024),
            decoder: FrameDecoder::new(MAX_CLIENT_PAYLOAD),
        })
    }

    /// Next frame, or `None` once the server closed the connection
    pub async fn next_frame(&mut self) -> RillResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Ok(None);
            }
        }
    }
}
