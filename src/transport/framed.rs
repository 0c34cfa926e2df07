//! Length-prefixed framing over any `AsyncRead`/`AsyncWrite` stream: a 4-byte
//! little-endian length prefix followed by a bincode-encoded payload, with an
//! upper bound on a single frame to keep a corrupt or hostile peer from
//! driving an unbounded allocation.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;

use super::{EndpointHalves, EndpointReceiver, EndpointSender};
use crate::error::BridgeError;
use crate::protocol::Envelope;

/// Largest single envelope this transport will read, in bytes. Chosen to
/// comfortably exceed any realistic call while still bounding worst case
/// memory use for a misbehaving peer.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), BridgeError> {
    let payload = bincode::serialize(envelope)?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Envelope>, BridgeError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BridgeError::Transport(e)),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(BridgeError::Startup(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let envelope = bincode::deserialize(&payload)?;
    Ok(Some(envelope))
}

struct FramedSender<W> {
    writer: Mutex<W>,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EndpointSender for FramedSender<W> {
    async fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &envelope).await
    }
}

struct FramedReceiver<R> {
    reader: R,
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> EndpointReceiver for FramedReceiver<R> {
    async fn recv(&mut self) -> Result<Option<Envelope>, BridgeError> {
        read_frame(&mut self.reader).await
    }
}

fn halves_from_split<R, W>(reader: R, writer: W) -> EndpointHalves
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    EndpointHalves::new(
        Box::new(FramedSender {
            writer: Mutex::new(writer),
        }),
        Box::new(FramedReceiver { reader }),
    )
}

/// Wrap a connected Unix domain socket as a framed endpoint.
pub fn unix_socket(stream: UnixStream) -> EndpointHalves {
    let (reader, writer) = stream.into_split();
    halves_from_split(reader, writer)
}

/// Connect to a Unix domain socket at `path` and wrap it as a framed
/// endpoint.
pub async fn connect_unix(path: impl AsRef<std::path::Path>) -> Result<EndpointHalves, BridgeError> {
    let stream = UnixStream::connect(path).await?;
    Ok(unix_socket(stream))
}

/// Wrap a connected TCP stream as a framed endpoint, disabling Nagle's
/// algorithm for latency-sensitive round trips.
pub fn tcp_socket(stream: TcpStream) -> Result<EndpointHalves, BridgeError> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    Ok(halves_from_split(reader, writer))
}

/// Connect to `addr` over TCP and wrap the stream as a framed endpoint.
pub async fn connect_tcp(addr: impl tokio::net::ToSocketAddrs) -> Result<EndpointHalves, BridgeError> {
    let stream = TcpStream::connect(addr).await?;
    tcp_socket(stream)
}
