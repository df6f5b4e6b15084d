//! TCP endpoints framed as newline-delimited text.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder, FramedRead, FramedWrite,
};

use helpdesk_error::HelpdeskError;

use crate::protocol::{ensure_fits, Frame, MAX_FRAME_BYTES};

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle of one established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything that names a connection: queue entries, slots, raw ids.
pub trait Handle {
    fn connection(&self) -> ConnectionId;
}

impl Handle for ConnectionId {
    fn connection(&self) -> ConnectionId {
        *self
    }
}

impl<T: Handle> Handle for Arc<T> {
    fn connection(&self) -> ConnectionId {
        (**self).connection()
    }
}

/// Newline framing that never fails on bad UTF-8.
///
/// Invalid sequences decode to U+FFFD so a legacy client's line still reads
/// as chat. A trailing `\r` is stripped.
#[derive(Debug, Clone)]
pub struct ChatLineCodec {
    inner: AnyDelimiterCodec,
}

impl ChatLineCodec {
    pub fn new() -> Self {
        Self {
            // One extra byte for an optional `\r` before the newline.
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                MAX_FRAME_BYTES + 1,
            ),
        }
    }

    fn to_line(chunk: &[u8]) -> Result<String, AnyDelimiterCodecError> {
        let chunk = chunk.strip_suffix(b"\r").unwrap_or(chunk);
        if chunk.len() > MAX_FRAME_BYTES {
            return Err(AnyDelimiterCodecError::MaxChunkLengthExceeded);
        }
        Ok(String::from_utf8_lossy(chunk).into_owned())
    }
}

impl Default for ChatLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChatLineCodec {
    type Item = String;
    type Error = AnyDelimiterCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        match self.inner.decode(buf)? {
            Some(chunk) => Self::to_line(&chunk).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        match self.inner.decode_eof(buf)? {
            Some(chunk) => Self::to_line(&chunk).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<String> for ChatLineCodec {
    type Error = AnyDelimiterCodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner.encode(line, dst)
    }
}

/// One peer connection.
///
/// Read and write halves sit behind separate locks, so a task parked in
/// [`Endpoint::recv`] never delays a concurrent [`Endpoint::send`].
#[derive(Debug)]
pub struct Endpoint {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<FramedRead<OwnedReadHalf, ChatLineCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, ChatLineCodec>>,
}

impl Endpoint {
    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        Self {
            id: ConnectionId::next(),
            peer,
            reader: Mutex::new(FramedRead::new(read_half, ChatLineCodec::new())),
            writer: Mutex::new(FramedWrite::new(write_half, ChatLineCodec::new())),
        }
    }

    pub async fn connect(host: &str, port: u16) -> Result<Self, HelpdeskError> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| HelpdeskError::TransportSetup {
                stage: "connect to",
                addr: addr.clone(),
                source,
            })?;
        let peer = stream
            .peer_addr()
            .map_err(|source| HelpdeskError::TransportSetup {
                stage: "connect to",
                addr,
                source,
            })?;
        tracing::info!(peer = %peer, "connected to help desk");
        Ok(Self::from_stream(stream, peer))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one frame. A line the peer could not decode is refused with
    /// `MessageTooLong` and nothing is written.
    pub async fn send(&self, frame: Frame) -> Result<(), HelpdeskError> {
        let line = frame.into_line();
        ensure_fits(&line)?;
        let mut writer = self.writer.lock().await;
        writer
            .send(line)
            .await
            .map_err(|err| HelpdeskError::connection_failed(self.id.get(), err))
    }

    /// Next line from the peer; `Ok(None)` once the peer closed the stream.
    pub async fn recv(&self) -> Result<Option<String>, HelpdeskError> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => Err(HelpdeskError::Protocol {
                connection: self.id.get(),
                message: format!("line longer than {MAX_FRAME_BYTES} bytes"),
            }),
            Some(Err(AnyDelimiterCodecError::Io(err))) => {
                Err(HelpdeskError::connection_failed(self.id.get(), err))
            }
            None => Ok(None),
        }
    }

    /// Flushes pending output and shuts down the write direction.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = SinkExt::<String>::close(&mut *writer).await {
            tracing::debug!(connection = %self.id, error = %err, "close failed");
        }
    }
}

impl Handle for Endpoint {
    fn connection(&self) -> ConnectionId {
        self.id
    }
}

/// Listening socket the acceptor loop pulls new endpoints from.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(host: &str, port: u16, backlog: u32) -> Result<Self, HelpdeskError> {
        let display = format!("{host}:{port}");
        let setup_error = |stage: &'static str| {
            let addr = display.clone();
            move |source: std::io::Error| HelpdeskError::TransportSetup {
                stage,
                addr,
                source,
            }
        };

        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(setup_error("resolve"))?
            .next()
            .ok_or_else(|| {
                setup_error("resolve")(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "no address found",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(setup_error("create socket for"))?;
        socket
            .set_reuseaddr(true)
            .map_err(setup_error("create socket for"))?;
        socket.bind(addr).map_err(setup_error("bind"))?;
        let inner = socket.listen(backlog).map_err(setup_error("listen on"))?;
        let local_addr = inner.local_addr().map_err(setup_error("listen on"))?;

        tracing::info!(addr = %local_addr, backlog, "help desk listening");
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&self) -> std::io::Result<Endpoint> {
        let (stream, peer) = self.inner.accept().await?;
        Ok(Endpoint::from_stream(stream, peer))
    }
}


#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn lines_survive_coalescing_and_splitting() {
        let listener = Listener::bind("127.0.0.1", 0, 5).await.expect("bind");
        let port = listener.local_addr().port();

        let mut raw = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
        let server = listener.accept().await.expect("accept");

        // Two messages in one write, then one message across two writes.
        raw.write_all(b"Hola\nsegundo\nter").await.expect("write");
        raw.flush().await.expect("flush");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        raw.write_all(b"cero\r\n").await.expect("write");

        assert_eq!(server.recv().await.expect("recv").as_deref(), Some("Hola"));
        assert_eq!(server.recv().await.expect("recv").as_deref(), Some("segundo"));
        assert_eq!(server.recv().await.expect("recv").as_deref(), Some("tercero"));

        drop(raw);
        assert_eq!(server.recv().await.expect("recv"), None);
    }

    #[tokio::test]
    async fn endpoints_get_distinct_ids_and_exchange_frames() {
        let listener = Listener::bind("127.0.0.1", 0, 5).await.expect("bind");
        let port = listener.local_addr().port();

        let client = Endpoint::connect("127.0.0.1", port).await.expect("connect");
        let server = listener.accept().await.expect("accept");
        assert_ne!(client.id(), server.id());

        server.send(Frame::Wait).await.expect("send wait");
        server.send(Frame::Chat("hi".to_string())).await.expect("send chat");
        assert_eq!(client.recv().await.expect("recv").as_deref(), Some("/WAIT"));
        assert_eq!(client.recv().await.expect("recv").as_deref(), Some("hi"));

        server.close().await;
        assert_eq!(client.recv().await.expect("recv"), None);
    }

    #[tokio::test]
    async fn overlong_line_is_a_protocol_error() {
        let listener = Listener::bind("127.0.0.1", 0, 5).await.expect("bind");
        let port = listener.local_addr().port();

        let mut raw = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
        let server = listener.accept().await.expect("accept");

        let mut long = vec![b'x'; MAX_FRAME_BYTES + 10];
        long.push(b'\n');
        raw.write_all(&long).await.expect("write");

        let err = server.recv().await.expect_err("too long");
        assert!(matches!(err, HelpdeskError::Protocol { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn invalid_utf8_reads_as_chat() {
        let listener = Listener::bind("127.0.0.1", 0, 5).await.expect("bind");
        let port = listener.local_addr().port();

        let mut raw = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
        let server = listener.accept().await.expect("accept");

        // Latin-1 "España", then a normal line.
        raw.write_all(b"Espa\xf1a\r\nsigo aqui\n").await.expect("write");

        assert_eq!(
            server.recv().await.expect("recv").as_deref(),
            Some("Espa\u{FFFD}a")
        );
        assert_eq!(server.recv().await.expect("recv").as_deref(), Some("sigo aqui"));
    }

    #[tokio::test]
    async fn line_with_carriage_return_may_use_the_full_limit() {
        let listener = Listener::bind("127.0.0.1", 0, 5).await.expect("bind");
        let port = listener.local_addr().port();

        let mut raw = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
        let server = listener.accept().await.expect("accept");

        let mut line = vec![b'x'; MAX_FRAME_BYTES];
        line.extend_from_slice(b"\r\n");
        raw.write_all(&line).await.expect("write");

        let received = server.recv().await.expect("recv").expect("line");
        assert_eq!(received.len(), MAX_FRAME_BYTES);
    }

    #[tokio::test]
    async fn oversized_frame_is_refused_before_writing() {
        let listener = Listener::bind("127.0.0.1", 0, 5).await.expect("bind");
        let port = listener.local_addr().port();

        let client = Endpoint::connect("127.0.0.1", port).await.expect("connect");
        let server = listener.accept().await.expect("accept");

        let err = server
            .send(Frame::Chat("x".repeat(MAX_FRAME_BYTES + 1)))
            .await
            .expect_err("too long");
        assert!(matches!(err, HelpdeskError::MessageTooLong { .. }));

        // The connection is untouched and the next frame is the first one seen.
        server.send(Frame::Chat("ok".to_string())).await.expect("send");
        assert_eq!(client.recv().await.expect("recv").as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn bind_failure_is_fatal_setup_error() {
        let first = Listener::bind("127.0.0.1", 0, 5).await.expect("bind");
        let taken = first.local_addr().port();

        // SO_REUSEADDR does not allow two listeners on one port.
        let err = Listener::bind("127.0.0.1", taken, 5)
            .await
            .expect_err("port in use");
        assert!(err.is_fatal());
    }
}
