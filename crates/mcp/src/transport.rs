//! Line-oriented transports for JSON-RPC messages.
//!
//! Every transport carries one JSON object per line. A [`Session`](crate::Session)
//! and a [`Server`](crate::Server) only ever see whole lines.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::session::DEFAULT_TIMEOUT;

/// Maximum size of a single message line (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// A bidirectional channel of newline-delimited JSON messages.
#[async_trait]
pub trait Transport: Send {
    /// Write one message. The transport appends the line terminator.
    async fn send(&mut self, message: &str) -> Result<()>;

    /// Read the next non-empty message, or `None` once the peer has closed.
    async fn receive(&mut self) -> Result<Option<String>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, message: &str) -> Result<()> {
        (**self).send(message).await
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        (**self).receive().await
    }
}

/// Transport over any async reader/writer pair.
///
/// `receive` is cancel-safe: bytes of a line cut short by a timeout stay in
/// `pending` and the next call finishes that line.
pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    pending: Vec<u8>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &str) -> Result<()> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        loop {
            let bytes_read = self.reader.read_until(b'\n', &mut self.pending).await?;
            if bytes_read == 0 && self.pending.is_empty() {
                return Ok(None);
            }

            let line = std::mem::take(&mut self.pending);
            if line.len() > MAX_OUTPUT_SIZE {
                return Err(Error::OutputTooLarge {
                    size: line.len(),
                    max: MAX_OUTPUT_SIZE,
                });
            }

            let line = String::from_utf8(line).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.utf8_error())
            })?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }
}

/// Newline-delimited JSON over a TCP connection.
pub type TcpTransport = LineTransport<OwnedReadHalf, OwnedWriteHalf>;

impl TcpTransport {
    /// Connect to `host:port`, giving up after [`DEFAULT_TIMEOUT`].
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_within(host, port, DEFAULT_TIMEOUT).await
    }

    /// Connect to `host:port`, giving up after `limit`.
    pub async fn connect_within(host: &str, port: u16, limit: Duration) -> Result<Self> {
        let stream = timeout(limit, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Timeout(limit))??;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-accepted connection.
    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

/// Command line for a server launched as a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Transport over the stdin/stdout of a spawned child process.
///
/// The child is killed when the transport is dropped.
pub struct StdioTransport {
    // Held so kill_on_drop fires with the transport.
    _child: Child,
    inner: LineTransport<ChildStdout, ChildStdin>,
}

impl StdioTransport {
    pub fn spawn(config: &ProcessConfig) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture stdout"))?;

        Ok(Self {
            _child: child,
            inner: LineTransport::new(stdout, stdin),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: &str) -> Result<()> {
        self.inner.send(message).await
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        self.inner.receive().await
    }
}

/// In-memory transport backed by a pair of channels.
pub struct ChannelTransport {
    rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Create two connected ends. What one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(32);
        let (tx_b, rx_b) = mpsc::channel(32);
        (Self { rx: rx_a, tx: tx_b }, Self { rx: rx_b, tx: tx_a })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: &str) -> Result<()> {
        self.tx
            .send(message.to_string())
            .await
            .map_err(|_| Error::Closed)
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_pair_is_crossed() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.send("ping").await.unwrap();
        assert_eq!(b.receive().await.unwrap().as_deref(), Some("ping"));
        b.send("pong").await.unwrap();
        assert_eq!(a.receive().await.unwrap().as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn channel_reports_close() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);
        assert!(a.receive().await.unwrap().is_none());
        assert!(matches!(a.send("x").await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn line_transport_skips_blank_lines() {
        let input: &[u8] = b"\n  \n{\"a\":1}\n";
        let mut transport = LineTransport::new(input, Vec::new());
        assert_eq!(transport.receive().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(transport.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn line_transport_rejects_oversized_lines() {
        let mut big = "x".repeat(MAX_OUTPUT_SIZE + 1);
        big.push('\n');
        let mut transport = LineTransport::new(big.as_bytes(), Vec::new());
        assert!(matches!(
            transport.receive().await,
            Err(Error::OutputTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn timed_out_receive_keeps_the_partial_line() {
        let (near, mut far) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(near);
        let mut transport = LineTransport::new(reader, writer);

        far.write_all(b"{\"id\":").await.unwrap();
        let cut = timeout(Duration::from_millis(50), transport.receive()).await;
        assert!(cut.is_err());

        far.write_all(b"7}\n").await.unwrap();
        assert_eq!(transport.receive().await.unwrap().as_deref(), Some("{\"id\":7}"));
    }

    #[tokio::test]
    async fn unterminated_last_line_is_delivered() {
        let input: &[u8] = b"{\"a\":1}";
        let mut transport = LineTransport::new(input, Vec::new());
        assert_eq!(transport.receive().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(transport.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connect_gives_up_after_the_limit() {
        let started = std::time::Instant::now();
        let result =
            TcpTransport::connect_within("10.255.255.1", 9, Duration::from_millis(100)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn tcp_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut server = TcpTransport::from_stream(stream);
            let line = server.receive().await.unwrap().unwrap();
            server.send(&line.to_uppercase()).await.unwrap();
        });

        let mut client = TcpTransport::connect("127.0.0.1", port).await.unwrap();
        client.send("hello").await.unwrap();
        assert_eq!(client.receive().await.unwrap().as_deref(), Some("HELLO"));
        accept.await.unwrap();
    }
}
