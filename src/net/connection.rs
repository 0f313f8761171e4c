//! Ordered point-to-point links over any `AsyncRead`/`AsyncWrite` pair.
//!
//! TCP streams are used between processes and tokio duplex pipes within one.
//!
//! Framing is purely positional: nothing on the wire says what a message is,
//! so both ends must agree on the exact sequence of sends and receives.
//! See `net::wire` for the encoding of each message type.

use std::io;

use thiserror::Error;
use tokio::{
    io::{
        AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
    },
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tokio_util::bytes::BytesMut;

use crate::net::Wire;

/// Capacity of in-memory pipes, in bytes.
const PIPE_CAPACITY: usize = 1 << 16;

/// A link to a single other party.
pub struct Connection<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    reader: BufReader<R>,
    writer: W,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Connection closed by the other end")]
    Closed,
    #[error("Transport failure: {0}")]
    Io(io::Error),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ConnectionError::Closed,
            _ => ConnectionError::Io(err),
        }
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// * `reader`: incoming half
    /// * `writer`: outgoing half
    pub fn new(reader: R, writer: W) -> Self {
        Connection {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Borrow both directions separately so they can be driven at once.
    pub fn split(&mut self) -> (Receiving<R>, Sending<W>) {
        (Receiving(&mut self.reader), Sending(&mut self.writer))
    }
}

impl<R: AsyncRead + Unpin + Send, W: AsyncWrite + Unpin + Send> Connection<R, W> {
    /// Encode and write `msg`, returning once it is flushed.
    pub async fn send(&mut self, msg: &(impl Wire + Sync)) -> Result<(), ConnectionError> {
        Sending(&mut self.writer).send(msg).await
    }

    /// Wait for the next message, which must be a `T`.
    pub async fn recv<T: Wire>(&mut self) -> Result<T, ConnectionError> {
        Receiving(&mut self.reader).recv().await
    }
}

pub struct Receiving<'a, R: AsyncRead>(&'a mut BufReader<R>);
pub struct Sending<'a, W: AsyncWrite>(&'a mut W);

impl<'a, R: AsyncRead + Unpin + Send> Receiving<'a, R> {
    pub async fn recv<T: Wire>(&mut self) -> Result<T, ConnectionError> {
        T::decode(&mut *self.0).await
    }
}

impl<'a, W: AsyncWrite + Unpin + Send> Sending<'a, W> {
    pub async fn send(&mut self, msg: &(impl Wire + Sync)) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        self.0.write_all(&buf).await?;
        self.0.flush().await?;
        Ok(())
    }
}

pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;
impl TcpConnection {
    /// Wrap an established stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        if let Err(err) = stream.set_nodelay(true) {
            tracing::warn!("Could not disable Nagle's algorithm: {err}");
        }
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

/// Both ends of an in-memory link live in the same process.
pub type DuplexConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;
impl DuplexConnection {
    /// A connected pair of in-memory links.
    pub fn in_memory() -> (Self, Self) {
        let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
        let (lr, lw) = tokio::io::split(left);
        let (rr, rw) = tokio::io::split(right);
        (Self::new(lr, lw), Self::new(rr, rw))
    }
}
