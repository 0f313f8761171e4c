use futures::Future;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::net::connection::{Connection, ConnectionError};

pub mod connection;
pub mod network;
pub mod wire;

pub use wire::Wire;

/// An ordered, reliable, point-to-point link to one other party.
///
/// Every send and receive is a suspension point.
pub trait Channel: Send {
    /// Send a message over the channel
    ///
    /// * `msg`: message to encode and send
    fn send<T: Wire + Sync>(
        &mut self,
        msg: &T,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Receive the next message, which must be a `T`.
    fn recv<T: Wire + Send>(&mut self) -> impl Future<Output = Result<T, ConnectionError>> + Send;

    /// Send `msg` while receiving the other side's message of the same type.
    ///
    /// Both directions are driven concurrently, so two parties exchanging at the
    /// same time never wait on each other's buffers.
    fn exchange<T: Wire + Send + Sync>(
        &mut self,
        msg: &T,
    ) -> impl Future<Output = Result<T, ConnectionError>> + Send;
}

impl<R, W> Channel for Connection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send<T: Wire + Sync>(&mut self, msg: &T) -> Result<(), ConnectionError> {
        Connection::send(self, msg).await
    }

    async fn recv<T: Wire + Send>(&mut self) -> Result<T, ConnectionError> {
        Connection::recv(self).await
    }

    async fn exchange<T: Wire + Send + Sync>(&mut self, msg: &T) -> Result<T, ConnectionError> {
        let (mut rx, mut tx) = self.split();
        let (sent, received) = futures::join!(tx.send(msg), rx.recv::<T>());
        sent?;
        received
    }
}
