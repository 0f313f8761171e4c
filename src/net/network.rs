//! The three-party topology: dealer↔P0, dealer↔P1 and P0↔P1.
//!
//! The dealer listens and both compute parties connect to it. Between the
//! compute parties P1 listens and P0 connects.

use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::{
    config::{NetConfig, Role},
    net::connection::{DuplexConnection, TcpConnection},
};

/// The dealer's view: one link to each compute party, indexed by party.
pub struct DealerNetwork<C> {
    pub parties: [C; 2],
}

/// A compute party's view: a link to the dealer and a link to its peer.
pub struct PartyNetwork<C> {
    pub role: Role,
    pub dealer: C,
    pub peer: C,
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Could not bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("Failed to accept connection: {0}")]
    Accept(io::Error),
    #[error("Could not connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },
    #[error("{0} is not a compute party")]
    NotAComputeParty(Role),
}

/// Construct all three views of an in-memory deployment.
///
/// Used for local testing.
pub fn in_memory() -> (
    DealerNetwork<DuplexConnection>,
    [PartyNetwork<DuplexConnection>; 2],
) {
    let (d0, p0_dealer) = DuplexConnection::in_memory();
    let (d1, p1_dealer) = DuplexConnection::in_memory();
    let (p0_peer, p1_peer) = DuplexConnection::in_memory();
    let dealer = DealerNetwork { parties: [d0, d1] };
    let p0 = PartyNetwork {
        role: Role::P0,
        dealer: p0_dealer,
        peer: p0_peer,
    };
    let p1 = PartyNetwork {
        role: Role::P1,
        dealer: p1_dealer,
        peer: p1_peer,
    };
    (dealer, [p0, p1])
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NetworkError::Bind { addr, source })
}

async fn connect(addr: SocketAddr, config: &NetConfig) -> Result<TcpStream, NetworkError> {
    let mut attempt = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) if config.may_retry(attempt) => {
                attempt += 1;
                tracing::debug!(%addr, attempt, "Connection failed, retrying: {err}");
                tokio::time::sleep(config.retry_delay()).await;
            }
            Err(source) => return Err(NetworkError::Connect { addr, source }),
        }
    }
}

impl DealerNetwork<TcpConnection> {
    /// Listen on `addr` until both compute parties have connected.
    pub async fn listen(addr: SocketAddr) -> Result<Self, NetworkError> {
        let listener = bind(addr).await?;
        Self::accept(&listener).await
    }

    /// Accept two connections on `listener`.
    ///
    /// The first connection is treated as P0 and the second as P1.
    pub async fn accept(listener: &TcpListener) -> Result<Self, NetworkError> {
        let (s0, a0) = listener.accept().await.map_err(NetworkError::Accept)?;
        tracing::info!(addr = %a0, "First compute party connected");
        let (s1, a1) = listener.accept().await.map_err(NetworkError::Accept)?;
        tracing::info!(addr = %a1, "Second compute party connected");
        Ok(Self {
            parties: [TcpConnection::from_tcp(s0), TcpConnection::from_tcp(s1)],
        })
    }
}

impl PartyNetwork<TcpConnection> {
    /// Connect to the dealer, then set up the peer link.
    ///
    /// * `role`: P0 connects to its peer, P1 listens for it
    /// * `config`: addresses and retry policy, by default retrying until the
    ///   dealer and the peer are up
    pub async fn connect(role: Role, config: &NetConfig) -> Result<Self, NetworkError> {
        if role.party().is_none() {
            return Err(NetworkError::NotAComputeParty(role));
        }
        let dealer = connect(config.dealer, config).await?;
        tracing::info!(%role, addr = %config.dealer, "Connected to dealer");

        let peer = if role.listens_for_peer() {
            let listener = bind(config.peer).await?;
            let (stream, addr) = listener.accept().await.map_err(NetworkError::Accept)?;
            tracing::info!(%role, %addr, "Peer connected");
            stream
        } else {
            let stream = connect(config.peer, config).await?;
            tracing::info!(%role, addr = %config.peer, "Connected to peer");
            stream
        };

        Ok(Self {
            role,
            dealer: TcpConnection::from_tcp(dealer),
            peer: TcpConnection::from_tcp(peer),
        })
    }
}
