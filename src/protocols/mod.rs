//! Protocols run by the compute parties, and the dealer's side of a session.

pub mod du_atallah;
pub mod query;
pub mod session;
pub mod triples;

use thiserror::Error;

use crate::{
    algebra::MathError, config::ConfigError, net::connection::ConnectionError,
    protocols::session::Query,
};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Math(#[from] MathError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Peer sent a mask of length {found}, expected {expected}")]
    PeerMismatch { expected: usize, found: usize },
    #[error("User index {index} out of range for {users} users")]
    UserOutOfRange { index: usize, users: usize },
    #[error("Query {position} is out of range: {query}")]
    QueryOutOfRange { position: usize, query: Query },
    #[error("Query record {0:#018x} has already been consumed")]
    RecordReused(u64),
    #[error("Expected shape {expected:?}, found {found:?}")]
    Shape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Session announced {announced} queries but ended after {received}")]
    Truncated { announced: usize, received: usize },
}
