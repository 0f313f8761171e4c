//! Secure two-party dot product and multiplication.
//!
//! Each invocation consumes one triple and performs exactly one exchange
//! with the peer, sending the masked inputs and receiving the peer's.

use crate::{
    algebra::{MathError, Share, Vector},
    net::Channel,
    protocols::{
        triples::{DotTriple, MultTriple},
        ProtocolError,
    },
};

fn ensure_peer_len(expected: usize, found: usize) -> Result<(), ProtocolError> {
    if expected == found {
        Ok(())
    } else {
        Err(ProtocolError::PeerMismatch { expected, found })
    }
}

/// Compute a share of `<a, b>` where `a` and `b` are additively shared.
///
/// * `a`: share of the left vector
/// * `b`: share of the right vector
/// * `triple`: this party's half of a dot-product triple of matching length
/// * `peer`: channel to the other compute party
#[tracing::instrument(level = "trace", skip_all, fields(len = a.len()))]
pub async fn secure_dot(
    a: &Vector,
    b: &Vector,
    triple: DotTriple,
    peer: &mut impl Channel,
) -> Result<Share, ProtocolError> {
    if a.len() != b.len() {
        return Err(MathError::DimensionMismatch {
            left: (1, a.len()),
            right: (1, b.len()),
        }
        .into());
    }
    let DotTriple { x, y, z } = triple;
    let masked = (a.add(&x)?, b.add(&y)?);

    let (peer_a, peer_b): (Vector, Vector) = peer.exchange(&masked).await?;
    ensure_peer_len(a.len(), peer_a.len())?;
    ensure_peer_len(b.len(), peer_b.len())?;

    let left = a.dot(&b.add(&peer_b)?)?;
    let right = y.dot(&peer_a)?;
    Ok(left.wrapping_sub(right).wrapping_add(z))
}

/// Compute a share of `a * b` where `a` and `b` are additively shared.
#[tracing::instrument(level = "trace", skip_all)]
pub async fn secure_mult(
    a: Share,
    b: Share,
    triple: MultTriple,
    peer: &mut impl Channel,
) -> Result<Share, ProtocolError> {
    let MultTriple { x, y, z } = triple;
    let masked = (a.wrapping_add(x), b.wrapping_add(y));

    let (peer_a, peer_b): (Share, Share) = peer.exchange(&masked).await?;

    let left = a.wrapping_mul(b.wrapping_add(peer_b));
    let right = y.wrapping_mul(peer_a);
    Ok(left.wrapping_sub(right).wrapping_add(z))
}
