//! The per-query state machine of a compute party.
//!
//! A query moves through four stages, strictly in order:
//!
//! 1. select: `k` secure dot products between the item matrix columns and
//!    the one-hot share, giving a share of the selected item row,
//! 2. predict: one secure dot product of the user row and the item row,
//! 3. delta: `one_share - predicted`, purely local,
//! 4. update: `k` secure multiplications of the item row with delta, added
//!    into the user row in place.
//!
//! The user row update persists into later queries.

use crate::{
    algebra::{Matrix, Share, Vector},
    config::Params,
    net::Channel,
    protocols::{
        du_atallah::{secure_dot, secure_mult},
        session::QueryRecord,
        triples::TripleLedger,
        ProtocolError,
    },
};

/// Shares produced while processing a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    pub predicted: Share,
    pub delta: Share,
    pub item_row: Vector,
    pub user_row: Vector,
}

pub struct QueryEngine {
    params: Params,
    users: Matrix,
    items: Matrix,
    ledger: TripleLedger,
    processed: usize,
}

impl QueryEngine {
    /// Take ownership of this party's model shares.
    ///
    /// * `params`: model dimensions, the matrices must match them
    /// * `users`: share of the user matrix
    /// * `items`: share of the item matrix
    pub fn new(params: Params, users: Matrix, items: Matrix) -> Result<Self, ProtocolError> {
        params.validate()?;
        for (found, expected) in [
            (users.shape(), params.user_shape()),
            (items.shape(), params.item_shape()),
        ] {
            if found != expected {
                return Err(ProtocolError::Shape { expected, found });
            }
        }
        Ok(Self {
            params,
            users,
            items,
            ledger: TripleLedger::new(params.guard_reuse),
            processed: 0,
        })
    }

    /// Run one query to completion against the peer.
    ///
    /// The record is checked into the ledger before any traffic, so a
    /// rejected record leaves the shares untouched.
    #[tracing::instrument(skip_all, fields(query = self.processed, user = record.user))]
    pub async fn process(
        &mut self,
        record: QueryRecord,
        peer: &mut impl Channel,
    ) -> Result<QueryOutcome, ProtocolError> {
        record.check(&self.params)?;
        self.ledger.consume(&record, record.triples())?;

        let QueryRecord {
            user,
            item_share,
            select,
            predict,
            update,
            one_share,
        } = record;

        let mut item_row = Vec::with_capacity(self.params.features);
        for (i, triple) in select.into_iter().enumerate() {
            let column = self.items.column(i)?;
            item_row.push(secure_dot(&column, &item_share, triple, peer).await?);
        }
        let item_row = Vector::from_vec(item_row);
        tracing::debug!("Selected item row");

        let user_row = Vector::from_vec(self.users.row(user)?.to_vec());
        let predicted = secure_dot(&user_row, &item_row, predict, peer).await?;
        tracing::debug!("Predicted rating");

        let delta = one_share.wrapping_sub(predicted);

        let mut step = Vec::with_capacity(self.params.features);
        for (&v, triple) in item_row.iter().zip(update) {
            step.push(secure_mult(v, delta, triple, peer).await?);
        }
        let step = Vector::from_vec(step);

        let mut user_row = user_row;
        user_row.add_assign(&step)?;
        self.users.row_mut(user)?.copy_from_slice(&user_row);
        self.processed += 1;
        tracing::debug!("Updated user row");

        Ok(QueryOutcome {
            predicted,
            delta,
            item_row,
            user_row,
        })
    }

    pub fn users(&self) -> &Matrix {
        &self.users
    }

    pub fn into_users(self) -> Matrix {
        self.users
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Triples consumed so far.
    pub fn consumed(&self) -> u64 {
        self.ledger.consumed()
    }
}
