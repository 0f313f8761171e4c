//! Sessions: what the dealer generates, how it is streamed, and the drivers
//! for both sides of it.
//!
//! Per compute party the dealer link carries, in order:
//!
//! 1. the party's share of the user matrix and of the item matrix,
//! 2. the number of queries,
//! 3. one [`QueryRecord`] per query,
//!
//! after which the party answers with its final share of the user matrix.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncRead, sync::mpsc};
use tokio_util::bytes::BytesMut;
use tracing::Instrument;

use crate::{
    algebra::{MathError, Matrix, Share, Vector},
    config::Params,
    net::{
        connection::ConnectionError,
        network::{DealerNetwork, PartyNetwork},
        wire::{encode_len, encode_rows},
        Channel, Wire,
    },
    protocols::{
        query::QueryEngine,
        triples::{DotTriple, MultTriple},
        ProtocolError,
    },
    schemes::{additive, Shared},
};

/// Records a compute party buffers ahead of the state machine.
const PREFETCH: usize = 16;

/// A query in the clear, known only to the dealer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub user: usize,
    pub item: usize,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(user {}, item {})", self.user, self.item)
    }
}

/// One compute party's half of everything needed for a single query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryRecord {
    /// Public user index.
    pub user: usize,
    /// Share of the one-hot vector selecting the private item.
    pub item_share: Vector,
    /// One triple per feature, over the item dimension.
    pub select: Vec<DotTriple>,
    /// Triple over the feature dimension for the prediction.
    pub predict: DotTriple,
    /// One triple per feature for the update.
    pub update: Vec<MultTriple>,
    /// Share of the constant 1.
    pub one_share: Share,
}

impl QueryRecord {
    /// Generate both halves of the record for `query`.
    pub fn deal(params: &Params, query: Query, rng: &mut impl Rng) -> Result<[Self; 2], MathError> {
        let bound = params.bound;
        let [e0, e1] = additive::one_hot(params.items, query.item, bound, rng)?;
        let (s0, s1): (Vec<_>, Vec<_>) = (0..params.features)
            .map(|_| {
                let [t0, t1] = DotTriple::deal(params.items, bound, rng);
                (t0, t1)
            })
            .unzip();
        let [p0, p1] = DotTriple::deal(params.features, bound, rng);
        let (u0, u1): (Vec<_>, Vec<_>) = (0..params.features)
            .map(|_| {
                let [t0, t1] = MultTriple::deal(bound, rng);
                (t0, t1)
            })
            .unzip();
        let [o0, o1] = Share::share(&1, bound, rng);

        let half = |item_share, select, predict, update, one_share| Self {
            user: query.user,
            item_share,
            select,
            predict,
            update,
            one_share,
        };
        Ok([half(e0, s0, p0, u0, o0), half(e1, s1, p1, u1, o1)])
    }

    /// Check the record against the model dimensions.
    pub fn check(&self, params: &Params) -> Result<(), ProtocolError> {
        let (k, items) = (params.features, params.items);
        if self.user >= params.users {
            return Err(ProtocolError::UserOutOfRange {
                index: self.user,
                users: params.users,
            });
        }
        let shape = |found: (usize, usize), expected: (usize, usize)| {
            if found == expected {
                Ok(())
            } else {
                Err(ProtocolError::Shape { expected, found })
            }
        };
        shape((1, self.item_share.len()), (1, items))?;
        shape((self.select.len(), items), (k, items))?;
        for t in &self.select {
            shape((1, t.len()), (1, items))?;
        }
        shape((1, self.predict.len()), (1, k))?;
        shape((1, self.update.len()), (1, k))?;
        Ok(())
    }

    /// Triples carried by the record.
    pub fn triples(&self) -> usize {
        self.select.len() + 1 + self.update.len()
    }
}

fn malformed(err: impl fmt::Display) -> ConnectionError {
    ConnectionError::MalformedMessage(err.to_string())
}

impl Wire for QueryRecord {
    fn encode(&self, buf: &mut BytesMut) {
        encode_len(self.user, buf);
        self.item_share.encode(buf);

        encode_rows(self.select.iter().map(|t| &*t.x), buf);
        encode_rows(self.select.iter().map(|t| &*t.y), buf);
        self.select.iter().map(|t| t.z).collect::<Vector>().encode(buf);

        self.predict.x.encode(buf);
        self.predict.y.encode(buf);
        self.predict.z.encode(buf);

        for part in [
            self.update.iter().map(|t| t.x).collect::<Vector>(),
            self.update.iter().map(|t| t.y).collect(),
            self.update.iter().map(|t| t.z).collect(),
        ] {
            part.encode(buf);
        }

        self.one_share.encode(buf);
    }

    async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, ConnectionError> {
        let user = Share::decode(reader).await?;
        let user = usize::try_from(user).map_err(|_| malformed(format!("user index {user}")))?;
        let item_share = Vector::decode(reader).await?;

        let select_x = Matrix::decode(reader).await?;
        let select_y = Matrix::decode(reader).await?;
        let select_z = Vector::decode(reader).await?;

        let predict_x = Vector::decode(reader).await?;
        let predict_y = Vector::decode(reader).await?;
        let predict_z = Share::decode(reader).await?;

        let update_x = Vector::decode(reader).await?;
        let update_y = Vector::decode(reader).await?;
        let update_z = Vector::decode(reader).await?;

        let one_share = Share::decode(reader).await?;

        if select_x.shape() != select_y.shape() || select_z.len() != select_x.rows() {
            return Err(malformed(format!(
                "select triples of shapes {:?}, {:?} and {}",
                select_x.shape(),
                select_y.shape(),
                select_z.len()
            )));
        }
        if predict_x.len() != predict_y.len() {
            return Err(malformed("predict triple halves differ in length"));
        }
        if update_x.len() != update_y.len() || update_x.len() != update_z.len() {
            return Err(malformed("update triples differ in length"));
        }

        let mut select = Vec::with_capacity(select_z.len());
        for (r, z) in select_z.into_iter().enumerate() {
            let x = select_x.row(r).map_err(malformed)?;
            let y = select_y.row(r).map_err(malformed)?;
            select.push(DotTriple {
                x: Vector::from_vec(x.to_vec()),
                y: Vector::from_vec(y.to_vec()),
                z,
            });
        }
        let update = itertools::izip!(update_x, update_y, update_z)
            .map(|(x, y, z)| MultTriple { x, y, z })
            .collect();

        Ok(Self {
            user,
            item_share,
            select,
            predict: DotTriple {
                x: predict_x,
                y: predict_y,
                z: predict_z,
            },
            update,
            one_share,
        })
    }
}

/// All records for a batch of queries, split by compute party.
///
/// Generation order is consumption order.
#[derive(Debug, Clone)]
pub struct Session {
    halves: [Vec<QueryRecord>; 2],
}

impl Session {
    /// Generate the randomness for every query up front.
    pub fn generate(
        params: &Params,
        queries: &[Query],
        rng: &mut impl Rng,
    ) -> Result<Self, ProtocolError> {
        params.validate()?;
        let mut halves = [
            Vec::with_capacity(queries.len()),
            Vec::with_capacity(queries.len()),
        ];
        for (position, &query) in queries.iter().enumerate() {
            if query.user >= params.users || query.item >= params.items {
                return Err(ProtocolError::QueryOutOfRange { position, query });
            }
            let [r0, r1] = QueryRecord::deal(params, query, rng)?;
            halves[0].push(r0);
            halves[1].push(r1);
        }
        tracing::debug!(queries = queries.len(), "Generated session");
        Ok(Self { halves })
    }

    pub fn len(&self) -> usize {
        self.halves[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.halves[0].is_empty()
    }

    pub fn into_halves(self) -> [Vec<QueryRecord>; 2] {
        self.halves
    }

    #[cfg(test)]
    pub(crate) fn halves_mut(&mut self) -> &mut [Vec<QueryRecord>; 2] {
        &mut self.halves
    }
}

/// A user matrix and an item matrix, either in the clear or as one share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub users: Matrix,
    pub items: Matrix,
}

impl Model {
    /// Check both matrices against the configured dimensions.
    pub fn check(&self, params: &Params) -> Result<(), ProtocolError> {
        for (found, expected) in [
            (self.users.shape(), params.user_shape()),
            (self.items.shape(), params.item_shape()),
        ] {
            if found != expected {
                return Err(ProtocolError::Shape { expected, found });
            }
        }
        Ok(())
    }

    /// Split into one share per compute party.
    pub fn share(&self, bound: Share, rng: &mut impl Rng) -> [Model; 2] {
        let [u0, u1] = self.users.share(bound, rng);
        let [v0, v1] = self.items.share(bound, rng);
        [
            Model {
                users: u0,
                items: v0,
            },
            Model {
                users: u1,
                items: v1,
            },
        ]
    }
}

/// What the dealer gets back at the end of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealerReport {
    /// Final user matrix shares, indexed by party.
    pub shares: [Matrix; 2],
}

impl DealerReport {
    /// Sum the two shares into the updated user matrix.
    pub fn reconstruct(&self) -> Result<Matrix, MathError> {
        Matrix::recombine(&self.shares)
    }
}

async fn serve_party(
    party: &mut impl Channel,
    model: Model,
    records: Vec<QueryRecord>,
) -> Result<Matrix, ProtocolError> {
    party.send(&model.users).await?;
    party.send(&model.items).await?;
    party.send(&(records.len() as Share)).await?;
    for record in &records {
        party.send(record).await?;
    }
    tracing::debug!(queries = records.len(), "Session sent, awaiting final share");

    let users: Matrix = party.recv().await?;
    let expected = model.users.shape();
    if users.shape() != expected {
        return Err(ProtocolError::Shape {
            expected,
            found: users.shape(),
        });
    }
    Ok(users)
}

/// Stream a prepared session to both compute parties and collect their
/// final user matrix shares.
///
/// * `network`: links to P0 and P1
/// * `shares`: model share for each party
/// * `session`: records for each party
#[tracing::instrument(skip_all, fields(queries = session.len()))]
pub async fn serve_session<C: Channel>(
    network: &mut DealerNetwork<C>,
    shares: [Model; 2],
    session: Session,
) -> Result<DealerReport, ProtocolError> {
    let [m0, m1] = shares;
    let [h0, h1] = session.into_halves();
    let [c0, c1] = &mut network.parties;
    let (s0, s1) = futures::try_join!(
        serve_party(c0, m0, h0).instrument(tracing::info_span!("serve", party = 0)),
        serve_party(c1, m1, h1).instrument(tracing::info_span!("serve", party = 1)),
    )?;
    tracing::info!("Received final shares from both parties");
    Ok(DealerReport { shares: [s0, s1] })
}

/// Run the dealer: share the model, generate the session and serve it.
pub async fn run_dealer<C: Channel>(
    network: &mut DealerNetwork<C>,
    params: &Params,
    model: &Model,
    queries: &[Query],
    rng: &mut impl Rng,
) -> Result<DealerReport, ProtocolError> {
    params.validate()?;
    model.check(params)?;
    let session = Session::generate(params, queries, rng)?;
    let shares = model.share(params.bound, rng);
    serve_session(network, shares, session).await
}

/// Run a compute party to completion, returning its final user matrix share.
///
/// Records are read from the dealer while earlier queries are still being
/// processed, but they are applied strictly in the order received.
#[tracing::instrument(skip_all, fields(role = %network.role))]
pub async fn run_party<C: Channel>(
    network: &mut PartyNetwork<C>,
    params: Params,
) -> Result<Matrix, ProtocolError> {
    let PartyNetwork { dealer, peer, .. } = network;

    let users: Matrix = dealer.recv().await?;
    let items: Matrix = dealer.recv().await?;
    let mut engine = QueryEngine::new(params, users, items)?;

    let announced = dealer.recv::<Share>().await?;
    let announced = usize::try_from(announced)
        .map_err(|_| malformed(format!("query count {announced}")))?;
    tracing::info!(queries = announced, "Received model shares");

    let (tx, mut rx) = mpsc::channel(PREFETCH);
    let feed = async {
        let tx = tx;
        for received in 0..announced {
            let record: QueryRecord = dealer.recv().await.map_err(|e| match e {
                ConnectionError::Closed => ProtocolError::Truncated {
                    announced,
                    received,
                },
                e => ProtocolError::from(e),
            })?;
            if tx.send(record).await.is_err() {
                break;
            }
        }
        Ok::<_, ProtocolError>(())
    };
    let work = async {
        while let Some(record) = rx.recv().await {
            engine.process(record, peer).await?;
        }
        Ok::<_, ProtocolError>(())
    };
    futures::try_join!(feed, work)?;

    let users = engine.into_users();
    dealer.send(&users).await?;
    tracing::info!("Session complete");
    Ok(users)
}
