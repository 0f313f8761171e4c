//! Tools for running whole sessions in a single process.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::{
    algebra::{Matrix, Share},
    config::Params,
    net::{
        connection::DuplexConnection,
        network::{self, DealerNetwork, PartyNetwork},
    },
    protocols::{
        session::{run_party, serve_session, DealerReport, Model, Query, Session},
        ProtocolError,
    },
};

/// A dealer and two compute parties wired together in memory.
pub struct Deployment {
    dealer: DealerNetwork<DuplexConnection>,
    parties: [PartyNetwork<DuplexConnection>; 2],
}

pub struct Outcome {
    pub dealer: Result<DealerReport, ProtocolError>,
    pub parties: [Result<Matrix, ProtocolError>; 2],
}

impl Deployment {
    pub fn new() -> Self {
        let (dealer, parties) = network::in_memory();
        Self { dealer, parties }
    }

    /// Run all three roles concurrently on a prepared session.
    ///
    /// Each role owns its links, so a failing role closes them and the
    /// others observe the failure instead of hanging.
    pub async fn run(self, params: Params, shares: [Model; 2], session: Session) -> Outcome {
        let Self {
            mut dealer,
            parties: [mut p0, mut p1],
        } = self;
        let dealer = async move { serve_session(&mut dealer, shares, session).await };
        let p0 = async move { run_party(&mut p0, params).await };
        let p1 = async move { run_party(&mut p1, params).await };
        let (dealer, r0, r1) = tokio::join!(dealer, p0, p1);
        Outcome {
            dealer,
            parties: [r0, r1],
        }
    }
}

/// Generate a session from `seed` and run it.
pub async fn deploy(params: Params, model: &Model, queries: &[Query], seed: u64) -> Outcome {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let session = Session::generate(&params, queries, &mut rng).unwrap();
    let shares = model.share(params.bound, &mut rng);
    Deployment::new().run(params, shares, session).await
}

/// Apply the queries to the model in the clear.
pub fn reference(model: &Model, queries: &[Query]) -> Matrix {
    let mut users = model.users.clone();
    for query in queries {
        let item = model.items.row(query.item).unwrap();
        let row = users.row_mut(query.user).unwrap();
        let predicted = row
            .iter()
            .zip(item)
            .fold(0, |acc: Share, (&u, &v)| acc.wrapping_add(u.wrapping_mul(v)));
        let delta = 1i64.wrapping_sub(predicted);
        for (u, &v) in row.iter_mut().zip(item) {
            *u = u.wrapping_add(v.wrapping_mul(delta));
        }
    }
    users
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{protocols::session::QueryRecord, schemes::additive::sample_matrix};

    fn random_model(params: &Params, seed: u64) -> Model {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let (users, features) = params.user_shape();
        Model {
            users: sample_matrix(users, features, 10, &mut rng),
            items: sample_matrix(params.items, features, 10, &mut rng),
        }
    }

    #[test_log::test(tokio::test)]
    async fn known_values() {
        let params = Params::default();
        let model = Model {
            users: Matrix::from_rows(&[[1i64, 2, 3], [4, 5, 6], [7, 8, 9]]).unwrap(),
            items: Matrix::from_rows(&[[9i64, 8, 7], [6, 5, 4], [3, 2, 1]]).unwrap(),
        };
        let queries = [Query { user: 1, item: 2 }];
        let outcome = deploy(params, &model, &queries, 1).await;
        let report = outcome.dealer.unwrap();
        let users = report.reconstruct().unwrap();
        assert_eq!(
            users,
            Matrix::from_rows(&[[1i64, 2, 3], [-77, -49, -21], [7, 8, 9]]).unwrap()
        );
        assert_eq!(users, reference(&model, &queries));
        assert_eq!(outcome.parties[0].as_ref().unwrap(), &report.shares[0]);
        assert_eq!(outcome.parties[1].as_ref().unwrap(), &report.shares[1]);
    }

    #[test_log::test(tokio::test)]
    async fn many_queries() {
        let params = Params {
            features: 4,
            users: 5,
            items: 6,
            ..Params::default()
        };
        let model = random_model(&params, 2);
        let queries: Vec<_> = (0..40)
            .map(|i| Query {
                user: i % 3,
                item: (i * 7) % 6,
            })
            .collect();
        let outcome = deploy(params, &model, &queries, 3).await;
        let users = outcome.dealer.unwrap().reconstruct().unwrap();
        assert_eq!(users, reference(&model, &queries));
    }

    #[test_log::test(tokio::test)]
    async fn small_bound_sessions() {
        let model = random_model(&Params::default(), 10);
        let queries: Vec<_> = (0..20)
            .map(|i| Query {
                user: i % 3,
                item: (i / 3) % 3,
            })
            .collect();
        for (bound, guard_reuse) in [(1, false), (2, true), (3, true)] {
            let params = Params {
                bound,
                guard_reuse,
                ..Params::default()
            };
            let outcome = deploy(params, &model, &queries, 11).await;
            assert!(outcome.parties.iter().all(Result::is_ok));
            let users = outcome.dealer.unwrap().reconstruct().unwrap();
            assert_eq!(users, reference(&model, &queries), "bound {bound}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn empty_session() {
        let params = Params::default();
        let model = random_model(&params, 4);
        let outcome = deploy(params, &model, &[], 5).await;
        let users = outcome.dealer.unwrap().reconstruct().unwrap();
        assert_eq!(users, model.users);
    }

    #[test_log::test(tokio::test)]
    async fn out_of_order_session() {
        let params = Params::default();
        let model = random_model(&params, 6);
        let queries = [Query { user: 0, item: 1 }, Query { user: 0, item: 2 }];
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let session = Session::generate(&params, &queries, &mut rng).unwrap();
        let shares = model.share(params.bound, &mut rng);

        let in_order = Deployment::new()
            .run(params, shares.clone(), session.clone())
            .await
            .dealer
            .unwrap()
            .reconstruct()
            .unwrap();
        assert_eq!(in_order, reference(&model, &queries));

        // one party consumes the second query's randomness first
        let mut swapped = session;
        swapped.halves_mut()[1].swap(0, 1);
        let outcome = Deployment::new().run(params, shares, swapped).await;
        if let Ok(report) = outcome.dealer {
            assert_ne!(report.reconstruct().unwrap(), in_order);
        }
    }

    #[test_log::test(tokio::test)]
    async fn truncated_session() {
        let params = Params::default();
        let model = random_model(&params, 8);
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let shares = model.share(params.bound, &mut rng);
        let [r0, r1] = QueryRecord::deal(&params, Query { user: 2, item: 0 }, &mut rng).unwrap();

        let Deployment {
            dealer,
            parties: [mut p0, mut p1],
        } = Deployment::new();
        let dealer = async move {
            let DealerNetwork { parties: [mut c0, mut c1] } = dealer;
            for (conn, share, record) in [(&mut c0, &shares[0], r0), (&mut c1, &shares[1], r1)] {
                conn.send(&share.users).await.unwrap();
                conn.send(&share.items).await.unwrap();
                conn.send(&2i64).await.unwrap();
                conn.send(&record).await.unwrap();
            }
        };
        let p0 = async move { run_party(&mut p0, params).await };
        let p1 = async move { run_party(&mut p1, params).await };
        let ((), r0, r1) = tokio::join!(dealer, p0, p1);
        // whichever party notices first may close the peer link on the other
        let truncated = |res: &Result<Matrix, ProtocolError>| {
            matches!(
                res,
                Err(ProtocolError::Truncated {
                    announced: 2,
                    received: 1
                })
            )
        };
        assert!(r0.is_err() && r1.is_err());
        assert!(truncated(&r0) || truncated(&r1));
    }
}
