//! Loading the initial model and the query list for the dealer.
//!
//! Both files are plain whitespace-separated integers. The model file holds
//! the user matrix followed by the item matrix, row by row. The query file
//! holds `user item` pairs with 1-based indices.

use std::{fs, io, path::Path};

use thiserror::Error;

use crate::{
    algebra::{MathError, Matrix, Share},
    config::Params,
    protocols::session::{Model, Query},
};

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Could not read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("Token {position} is not an integer: {token:?}")]
    NotAnInteger { position: usize, token: String },
    #[error("Expected {expected} values, found {found}")]
    Count { expected: usize, found: usize },
    #[error("Query {position} ({user}, {item}) is out of range")]
    OutOfRange {
        position: usize,
        user: Share,
        item: Share,
    },
    #[error(transparent)]
    Math(#[from] MathError),
}

fn read(path: &Path) -> Result<String, InputError> {
    fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn integers(text: &str) -> Result<Vec<Share>, InputError> {
    text.split_whitespace()
        .enumerate()
        .map(|(position, token)| {
            token.parse().map_err(|_| InputError::NotAnInteger {
                position,
                token: token.to_owned(),
            })
        })
        .collect()
}

/// Parse a model of the dimensions given by `params`.
pub fn parse_model(text: &str, params: &Params) -> Result<Model, InputError> {
    let values = integers(text)?;
    let (users, k) = params.user_shape();
    let split = users * k;
    let expected = split + params.items * k;
    if values.len() != expected {
        return Err(InputError::Count {
            expected,
            found: values.len(),
        });
    }
    let mut values = values;
    let items = values.split_off(split);
    Ok(Model {
        users: Matrix::new(users, k, values)?,
        items: Matrix::new(params.items, k, items)?,
    })
}

pub fn load_model(path: impl AsRef<Path>, params: &Params) -> Result<Model, InputError> {
    parse_model(&read(path.as_ref())?, params)
}

/// Parse 1-based `(user, item)` pairs into 0-based queries.
pub fn parse_queries(text: &str, params: &Params) -> Result<Vec<Query>, InputError> {
    let values = integers(text)?;
    if values.len() % 2 != 0 {
        return Err(InputError::Count {
            expected: values.len() + 1,
            found: values.len(),
        });
    }
    values
        .chunks_exact(2)
        .enumerate()
        .map(|(position, pair)| {
            let (user, item) = (pair[0], pair[1]);
            let index = |v: Share, n: usize| {
                usize::try_from(v)
                    .ok()
                    .filter(|&i| (1..=n).contains(&i))
                    .map(|i| i - 1)
            };
            match (index(user, params.users), index(item, params.items)) {
                (Some(user), Some(item)) => Ok(Query { user, item }),
                _ => Err(InputError::OutOfRange {
                    position,
                    user,
                    item,
                }),
            }
        })
        .collect()
}

pub fn load_queries(path: impl AsRef<Path>, params: &Params) -> Result<Vec<Query>, InputError> {
    parse_queries(&read(path.as_ref())?, params)
}
