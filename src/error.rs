use thiserror::Error;

use crate::datasets::UserId;

/// Everything that can abort a training run.
#[derive(Debug, Error)]
pub enum LfdaeError {
    /// Invalid model or training configuration, detected before any step runs.
    #[error("configuration error: {0}")]
    Config(String),

    /// A sample or tensor does not have the shape the model expects.
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An index points outside the space it addresses.
    #[error("{what} index {index} out of range for size {size}")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        size: usize,
    },

    /// An enabled latent factor was handed no ids to look up.
    #[error("no {0} ids supplied for an enabled latent factor")]
    MissingContext(&'static str),

    #[error("unknown user {0}")]
    UnknownUser(UserId),

    /// Wraps a failure with the user whose sample triggered it.
    #[error("user {user}: {source}")]
    Sample {
        user: UserId,
        #[source]
        source: Box<LfdaeError>,
    },

    /// Sparse input rows could not be assembled.
    #[error("invalid sparse input: {0}")]
    Sparse(String),

    #[error("shuffle failed: {0}")]
    Shuffle(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),
}

impl LfdaeError {
    /// Attaches the offending user id so a misbehaving data source can be traced.
    pub fn for_user(self, user: UserId) -> LfdaeError {
        match self {
            already @ LfdaeError::Sample { .. } => already,
            other => LfdaeError::Sample {
                user,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, LfdaeError>;
