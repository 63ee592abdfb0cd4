use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::error::{LfdaeError, Result};
use crate::optimizer::{Adam, Moments};
use crate::Flt;

/// Half-width of the uniform range latent bias rows start in.
pub const LATENT_INIT_SCALE: Flt = 0.01;

/// A learned bias table, one row per category.
#[derive(Debug, Clone)]
pub struct LatentTable {
    name: &'static str,
    bias: Array2<Flt>,
    moments: Moments<ndarray::Ix2>,
}

/// A contextual latent factor (group or venue) injected into the hidden
/// pre-activation. A disabled factor owns no table and ignores its ids.
#[derive(Debug, Clone)]
pub enum LatentFactor {
    Enabled(LatentTable),
    Disabled,
}

impl LatentFactor {
    pub fn new<R: Rng + ?Sized>(
        name: &'static str,
        cardinality: Option<usize>,
        n_hidden: usize,
        init_scale: Flt,
        rng: &mut R,
    ) -> Result<LatentFactor> {
        match cardinality {
            None => Ok(LatentFactor::Disabled),
            Some(0) => Err(LfdaeError::Config(format!(
                "{} latent factor needs a positive cardinality",
                name
            ))),
            Some(n) => {
                let bias = Array2::random_using(
                    (n, n_hidden),
                    Uniform::new_inclusive(-init_scale, init_scale),
                    rng,
                );
                let moments = Moments::zeros_like(&bias);
                Ok(LatentFactor::Enabled(LatentTable {
                    name,
                    bias,
                    moments,
                }))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, LatentFactor::Enabled(_))
    }

    pub fn cardinality(&self) -> Option<usize> {
        match self {
            LatentFactor::Enabled(table) => Some(table.bias.nrows()),
            LatentFactor::Disabled => None,
        }
    }

    pub fn table(&self) -> Option<&Array2<Flt>> {
        match self {
            LatentFactor::Enabled(table) => Some(&table.bias),
            LatentFactor::Disabled => None,
        }
    }

    /// Rows of the table for `ids`, one per id, in order.
    pub fn lookup(&self, ids: &[usize]) -> Result<Option<Array2<Flt>>> {
        match self {
            LatentFactor::Disabled => Ok(None),
            LatentFactor::Enabled(table) => {
                table.check_ids(ids)?;
                Ok(Some(table.bias.select(Axis(0), ids)))
            }
        }
    }

    /// The single vector added to every row of the pre-activation: the looked up
    /// rows reduced by [`sum_over_batch`].
    pub fn context_vector(&self, ids: &[usize]) -> Result<Option<Array1<Flt>>> {
        Ok(self.lookup(ids)?.map(|rows| sum_over_batch(&rows)))
    }

    /// Gradient of the table given the gradient of the context vector. Each
    /// looked up row receives `d_context` once per occurrence of its id; all
    /// other rows get zero.
    pub fn gradient(&self, ids: &[usize], d_context: &Array1<Flt>) -> Result<Option<Array2<Flt>>> {
        match self {
            LatentFactor::Disabled => Ok(None),
            LatentFactor::Enabled(table) => {
                table.check_ids(ids)?;
                let mut grad = Array2::zeros(table.bias.raw_dim());
                for &id in ids {
                    grad.row_mut(id).scaled_add(1.0, d_context);
                }
                Ok(Some(grad))
            }
        }
    }

    pub(crate) fn apply_gradient(&mut self, adam: &Adam, grad: Option<&Array2<Flt>>) {
        if let (LatentFactor::Enabled(table), Some(grad)) = (self, grad) {
            adam.update(&mut table.bias, grad, &mut table.moments);
        }
    }
}

impl LatentTable {
    #[cfg(test)]
    pub(crate) fn bias_mut(&mut self) -> &mut Array2<Flt> {
        &mut self.bias
    }

    fn check_ids(&self, ids: &[usize]) -> Result<()> {
        if ids.is_empty() {
            return Err(LfdaeError::MissingContext(self.name));
        }
        let size = self.bias.nrows();
        match ids.iter().find(|&&id| id >= size) {
            Some(&index) => Err(LfdaeError::IndexOutOfRange {
                what: self.name,
                index,
                size,
            }),
            None => Ok(()),
        }
    }
}

/// Collapses a batch of looked up rows into one vector by summation. Every row
/// of the pre-activation then receives the same vector, so a batch mixing
/// several users' ids would share one blended context.
pub fn sum_over_batch(rows: &Array2<Flt>) -> Array1<Flt> {
    rows.sum_axis(Axis(0))
}
