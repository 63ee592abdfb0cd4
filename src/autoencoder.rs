use nalgebra_sparse::CsrMatrix;
use ndarray::{Array1, Array2, Axis, Ix1, Ix2, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use tracing::debug;

use crate::activation::Activation;
use crate::config::ModelConfig;
use crate::datasets::TrainingSample;
use crate::error::{LfdaeError, Result};
use crate::evaluation::{ranking_metrics, RankingMetrics};
use crate::latent::LatentFactor;
use crate::optimizer::{Adam, Moments};
use crate::random::RandomState;
use crate::Flt;

/// Denoising autoencoder over the event catalog with optional group and venue
/// bias vectors injected into the hidden layer.
///
/// ```text
/// pre     = x·W + b (+ venue context) (+ group context)
/// hidden  = hidden_activation(pre)
/// outputs = output_activation(hidden·V + c)
/// ```
///
/// All parameters live here and change only in [`LatentAutoEncoder::train_step`].
pub struct LatentAutoEncoder {
    n_inputs: usize,
    n_hidden: usize,
    n_outputs: usize,

    weights: Array2<Flt>,
    weights_moments: Moments<Ix2>,
    bias: Array1<Flt>,
    bias_moments: Moments<Ix1>,

    venue: LatentFactor,
    group: LatentFactor,

    output: OutputLayer,

    hidden_activation: Activation,
    output_activation: Activation,
    optimizer: Adam,
}

/// Fully connected projection from the hidden layer to the event catalog.
struct OutputLayer {
    weights: Array2<Flt>,
    weights_moments: Moments<Ix2>,
    bias: Array1<Flt>,
    bias_moments: Moments<Ix1>,
}

/// Intermediate values of one forward evaluation, kept for the backward pass.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    pub preactivation: Array2<Flt>,
    pub hidden: Array2<Flt>,
    pub output_preactivation: Array2<Flt>,
    pub outputs: Array2<Flt>,
}

/// Loss gradients for every parameter of the model.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub weights: Array2<Flt>,
    pub bias: Array1<Flt>,
    pub venue: Option<Array2<Flt>>,
    pub group: Option<Array2<Flt>>,
    pub output_weights: Array2<Flt>,
    pub output_bias: Array1<Flt>,
}

impl LatentAutoEncoder {
    pub fn new(config: &ModelConfig) -> Result<LatentAutoEncoder> {
        LatentAutoEncoder::with_random_state(config, &mut RandomState::default())
    }

    pub fn with_random_state(
        config: &ModelConfig,
        random_state: &mut RandomState,
    ) -> Result<LatentAutoEncoder> {
        let (hidden_activation, output_activation) = config.validate()?;
        let rng = random_state.rng();
        let (n_inputs, n_hidden, n_outputs) = (config.n_inputs, config.n_hidden, config.n_outputs);

        let weights = glorot_uniform((n_inputs, n_hidden), n_inputs, n_hidden, rng);
        let bias = glorot_uniform(n_hidden, n_hidden, n_hidden, rng);
        let venue = LatentFactor::new(
            "venue",
            config.n_venues,
            n_hidden,
            config.latent_init_scale,
            rng,
        )?;
        let group = LatentFactor::new(
            "group",
            config.n_groups,
            n_hidden,
            config.latent_init_scale,
            rng,
        )?;
        let output_weights = glorot_uniform((n_hidden, n_outputs), n_hidden, n_outputs, rng);
        let output_bias = Array1::zeros(n_outputs);

        debug!(
            n_inputs,
            n_hidden,
            n_outputs,
            groups = ?config.n_groups,
            venues = ?config.n_venues,
            hidden = %hidden_activation,
            output = %output_activation,
            "built latent autoencoder"
        );

        Ok(LatentAutoEncoder {
            n_inputs,
            n_hidden,
            n_outputs,
            weights_moments: Moments::zeros_like(&weights),
            weights,
            bias_moments: Moments::zeros_like(&bias),
            bias,
            venue,
            group,
            output: OutputLayer {
                weights_moments: Moments::zeros_like(&output_weights),
                weights: output_weights,
                bias_moments: Moments::zeros_like(&output_bias),
                bias: output_bias,
            },
            hidden_activation,
            output_activation,
            optimizer: Adam::new(config.learning_rate),
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn weights(&self) -> &Array2<Flt> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<Flt> {
        &self.bias
    }

    #[cfg(test)]
    pub(crate) fn bias_mut(&mut self) -> &mut Array1<Flt> {
        &mut self.bias
    }

    pub fn group_factor(&self) -> &LatentFactor {
        &self.group
    }

    pub fn venue_factor(&self) -> &LatentFactor {
        &self.venue
    }

    pub fn output_weights(&self) -> &Array2<Flt> {
        &self.output.weights
    }

    pub fn output_bias(&self) -> &Array1<Flt> {
        &self.output.bias
    }

    pub fn steps_taken(&self) -> i32 {
        self.optimizer.timestep()
    }

    /// Runs the network on a batch of sparse input rows. Ids of a disabled
    /// factor are never read.
    pub fn forward(
        &self,
        x: &CsrMatrix<Flt>,
        group_id: &[usize],
        venue_id: &[usize],
    ) -> Result<ForwardPass> {
        if x.ncols() != self.n_inputs {
            return Err(LfdaeError::ShapeMismatch {
                what: "input",
                expected: vec![x.nrows(), self.n_inputs],
                actual: vec![x.nrows(), x.ncols()],
            });
        }

        let mut preactivation = sparse_dot(x, &self.weights);
        preactivation += &self.bias;
        if let Some(venue_context) = self.venue.context_vector(venue_id)? {
            preactivation += &venue_context;
        }
        if let Some(group_context) = self.group.context_vector(group_id)? {
            preactivation += &group_context;
        }

        let hidden_activation = self.hidden_activation;
        let hidden = preactivation.mapv(|v| hidden_activation.apply(v));

        let mut output_preactivation = hidden.dot(&self.output.weights);
        output_preactivation += &self.output.bias;
        let output_activation = self.output_activation;
        let outputs = output_preactivation.mapv(|v| output_activation.apply(v));

        Ok(ForwardPass {
            preactivation,
            hidden,
            output_preactivation,
            outputs,
        })
    }

    /// Scores for every event, one row per input row.
    pub fn predict(
        &self,
        x: &CsrMatrix<Flt>,
        group_id: &[usize],
        venue_id: &[usize],
    ) -> Result<Array2<Flt>> {
        Ok(self.forward(x, group_id, venue_id)?.outputs)
    }

    /// Mean squared error between `y` and the entries of `outputs` named by
    /// `gather_indices`. No other entry of `outputs` is read.
    pub fn loss(
        outputs: &Array2<Flt>,
        gather_indices: &[(usize, usize)],
        y: &Array1<Flt>,
    ) -> Result<Flt> {
        let targets = gather(outputs, gather_indices, y.len())?;
        if targets.is_empty() {
            return Ok(0.0);
        }
        let n = targets.len() as Flt;
        Ok(targets
            .iter()
            .zip(y.iter())
            .map(|(t, v)| (t - v).powi(2))
            .sum::<Flt>()
            / n)
    }

    /// Loss of a sample under the current parameters, without updating them.
    pub fn sample_loss(&self, sample: &TrainingSample) -> Result<Flt> {
        self.check_sample(sample)?;
        let pass = self.forward(&sample.x, &sample.group_id, &sample.venue_id)?;
        LatentAutoEncoder::loss(&pass.outputs, &sample.gather_indices(), &sample.y)
    }

    /// Loss and its gradient with respect to every parameter.
    pub fn gradients(&self, sample: &TrainingSample) -> Result<(Flt, Gradients)> {
        self.check_sample(sample)?;
        let pass = self.forward(&sample.x, &sample.group_id, &sample.venue_id)?;
        let gather_indices = sample.gather_indices();
        let loss = LatentAutoEncoder::loss(&pass.outputs, &gather_indices, &sample.y)?;

        // d loss / d outputs is non-zero only on gathered entries
        let mut d_outputs = Array2::<Flt>::zeros(pass.outputs.raw_dim());
        if !sample.y.is_empty() {
            let scale = 2.0 / sample.y.len() as Flt;
            for (&(row, col), &target) in gather_indices.iter().zip(sample.y.iter()) {
                d_outputs[[row, col]] += scale * (pass.outputs[[row, col]] - target);
            }
        }

        let output_activation = self.output_activation;
        let d_output_pre = Zip::from(&d_outputs)
            .and(&pass.output_preactivation)
            .and(&pass.outputs)
            .map_collect(|&g, &x, &y| g * output_activation.derivative(x, y));
        let output_weights = pass.hidden.t().dot(&d_output_pre);
        let output_bias = d_output_pre.sum_axis(Axis(0));

        let d_hidden = d_output_pre.dot(&self.output.weights.t());
        let hidden_activation = self.hidden_activation;
        let d_pre = Zip::from(&d_hidden)
            .and(&pass.preactivation)
            .and(&pass.hidden)
            .map_collect(|&g, &x, &y| g * hidden_activation.derivative(x, y));

        let weights = sparse_transpose_dot(&sample.x, &d_pre);
        let bias = d_pre.sum_axis(Axis(0));
        // each context vector was broadcast to every row, same as b
        let venue = self.venue.gradient(&sample.venue_id, &bias)?;
        let group = self.group.gradient(&sample.group_id, &bias)?;

        Ok((
            loss,
            Gradients {
                weights,
                bias,
                venue,
                group,
                output_weights,
                output_bias,
            },
        ))
    }

    /// One Adam update on the partial reconstruction loss of `sample`. Returns
    /// the loss measured before the update.
    pub fn train_step(&mut self, sample: &TrainingSample) -> Result<Flt> {
        let (loss, grads) = self.gradients(sample)?;

        self.optimizer.begin_step();
        let adam = &self.optimizer;
        adam.update(&mut self.weights, &grads.weights, &mut self.weights_moments);
        adam.update(&mut self.bias, &grads.bias, &mut self.bias_moments);
        self.venue.apply_gradient(adam, grads.venue.as_ref());
        self.group.apply_gradient(adam, grads.group.as_ref());
        adam.update(
            &mut self.output.weights,
            &grads.output_weights,
            &mut self.output.weights_moments,
        );
        adam.update(
            &mut self.output.bias,
            &grads.output_bias,
            &mut self.output.bias_moments,
        );

        Ok(loss)
    }

    /// precision@k and recall@k of `outputs` against one held-out index per row.
    pub fn ranking_metrics(
        &self,
        outputs: &Array2<Flt>,
        actual_indices: &[usize],
        k: usize,
    ) -> Result<RankingMetrics> {
        ranking_metrics(outputs, actual_indices, k)
    }

    fn check_sample(&self, sample: &TrainingSample) -> Result<()> {
        if sample.item.len() != sample.y.len() {
            return Err(LfdaeError::ShapeMismatch {
                what: "item indices",
                expected: vec![sample.y.len()],
                actual: vec![sample.item.len()],
            });
        }
        if sample.x.nrows() != sample.y.len() {
            return Err(LfdaeError::ShapeMismatch {
                what: "input rows",
                expected: vec![sample.y.len(), self.n_inputs],
                actual: vec![sample.x.nrows(), sample.x.ncols()],
            });
        }
        Ok(())
    }
}

/// Picks `outputs[row, col]` for every gather pair, checking each pair first.
fn gather(
    outputs: &Array2<Flt>,
    gather_indices: &[(usize, usize)],
    expected: usize,
) -> Result<Array1<Flt>> {
    if gather_indices.len() != expected {
        return Err(LfdaeError::ShapeMismatch {
            what: "gather indices",
            expected: vec![expected, 2],
            actual: vec![gather_indices.len(), 2],
        });
    }
    let (rows, cols) = outputs.dim();
    gather_indices
        .iter()
        .map(|&(row, col)| {
            if row >= rows {
                Err(LfdaeError::IndexOutOfRange {
                    what: "gather row",
                    index: row,
                    size: rows,
                })
            } else if col >= cols {
                Err(LfdaeError::IndexOutOfRange {
                    what: "gather column",
                    index: col,
                    size: cols,
                })
            } else {
                Ok(outputs[[row, col]])
            }
        })
        .collect()
}

/// `x · weights` for a sparse `x`.
fn sparse_dot(x: &CsrMatrix<Flt>, weights: &Array2<Flt>) -> Array2<Flt> {
    let mut result = Array2::zeros((x.nrows(), weights.ncols()));
    for (r, row) in x.row_iter().enumerate() {
        let mut out = result.row_mut(r);
        for (&feature, &value) in row.col_indices().iter().zip(row.values()) {
            out.scaled_add(value, &weights.row(feature));
        }
    }
    result
}

/// `xᵀ · grad` for a sparse `x`; only rows of active input features are non-zero.
fn sparse_transpose_dot(x: &CsrMatrix<Flt>, grad: &Array2<Flt>) -> Array2<Flt> {
    let mut result = Array2::zeros((x.ncols(), grad.ncols()));
    for (r, row) in x.row_iter().enumerate() {
        let upstream = grad.row(r);
        for (&feature, &value) in row.col_indices().iter().zip(row.values()) {
            result.row_mut(feature).scaled_add(value, &upstream);
        }
    }
    result
}

/// U(-limit, limit) with `limit = sqrt(6 / (fan_in + fan_out))`.
fn glorot_uniform<Sh, D, R>(shape: Sh, fan_in: usize, fan_out: usize, rng: &mut R) -> ndarray::Array<Flt, D>
where
    Sh: ndarray::ShapeBuilder<Dim = D>,
    D: ndarray::Dimension,
    R: Rng + ?Sized,
{
    let limit = (6.0 / (fan_in + fan_out) as Flt).sqrt();
    ndarray::Array::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
}
