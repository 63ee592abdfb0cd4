use crate::activation::Activation;
use crate::error::{LfdaeError, Result};
use crate::latent::LATENT_INIT_SCALE;
use crate::optimizer::DEFAULT_LEARNING_RATE;
use crate::random::RandomState;
use crate::Flt;

/// Shape and hyperparameters of a [`crate::LatentAutoEncoder`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub n_inputs: usize,
    pub n_hidden: usize,
    pub n_outputs: usize,
    /// `None` disables the group latent factor.
    pub n_groups: Option<usize>,
    /// `None` disables the venue latent factor.
    pub n_venues: Option<usize>,
    pub hidden_activation: String,
    pub output_activation: String,
    pub learning_rate: Flt,
    pub latent_init_scale: Flt,
}

impl ModelConfig {
    pub fn new(
        n_inputs: usize,
        n_hidden: usize,
        n_outputs: usize,
        n_groups: Option<usize>,
        n_venues: Option<usize>,
        hidden_activation: &str,
        output_activation: &str,
        learning_rate: Flt,
    ) -> ModelConfig {
        ModelConfig {
            n_inputs,
            n_hidden,
            n_outputs,
            n_groups,
            n_venues,
            hidden_activation: hidden_activation.to_string(),
            output_activation: output_activation.to_string(),
            learning_rate,
            latent_init_scale: LATENT_INIT_SCALE,
        }
    }

    /// A model with the default relu/sigmoid activations and learning rate.
    pub fn with_dimensions(
        n_inputs: usize,
        n_hidden: usize,
        n_outputs: usize,
        n_groups: Option<usize>,
        n_venues: Option<usize>,
    ) -> ModelConfig {
        ModelConfig::new(
            n_inputs,
            n_hidden,
            n_outputs,
            n_groups,
            n_venues,
            "relu",
            "sigmoid",
            DEFAULT_LEARNING_RATE,
        )
    }

    /// Checks dimensions and learning rate, and resolves both activation names.
    pub fn validate(&self) -> Result<(Activation, Activation)> {
        for (name, value) in [
            ("n_inputs", self.n_inputs),
            ("n_hidden", self.n_hidden),
            ("n_outputs", self.n_outputs),
        ] {
            if value == 0 {
                return Err(LfdaeError::Config(format!("{} must be positive", name)));
            }
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(LfdaeError::Config(format!(
                "learning rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if !(self.latent_init_scale.is_finite() && self.latent_init_scale >= 0.0) {
            return Err(LfdaeError::Config(format!(
                "latent init scale must be non-negative, got {}",
                self.latent_init_scale
            )));
        }
        let hidden = Activation::lookup(&self.hidden_activation)?;
        let output = Activation::lookup(&self.output_activation)?;
        Ok((hidden, output))
    }
}

/// What a training run does each epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    /// Negatives sampled per positive event.
    pub negative_count: usize,
    /// Fraction of a user's input events zeroed before each step.
    pub corruption_ratio: Flt,
    pub use_group: bool,
    pub use_venue: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 5,
            negative_count: 4,
            corruption_ratio: 0.1,
            use_group: true,
            use_venue: true,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.corruption_ratio) {
            return Err(LfdaeError::Config(format!(
                "corruption ratio must lie in [0, 1], got {}",
                self.corruption_ratio
            )));
        }
        Ok(())
    }

    /// The cardinality to build a factor with, or `None` when it is switched off.
    pub fn group_space(&self, n_groups: usize) -> Option<usize> {
        self.use_group.then_some(n_groups)
    }

    pub fn venue_space(&self, n_venues: usize) -> Option<usize> {
        self.use_venue.then_some(n_venues)
    }
}

/// Process-level settings handed to the run explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Seeds every random stream of the run; entropy when absent.
    pub seed: Option<u64>,
    /// Show a progress bar over epochs.
    pub verbose: bool,
}

impl RuntimeConfig {
    pub fn random_state(&self) -> RandomState {
        RandomState::new(self.seed)
    }
}
