use tracing::debug;

use crate::autoencoder::LatentAutoEncoder;
use crate::config::TrainConfig;
use crate::datasets::{InteractionSource, UserId};
use crate::error::Result;
use crate::random::RandomState;
use crate::Flt;

/// Runs training epochs: one step per user, users in a fresh random order each
/// epoch.
pub struct Trainer {
    config: TrainConfig,
    random_state: RandomState,
}

impl Trainer {
    pub fn new(config: TrainConfig, random_state: RandomState) -> Result<Trainer> {
        config.validate()?;
        Ok(Trainer {
            config,
            random_state,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// One pass over `users`. Returns the summed loss of every step taken.
    pub fn run_epoch<S: InteractionSource>(
        &mut self,
        model: &mut LatentAutoEncoder,
        source: &mut S,
        users: &[UserId],
    ) -> Result<Flt> {
        let mut order = users.to_vec();
        self.random_state.shuffle(&mut order)?;

        let mut epoch_loss = 0.0;
        for user in order {
            let sample = source
                .get_user_train_sample(user, self.config.negative_count, self.config.corruption_ratio)
                .map_err(|e| e.for_user(user))?;
            if sample.is_empty() {
                debug!(user, "empty training sample, skipping");
                continue;
            }
            epoch_loss += model.train_step(&sample).map_err(|e| e.for_user(user))?;
        }
        Ok(epoch_loss)
    }
}
