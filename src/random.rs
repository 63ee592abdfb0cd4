use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shuffle::fy::FisherYates;
use shuffle::shuffler::Shuffler;

use crate::error::{LfdaeError, Result};

/// Source of every random decision in a run: initialization, user order,
/// corruption and negative sampling.
pub struct RandomState {
    pub(crate) fy: FisherYates,
    pub(crate) rng: StdRng,
}

impl RandomState {
    /// Seeded when `seed` is given, entropy-backed otherwise.
    pub fn new(seed: Option<u64>) -> RandomState {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        RandomState {
            fy: FisherYates::default(),
            rng,
        }
    }

    /// Splits off an independent stream, so components can own their own state
    /// while a seeded run stays reproducible.
    pub fn fork(&mut self) -> RandomState {
        RandomState::new(Some(self.rng.gen()))
    }

    /// Full random permutation in place.
    pub fn shuffle<T: Clone>(&mut self, data: &mut Vec<T>) -> Result<()> {
        self.fy
            .shuffle(data, &mut self.rng)
            .map_err(|e| LfdaeError::Shuffle(e.to_string()))
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Default for RandomState {
    fn default() -> Self {
        RandomState::new(None)
    }
}
