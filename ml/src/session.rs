//! The numeric context models are built in.
//!
//! A session owns the random source parameters are drawn from. It is acquired
//! once per process (or per experiment) and handed to whatever builds models,
//! so nothing in the crate relies on global state.
use log::debug;
use rand::{rngs::StdRng, SeedableRng};

use crate::{architectures::IMAGE_SHAPE, models::Sequential, Architecture, ModelResult};

pub struct Session {
    seed: Option<u64>,
    rng: StdRng,
}

impl Session {
    /// A seeded session builds identical models every time, an unseeded one
    /// draws its seed from the operating system.
    pub fn new(seed: Option<u64>) -> Session {
        Session {
            seed,
            rng: Session::make_rng(seed),
        }
    }

    fn make_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Starts over as if freshly created, for the next independent experiment.
    pub fn reset(&mut self) {
        debug!("Resetting session (seed {:?})", self.seed);
        self.rng = Session::make_rng(self.seed);
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Builds the (encoder, decoder) pair of an architecture for 128x128 images.
    pub fn build(&mut self, architecture: Architecture) -> ModelResult<(Sequential, Sequential)> {
        architecture.build(IMAGE_SHAPE, &mut self.rng)
    }

    pub fn build_by_name(&mut self, model_name: &str) -> ModelResult<(Sequential, Sequential)> {
        self.build(model_name.parse()?)
    }
}
