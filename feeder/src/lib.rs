//! This crate feeds image directories to a training loop.
//!
//! A directory is listed once, split into a fixed test set and a train set,
//! and the train set is served in fixed-size batches of images normalized to
//! [0, 1]. Images are only decoded when a batch is requested.

mod feeder_errors;
pub mod image_data_feeder;
mod image_loading;

pub use feeder_errors::FeederError;
pub use image_data_feeder::{Batch, FeederConfig, ImageDataFeeder, ListingOrder};

/// Returned by everything that touches the image directory.
pub type FeederResult<T> = std::result::Result<T, FeederError>;

/// Random access to the batches of one epoch.
///
/// The training loop requests `get(i)` for every `i` in `0..len()` and then
/// calls `on_epoch_end`, once per epoch.
pub trait Sequence {
    type Item;

    /// Number of batches in an epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> FeederResult<Self::Item>;

    /// Hook run after the last batch of every epoch.
    fn on_epoch_end(&mut self) {}
}
