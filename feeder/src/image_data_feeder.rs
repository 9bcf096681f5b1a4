use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use ndarray::Array3;
use num::Integer;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{image_loading::to_data_matrix, FeederError, FeederResult, Sequence};

/// Order of the directory listing, which decides the test / train split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingOrder {
    /// File names sorted, so the split is the same on every platform
    Sorted,
    /// Whatever order the filesystem lists the entries in
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeederConfig {
    pub batch_size: usize,
    /// Number of files (from the start of the listing) held back as test set
    pub test_size: usize,
    pub listing: ListingOrder,
    /// Seed for the end of epoch reshuffles, drawn from the OS if missing
    pub seed: Option<u64>,
    /// Resize every image to (width, height) while decoding
    pub resize_to: Option<(u32, u32)>,
}

impl FeederConfig {
    pub fn new(batch_size: usize, test_size: usize) -> FeederConfig {
        FeederConfig {
            batch_size,
            test_size,
            listing: ListingOrder::Sorted,
            seed: None,
            resize_to: None,
        }
    }
}

/// One batch of (images, height, width) data in [0, 1]. An autoencoder
/// reconstructs its input, so input and target are the very same array.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    data: Array3<f32>,
}

impl Batch {
    pub fn input(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn target(&self) -> &Array3<f32> {
        &self.data
    }

    /// Number of images in the batch.
    pub fn len(&self) -> usize {
        self.data.len_of(ndarray::Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }
}

/// Serves the images of a directory in batches.
///
/// The first `test_size` files of the listing form the test set, the rest is
/// the train set. An epoch is `ceil(train files / batch size)` batches; the
/// number is fixed when the feeder is created. The last batch of an epoch is
/// smaller when the train files don't divide evenly.
#[derive(Debug)]
pub struct ImageDataFeeder {
    img_dir: PathBuf,
    batch_size: usize,
    file_names: Vec<PathBuf>,
    test_files: Vec<PathBuf>,
    train_files: Vec<PathBuf>,
    epoch_size: usize,
    resize_to: Option<(u32, u32)>,
    rng: StdRng,
}

impl ImageDataFeeder {
    /// Feeder over every entry of `img_dir`, listed in sorted order.
    pub fn new<P: AsRef<Path>>(
        batch_size: usize,
        test_size: usize,
        img_dir: P,
    ) -> FeederResult<ImageDataFeeder> {
        ImageDataFeeder::with_config(img_dir, FeederConfig::new(batch_size, test_size))
    }

    pub fn with_config<P: AsRef<Path>>(
        img_dir: P,
        config: FeederConfig,
    ) -> FeederResult<ImageDataFeeder> {
        let file_names = list_files(img_dir.as_ref(), config.listing)?;
        ImageDataFeeder::from_file_names(img_dir, file_names, config)
    }

    /// Feeder over an explicit list of file names relative to `img_dir`, in
    /// the given order. The listing order of `config` is not applied.
    pub fn from_file_names<P: AsRef<Path>>(
        img_dir: P,
        file_names: Vec<PathBuf>,
        config: FeederConfig,
    ) -> FeederResult<ImageDataFeeder> {
        if config.batch_size == 0 {
            return Err(FeederError::InvalidConfig(
                "batch size must be positive".to_string(),
            ));
        }
        if config.test_size > file_names.len() {
            return Err(FeederError::InvalidConfig(format!(
                "test size {} exceeds the {} files found",
                config.test_size,
                file_names.len()
            )));
        }

        let test_files = file_names[..config.test_size].to_vec();
        let train_files = file_names[config.test_size..].to_vec();
        let epoch_size = Integer::div_ceil(&train_files.len(), &config.batch_size);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            "Initialized a feeder of {} images ({} test, {} train, {} batches per epoch)",
            file_names.len(),
            test_files.len(),
            train_files.len(),
            epoch_size
        );
        Ok(ImageDataFeeder {
            img_dir: img_dir.as_ref().to_path_buf(),
            batch_size: config.batch_size,
            file_names,
            test_files,
            train_files,
            epoch_size,
            resize_to: config.resize_to,
            rng,
        })
    }

    /// Number of batches in one epoch.
    pub fn len(&self) -> usize {
        self.epoch_size
    }

    pub fn is_empty(&self) -> bool {
        self.epoch_size == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn img_dir(&self) -> &Path {
        &self.img_dir
    }

    /// All files, in listing order.
    pub fn file_names(&self) -> &[PathBuf] {
        &self.file_names
    }

    pub fn test_files(&self) -> &[PathBuf] {
        &self.test_files
    }

    /// Train files in the order of the current epoch.
    pub fn train_files(&self) -> &[PathBuf] {
        &self.train_files
    }

    /// Decodes the `index`-th batch of the current epoch.
    pub fn get_batch(&self, index: usize) -> FeederResult<Batch> {
        if index >= self.epoch_size {
            return Err(FeederError::IndexOutOfRange {
                index,
                len: self.epoch_size,
            });
        }
        let batch_start = index * self.batch_size;
        let batch_end = ((index + 1) * self.batch_size).min(self.train_files.len());
        debug!("Loading batch {} (files {}..{})", index, batch_start, batch_end);

        let data = self.to_data_matrix(&self.train_files[batch_start..batch_end])?;
        Ok(Batch { data })
    }

    /// Reshuffles the train files so the next epoch sees different batches.
    /// Nothing but their order changes.
    pub fn on_epoch_end(&mut self) {
        self.train_files.shuffle(&mut self.rng);
        debug!("Reshuffled {} train files", self.train_files.len());
    }

    /// The whole test set as one array. Does not change the feeder.
    pub fn get_test_set(&self) -> FeederResult<Array3<f32>> {
        self.to_data_matrix(&self.test_files)
    }

    /// The train files one epoch covers, which is the whole train set.
    pub fn get_training_set(&self) -> FeederResult<Array3<f32>> {
        let end = (self.epoch_size * self.batch_size).min(self.train_files.len());
        self.to_data_matrix(&self.train_files[..end])
    }

    fn to_data_matrix(&self, file_names: &[PathBuf]) -> FeederResult<Array3<f32>> {
        to_data_matrix(&self.img_dir, file_names, self.resize_to)
    }
}

impl Sequence for ImageDataFeeder {
    type Item = Batch;

    fn len(&self) -> usize {
        ImageDataFeeder::len(self)
    }

    fn get(&self, index: usize) -> FeederResult<Batch> {
        self.get_batch(index)
    }

    fn on_epoch_end(&mut self) {
        ImageDataFeeder::on_epoch_end(self)
    }
}

/// Names of all entries of a directory. No filtering happens: anything that
/// is not an image fails once it is decoded.
fn list_files(img_dir: &Path, order: ListingOrder) -> FeederResult<Vec<PathBuf>> {
    let read_error = |source| FeederError::DirectoryRead {
        path: img_dir.to_path_buf(),
        source,
    };

    let mut file_names = Vec::new();
    for entry in fs::read_dir(img_dir).map_err(read_error)? {
        file_names.push(PathBuf::from(entry.map_err(read_error)?.file_name()));
    }
    if order == ListingOrder::Sorted {
        file_names.sort();
    }
    Ok(file_names)
}
