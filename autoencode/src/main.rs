//! This crate ties in all the parts of the project and provides a command line interface
//! to build, inspect and run the autoencoders of the catalog.

use autoencode::{array_to_image, image_to_ndarray, latents_path, reconstruction_path, to_pixel};
use env_logger::Builder;
use feeder::{FeederConfig, ImageDataFeeder, ListingOrder};
use image::io::Reader as ImageReader;
use log::{debug, info, warn};
use ml::{
    architectures::IMAGE_SHAPE,
    compile_autoencoder,
    session::Session,
    weight_loader::{JsonWeightLoader, NpzWeightLoader, WeightLoader},
    Architecture, Autoencoder, ModelResult,
};
use ndarray::{Array2, Axis};
use ndarray_npy::{read_npy, write_npy};
use quicli::prelude::*;
use std::{ffi::OsStr, path::PathBuf};
use structopt::StructOpt;

/// Prints the layer summary of an architecture
#[derive(Debug, StructOpt)]
struct SummaryOpts {
    /// One of AE_128_to_1024, AE_128_to_256, AE_128_to_64
    architecture: Architecture,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Writes freshly initialized parameters to a checkpoint
#[derive(Debug, StructOpt)]
struct InitOpts {
    /// One of AE_128_to_1024, AE_128_to_256, AE_128_to_64
    architecture: Architecture,
    /// Path of the npz checkpoint to write
    #[structopt(parse(from_os_str))]
    output: PathBuf,
    /// Seed for the parameter initialization
    #[structopt(short = "s", long = "seed")]
    seed: Option<u64>,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Runs a single image through encoder and decoder
#[derive(Debug, StructOpt)]
struct ReconstructOpts {
    /// One of AE_128_to_1024, AE_128_to_256, AE_128_to_64
    architecture: Architecture,
    /// Path to the input image. Output image is saved under "<image>-reconstructed-ae.png"
    #[structopt(parse(from_os_str))]
    image: PathBuf,
    /// Checkpoint to load, npz or json. Randomly initialized parameters are used if missing
    #[structopt(short = "w", long = "weights", parse(from_os_str))]
    weights: Option<PathBuf>,
    /// Treat the input as npy file of latent codes and only run the decoder
    #[structopt(long = "from-latents")]
    from_latents: bool,
    /// Also save the latent code under "<image>-latents.npy"
    #[structopt(long = "save-latents")]
    save_latents: bool,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Feeds an image directory through an autoencoder, epoch by epoch
#[derive(Debug, StructOpt)]
struct EvaluateOpts {
    /// One of AE_128_to_1024, AE_128_to_256, AE_128_to_64
    architecture: Architecture,
    /// Directory containing nothing but images
    #[structopt(parse(from_os_str))]
    directory: PathBuf,
    #[structopt(short = "b", long = "batch-size", default_value = "32")]
    batch_size: usize,
    /// Number of images held back as test set
    #[structopt(short = "t", long = "test-size", default_value = "0")]
    test_size: usize,
    #[structopt(short = "e", long = "epochs", default_value = "1")]
    epochs: usize,
    /// Checkpoint to load, npz or json. Randomly initialized parameters are used if missing
    #[structopt(short = "w", long = "weights", parse(from_os_str))]
    weights: Option<PathBuf>,
    /// Seed for parameter initialization and batch shuffling
    #[structopt(short = "s", long = "seed")]
    seed: Option<u64>,
    /// Keep the filesystem's listing order instead of sorting the file names
    #[structopt(long = "unsorted")]
    unsorted: bool,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Build, inspect and run convolutional autoencoders for 128x128 grayscale images.
#[derive(Debug, StructOpt)]
#[structopt(name = "autoencode")]
enum Autoencode {
    #[structopt(
        name = "summary",
        about = "Prints the layers, output shapes and parameter counts of an architecture."
    )]
    Summary(SummaryOpts),
    #[structopt(
        name = "init",
        about = "Writes a freshly initialized checkpoint of an architecture."
    )]
    Init(InitOpts),
    #[structopt(
        name = "reconstruct",
        about = "Encodes and decodes a single image, saving the reconstruction next to it."
    )]
    Reconstruct(ReconstructOpts),
    #[structopt(
        name = "evaluate",
        about = "Streams a directory of images in batches and reports the reconstruction loss. \
        Decodes every image once per epoch and thus might take a while during execution."
    )]
    Evaluate(EvaluateOpts),
}

/// Trait for the subcommands that autoencode uses
trait AutoencodeOpts {
    /// Performs the subcommand
    fn run(&self) -> CliResult;
    /// Returns the verbosity command
    fn get_verbosity(&self) -> &Verbosity;
    /// Sets up logging
    fn setup_env_logger(&self) -> CliResult {
        let mut builder = Builder::from_default_env();

        builder
            .filter(None, self.get_verbosity().log_level().to_level_filter())
            .init();

        Ok(())
    }
}

/// Builds and compiles an architecture, loading the checkpoint if one is given
fn get_autoencoder(
    architecture: Architecture,
    weights: Option<&PathBuf>,
    seed: Option<u64>,
) -> ModelResult<Autoencoder> {
    let (encoder, decoder) = Session::new(seed).build(architecture)?;
    let mut autoencoder = compile_autoencoder(encoder, decoder)?;

    if let Some(path) = weights {
        let mut loader: Box<dyn WeightLoader> = match path.extension().and_then(OsStr::to_str) {
            Some("json") => Box::new(JsonWeightLoader::new(path)?),
            _ => Box::new(NpzWeightLoader::from_path(path)?),
        };
        autoencoder.load_weights(loader.as_mut())?;
        info!("Loaded checkpoint {}", path.display());
    }
    Ok(autoencoder)
}

impl AutoencodeOpts for SummaryOpts {
    fn run(&self) -> CliResult {
        let autoencoder = get_autoencoder(self.architecture, None, Some(0))?;
        println!("{}", autoencoder.encoder());
        println!("{}", autoencoder.decoder());
        println!(
            "Loss: {}, optimizer: {}",
            autoencoder.loss(),
            autoencoder.optimizer()
        );
        Ok(())
    }
    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AutoencodeOpts for InitOpts {
    fn run(&self) -> CliResult {
        let autoencoder = get_autoencoder(self.architecture, None, self.seed)?;
        autoencoder.save_weights(&self.output)?;
        println!(
            "Wrote {} parameters of {} to {}",
            autoencoder.num_parameters(),
            self.architecture,
            self.output.display()
        );
        Ok(())
    }
    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AutoencodeOpts for ReconstructOpts {
    fn run(&self) -> CliResult {
        let autoencoder = get_autoencoder(self.architecture, self.weights.as_ref(), None)?;

        let codes: Array2<f32> = if self.from_latents {
            read_npy(&self.image)?
        } else {
            // preprocessing and getting the image
            let img = ImageReader::open(&self.image)?.decode()?;
            let img_data = image_to_ndarray(&img, IMAGE_SHAPE).insert_axis(Axis(0));
            let codes = autoencoder.encode(&img_data)?;
            if self.save_latents {
                let path = latents_path(&self.image);
                write_npy(&path, &codes)?;
                info!("Saved latent code to {}", path.display());
            }
            codes
        };
        debug!("Decoding latent codes of shape {:?}", codes.dim());

        let reconstructed = autoencoder.decode(&codes)?;
        let first = match reconstructed.outer_iter().next() {
            Some(image) => image.mapv(to_pixel),
            None => {
                warn!("No latent codes in {}", self.image.display());
                return Ok(());
            }
        };

        let output_path = reconstruction_path(&self.image);
        array_to_image(&first).save(&output_path)?;
        println!("Saved reconstruction to {}", output_path.display());
        Ok(())
    }
    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AutoencodeOpts for EvaluateOpts {
    fn run(&self) -> CliResult {
        let autoencoder = get_autoencoder(self.architecture, self.weights.as_ref(), self.seed)?;
        let (height, width) = IMAGE_SHAPE;
        let config = FeederConfig {
            batch_size: self.batch_size,
            test_size: self.test_size,
            listing: if self.unsorted {
                ListingOrder::Filesystem
            } else {
                ListingOrder::Sorted
            },
            seed: self.seed,
            resize_to: Some((width as u32, height as u32)),
        };
        let mut feeder = ImageDataFeeder::with_config(&self.directory, config)?;

        for epoch in 1..=self.epochs {
            let mut total_loss = 0.0;
            let mut seen = 0;
            for i in 0..feeder.len() {
                let batch = feeder.get_batch(i)?;
                let loss = autoencoder.evaluate(batch.input(), batch.target())?;
                debug!("Epoch {}, batch {}: loss {:.6}", epoch, i, loss);
                total_loss += loss * batch.len() as f32;
                seen += batch.len();
            }
            feeder.on_epoch_end();

            let mean_loss = if seen > 0 {
                total_loss / seen as f32
            } else {
                0.0
            };
            println!(
                "Epoch {}/{}: {} {:.6} over {} images",
                epoch,
                self.epochs,
                autoencoder.loss(),
                mean_loss,
                seen
            );
        }

        if !feeder.test_files().is_empty() {
            let test_set = feeder.get_test_set()?;
            let loss = autoencoder.evaluate(&test_set, &test_set)?;
            println!(
                "Test set: {} {:.6} over {} images",
                autoencoder.loss(),
                loss,
                feeder.test_files().len()
            );
        }
        Ok(())
    }
    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl AutoencodeOpts for Autoencode {
    fn run(&self) -> CliResult {
        match self {
            Autoencode::Summary(c) => c.run(),
            Autoencode::Init(c) => c.run(),
            Autoencode::Reconstruct(c) => c.run(),
            Autoencode::Evaluate(c) => c.run(),
        }
    }

    fn get_verbosity(&self) -> &Verbosity {
        match self {
            Autoencode::Summary(c) => c.get_verbosity(),
            Autoencode::Init(c) => c.get_verbosity(),
            Autoencode::Reconstruct(c) => c.get_verbosity(),
            Autoencode::Evaluate(c) => c.get_verbosity(),
        }
    }
}

fn main() -> CliResult {
    let args = Autoencode::from_args();
    args.setup_env_logger()?;
    args.run()
}
