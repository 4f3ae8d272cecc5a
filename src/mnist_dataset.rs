use crate::dataset::{Datasets, Partition};
use crate::error::{Error, Result};
use log::info;
use mnist::MnistBuilder;
use std::path::Path;

pub const TRAIN_LEN: u32 = 55_000;
pub const VALIDATION_LEN: u32 = 5_000;
pub const TEST_LEN: u32 = 10_000;

const IDX_FILES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

/// Loads MNIST from the uncompressed idx files in `base_path`.
/// The 60 000 training images are split 55 000 train / 5 000 validation; the 10 000
/// test images form the test partition. Pixels are scaled to [0, 1].
pub fn load_mnist(base_path: &Path) -> Result<Datasets> {
    for file in IDX_FILES {
        if !base_path.join(file).is_file() {
            return Err(Error::Data(format!(
                "missing MNIST file {} (expected the uncompressed idx files in {})",
                file,
                base_path.display()
            )));
        }
    }
    let base = base_path
        .to_str()
        .ok_or_else(|| Error::Data(format!("non UTF-8 data path: {}", base_path.display())))?;

    let mnist = MnistBuilder::new()
        .base_path(base)
        .training_set_length(TRAIN_LEN)
        .validation_set_length(VALIDATION_LEN)
        .test_set_length(TEST_LEN)
        .finalize();

    let datasets = Datasets {
        train: Partition::from_digits(scale(mnist.trn_img), &mnist.trn_lbl)?,
        validation: Partition::from_digits(scale(mnist.val_img), &mnist.val_lbl)?,
        test: Partition::from_digits(scale(mnist.tst_img), &mnist.tst_lbl)?,
    };
    info!(
        "[MNIST] train: {}, validation: {}, test: {}",
        datasets.train.len(),
        datasets.validation.len(),
        datasets.test.len()
    );
    Ok(datasets)
}

fn scale(pixels: Vec<u8>) -> Vec<f32> {
    pixels.into_iter().map(|p| p as f32 / 255.0).collect()
}
