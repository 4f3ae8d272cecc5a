use crate::dataset::Partition;
use crate::error::{Error, Result};
use ndarray::prelude::*;

pub const IMAGE_SIDE: usize = 28;
pub const IMAGE_PIXELS: usize = IMAGE_SIDE * IMAGE_SIDE;

/// Global pixel statistics of the training partition, computed once and then only read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

impl Normalization {
    pub fn new(mean: f32, std: f32) -> Result<Normalization> {
        if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
            return Err(Error::Numerical(format!(
                "unusable normalization statistics: mean={mean}, std={std}"
            )));
        }
        Ok(Normalization { mean, std })
    }

    pub fn from_partition(partition: &Partition) -> Result<Normalization> {
        Normalization::from_images(partition.images.view())
    }

    /// Mean and population standard deviation over every pixel of every image.
    /// Accumulates in f64: the training partition holds tens of millions of pixels.
    pub fn from_images(images: ArrayView2<f32>) -> Result<Normalization> {
        if images.is_empty() {
            return Err(Error::Data(
                "cannot compute normalization statistics of an empty partition".to_string(),
            ));
        }
        let count = images.len() as f64;
        let mean = images.iter().map(|&x| x as f64).sum::<f64>() / count;
        let variance = images
            .iter()
            .map(|&x| {
                let d = x as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / count;
        Normalization::new(mean as f32, variance.sqrt() as f32)
    }

    /// Standardizes a batch of flattened images and reshapes it to (N, 28, 28, 1).
    pub fn normalize(&self, batch: ArrayView2<f32>) -> Result<Array4<f32>> {
        if batch.ncols() != IMAGE_PIXELS {
            return Err(Error::shape(
                "normalize",
                format!("(N, {IMAGE_PIXELS}) flattened images"),
                batch.shape(),
            ));
        }
        let batch_size = batch.nrows();
        let (mean, std) = (self.mean, self.std);
        batch
            .mapv(|x| (x - mean) / std)
            .into_shape_with_order((batch_size, IMAGE_SIDE, IMAGE_SIDE, 1))
            .map_err(|_| Error::shape("normalize", "(N, 28, 28, 1)", batch.shape()))
    }
}
