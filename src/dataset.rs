use crate::error::{Error, Result};
use crate::model::NUM_CLASSES;
use crate::preprocess::IMAGE_PIXELS;
use log::debug;
use ndarray::prelude::*;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Raw flattened images and their one-hot labels, aligned row for row.
#[derive(Debug, Clone)]
pub struct Partition {
    pub images: Array2<f32>, // (N, 784), raw pixel values
    pub labels: Array2<f32>, // (N, 10), one-hot
}

impl Partition {
    pub fn new(images: Array2<f32>, labels: Array2<f32>) -> Result<Partition> {
        if images.ncols() != IMAGE_PIXELS {
            return Err(Error::Data(format!(
                "images must have {IMAGE_PIXELS} pixels, got {}",
                images.ncols()
            )));
        }
        if labels.ncols() != NUM_CLASSES {
            return Err(Error::Data(format!(
                "labels must have {NUM_CLASSES} classes, got {}",
                labels.ncols()
            )));
        }
        if images.nrows() != labels.nrows() {
            return Err(Error::Data(format!(
                "{} images but {} labels",
                images.nrows(),
                labels.nrows()
            )));
        }
        for (idx, label) in labels.outer_iter().enumerate() {
            let ones = label.iter().filter(|&&y| y == 1.0).count();
            let zeros = label.iter().filter(|&&y| y == 0.0).count();
            if ones != 1 || ones + zeros != NUM_CLASSES {
                return Err(Error::Data(format!("label {idx} is not one-hot: {label}")));
            }
        }
        Ok(Partition { images, labels })
    }

    /// Builds a partition from flattened pixels and class indices.
    pub fn from_digits(pixels: Vec<f32>, digits: &[u8]) -> Result<Partition> {
        let nb_samples = digits.len();
        if pixels.len() != nb_samples * IMAGE_PIXELS {
            return Err(Error::Data(format!(
                "{} pixels for {nb_samples} labels, expected {}",
                pixels.len(),
                nb_samples * IMAGE_PIXELS
            )));
        }
        let images = Array2::from_shape_vec((nb_samples, IMAGE_PIXELS), pixels)
            .map_err(|e| Error::Data(format!("failed to create image array: {e}")))?;

        let mut labels = Array2::zeros((nb_samples, NUM_CLASSES));
        for (i, &digit) in digits.iter().enumerate() {
            if digit as usize >= NUM_CLASSES {
                return Err(Error::Data(format!("label {i} out of range: {digit}")));
            }
            labels[(i, digit as usize)] = 1.0;
        }
        Partition::new(images, labels)
    }

    pub fn len(&self) -> usize {
        self.images.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the rows at `indices` into a fresh (images, labels) batch.
    pub fn select(&self, indices: &[usize]) -> (Array2<f32>, Array2<f32>) {
        (
            self.images.select(Axis(0), indices),
            self.labels.select(Axis(0), indices),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Datasets {
    pub train: Partition,
    pub validation: Partition,
    pub test: Partition,
}

impl Datasets {
    /// A learnable stand-in for MNIST: each class has a fixed random prototype image, and
    /// samples are that prototype plus gaussian noise, clamped to [0, 1].
    pub fn synthetic(
        train_len: usize,
        validation_len: usize,
        test_len: usize,
        seed: u64,
    ) -> Result<Datasets> {
        let mut rng = StdRng::seed_from_u64(seed);
        let prototypes = Array2::random_using((NUM_CLASSES, IMAGE_PIXELS), Uniform::new(0.0f32, 1.0), &mut rng);
        let noise = Normal::new(0.0f32, 0.2)
            .map_err(|e| Error::Data(format!("invalid noise distribution: {e}")))?;

        let mut partition = |len: usize| -> Result<Partition> {
            let digits: Vec<u8> = (0..len)
                .map(|_| rng.gen_range(0..NUM_CLASSES as u8))
                .collect();
            let mut pixels = Vec::with_capacity(len * IMAGE_PIXELS);
            for &digit in &digits {
                let sample_noise = Array1::random_using(IMAGE_PIXELS, noise, &mut rng);
                pixels.extend(
                    prototypes
                        .row(digit as usize)
                        .iter()
                        .zip(sample_noise.iter())
                        .map(|(&p, &n)| (p + n).clamp(0.0, 1.0)),
                );
            }
            Partition::from_digits(pixels, &digits)
        };

        Ok(Datasets {
            train: partition(train_len)?,
            validation: partition(validation_len)?,
            test: partition(test_len)?,
        })
    }
}

/// Mini-batch sampling on a partition: without replacement within an epoch,
/// reshuffled at every epoch boundary.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    rng: StdRng,
}

impl BatchSampler {
    pub fn new(len: usize, seed: u64) -> BatchSampler {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rng);
        BatchSampler {
            order,
            cursor: 0,
            epoch: 0,
            rng,
        }
    }

    /// Completed passes over the partition.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Indices of the next `n` samples. A batch that crosses an epoch boundary takes the
    /// rest of the current epoch and tops up from the freshly shuffled next one.
    pub fn next_indices(&mut self, n: usize) -> Result<Vec<usize>> {
        if n == 0 || n > self.order.len() {
            return Err(Error::Data(format!(
                "cannot draw a batch of {n} from a partition of {}",
                self.order.len()
            )));
        }
        let mut indices = Vec::with_capacity(n);
        while indices.len() < n {
            if self.cursor == self.order.len() {
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
                self.epoch += 1;
                debug!("[sampler] starting epoch {}", self.epoch);
            }
            let take = (n - indices.len()).min(self.order.len() - self.cursor);
            indices.extend_from_slice(&self.order[self.cursor..self.cursor + take]);
            self.cursor += take;
        }
        Ok(indices)
    }

    pub fn next_batch(
        &mut self,
        partition: &Partition,
        n: usize,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        if partition.len() != self.order.len() {
            return Err(Error::Data(format!(
                "sampler built for {} samples, partition has {}",
                self.order.len(),
                partition.len()
            )));
        }
        let indices = self.next_indices(n)?;
        Ok(partition.select(&indices))
    }
}
