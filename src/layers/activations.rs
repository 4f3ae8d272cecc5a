use crate::error::{Error, Result};
use crate::model::Module;
use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Default)]
pub struct ReluLayer {
    last_input: Option<ArrayD<f32>>,
}

impl ReluLayer {
    pub fn new() -> ReluLayer {
        ReluLayer { last_input: None }
    }
}

impl Module for ReluLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let out = input.mapv(|x| x.max(0.0));
        self.last_input = Some(input);
        Ok(out)
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(input.mapv_into(|x| x.max(0.0)))
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let last_input = self
            .last_input
            .as_ref()
            .ok_or(Error::Invalid("relu: run forward before backward"))?;
        if last_input.shape() != dz.shape() {
            return Err(Error::shape(
                "relu backward",
                format!("{:?}", last_input.shape()),
                dz.shape(),
            ));
        }
        let mut dz = dz;
        dz.zip_mut_with(last_input, |d, &x| {
            if x <= 0.0 {
                *d = 0.0;
            }
        });
        Ok(dz)
    }

    fn zero_grad(&mut self) {
        self.last_input = None;
    }
}

/// Inverted dropout: while training, each activation is kept with probability
/// `1 - rate` and scaled by `1 / (1 - rate)`. Identity at evaluation time.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    rate: f32,
    rng: StdRng,
    last_mask: Option<ArrayD<f32>>,
}

impl DropoutLayer {
    /// The layer draws its masks from its own generator, seeded from `rng`.
    ///
    /// # Panics
    ///
    /// If `rate` is outside `[0, 1)`. `TrainConfig::validate` rejects such rates before a
    /// network is built.
    pub fn new<R: Rng + ?Sized>(rate: f32, rng: &mut R) -> DropoutLayer {
        assert!(
            (0.0..1.0).contains(&rate),
            "dropout rate must be in [0, 1), got {rate}"
        );
        DropoutLayer {
            rate,
            rng: StdRng::seed_from_u64(rng.gen()),
            last_mask: None,
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Module for DropoutLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let keep = 1.0 - self.rate;
        let mask = ArrayD::random_using(input.raw_dim(), Uniform::new(0.0f32, 1.0), &mut self.rng)
            .mapv_into(|u| if u < keep { 1.0 / keep } else { 0.0 });
        let out = input * &mask;
        self.last_mask = Some(mask);
        Ok(out)
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(input)
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mask = self
            .last_mask
            .as_ref()
            .ok_or(Error::Invalid("dropout: run forward before backward"))?;
        if mask.shape() != dz.shape() {
            return Err(Error::shape(
                "dropout backward",
                format!("{:?}", mask.shape()),
                dz.shape(),
            ));
        }
        Ok(dz * mask)
    }

    fn zero_grad(&mut self) {
        self.last_mask = None;
    }
}
