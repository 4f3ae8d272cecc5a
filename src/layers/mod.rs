pub use crate::layers::activations::{DropoutLayer, ReluLayer};
pub use crate::layers::conv::{Conv2dLayer, FlattenLayer, MaxPoolLayer, Padding};
pub use crate::layers::fc::FcLayer;
pub use crate::model::{Module, Param, ParamKind};

use crate::error::{Error, Result};
use ndarray::prelude::*;

pub mod activations;
pub mod conv;
pub mod fc;

#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv2dLayer),
    Pool(MaxPoolLayer),
    Flatten(FlattenLayer),
    FC(FcLayer),
    ReLU(ReluLayer),
    Dropout(DropoutLayer),
}

impl Layer {
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Conv(_) => "conv",
            Layer::Pool(_) => "max_pool",
            Layer::Flatten(_) => "flatten",
            Layer::FC(_) => "fc",
            Layer::ReLU(_) => "relu",
            Layer::Dropout(_) => "dropout",
        }
    }

    /// Number of trainable scalars held by this layer.
    pub fn num_params(&self) -> usize {
        match self {
            Layer::Conv(l) => l.kernels_mat.len() + l.b.len(),
            Layer::FC(l) => l.weights.len() + l.bias.len(),
            _ => 0,
        }
    }
}

impl Module for Layer {
    fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Layer::Conv(l) => l.forward(input),
            Layer::Pool(l) => l.forward(input),
            Layer::Flatten(l) => l.forward(input),
            Layer::FC(l) => l.forward(input),
            Layer::ReLU(l) => l.forward(input),
            Layer::Dropout(l) => l.forward(input),
        }
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Layer::Conv(l) => l.infer(input),
            Layer::Pool(l) => l.infer(input),
            Layer::Flatten(l) => l.infer(input),
            Layer::FC(l) => l.infer(input),
            Layer::ReLU(l) => l.infer(input),
            Layer::Dropout(l) => l.infer(input),
        }
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Layer::Conv(l) => l.backward(dz),
            Layer::Pool(l) => l.backward(dz),
            Layer::Flatten(l) => l.backward(dz),
            Layer::FC(l) => l.backward(dz),
            Layer::ReLU(l) => l.backward(dz),
            Layer::Dropout(l) => l.backward(dz),
        }
    }

    fn zero_grad(&mut self) {
        match self {
            Layer::Conv(l) => l.zero_grad(),
            Layer::Pool(l) => l.zero_grad(),
            Layer::Flatten(l) => l.zero_grad(),
            Layer::FC(l) => l.zero_grad(),
            Layer::ReLU(l) => l.zero_grad(),
            Layer::Dropout(l) => l.zero_grad(),
        }
    }

    fn params_mut(&mut self) -> Vec<Param<'_>> {
        match self {
            Layer::Conv(l) => l.params_mut(),
            Layer::FC(l) => l.params_mut(),
            _ => Vec::new(), // no weights in other layers
        }
    }
}

/// Casts a dynamic tensor to a fixed rank, reporting the offending shape on failure.
pub(crate) fn into_rank<D: Dimension>(
    input: ArrayD<f32>,
    context: &'static str,
    expected: &str,
) -> Result<Array<f32, D>> {
    let shape = input.shape().to_vec();
    input
        .into_dimensionality::<D>()
        .map_err(|_| Error::shape(context, expected, &shape))
}
