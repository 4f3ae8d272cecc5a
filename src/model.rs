use crate::error::{Error, Result};
use crate::layers::{
    into_rank, Conv2dLayer, DropoutLayer, FcLayer, FlattenLayer, Layer, MaxPoolLayer, Padding,
    ReluLayer,
};
use crate::preprocess::IMAGE_SIDE;
use log::debug;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub const NUM_CLASSES: usize = 10;

pub trait Module {
    /// Training-mode forward pass. Caches whatever `backward` will need; dropout is active.
    fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>>;
    /// Evaluation-mode forward pass. Pure: no caching, dropout is the identity.
    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>>;
    /// Backward pass
    ///
    /// The `backward` function receives a gradient `dz` which corresponds to dLoss/dz,
    /// where z is the current layer output.
    /// The job of the backward pass is to combine its 'local gradients' - namely dz/dx, dz/dw -
    /// with this incoming gradient - dLoss/dz - using the chain rule.
    /// The backward should:
    /// - return dLoss/dx, which has the shape of the layer input
    /// - fill in the gradients for the layer's own weights dLoss/dw
    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>>;
    fn zero_grad(&mut self);
    /// Each trainable tensor paired with its current gradient, if backward has run.
    fn params_mut(&mut self) -> Vec<Param<'_>> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKind {
    Weight,
    Bias,
}

pub struct Param<'a> {
    pub kind: ParamKind,
    pub value: ArrayViewMutD<'a, f32>,
    pub grad: Option<ArrayViewD<'a, f32>>,
}

/// Whether a forward pass is part of a training step or an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// A strictly linear chain of layers: the output of layer k is the only input of layer k+1.
#[derive(Debug, Clone)]
pub struct Network {
    pub layers: Vec<Layer>,
    input_shape: [usize; 3], // (height, width, channels) of one sample
}

impl Network {
    pub fn new(layers: Vec<Layer>, input_shape: [usize; 3]) -> Network {
        Network {
            layers,
            input_shape,
        }
    }

    /// The Nielsen architecture for 28x28x1 images and 10 classes.
    ///
    /// | stage | layer                               | output   |
    /// |-------|-------------------------------------|----------|
    /// | 1     | conv 5x5, 20 filters, same + relu   | 28x28x20 |
    /// | 2     | max pool 2x2                        | 14x14x20 |
    /// | 3     | conv 5x5, 40 filters, valid + relu  | 10x10x40 |
    /// | 4     | max pool 2x2                        | 5x5x40   |
    /// | 5     | flatten                             | 1000     |
    /// | 6-7   | fc + relu, dropout                  | 1000     |
    /// | 8-9   | fc + relu, dropout                  | 1000     |
    /// | 10-11 | fc (logits), dropout                | 10       |
    ///
    /// Parameters are drawn from a generator seeded with `seed`, so equal seeds give
    /// identical networks.
    pub fn nielsen(seed: u64, dropout_rate: f32) -> Network {
        let mut rng = StdRng::seed_from_u64(seed);
        let layers = vec![
            Layer::Conv(Conv2dLayer::new(1, 20, 5, Padding::Same, &mut rng)), // (28, 28, 1) --> (28, 28, 20)
            Layer::ReLU(ReluLayer::new()),
            Layer::Pool(MaxPoolLayer::new(2)), // --> (14, 14, 20)
            //
            Layer::Conv(Conv2dLayer::new(20, 40, 5, Padding::Valid, &mut rng)), // --> (10, 10, 40)
            Layer::ReLU(ReluLayer::new()),
            Layer::Pool(MaxPoolLayer::new(2)), // --> (5, 5, 40)
            //
            Layer::Flatten(FlattenLayer::new()), // --> 1000
            //
            Layer::FC(FcLayer::new(5 * 5 * 40, 1000, &mut rng)),
            Layer::ReLU(ReluLayer::new()),
            Layer::Dropout(DropoutLayer::new(dropout_rate, &mut rng)),
            //
            Layer::FC(FcLayer::new(1000, 1000, &mut rng)),
            Layer::ReLU(ReluLayer::new()),
            Layer::Dropout(DropoutLayer::new(dropout_rate, &mut rng)),
            //
            Layer::FC(FcLayer::new(1000, NUM_CLASSES, &mut rng)),
            Layer::Dropout(DropoutLayer::new(dropout_rate, &mut rng)),
        ];
        Network::new(layers, [IMAGE_SIDE, IMAGE_SIDE, 1])
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(Layer::num_params).sum()
    }

    fn check_input(&self, images: &ArrayD<f32>) -> Result<()> {
        let [h, w, c] = self.input_shape;
        let shape = images.shape();
        if shape.len() != 4 || shape[0] == 0 || shape[1..] != [h, w, c] {
            return Err(Error::shape(
                "network input",
                format!("(N >= 1, {h}, {w}, {c})"),
                shape,
            ));
        }
        Ok(())
    }

    /// Maps an image batch (N, height, width, channels) to (N, classes) logits.
    pub fn forward(&mut self, images: ArrayD<f32>, mode: Mode) -> Result<Array2<f32>> {
        match mode {
            Mode::Eval => self.infer(images),
            Mode::Train => {
                self.check_input(&images)?;
                let logits = self
                    .layers
                    .iter_mut()
                    .try_fold(images, |x, layer| layer.forward(x))?;
                into_rank::<Ix2>(logits, "network output", "2-D (batch_size, classes)")
            }
        }
    }

    /// Evaluation forward pass. Never touches parameters or cached activations.
    pub fn infer(&self, images: ArrayD<f32>) -> Result<Array2<f32>> {
        self.check_input(&images)?;
        let logits = self
            .layers
            .iter()
            .try_fold(images, |x, layer| layer.infer(x))?;
        into_rank::<Ix2>(logits, "network output", "2-D (batch_size, classes)")
    }

    /// Backpropagates dLoss/dlogits through every layer, filling parameter gradients.
    pub fn backward(&mut self, dlogits: Array2<f32>) -> Result<()> {
        // Iterate layers in reverse order, mutate each as we go
        let dinput = self
            .layers
            .iter_mut()
            .rev()
            .try_fold(dlogits.into_dyn(), |dz, layer| layer.backward(dz))?;
        debug!("[backward] dL/dinput: {:?}", dinput.shape());
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }

    /// Every trainable tensor with its identity (layer index, weight or bias).
    pub fn params_mut(&mut self) -> Vec<(usize, Param<'_>)> {
        self.layers
            .iter_mut()
            .enumerate()
            .flat_map(|(idx, layer)| layer.params_mut().into_iter().map(move |p| (idx, p)))
            .collect()
    }
}
