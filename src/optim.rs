use crate::error::{Error, Result};
use crate::model::{Network, Param, ParamKind};
use ndarray::prelude::*;
use ndarray::Zip;
use std::collections::HashMap;

/// Identity of a trainable tensor: which layer holds it and which of its tensors it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId {
    pub layer: usize,
    pub kind: ParamKind,
}

/// Momentum accumulators, one per trainable tensor. Owned by the training loop.
#[derive(Debug, Clone, Default)]
pub struct OptimizerState {
    velocity: HashMap<ParamId, ArrayD<f32>>,
    steps: usize,
}

impl OptimizerState {
    pub fn new() -> OptimizerState {
        OptimizerState::default()
    }

    pub fn velocity(&self, id: ParamId) -> Option<&ArrayD<f32>> {
        self.velocity.get(&id)
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.velocity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.velocity.is_empty()
    }
}

/// SGD with momentum:
/// v := momentum * v - learning_rate * grad
/// w := w + v
/// The first step starts from v = 0, i.e. it is a vanilla SGD step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumOptimizer {
    pub learning_rate: f32,
    pub momentum: f32,
}

impl MomentumOptimizer {
    pub fn new(learning_rate: f32, momentum: f32) -> MomentumOptimizer {
        MomentumOptimizer {
            learning_rate,
            momentum,
        }
    }

    /// Run one optimization step on every trainable tensor of `nn`.
    /// Assumes forward+backward have been done, so every parameter has a gradient.
    pub fn step(&self, nn: &mut Network, state: &mut OptimizerState) -> Result<()> {
        for (layer, param) in nn.params_mut() {
            let Param {
                kind,
                mut value,
                grad,
            } = param;
            let grad = grad.ok_or(Error::Invalid(
                "optimizer step without gradients, run backward first",
            ))?;
            if grad.shape() != value.shape() {
                return Err(Error::shape(
                    "optimizer",
                    format!("gradient shaped like parameter {:?}", value.shape()),
                    grad.shape(),
                ));
            }

            let velocity = state
                .velocity
                .entry(ParamId { layer, kind })
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            Zip::from(&mut *velocity)
                .and(&grad)
                .for_each(|v, &g| *v = self.momentum * *v - self.learning_rate * g);
            value += &*velocity;
        }
        state.steps += 1;
        Ok(())
    }
}
