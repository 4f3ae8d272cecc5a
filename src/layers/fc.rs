use crate::error::{Error, Result};
use crate::layers::into_rank;
use crate::model::{Module, Param, ParamKind};
use log::debug;
use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

///  z = a_prev . W + b
#[derive(Debug, Clone)]
pub struct FcLayer {
    input_size: usize,
    output_size: usize,
    //
    pub weights: Array2<f32>, // (input_size, output_size)
    pub bias: Array1<f32>,    //  (output_size)
    // for backprop
    last_input: Option<Array2<f32>>, // (batch_size, input_size), this is the prev layer activation
    //
    pub w_grad: Option<Array2<f32>>, // (input_size, output_size)
    pub b_grad: Option<Array1<f32>>, // (output_size)
}

impl FcLayer {
    pub fn new<R: Rng + ?Sized>(input_size: usize, output_size: usize, rng: &mut R) -> FcLayer {
        FcLayer {
            input_size,
            output_size,
            weights: FcLayer::init_2d_mat(input_size, output_size, rng),
            bias: Array1::zeros(output_size),
            //
            last_input: None,
            //
            w_grad: None,
            b_grad: None,
        }
    }

    fn get_scale(input_size: usize) -> f32 {
        (2.0 / input_size as f32).sqrt()
    }

    fn init_2d_mat<R: Rng + ?Sized>(input_size: usize, output_size: usize, rng: &mut R) -> Array2<f32> {
        Array2::random_using((input_size, output_size), Uniform::new(-1.0, 1.0), rng)
            * FcLayer::get_scale(input_size)
    }

    fn check_input(&self, input: ArrayD<f32>) -> Result<Array2<f32>> {
        let input = into_rank::<Ix2>(input, "fc", "2-D (batch_size, features)")?;
        if input.ncols() != self.input_size {
            return Err(Error::shape(
                "fc",
                format!("{} input features", self.input_size),
                input.shape(),
            ));
        }
        Ok(input)
    }

    fn affine(&self, input: &Array2<f32>) -> Array2<f32> {
        // (batch_size, input_size) X (input_size, output_size) = (batch_size, output_size)
        input.dot(&self.weights) + &self.bias
    }
}

impl Module for FcLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        debug!("[forward] [fc {}->{}] input: {:?}", self.input_size, self.output_size, input.shape());
        let input = self.check_input(input)?;
        let out = self.affine(&input);
        self.last_input = Some(input); // stored for backprop
        Ok(out.into_dyn())
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let input = self.check_input(input)?;
        Ok(self.affine(&input).into_dyn())
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let dz = into_rank::<Ix2>(dz, "fc backward", "2-D (batch_size, features)")?;
        let last_input = self
            .last_input
            .take()
            .ok_or(Error::Invalid("fc: run forward before backward"))?;
        if dz.dim() != (last_input.nrows(), self.output_size) {
            return Err(Error::shape(
                "fc backward",
                format!("({}, {})", last_input.nrows(), self.output_size),
                dz.shape(),
            ));
        }

        // The batch mean is already folded into dz by the loss gradient.
        // w: (batch_size, input_size)^T X (batch_size, output_size) = (input_size, output_size)
        self.w_grad = Some(last_input.t().dot(&dz));
        // b: (batch_size, output_size) summed over batch-axis = (output_size)
        self.b_grad = Some(dz.sum_axis(Axis(0)));

        //  (batch_size, output_size) X (input_size, output_size)^T = (batch_size, input_size)
        Ok(dz.dot(&self.weights.t()).into_dyn())
    }

    fn zero_grad(&mut self) {
        self.w_grad = None;
        self.b_grad = None;
    }

    fn params_mut(&mut self) -> Vec<Param<'_>> {
        vec![
            Param {
                kind: ParamKind::Weight,
                value: self.weights.view_mut().into_dyn(),
                grad: self.w_grad.as_ref().map(|g| g.view().into_dyn()),
            },
            Param {
                kind: ParamKind::Bias,
                value: self.bias.view_mut().into_dyn(),
                grad: self.b_grad.as_ref().map(|g| g.view().into_dyn()),
            },
        ]
    }
}
