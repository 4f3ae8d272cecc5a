use crate::error::{Error, Result};
use crate::layers::into_rank;
use crate::model::{Module, Param, ParamKind};
use log::debug;
use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use std::f32;

const NHWC: &str = "4-D (batch_size, height, width, channels)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Zero-pad the borders so that a stride-1 convolution keeps the spatial size.
    Same,
    /// No padding: the output shrinks by `kernel_size - 1` along each spatial axis.
    Valid,
}

impl Padding {
    /// Zeros added (before, after) along one spatial axis for a kernel of width `k`.
    /// Odd totals put the extra zero after, as most frameworks do.
    pub fn amounts(self, k: usize) -> (usize, usize) {
        match self {
            Padding::Same => {
                let before = (k - 1) / 2;
                (before, k - 1 - before)
            }
            Padding::Valid => (0, 0),
        }
    }
}

/// What the backward pass needs from the last training forward.
#[derive(Debug, Clone)]
struct ConvCache {
    patches: Array2<f32>, // (batch_size * locations, k * k * in_channels)
    input_dim: (usize, usize, usize, usize),
    out_hw: (usize, usize),
}

/// 2D convolution layer with stride 1, channels-last layout.
#[derive(Debug, Clone)]
pub struct Conv2dLayer {
    in_channels: usize,  // Number of channels in the input image
    out_channels: usize, // Number of channels produced by the convolution
    kernel_size: usize,  // Kernels are square
    padding: Padding,
    // weights
    pub kernels_mat: Array2<f32>, // Layout for img2col: (out_channels, k*k*in_channels), rows ordered (ky, kx, c)
    pub b: Array1<f32>,           // One bias per output channel: (out_channels)
    // for backprop
    last_input: Option<ConvCache>,
    //
    pub k_grad: Option<Array2<f32>>, // (out_channels, k*k*in_channels)
    pub b_grad: Option<Array1<f32>>, // (out_channels)
}

impl Conv2dLayer {
    /// Kernels are He-uniform, biases start at zero.
    ///
    /// # Panics
    ///
    /// If `kernel_size` is zero.
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: Padding,
        rng: &mut R,
    ) -> Conv2dLayer {
        assert!(kernel_size > 0, "kernel size must be positive");
        Conv2dLayer {
            in_channels,
            out_channels,
            kernel_size,
            padding,
            //
            kernels_mat: Conv2dLayer::init_kernel(in_channels, out_channels, kernel_size, rng),
            b: Array1::zeros(out_channels),
            //
            last_input: None,
            //
            k_grad: None,
            b_grad: None,
        }
    }

    fn get_scale(in_channels: usize, kernel_size: usize) -> f32 {
        (6.0 / (in_channels * kernel_size * kernel_size) as f32).sqrt() // uniform He
    }

    fn init_kernel<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        k: usize,
        rng: &mut R,
    ) -> Array2<f32> {
        Array2::random_using(
            (out_channels, k * k * in_channels),
            Uniform::new(-1.0, 1.0),
            rng,
        ) * Conv2dLayer::get_scale(in_channels, k)
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    /// Spatial output size for an input of `height` x `width`, if the kernel fits.
    pub fn output_hw(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        let k = self.kernel_size;
        let (before, after) = self.padding.amounts(k);
        let (padded_h, padded_w) = (height + before + after, width + before + after);
        if padded_h < k || padded_w < k {
            return None;
        }
        Some((padded_h - k + 1, padded_w - k + 1))
    }

    fn check_input(&self, input: ArrayD<f32>) -> Result<Array4<f32>> {
        let input = into_rank::<Ix4>(input, "conv", NHWC)?;
        if input.dim().3 != self.in_channels {
            return Err(Error::shape(
                "conv",
                format!("{} input channels", self.in_channels),
                input.shape(),
            ));
        }
        Ok(input)
    }

    /// Builds the img2col 'patches' matrix.
    ///
    /// The convolution becomes a single matmul: every row of the patches matrix is one
    /// (k, k, in_channels) window of the padded input, flattened. Rows are ordered by
    /// (sample, output row, output column), so the matmul output reshapes directly to NHWC.
    fn im2col(&self, input: &Array4<f32>) -> Result<ConvCache> {
        let (batch_size, height, width, in_channels) = input.dim();
        let k = self.kernel_size;
        let (out_height, out_width) = self.output_hw(height, width).ok_or_else(|| {
            Error::shape(
                "conv",
                format!("at least {k}x{k} spatial size after padding"),
                input.shape(),
            )
        })?;

        let (before, after) = self.padding.amounts(k);
        let mut padded = Array4::zeros((
            batch_size,
            height + before + after,
            width + before + after,
            in_channels,
        ));
        padded
            .slice_mut(s![.., before..before + height, before..before + width, ..])
            .assign(input);

        let nb_locations = out_height * out_width;
        let mut patches = Array2::zeros((batch_size * nb_locations, k * k * in_channels));
        for (batch_idx, feature_maps) in padded.outer_iter().enumerate() {
            let mut sample_rows =
                patches.slice_mut(s![batch_idx * nb_locations..(batch_idx + 1) * nb_locations, ..]);
            for (mut row, patch) in sample_rows
                .rows_mut()
                .into_iter()
                .zip(feature_maps.windows((k, k, in_channels)))
            {
                row.assign(&patch.flatten());
            }
        }

        Ok(ConvCache {
            patches,
            input_dim: input.dim(),
            out_hw: (out_height, out_width),
        })
    }

    /// (batch_size * locations, out_channels) = patches dot kernels_mat^T, plus bias.
    fn convolve(&self, cache: &ConvCache) -> Result<Array4<f32>> {
        let batch_size = cache.input_dim.0;
        let (out_height, out_width) = cache.out_hw;
        let mut out = cache.patches.dot(&self.kernels_mat.t());
        out += &self.b; // same bias at every location of an output channel
        out.into_shape_with_order((batch_size, out_height, out_width, self.out_channels))
            .map_err(|_| Error::shape("conv", "img2col output compatible with NHWC", &[]))
    }
}

impl Module for Conv2dLayer {
    /// Input: (batch_size, height, width, in_channels)
    /// Output: (batch_size, out_h, out_w, out_channels), see [`Conv2dLayer::output_hw`].
    fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        debug!("[forward] [conv] input: {:?}", input.shape());
        let input = self.check_input(input)?;
        let cache = self.im2col(&input)?;
        let out = self.convolve(&cache)?;
        self.last_input = Some(cache);
        Ok(out.into_dyn())
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let input = self.check_input(input)?;
        let cache = self.im2col(&input)?;
        Ok(self.convolve(&cache)?.into_dyn())
    }

    /// Backward through the img2col matmul.
    ///
    /// With dz reshaped to (rows, out_channels) where rows = batch_size * locations:
    /// - dL/dkernels_mat = dz^T dot patches, (out_channels, k*k*in_channels)
    /// - dL/dbias = dz summed over rows
    /// - dL/dpatches = dz dot kernels_mat, which is folded back ('col2im') onto the padded
    ///   input by accumulating every patch gradient into the window it was read from.
    ///   The padding border is then cut away.
    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>> {
        debug!("[backward] [conv] incoming dz: {:?}", dz.shape());
        let dz = into_rank::<Ix4>(dz, "conv backward", NHWC)?;
        let cache = self
            .last_input
            .as_ref()
            .ok_or(Error::Invalid("conv: run forward before backward"))?;

        let (batch_size, height, width, in_channels) = cache.input_dim;
        let (out_height, out_width) = cache.out_hw;
        if dz.dim() != (batch_size, out_height, out_width, self.out_channels) {
            return Err(Error::shape(
                "conv backward",
                format!("({batch_size}, {out_height}, {out_width}, {})", self.out_channels),
                dz.shape(),
            ));
        }

        let nb_rows = batch_size * out_height * out_width;
        let dz = dz
            .to_shape((nb_rows, self.out_channels))
            .map_err(|_| Error::shape("conv backward", "img2col compatible dz", &[]))?;

        self.k_grad = Some(dz.t().dot(&cache.patches));
        self.b_grad = Some(dz.sum_axis(Axis(0)));

        let k = self.kernel_size;
        let dpatches = dz
            .dot(&self.kernels_mat)
            .into_shape_with_order((batch_size, out_height, out_width, k, k, in_channels))
            .map_err(|_| Error::shape("conv backward", "patch gradient layout", &[]))?;

        let (before, after) = self.padding.amounts(k);
        let mut dpadded = Array4::<f32>::zeros((
            batch_size,
            height + before + after,
            width + before + after,
            in_channels,
        ));
        for batch_idx in 0..batch_size {
            for y in 0..out_height {
                for x in 0..out_width {
                    let mut window = dpadded.slice_mut(s![batch_idx, y..y + k, x..x + k, ..]);
                    window += &dpatches.slice(s![batch_idx, y, x, .., .., ..]);
                }
            }
        }

        Ok(dpadded
            .slice(s![.., before..before + height, before..before + width, ..])
            .to_owned()
            .into_dyn())
    }

    fn zero_grad(&mut self) {
        self.k_grad = None;
        self.b_grad = None;
    }

    fn params_mut(&mut self) -> Vec<Param<'_>> {
        vec![
            Param {
                kind: ParamKind::Weight,
                value: self.kernels_mat.view_mut().into_dyn(),
                grad: self.k_grad.as_ref().map(|g| g.view().into_dyn()),
            },
            Param {
                kind: ParamKind::Bias,
                value: self.b.view_mut().into_dyn(),
                grad: self.b_grad.as_ref().map(|g| g.view().into_dyn()),
            },
        ]
    }
}

#[derive(Debug, Clone)]
struct PoolCache {
    max_mask: Array6<f32>, // (batch_size, height/k, k, width/k, k, channels)
    input_dim: (usize, usize, usize, usize),
}

/// Non-overlapping max pooling (window k x k, stride k).
#[derive(Debug, Clone)]
pub struct MaxPoolLayer {
    pool_size: usize,
    // for backprop
    last_input: Option<PoolCache>,
}

impl MaxPoolLayer {
    /// # Panics
    ///
    /// If `pool_size` is zero.
    pub fn new(pool_size: usize) -> MaxPoolLayer {
        assert!(pool_size > 0, "pool size must be positive");
        MaxPoolLayer {
            pool_size,
            last_input: None,
        }
    }

    /// Reshapes the input to (batch_size, height/k, k, width/k, k, channels).
    /// Trailing rows/columns that do not fill a whole window are dropped.
    fn windows_6d(&self, input: &Array4<f32>) -> Result<Array6<f32>> {
        let (batch_size, height, width, channels) = input.dim();
        let k = self.pool_size;
        let (out_height, out_width) = (height / k, width / k);
        if out_height == 0 || out_width == 0 {
            return Err(Error::shape(
                "max_pool",
                format!("at least {k}x{k} spatial size"),
                input.shape(),
            ));
        }
        let cropped = input.slice(s![.., ..out_height * k, ..out_width * k, ..]);
        let windows = cropped
            .to_shape((batch_size, out_height, k, out_width, k, channels))
            .map_err(|_| Error::shape("max_pool", "pooling windows", input.shape()))?;
        Ok(windows.into_owned())
    }

    fn max_over_windows(windows: &Array6<f32>) -> Array4<f32> {
        // Fold the two axes of size k (axis 2, then the former axis 4)
        windows
            .fold_axis(Axis(2), f32::NEG_INFINITY, |&a, &b| a.max(b))
            .fold_axis(Axis(3), f32::NEG_INFINITY, |&a, &b| a.max(b))
    }
}

impl Module for MaxPoolLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        debug!("[forward] [maxPool] input: {:?}", input.shape());
        let input = into_rank::<Ix4>(input, "max_pool", NHWC)?;
        let windows = self.windows_6d(&input)?;
        let pooled = MaxPoolLayer::max_over_windows(&windows);

        // Mask of where the max values are, for backprop.
        let pooled_6d = pooled.view().insert_axis(Axis(2)).insert_axis(Axis(4));
        let mut max_mask = Array6::<f32>::zeros(windows.raw_dim());
        Zip::from(&mut max_mask)
            .and(&windows)
            .and_broadcast(&pooled_6d)
            .for_each(|m, &in_val, &max_val| {
                if in_val == max_val {
                    *m = 1.0;
                }
            });

        // Ties share the incoming gradient instead of duplicating it.
        let ties = max_mask.sum_axis(Axis(2)).sum_axis(Axis(3));
        let ties_6d = ties.view().insert_axis(Axis(2)).insert_axis(Axis(4));
        Zip::from(&mut max_mask)
            .and_broadcast(&ties_6d)
            .for_each(|m, &count| *m /= count);

        self.last_input = Some(PoolCache {
            max_mask,
            input_dim: input.dim(),
        });
        Ok(pooled.into_dyn())
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let input = into_rank::<Ix4>(input, "max_pool", NHWC)?;
        let windows = self.windows_6d(&input)?;
        Ok(MaxPoolLayer::max_over_windows(&windows).into_dyn())
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>> {
        // dz: (batch_size, height/k, width/k, channels)
        let dz = into_rank::<Ix4>(dz, "max_pool backward", NHWC)?;
        let cache = self
            .last_input
            .as_ref()
            .ok_or(Error::Invalid("max_pool: run forward before backward"))?;

        let (batch_size, height, width, channels) = cache.input_dim;
        let mask_shape = cache.max_mask.shape();
        let (out_height, out_width) = (mask_shape[1], mask_shape[3]);
        if dz.dim() != (batch_size, out_height, out_width, channels) {
            return Err(Error::shape(
                "max_pool backward",
                format!("({batch_size}, {out_height}, {out_width}, {channels})"),
                dz.shape(),
            ));
        }

        let k = self.pool_size;
        let dz_6d = dz.view().insert_axis(Axis(2)).insert_axis(Axis(4));
        let mut dwindows = Array6::<f32>::zeros(cache.max_mask.raw_dim());
        Zip::from(&mut dwindows)
            .and(&cache.max_mask)
            .and_broadcast(&dz_6d)
            .for_each(|din, &mask_val, &dz_val| *din = mask_val * dz_val);

        let dcropped = dwindows
            .into_shape_with_order((batch_size, out_height * k, out_width * k, channels))
            .map_err(|_| Error::shape("max_pool backward", "pooling windows", &[]))?;

        let mut dinput = Array4::<f32>::zeros((batch_size, height, width, channels));
        dinput
            .slice_mut(s![.., ..out_height * k, ..out_width * k, ..])
            .assign(&dcropped);
        Ok(dinput.into_dyn())
    }

    fn zero_grad(&mut self) {
        self.last_input = None;
    }
}

/// Row-major flatten of (batch_size, height, width, channels) into (batch_size, features).
#[derive(Debug, Clone, Default)]
pub struct FlattenLayer {
    last_input_shape: Option<Vec<usize>>,
}

impl FlattenLayer {
    pub fn new() -> FlattenLayer {
        FlattenLayer {
            last_input_shape: None,
        }
    }

    fn flatten(input: ArrayD<f32>) -> Result<Array2<f32>> {
        let input = into_rank::<Ix4>(input, "flatten", NHWC)?;
        let (batch_size, height, width, channels) = input.dim();
        let output = input
            .to_shape((batch_size, height * width * channels))
            .map_err(|_| Error::shape("flatten", "a 2D reshape", input.shape()))?
            .into_owned();
        Ok(output)
    }
}

impl Module for FlattenLayer {
    fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.last_input_shape = Some(input.shape().to_vec());
        Ok(FlattenLayer::flatten(input)?.into_dyn())
    }

    fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(FlattenLayer::flatten(input)?.into_dyn())
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = self
            .last_input_shape
            .as_ref()
            .ok_or(Error::Invalid("flatten: run forward before backward"))?;
        let new_dz = dz
            .to_shape(IxDyn(shape))
            .map_err(|_| Error::shape("flatten backward", format!("{shape:?}"), dz.shape()))?
            .into_owned();
        Ok(new_dz)
    }

    fn zero_grad(&mut self) {
        self.last_input_shape = None;
    }
}
