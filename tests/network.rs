use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use nielsennet::layers::Layer;
use nielsennet::model::{Mode, Network, NUM_CLASSES};
use nielsennet::Error;

fn random_images(batch_size: usize) -> ArrayD<f32> {
    Array4::<f32>::random((batch_size, 28, 28, 1), Uniform::new(-1.0, 1.0)).into_dyn()
}

#[test]
fn forward_returns_one_logit_row_per_image_in_both_modes() {
    let mut nn = Network::nielsen(7, 0.5);
    for batch_size in [1, 3] {
        let images = random_images(batch_size);
        let train = nn.forward(images.clone(), Mode::Train).unwrap();
        let eval = nn.forward(images, Mode::Eval).unwrap();
        assert_eq!(train.dim(), (batch_size, NUM_CLASSES));
        assert_eq!(eval.dim(), (batch_size, NUM_CLASSES));
    }
}

#[test]
fn nielsen_has_expected_layer_sequence_and_parameter_count() {
    let nn = Network::nielsen(0, 0.5);
    let names: Vec<&str> = nn.layers.iter().map(Layer::name).collect();
    assert_eq!(
        names,
        vec![
            "conv", "relu", "max_pool", "conv", "relu", "max_pool", "flatten", "fc", "relu",
            "dropout", "fc", "relu", "dropout", "fc", "dropout",
        ]
    );
    let conv1 = 20 * 5 * 5 + 20;
    let conv2 = 40 * 5 * 5 * 20 + 40;
    let fc1 = 1000 * 1000 + 1000;
    let fc2 = 1000 * 1000 + 1000;
    let fc3 = 1000 * 10 + 10;
    assert_eq!(nn.num_params(), conv1 + conv2 + fc1 + fc2 + fc3);
}

#[test]
fn evaluation_is_deterministic() {
    let mut nn = Network::nielsen(1, 0.5);
    let images = random_images(4);
    let a = nn.forward(images.clone(), Mode::Eval).unwrap();
    let b = nn.forward(images.clone(), Mode::Eval).unwrap();
    let c = nn.infer(images).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[test]
fn training_mode_applies_stochastic_dropout() {
    let mut nn = Network::nielsen(2, 0.5);
    let images = random_images(4);
    let a = nn.forward(images.clone(), Mode::Train).unwrap();
    let b = nn.forward(images, Mode::Train).unwrap();
    assert_ne!(a, b);
}

#[test]
fn same_seed_builds_identical_networks() {
    let images = random_images(2);
    let a = Network::nielsen(11, 0.5).infer(images.clone()).unwrap();
    let b = Network::nielsen(11, 0.5).infer(images.clone()).unwrap();
    let c = Network::nielsen(12, 0.5).infer(images).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn flattened_images_are_rejected_with_shape_error() {
    let mut nn = Network::nielsen(3, 0.5);
    let flat = Array2::<f32>::zeros((5, 784)).into_dyn();
    for mode in [Mode::Train, Mode::Eval] {
        let err = nn.forward(flat.clone(), mode).unwrap_err();
        assert!(matches!(err, Error::Shape { .. }), "got {err:?}");
    }
}

#[test]
fn wrong_spatial_size_or_empty_batch_is_rejected() {
    let mut nn = Network::nielsen(3, 0.5);
    let wrong_side = Array4::<f32>::zeros((2, 32, 32, 1)).into_dyn();
    let wrong_channels = Array4::<f32>::zeros((2, 28, 28, 3)).into_dyn();
    let empty = Array4::<f32>::zeros((0, 28, 28, 1)).into_dyn();
    for images in [wrong_side, wrong_channels, empty] {
        let err = nn.forward(images, Mode::Eval).unwrap_err();
        assert!(matches!(err, Error::Shape { .. }), "got {err:?}");
    }
}

#[test]
fn backward_fills_every_gradient() {
    let mut nn = Network::nielsen(4, 0.5);
    let logits = nn.forward(random_images(2), Mode::Train).unwrap();
    nn.backward(Array2::ones(logits.raw_dim()) / 2.0).unwrap();
    let params = nn.params_mut();
    assert_eq!(params.len(), 10); // 5 layers with weight + bias
    assert!(params.iter().all(|(_, p)| p.grad.is_some()));
}

#[test]
fn backward_without_forward_is_invalid() {
    let mut nn = Network::nielsen(5, 0.5);
    let err = nn.backward(Array2::zeros((2, NUM_CLASSES))).unwrap_err();
    assert!(matches!(err, Error::Invalid(_)), "got {err:?}");
}
