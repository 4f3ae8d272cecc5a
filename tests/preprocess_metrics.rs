use ndarray::prelude::*;
use nielsennet::dataset::{Datasets, Partition};
use nielsennet::metrics::{accuracy, correct_count, loss, predicted_class, softmax_cross_entropy};
use nielsennet::preprocess::{Normalization, IMAGE_PIXELS};
use nielsennet::Error;

#[test]
fn normalize_reshapes_to_single_channel_images() {
    let datasets = Datasets::synthetic(50, 5, 5, 0).unwrap();
    let norm = Normalization::from_partition(&datasets.train).unwrap();
    let out = norm.normalize(datasets.train.images.view()).unwrap();
    assert_eq!(out.dim(), (50, 28, 28, 1));
}

#[test]
fn normalized_training_pixels_have_zero_mean_unit_std() {
    let datasets = Datasets::synthetic(200, 5, 5, 1).unwrap();
    let norm = Normalization::from_partition(&datasets.train).unwrap();
    let out = norm.normalize(datasets.train.images.view()).unwrap();
    let mean = out.mean().unwrap();
    let std = out.std(0.0);
    assert!(mean.abs() < 1e-3, "mean {mean}");
    assert!((std - 1.0).abs() < 1e-3, "std {std}");
}

#[test]
fn normalization_uses_population_statistics() {
    let images = Array2::from_shape_vec((2, 2), vec![1.0, 3.0, 1.0, 3.0]).unwrap();
    let norm = Normalization::from_images(images.view()).unwrap();
    assert_eq!(norm, Normalization { mean: 2.0, std: 1.0 });
}

#[test]
fn normalize_rejects_wrong_sample_length() {
    let norm = Normalization::new(0.1, 0.3).unwrap();
    let err = norm.normalize(Array2::zeros((3, 783)).view()).unwrap_err();
    assert!(matches!(err, Error::Shape { .. }), "got {err:?}");
}

#[test]
fn constant_images_cannot_be_normalized() {
    let images = Array2::from_elem((4, IMAGE_PIXELS), 0.5);
    let err = Normalization::from_images(images.view()).unwrap_err();
    assert!(matches!(err, Error::Numerical(_)), "got {err:?}");
    let err = Normalization::from_images(Array2::zeros((0, IMAGE_PIXELS)).view()).unwrap_err();
    assert!(matches!(err, Error::Data(_)), "got {err:?}");
}

#[test]
fn partition_rejects_malformed_data() {
    let images = Array2::zeros((2, IMAGE_PIXELS));
    let not_one_hot = Array2::from_elem((2, 10), 0.1);
    assert!(matches!(Partition::new(images.clone(), not_one_hot), Err(Error::Data(_))));
    assert!(matches!(
        Partition::new(images.clone(), Array2::zeros((3, 10))),
        Err(Error::Data(_))
    ));
    assert!(matches!(
        Partition::from_digits(vec![0.0; IMAGE_PIXELS], &[10]),
        Err(Error::Data(_))
    ));
    assert!(matches!(
        Partition::from_digits(vec![0.0; 10], &[1]),
        Err(Error::Data(_))
    ));
    let ok = Partition::from_digits(vec![0.0; 2 * IMAGE_PIXELS], &[3, 9]).unwrap();
    assert_eq!(ok.len(), 2);
    assert_eq!(ok.labels.row(1)[9], 1.0);
}

fn one_hot(classes: &[usize]) -> Array2<f32> {
    let mut labels = Array2::zeros((classes.len(), 10));
    for (i, &c) in classes.iter().enumerate() {
        labels[(i, c)] = 1.0;
    }
    labels
}

#[test]
fn loss_is_non_negative() {
    let logits = array![
        [0.5, -1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [10.0, 9.0, -3.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    ];
    let labels = one_hot(&[2, 1, 7]);
    let value = loss(logits.view(), labels.view()).unwrap();
    assert!(value >= 0.0);

    // uniform logits: -ln(1/10)
    let uniform = loss(Array2::zeros((1, 10)).view(), one_hot(&[4]).view()).unwrap();
    assert!((uniform - 10f32.ln()).abs() < 1e-5);
}

#[test]
fn loss_vanishes_when_all_mass_is_on_the_true_class() {
    let mut logits = Array2::from_elem((2, 10), -1000.0);
    logits[(0, 3)] = 1000.0;
    logits[(1, 8)] = 1000.0;
    let value = loss(logits.view(), one_hot(&[3, 8]).view()).unwrap();
    assert_eq!(value, 0.0);
}

#[test]
fn loss_gradient_is_softmax_minus_labels_over_batch() {
    let logits = Array2::zeros((2, 10));
    let (_, grad) = softmax_cross_entropy(logits.view(), one_hot(&[0, 5]).view()).unwrap();
    assert!((grad[(0, 0)] - (0.1 - 1.0) / 2.0).abs() < 1e-6);
    assert!((grad[(0, 1)] - 0.1 / 2.0).abs() < 1e-6);
    assert!((grad[(1, 5)] - (0.1 - 1.0) / 2.0).abs() < 1e-6);
    assert!(grad.sum().abs() < 1e-6);
}

#[test]
fn mismatched_logits_and_labels_are_rejected() {
    let err = loss(Array2::zeros((2, 10)).view(), Array2::zeros((3, 10)).view()).unwrap_err();
    assert!(matches!(err, Error::Shape { .. }));
    let err = accuracy(Array2::zeros((0, 10)).view(), Array2::zeros((0, 10)).view()).unwrap_err();
    assert!(matches!(err, Error::Shape { .. }));
}

#[test]
fn predicted_class_breaks_ties_with_lowest_index() {
    let logits = array![
        [0.0, 3.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5],
    ];
    assert_eq!(predicted_class(logits.view()), vec![1, 0, 9]);
}

#[test]
fn accuracy_counts_matching_argmax() {
    let mut logits = Array2::zeros((4, 10));
    logits[(0, 1)] = 1.0; // right
    logits[(1, 2)] = 1.0; // wrong
    logits[(2, 3)] = 1.0; // right
    logits[(3, 4)] = 1.0; // wrong
    let labels = one_hot(&[1, 5, 3, 6]);
    assert_eq!(correct_count(logits.view(), labels.view()).unwrap(), 2);
    assert_eq!(accuracy(logits.view(), labels.view()).unwrap(), 0.5);
}

#[test]
fn accuracy_is_invariant_to_a_shared_permutation() {
    let datasets = Datasets::synthetic(6, 1, 1, 3).unwrap();
    let labels = datasets.train.labels.clone();
    let logits = datasets.train.images.slice(s![.., ..10]).to_owned();
    let before = accuracy(logits.view(), labels.view()).unwrap();

    let permutation = [4, 2, 5, 0, 1, 3];
    let logits_p = logits.select(Axis(0), &permutation);
    let labels_p = labels.select(Axis(0), &permutation);
    assert_eq!(before, accuracy(logits_p.view(), labels_p.view()).unwrap());
}
