use ndarray::prelude::*;
use nielsennet::layers::{Conv2dLayer, FcLayer, FlattenLayer, Layer, MaxPoolLayer, Padding, ReluLayer};
use nielsennet::metrics::softmax_cross_entropy;
use nielsennet::model::{Mode, Network};
use nielsennet::optim::{MomentumOptimizer, OptimizerState};
use rand::rngs::StdRng;
use rand::{distributions::Uniform, Rng, SeedableRng};

#[derive(Debug)]
struct TestDataset {
    pub samples: Vec<(Vec<f32>, usize)>, // input data, label
}

/// Generate a random batch of data.
/// This data has the same shape as greyscale images.
fn gen_test_batch(rng: &mut StdRng, batch_size: usize, side: usize, nb_classes: usize) -> TestDataset {
    let pixels_distrib = Uniform::new(0.0, 1.0);
    let mut samples = Vec::new();
    for _ in 0..batch_size {
        let input_data: Vec<f32> = (0..side * side).map(|_| rng.sample(pixels_distrib)).collect();
        let label = rng.gen_range(0..nb_classes);
        samples.push((input_data, label));
    }
    TestDataset { samples }
}

#[test]
/// Test that the SGD with momentum optimizer can train a small CNN to overfit
/// a batch of 16 random 12x12 greyscale images associated to random
/// integer labels ranging from 0 to 4.
fn test_sgd_momentum_can_overfit_single_batch() -> Result<(), Box<dyn std::error::Error>> {
    const MAX_RETRIES: u64 = 3;
    let mut last_error = String::new();

    for attempt in 1..=MAX_RETRIES {
        println!("Attempt {attempt}");
        let mut rng = StdRng::seed_from_u64(attempt);
        let mut cnn = Network::new(
            vec![
                Layer::Conv(Conv2dLayer::new(1, 4, 3, Padding::Valid, &mut rng)), // (12, 12, 1) --> (10, 10, 4)
                Layer::ReLU(ReluLayer::new()),
                Layer::Pool(MaxPoolLayer::new(2)), // (10, 10, 4) --> (5, 5, 4)
                //
                Layer::Flatten(FlattenLayer::new()),
                //
                Layer::FC(FcLayer::new(5 * 5 * 4, 5, &mut rng)), // 5 classes
            ],
            [12, 12, 1],
        );

        const OVERFITTED_LOSS_VALUE: f32 = 0.1;
        const MAX_OPTIM_STEPS: usize = 2000;
        let batch_size: usize = 16;
        let nb_classes = 5;
        let optimizer = MomentumOptimizer::new(0.01, 0.9);
        let mut state = OptimizerState::new();

        let test_ds = gen_test_batch(&mut rng, batch_size, 12, nb_classes);
        let batch_images: Vec<f32> = test_ds
            .samples
            .iter()
            .flat_map(|(pixels, _)| pixels.clone())
            .collect();
        let batch_images = Array4::from_shape_vec((batch_size, 12, 12, 1), batch_images)?.into_dyn();
        let mut batch_labels = Array2::<f32>::zeros((batch_size, nb_classes));
        for (i, (_, label)) in test_ds.samples.iter().enumerate() {
            batch_labels[(i, *label)] = 1.0;
        }

        let mut avg_loss = f32::MAX;
        for optim_step in 1..=MAX_OPTIM_STEPS {
            cnn.zero_grad();
            let output = cnn.forward(batch_images.clone(), Mode::Train)?;
            let (loss, init_grad) = softmax_cross_entropy(output.view(), batch_labels.view())?;
            avg_loss = loss;
            if avg_loss < OVERFITTED_LOSS_VALUE {
                println!("Reached loss<{OVERFITTED_LOSS_VALUE} in attempt {attempt} with {optim_step} optimisation steps");
                return Ok(());
            }

            if optim_step % 200 == 0 {
                println!("step {optim_step}, loss {avg_loss}");
            }

            cnn.backward(init_grad)?;
            optimizer.step(&mut cnn, &mut state)?;
        }
        last_error = format!("Attempt {attempt} failed: Final loss was {avg_loss}");
        println!("{}", last_error);
    }
    Err(format!(
        "Failed to overfit after {MAX_RETRIES} attempts. Last error: {last_error}"
    ))?
}
