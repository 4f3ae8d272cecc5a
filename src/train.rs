use crate::dataset::{BatchSampler, Datasets, Partition};
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{Mode, Network};
use crate::optim::{MomentumOptimizer, OptimizerState};
use crate::preprocess::Normalization;
use crate::summary::{Summary, LOSS_TAG, VALIDATION_ACCURACY_TAG};
use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::prelude::*;
use rayon::prelude::*;
use std::io::Write;

pub const BATCH_SIZE: usize = 100;
pub const TOTAL_STEPS: usize = 100_000;
pub const EVAL_INTERVAL: usize = 1_000;
pub const LEARNING_RATE: f32 = 0.01;
pub const MOMENTUM: f32 = 0.5;
pub const DROPOUT_RATE: f32 = 0.5;
pub const SEED: u64 = 42;
pub const EVAL_BATCH_SIZE: usize = 250;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub total_steps: usize,
    pub eval_interval: usize,
    pub learning_rate: f32,
    pub momentum: f32,
    pub dropout_rate: f32,
    pub seed: u64,
    /// Samples per chunk when evaluating a whole partition.
    pub eval_batch_size: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            batch_size: BATCH_SIZE,
            total_steps: TOTAL_STEPS,
            eval_interval: EVAL_INTERVAL,
            learning_rate: LEARNING_RATE,
            momentum: MOMENTUM,
            dropout_rate: DROPOUT_RATE,
            seed: SEED,
            eval_batch_size: EVAL_BATCH_SIZE,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Invalid("batch_size must be positive"));
        }
        if self.eval_interval == 0 {
            return Err(Error::Invalid("eval_interval must be positive"));
        }
        if self.eval_batch_size == 0 {
            return Err(Error::Invalid("eval_batch_size must be positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Invalid("learning_rate must be positive and finite"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::Invalid("momentum must be in [0, 1)"));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(Error::Invalid("dropout_rate must be in [0, 1)"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Running { step: usize },
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub steps_completed: usize,
    /// (step, validation accuracy) for every periodic evaluation.
    pub validation: Vec<(usize, f32)>,
    pub test_accuracy: f32,
}

/// Accuracy of `network` over a whole partition, in evaluation mode.
///
/// The partition is cut in chunks of `chunk_size` samples which are evaluated in parallel.
/// The forward pass is read-only, so this never touches parameters or optimizer state.
pub fn evaluate(
    network: &Network,
    normalization: &Normalization,
    partition: &Partition,
    chunk_size: usize,
) -> Result<f32> {
    let nb_samples = partition.len();
    if nb_samples == 0 {
        return Err(Error::Data("cannot evaluate on an empty partition".to_string()));
    }
    if chunk_size == 0 {
        return Err(Error::Invalid("evaluation chunk size must be positive"));
    }

    let starts: Vec<usize> = (0..nb_samples).step_by(chunk_size).collect();
    let correct: usize = starts
        .par_iter()
        .map(|&start| {
            let end = (start + chunk_size).min(nb_samples);
            let images = normalization.normalize(partition.images.slice(s![start..end, ..]))?;
            let logits = network.infer(images.into_dyn())?;
            metrics::correct_count(logits.view(), partition.labels.slice(s![start..end, ..]))
        })
        .collect::<Result<Vec<usize>>>()?
        .into_iter()
        .sum();

    Ok(correct as f32 / nb_samples as f32)
}

/// The train/evaluate loop: Initializing -> Running(step) -> Terminated.
///
/// Every step draws a mini-batch, normalizes it, runs a training forward pass, and applies
/// one momentum update. Every `eval_interval` steps the whole validation partition is
/// evaluated. After the last step the test partition is evaluated once.
pub struct Trainer<S: Summary, W: Write> {
    config: TrainConfig,
    datasets: Datasets,
    normalization: Normalization,
    network: Network,
    optimizer: MomentumOptimizer,
    optimizer_state: OptimizerState,
    sampler: BatchSampler,
    summary: S,
    console: W,
    progress: ProgressBar,
    state: RunState,
}

impl<S: Summary, W: Write> Trainer<S, W> {
    pub fn new(config: TrainConfig, datasets: Datasets, summary: S, console: W) -> Result<Self> {
        config.validate()?;
        if datasets.train.len() < config.batch_size {
            return Err(Error::Data(format!(
                "training partition has {} samples, fewer than one batch of {}",
                datasets.train.len(),
                config.batch_size
            )));
        }

        let normalization = Normalization::from_partition(&datasets.train)?;
        info!(
            "[INIT] normalization mean={:.4} std={:.4}",
            normalization.mean, normalization.std
        );

        let network = Network::nielsen(config.seed, config.dropout_rate);
        info!(
            "[INIT] {} layers, {} trainable parameters",
            network.layers.len(),
            network.num_params()
        );

        let sampler = BatchSampler::new(datasets.train.len(), config.seed);
        Ok(Trainer {
            optimizer: MomentumOptimizer::new(config.learning_rate, config.momentum),
            optimizer_state: OptimizerState::new(),
            sampler,
            normalization,
            network,
            datasets,
            summary,
            console,
            progress: ProgressBar::hidden(),
            state: RunState::Initializing,
            config,
        })
    }

    /// Display a progress bar while running. Console lines are printed around it.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    pub fn optimizer_state(&self) -> &OptimizerState {
        &self.optimizer_state
    }

    pub fn summary(&self) -> &S {
        &self.summary
    }

    /// Where the progress lines were written.
    pub fn console(&self) -> &W {
        &self.console
    }

    pub fn into_parts(self) -> (S, W) {
        (self.summary, self.console)
    }

    /// Runs the whole lifecycle. Any error is fatal: the run stops at the failing step.
    /// The summary stream is flushed whether the run succeeds or not.
    pub fn run(&mut self) -> Result<RunReport> {
        if self.state != RunState::Initializing {
            return Err(Error::Invalid("a trainer runs only once"));
        }
        let outcome = self.run_steps();
        let flushed = self.summary.flush();
        self.state = RunState::Terminated;
        self.progress.finish_and_clear();

        let report = outcome?;
        flushed?;
        Ok(report)
    }

    fn run_steps(&mut self) -> Result<RunReport> {
        let mut validation = Vec::new();
        for step in 0..self.config.total_steps {
            self.state = RunState::Running { step };
            let loss = self.train_step(step)?;
            self.summary.scalar(LOSS_TAG, step, loss)?;

            if step % self.config.eval_interval == 0 {
                validation.push((step, self.validate(step)?));
            }
            self.progress.inc(1);
        }
        if self.config.total_steps == 0 {
            // Nothing to train: still report the untrained network.
            validation.push((0, self.validate(0)?));
        }

        let test_accuracy = evaluate(
            &self.network,
            &self.normalization,
            &self.datasets.test,
            self.config.eval_batch_size,
        )?;
        self.print(format!("Test Accuracy = {:5.2}%", test_accuracy * 100.0))?;

        Ok(RunReport {
            steps_completed: self.config.total_steps,
            validation,
            test_accuracy,
        })
    }

    /// One stochastic gradient update. Returns the mini-batch loss.
    fn train_step(&mut self, step: usize) -> Result<f32> {
        let (images, labels) = self
            .sampler
            .next_batch(&self.datasets.train, self.config.batch_size)?;
        let images = self.normalization.normalize(images.view())?;

        self.network.zero_grad();
        let logits = self.network.forward(images.into_dyn(), Mode::Train)?;
        let (loss, dlogits) = metrics::softmax_cross_entropy(logits.view(), labels.view())?;
        if !loss.is_finite() {
            return Err(Error::Numerical(format!("loss is {loss} at step {step}")));
        }
        self.network.backward(dlogits)?;
        self.optimizer
            .step(&mut self.network, &mut self.optimizer_state)?;

        debug!("[BATCH] step {} loss: {:.4}", step, loss);
        Ok(loss)
    }

    fn validate(&mut self, step: usize) -> Result<f32> {
        let accuracy = evaluate(
            &self.network,
            &self.normalization,
            &self.datasets.validation,
            self.config.eval_batch_size,
        )?;
        self.summary.scalar(VALIDATION_ACCURACY_TAG, step, accuracy)?;
        self.print(format!(
            "Step: {:5}, Validation Accuracy = {:5.2}%",
            step,
            accuracy * 100.0
        ))?;
        Ok(accuracy)
    }

    fn print(&mut self, line: String) -> Result<()> {
        let console = &mut self.console;
        self.progress.suspend(|| writeln!(console, "{line}"))?;
        Ok(())
    }
}
