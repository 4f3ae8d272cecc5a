use crate::error::{Error, Result};
use ndarray::prelude::*;

fn check_pair(context: &'static str, logits: &ArrayView2<f32>, labels: &ArrayView2<f32>) -> Result<()> {
    if logits.dim() != labels.dim() {
        return Err(Error::shape(
            context,
            format!("labels shaped like logits {:?}", logits.shape()),
            labels.shape(),
        ));
    }
    if logits.nrows() == 0 {
        return Err(Error::shape(context, "at least one sample", logits.shape()));
    }
    Ok(())
}

/// Mean softmax cross-entropy over the batch, and its gradient w.r.t. the logits.
///
/// Per sample: `log(sum_j exp(z_j)) - sum_j y_j z_j`, computed with the max-shift so large
/// logits do not overflow. With one-hot labels this is the negative log-likelihood of the
/// true class. The gradient `(softmax(z) - y) / N` already carries the batch mean.
pub fn softmax_cross_entropy(
    logits: ArrayView2<f32>,
    labels: ArrayView2<f32>,
) -> Result<(f32, Array2<f32>)> {
    check_pair("softmax_cross_entropy", &logits, &labels)?;
    let batch_size = logits.nrows();

    let max = logits.fold_axis(Axis(1), f32::NEG_INFINITY, |&a, &b| a.max(b));
    let shifted = &logits - &max.insert_axis(Axis(1));
    let exp = shifted.mapv(f32::exp);
    let sum = exp.sum_axis(Axis(1));

    let mut total = 0.0f64;
    for ((row, label), &s) in shifted.outer_iter().zip(labels.outer_iter()).zip(sum.iter()) {
        // log_softmax_j = shifted_j - ln(sum)
        let log_sum = s.ln();
        let sample_loss: f32 = row
            .iter()
            .zip(label.iter())
            .map(|(&z, &y)| y * (log_sum - z))
            .sum();
        total += sample_loss as f64;
    }
    let loss = (total / batch_size as f64) as f32;

    let softmax = exp / &sum.insert_axis(Axis(1));
    let grad = (softmax - &labels) / batch_size as f32;
    Ok((loss, grad))
}

/// Mean softmax cross-entropy over the batch.
pub fn loss(logits: ArrayView2<f32>, labels: ArrayView2<f32>) -> Result<f32> {
    Ok(softmax_cross_entropy(logits, labels)?.0)
}

/// Index of the largest entry; ties go to the lowest index.
fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best_idx, best), (idx, &v)| {
            if v > best {
                (idx, v)
            } else {
                (best_idx, best)
            }
        })
        .0
}

/// Predicted class of every sample.
pub fn predicted_class(logits: ArrayView2<f32>) -> Vec<usize> {
    logits.outer_iter().map(argmax).collect()
}

/// Number of samples whose predicted class matches the one-hot label.
pub fn correct_count(logits: ArrayView2<f32>, labels: ArrayView2<f32>) -> Result<usize> {
    check_pair("accuracy", &logits, &labels)?;
    Ok(logits
        .outer_iter()
        .zip(labels.outer_iter())
        .filter(|(z, y)| argmax(z.view()) == argmax(y.view()))
        .count())
}

/// Fraction of the batch classified correctly.
pub fn accuracy(logits: ArrayView2<f32>, labels: ArrayView2<f32>) -> Result<f32> {
    let batch_size = logits.nrows();
    Ok(correct_count(logits, labels)? as f32 / batch_size as f32)
}
