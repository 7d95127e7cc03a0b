//! Weighted evaluation metrics over accumulated predictions.
//!
//! Every function takes the prediction matrix selected by a prediction key
//! (`n x 1` for classes and scores, `n x k` for probabilities), the label
//! column and the per-example weights. Results are weighted so that
//! evaluating the same batch twice gives the same value as evaluating it once.

use ndarray::{ArrayView1, ArrayView2, Axis};

/// Labels at or above this value count as the positive class.
const POSITIVE_THRESHOLD: f64 = 0.5;

fn weighted_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

pub fn weighted_mean(values: ArrayView1<f64>, weights: ArrayView1<f64>) -> f64 {
    let total: f64 = values.iter().zip(weights.iter()).map(|(v, w)| v * w).sum();
    weighted_ratio(total, weights.sum())
}

/// Predicted class per example: the single column itself, otherwise the argmax.
fn predicted_classes(predictions: ArrayView2<f64>) -> Vec<f64> {
    if predictions.ncols() == 1 {
        return predictions.column(0).to_vec();
    }
    predictions
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (k, &p)| if p > best.1 { (k, p) } else { best })
                .0 as f64
        })
        .collect()
}

/// Score of the positive class: the last column.
fn positive_scores(predictions: ArrayView2<f64>) -> ArrayView1<f64> {
    let last = predictions.ncols() - 1;
    predictions.index_axis_move(Axis(1), last)
}

fn is_positive(value: f64) -> bool {
    value >= POSITIVE_THRESHOLD
}

pub fn streaming_accuracy(
    predictions: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> f64 {
    let correct: f64 = predicted_classes(predictions)
        .iter()
        .zip(labels.iter())
        .zip(weights.iter())
        .filter(|((class, label), _)| (*class - *label).abs() < 1e-10)
        .map(|(_, w)| w)
        .sum();
    weighted_ratio(correct, weights.sum())
}

pub fn streaming_precision(
    predictions: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> f64 {
    let (mut true_positives, mut predicted_positives) = (0.0, 0.0);
    for ((&prediction, &label), &w) in positive_scores(predictions)
        .iter()
        .zip(labels.iter())
        .zip(weights.iter())
    {
        if is_positive(prediction) {
            predicted_positives += w;
            if is_positive(label) {
                true_positives += w;
            }
        }
    }
    weighted_ratio(true_positives, predicted_positives)
}

pub fn streaming_recall(
    predictions: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> f64 {
    let (mut true_positives, mut actual_positives) = (0.0, 0.0);
    for ((&prediction, &label), &w) in positive_scores(predictions)
        .iter()
        .zip(labels.iter())
        .zip(weights.iter())
    {
        if is_positive(label) {
            actual_positives += w;
            if is_positive(prediction) {
                true_positives += w;
            }
        }
    }
    weighted_ratio(true_positives, actual_positives)
}

pub fn streaming_mean_squared_error(
    predictions: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> f64 {
    let errors = &predictions.column(0) - &labels;
    weighted_mean(errors.mapv(|e| e * e).view(), weights)
}

/// Weighted area under the ROC curve, with tied scores forming one step.
pub fn streaming_auc(
    predictions: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> f64 {
    let scores = positive_scores(predictions);
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (positives, negatives) = labels
        .iter()
        .zip(weights.iter())
        .fold((0.0, 0.0), |(p, n), (&label, &w)| {
            if is_positive(label) { (p + w, n) } else { (p, n + w) }
        });
    if positives <= 0.0 || negatives <= 0.0 {
        return 0.0;
    }

    let (mut tp, mut fp, mut area) = (0.0, 0.0, 0.0);
    let mut i = 0;
    while i < order.len() {
        let (prev_tp, prev_fp) = (tp, fp);
        let score = scores[order[i]];
        while i < order.len() && scores[order[i]] == score {
            let example = order[i];
            if is_positive(labels[example]) {
                tp += weights[example];
            } else {
                fp += weights[example];
            }
            i += 1;
        }
        area += (fp - prev_fp) * (tp + prev_tp) / 2.0;
    }
    area / (positives * negatives)
}
