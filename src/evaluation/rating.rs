//! Rating metrics: errors between true ratings and predicted scores of the
//! same `(user, item)` pairs.
use std::collections::HashMap;

use crate::data::{ColumnNames, Id, Table};
use crate::{DataError, EvaluationError};

/// True ratings and predictions of the `(user, item)` pairs present in both
/// tables, aligned row by row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RatingMerge {
    /// Ratings from the true table.
    pub truth: Vec<f64>,
    /// Scores from the prediction table.
    pub predictions: Vec<f64>,
}

impl RatingMerge {
    /// Number of merged pairs.
    pub fn len(&self) -> usize {
        self.truth.len()
    }

    /// Whether no pair was present in both tables.
    pub fn is_empty(&self) -> bool {
        self.truth.is_empty()
    }
}

/// Inner join of the two tables on `(user, item)`. Rows are emitted in the
/// order of the true table; a pair repeated in the prediction table is
/// emitted once per match.
pub fn merge_rating_true_pred(
    truth: &Table,
    predictions: &Table,
    columns: &ColumnNames,
) -> Result<RatingMerge, DataError> {
    let pred_users = predictions.ids(&columns.user)?;
    let pred_items = predictions.ids(&columns.item)?;
    let pred_scores = predictions.floats(&columns.prediction)?;

    let mut pred_rows: HashMap<(&Id, &Id), Vec<usize>> = HashMap::new();
    for (row, key) in pred_users.iter().zip(pred_items.iter()).enumerate() {
        pred_rows.entry(key).or_insert_with(Vec::new).push(row);
    }

    let true_users = truth.ids(&columns.user)?;
    let true_items = truth.ids(&columns.item)?;
    let true_ratings = truth.floats(&columns.rating)?;

    let mut merge = RatingMerge::default();
    for (row, key) in true_users.iter().zip(true_items.iter()).enumerate() {
        if let Some(matches) = pred_rows.get(&key) {
            for &pred_row in matches {
                merge.truth.push(true_ratings[row]);
                merge.predictions.push(pred_scores[pred_row]);
            }
        }
    }

    Ok(merge)
}

fn mean<I: Iterator<Item = f64>>(values: I, len: usize) -> f64 {
    values.sum::<f64>() / len as f64
}

fn variance(values: &[f64]) -> f64 {
    let avg = mean(values.iter().cloned(), values.len());
    mean(values.iter().map(|x| (x - avg).powi(2)), values.len())
}

/// 1 - numerator / denominator, with a perfect score for a zero numerator
/// and zero for a zero denominator otherwise.
fn one_minus_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        1.0 - numerator / denominator
    } else if numerator == 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Root mean squared error.
pub fn rmse(truth: &[f64], predictions: &[f64]) -> f64 {
    mean(
        truth
            .iter()
            .zip(predictions.iter())
            .map(|(t, p)| (t - p).powi(2)),
        truth.len(),
    )
    .sqrt()
}

/// Mean absolute error.
pub fn mae(truth: &[f64], predictions: &[f64]) -> f64 {
    mean(
        truth
            .iter()
            .zip(predictions.iter())
            .map(|(t, p)| (t - p).abs()),
        truth.len(),
    )
}

/// Coefficient of determination.
pub fn rsquared(truth: &[f64], predictions: &[f64]) -> f64 {
    let avg = mean(truth.iter().cloned(), truth.len());
    let ss_res: f64 = truth
        .iter()
        .zip(predictions.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = truth.iter().map(|t| (t - avg).powi(2)).sum();

    one_minus_ratio(ss_res, ss_tot)
}

/// Explained variance: `1 - Var(t - p) / Var(t)`.
pub fn exp_var(truth: &[f64], predictions: &[f64]) -> f64 {
    let residuals: Vec<f64> = truth
        .iter()
        .zip(predictions.iter())
        .map(|(t, p)| t - p)
        .collect();

    one_minus_ratio(variance(&residuals), variance(truth))
}

fn check_binary(labels: &[f64]) -> Result<(), EvaluationError> {
    match labels.iter().find(|&&label| label != 0.0 && label != 1.0) {
        Some(&label) => Err(EvaluationError::NonBinaryLabels(label)),
        None => Ok(()),
    }
}

/// Ranks starting at 1; tied values share the average of their ranks.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut stop = start + 1;
        while stop < order.len() && values[order[stop]] == values[order[start]] {
            stop += 1;
        }
        // Positions start..stop hold ranks start + 1..=stop.
        let rank = (start + stop + 1) as f64 / 2.0;
        for &idx in &order[start..stop] {
            ranks[idx] = rank;
        }
        start = stop;
    }

    ranks
}

/// Area under the ROC curve for binary labels, computed from the
/// Mann-Whitney U statistic.
pub fn auc(truth: &[f64], predictions: &[f64]) -> Result<f64, EvaluationError> {
    check_binary(truth)?;

    let num_positive = truth.iter().filter(|&&label| label == 1.0).count();
    let num_negative = truth.len() - num_positive;
    if num_positive == 0 || num_negative == 0 {
        return Err(EvaluationError::UndefinedMetric {
            metric: "auc".to_owned(),
            reason: "only one class is present in the true ratings".to_owned(),
        });
    }

    let ranks = average_ranks(predictions);
    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(truth.iter())
        .filter(|&(_, &label)| label == 1.0)
        .map(|(rank, _)| rank)
        .sum();
    let (num_positive, num_negative) = (num_positive as f64, num_negative as f64);

    Ok(
        (positive_rank_sum - num_positive * (num_positive + 1.0) / 2.0)
            / (num_positive * num_negative),
    )
}

/// Binary cross-entropy of probabilistic predictions.
pub fn logloss(truth: &[f64], predictions: &[f64]) -> Result<f64, EvaluationError> {
    const EPS: f64 = 1e-15;

    check_binary(truth)?;

    Ok(-mean(
        truth.iter().zip(predictions.iter()).map(|(&y, &p)| {
            let p = p.max(EPS).min(1.0 - EPS);
            y * p.ln() + (1.0 - y) * (1.0 - p).ln()
        }),
        truth.len(),
    ))
}
