//! Scoring functions. All are higher-is-better and return `NaN` when the
//! prediction kind does not fit the metric or the metric is undefined.

use sf_types::{Prediction, ScoreFunction};

/// Look up a scoring function by name.
pub fn scorer(name: &str) -> Option<ScoreFunction> {
    let func: fn(&[f64], &Prediction) -> f64 = match name {
        "roc_auc" => roc_auc,
        "accuracy" => accuracy,
        "neg_log_loss" => neg_log_loss,
        "r2" => r2,
        "neg_mean_squared_error" => neg_mean_squared_error,
        _ => return None,
    };
    Some(ScoreFunction::new(name, func))
}

/// Area under the ROC curve. Binary probabilities use the positive column;
/// more than two columns give the macro one-vs-rest average; value
/// predictions are treated as scores for label `1`.
pub fn roc_auc(truth: &[f64], prediction: &Prediction) -> f64 {
    match prediction {
        Prediction::Values(scores) => {
            let positives: Vec<bool> = truth.iter().map(|&y| y == 1.0).collect();
            binary_auc(scores, &positives)
        }
        Prediction::Probabilities(rows) => match prediction.n_columns() {
            Some(2) => {
                let scores: Vec<f64> = rows.iter().map(|r| r[1]).collect();
                let positives: Vec<bool> = truth.iter().map(|&y| y == 1.0).collect();
                binary_auc(&scores, &positives)
            }
            Some(n) if n > 2 => {
                let total: f64 = (0..n)
                    .map(|class| {
                        let scores: Vec<f64> = rows.iter().map(|r| r[class]).collect();
                        let positives: Vec<bool> =
                            truth.iter().map(|&y| y == class as f64).collect();
                        binary_auc(&scores, &positives)
                    })
                    .sum();
                total / n as f64
            }
            _ => f64::NAN,
        },
    }
}

/// Rank-based (Mann–Whitney) AUC with average ranks for ties.
fn binary_auc(scores: &[f64], positives: &[bool]) -> f64 {
    if scores.len() != positives.len() {
        return f64::NAN;
    }
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if positives[idx] {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    (rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

/// Fraction of rows whose most probable class equals the label.
pub fn accuracy(truth: &[f64], prediction: &Prediction) -> f64 {
    let Prediction::Probabilities(rows) = prediction else {
        return f64::NAN;
    };
    if rows.len() != truth.len() || rows.is_empty() {
        return f64::NAN;
    }
    let hits = rows
        .iter()
        .zip(truth)
        .filter(|(row, &y)| argmax(row) == Some(y as usize))
        .count();
    hits as f64 / truth.len() as f64
}

/// Negative mean cross-entropy, probabilities clipped to `[1e-15, 1]`.
pub fn neg_log_loss(truth: &[f64], prediction: &Prediction) -> f64 {
    let Prediction::Probabilities(rows) = prediction else {
        return f64::NAN;
    };
    if rows.len() != truth.len() || rows.is_empty() {
        return f64::NAN;
    }
    let mut loss = 0.0;
    for (row, &y) in rows.iter().zip(truth) {
        let Some(&p) = row.get(y as usize) else {
            return f64::NAN;
        };
        loss -= p.clamp(1e-15, 1.0).ln();
    }
    -loss / truth.len() as f64
}

/// Coefficient of determination.
pub fn r2(truth: &[f64], prediction: &Prediction) -> f64 {
    let Prediction::Values(values) = prediction else {
        return f64::NAN;
    };
    if values.len() != truth.len() || truth.is_empty() {
        return f64::NAN;
    }
    let mean = truth.iter().sum::<f64>() / truth.len() as f64;
    let ss_tot: f64 = truth.iter().map(|y| (y - mean) * (y - mean)).sum();
    let ss_res: f64 = truth
        .iter()
        .zip(values)
        .map(|(y, p)| (y - p) * (y - p))
        .sum();
    if ss_tot == 0.0 {
        return f64::NAN;
    }
    1.0 - ss_res / ss_tot
}

pub fn neg_mean_squared_error(truth: &[f64], prediction: &Prediction) -> f64 {
    let Prediction::Values(values) = prediction else {
        return f64::NAN;
    };
    if values.len() != truth.len() || truth.is_empty() {
        return f64::NAN;
    }
    -truth
        .iter()
        .zip(values)
        .map(|(y, p)| (y - p) * (y - p))
        .sum::<f64>()
        / truth.len() as f64
}

fn argmax(row: &[f64]) -> Option<usize> {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}
