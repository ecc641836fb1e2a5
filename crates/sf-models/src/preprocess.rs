use sf_types::{ModelError, ParameterError};

/// Per-column z-score scaling fitted on training rows.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Standardizer {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Standardizer {
    pub(crate) fn fit(features: &[Vec<f64>]) -> Result<Self, ModelError> {
        let n = features.len();
        let d = features.first().map(Vec::len).ok_or(ModelError::Other {
            message: "no training rows".into(),
        })?;

        let mut means = vec![0.0; d];
        for row in features {
            for (m, x) in means.iter_mut().zip(row) {
                *m += x;
            }
        }
        means.iter_mut().for_each(|m| *m /= n as f64);

        let mut stds = vec![0.0; d];
        for row in features {
            for ((s, x), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (x - m) * (x - m);
            }
        }
        for s in &mut stds {
            *s = (*s / n as f64).sqrt();
            // constant column
            if *s < 1e-12 {
                *s = 1.0;
            }
        }

        Ok(Self { means, stds })
    }

    pub(crate) fn width(&self) -> usize {
        self.means.len()
    }

    pub(crate) fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.means)
            .zip(&self.stds)
            .map(|((x, m), s)| (x - m) / s)
            .collect()
    }

    pub(crate) fn transform(&self, features: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        features
            .iter()
            .map(|row| {
                if row.len() != self.width() {
                    return Err(ModelError::FeatureMismatch {
                        expected: self.width(),
                        got: row.len(),
                    });
                }
                Ok(self.transform_row(row))
            })
            .collect()
    }
}

/// Class indices of a classification target plus the class count.
pub(crate) fn class_indices(target: &[f64]) -> Result<(Vec<usize>, usize), ModelError> {
    let mut labels = Vec::with_capacity(target.len());
    for &y in target {
        if y < 0.0 || y.fract() != 0.0 {
            return Err(ModelError::Other {
                message: format!("invalid class label {y}"),
            });
        }
        labels.push(y as usize);
    }
    let n_classes = labels.iter().max().map_or(0, |m| m + 1);
    if n_classes < 2 {
        return Err(ModelError::Other {
            message: "training fold holds a single class".into(),
        });
    }
    Ok((labels, n_classes))
}

pub(crate) fn invalid(error: ParameterError) -> ModelError {
    let parameter = match &error {
        ParameterError::UnknownKey { key } | ParameterError::TypeMismatch { key, .. } => key.clone(),
        ParameterError::Rule(_) => String::new(),
    };
    ModelError::InvalidParameter {
        parameter,
        message: error.to_string(),
    }
}

pub(crate) fn softmax_in_place(scores: &mut [f64]) {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        total += *s;
    }
    scores.iter_mut().for_each(|s| *s /= total);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardizes_columns() {
        let x = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = Standardizer::fit(&x).unwrap();
        let t = scaler.transform(&x).unwrap();
        assert_eq!(t[0], vec![-1.0, 0.0]);
        assert_eq!(t[1], vec![1.0, 0.0]);
        assert!(matches!(
            scaler.transform(&[vec![1.0]]),
            Err(ModelError::FeatureMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut s = vec![1000.0, 1000.0, 999.0];
        softmax_in_place(&mut s);
        assert!((s.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(s[0] > s[2]);
    }

    #[test]
    fn class_indices_requires_two_classes() {
        assert_eq!(class_indices(&[0.0, 1.0, 1.0]).unwrap(), (vec![0, 1, 1], 2));
        assert!(class_indices(&[0.0, 0.0]).is_err());
        assert!(class_indices(&[0.0, 1.5]).is_err());
    }
}
