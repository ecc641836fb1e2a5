//! Problem types and the in-memory training dataset.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::DataError;

/// Kind of supervised problem. Fixed for an engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Classification,
    Regression,
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::Regression => write!(f, "regression"),
        }
    }
}

/// Row-major feature matrix.
pub type Features = Vec<Vec<f64>>;

/// Training features and target plus optional test features.
///
/// Classification targets hold class indices `0..n_classes` encoded as
/// floats; probability columns of a prediction follow the same indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Features,
    target: Vec<f64>,
    test_features: Option<Features>,
    n_features: usize,
}

impl Dataset {
    pub fn new(
        features: Features,
        target: Vec<f64>,
        test_features: Option<Features>,
    ) -> Result<Self, DataError> {
        if features.is_empty() {
            return Err(DataError::Empty);
        }
        if features.len() != target.len() {
            return Err(DataError::ShapeMismatch {
                rows: features.len(),
                targets: target.len(),
            });
        }

        let n_features = features[0].len();
        if n_features == 0 {
            return Err(DataError::NoFeatures);
        }
        check_rows(&features, n_features)?;

        if let Some(row) = target.iter().position(|y| !y.is_finite()) {
            return Err(DataError::NonFinite { row });
        }

        if let Some(test) = &test_features {
            if let Some(row) = test.iter().find(|row| row.len() != n_features) {
                return Err(DataError::TestWidthMismatch {
                    expected: n_features,
                    got: row.len(),
                });
            }
            check_rows(test, n_features)?;
        }

        Ok(Self {
            features,
            target,
            test_features,
            n_features,
        })
    }

    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }

    pub fn test_features(&self) -> Option<&[Vec<f64>]> {
        self.test_features.as_deref()
    }

    pub fn n_rows(&self) -> usize {
        self.features.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Class index of every training row. Fails if any label is not a
    /// non-negative integer below the row count, if a class in
    /// `0..n_classes` is absent, or if there are fewer than two classes.
    pub fn class_labels(&self) -> Result<Vec<usize>, DataError> {
        // every class must be present, so no index can reach the row count
        let limit = self.target.len() as f64;
        let mut labels = Vec::with_capacity(self.target.len());
        for (row, &y) in self.target.iter().enumerate() {
            if y < 0.0 || y.fract() != 0.0 || y >= limit {
                return Err(DataError::InvalidClassLabel { row, label: y });
            }
            labels.push(y as usize);
        }

        let n_classes = labels.iter().max().map_or(0, |m| m + 1);
        let mut counts = vec![0usize; n_classes];
        for &label in &labels {
            counts[label] += 1;
        }
        if let Some(class) = counts.iter().position(|&c| c == 0) {
            return Err(DataError::MissingClass { class });
        }
        if n_classes < 2 {
            return Err(DataError::SingleClass { classes: n_classes });
        }
        Ok(labels)
    }

    /// Number of classes, assuming [`Dataset::class_labels`] succeeds.
    pub fn n_classes(&self) -> usize {
        self.target
            .iter()
            .fold(0.0f64, |acc, &y| acc.max(y))
            .max(0.0) as usize
            + 1
    }

    /// Rows of the training set for the given indices.
    pub fn select_rows(&self, indices: &[usize]) -> (Features, Vec<f64>) {
        let features = indices.iter().map(|&i| self.features[i].clone()).collect();
        let target = indices.iter().map(|&i| self.target[i]).collect();
        (features, target)
    }

    /// Stable digest of the dataset shape and target, used to decide whether a
    /// persisted ledger was computed on this data.
    pub fn fingerprint(&self) -> DataFingerprint {
        let mut hash = FNV_OFFSET;
        for y in &self.target {
            hash = fnv(hash, y.to_bits());
        }
        for row in &self.features {
            for x in row {
                hash = fnv(hash, x.to_bits());
            }
        }
        DataFingerprint {
            rows: self.n_rows(),
            columns: self.n_features,
            test_rows: self.test_features.as_ref().map_or(0, Vec::len),
            checksum: hash,
        }
    }
}

/// Identity of a dataset for persistence compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFingerprint {
    pub rows: usize,
    pub columns: usize,
    pub test_rows: usize,
    pub checksum: u64,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv(hash: u64, word: u64) -> u64 {
    word.to_le_bytes()
        .iter()
        .fold(hash, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

fn check_rows(rows: &[Vec<f64>], expected: usize) -> Result<(), DataError> {
    for (i, row) in rows.iter().enumerate() {
        if row.len() != expected {
            return Err(DataError::RaggedRow {
                row: i,
                expected,
                got: row.len(),
            });
        }
        if row.iter().any(|x| !x.is_finite()) {
            return Err(DataError::NonFinite { row: i });
        }
    }
    Ok(())
}
