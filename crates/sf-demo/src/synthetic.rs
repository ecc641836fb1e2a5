//! Synthetic binary classification data for the demo.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sf_types::{DataError, Dataset, Features};

/// Two informative features, one interaction and two noise columns. The
/// label is drawn from a logistic model so no family scores perfectly.
pub fn classification(rows: usize, test_rows: usize, seed: u64) -> Result<Dataset, DataError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (features, target) = draw(&mut rng, rows);
    let (test, _) = draw(&mut rng, test_rows);
    Dataset::new(features, target, (test_rows > 0).then_some(test))
}

fn draw(rng: &mut ChaCha8Rng, rows: usize) -> (Features, Vec<f64>) {
    let mut features = Vec::with_capacity(rows);
    let mut target = Vec::with_capacity(rows);
    for _ in 0..rows {
        let x: [f64; 4] = [
            rng.random_range(-2.0..2.0),
            rng.random_range(-2.0..2.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        ];
        let logit = 1.5 * x[0] - 1.0 * x[1] + 0.8 * x[0] * x[1];
        let p = 1.0 / (1.0 + (-logit).exp());
        target.push(if rng.random::<f64>() < p { 1.0 } else { 0.0 });
        features.push(vec![x[0], x[1], x[0] * x[1], x[2], x[3]]);
    }
    (features, target)
}
