//! # sf-models
//!
//! Reference model families for the search engine plus the scoring
//! functions they are usually ranked with. Any type implementing
//! [`sf_types::ModelFamily`] can be registered; these are the ones the
//! demo and the tests use.

mod knn;
mod logistic;
pub mod metrics;
mod preprocess;
mod ridge;

pub use knn::KNearestNeighbors;
pub use logistic::{LogisticRegression, SOLVERS};
pub use metrics::scorer;
pub use ridge::RidgeRegression;
