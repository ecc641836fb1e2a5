use thiserror::Error;

/// Main error type for the Sifter system
#[derive(Error, Debug)]
pub enum SfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Candidate error: {0}")]
    Candidate(#[from] CandidateError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Invalid engine or search space configuration. Always raised before the
/// search loop starts, except for rules that misbehave on a draw the
/// registration probe did not cover.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("No search spaces configured")]
    NoSearchSpaces,

    #[error("Search space id must not be empty")]
    EmptyId,

    #[error("Duplicate search space id: {id}")]
    DuplicateId { id: String },

    #[error("Search space id '{id}' is reserved")]
    ReservedId { id: String },

    #[error("Parameter '{parameter}' of search space '{id}' has no candidate values")]
    EmptyParameterValues { id: String, parameter: String },

    #[error("Parameter '{parameter}' of search space '{id}' has a non-finite value")]
    NonFiniteValue { id: String, parameter: String },

    #[error("Parameter rules of search space '{id}' reference unknown key '{key}'")]
    UnknownRuleKey { id: String, key: String },

    #[error("Parameter rules of search space '{id}' failed: {message}")]
    RuleFailed { id: String, message: String },

    #[error("Parameter rules of search space '{id}' are not idempotent")]
    RuleNotIdempotent { id: String },

    #[error("Search space '{id}' does not support {problem_type} problems")]
    UnsupportedProblemType { id: String, problem_type: String },

    #[error("Number of folds must be at least 2, got {n_folds}")]
    InvalidFolds { n_folds: usize },
}

/// Dataset validation errors, raised when data is loaded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Dataset has no rows")]
    Empty,

    #[error("Dataset rows have no features")]
    NoFeatures,

    #[error("Feature rows ({rows}) and target length ({targets}) differ")]
    ShapeMismatch { rows: usize, targets: usize },

    #[error("Row {row} has {got} features, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("Test features have {got} columns, expected {expected}")]
    TestWidthMismatch { expected: usize, got: usize },

    #[error("Non-finite value at row {row}")]
    NonFinite { row: usize },

    #[error("Invalid class label {label} at row {row}: labels must be integers 0..n_classes")]
    InvalidClassLabel { row: usize, label: f64 },

    #[error("Class {class} never appears in the target")]
    MissingClass { class: usize },

    #[error("Classification needs at least two classes, got {classes}")]
    SingleClass { classes: usize },

    #[error("Class {class} has {count} rows, fewer than the {n_folds} folds")]
    NotStratifiable {
        class: usize,
        count: usize,
        n_folds: usize,
    },

    #[error("Dataset has {rows} rows, fewer than the {n_folds} folds")]
    TooFewRows { rows: usize, n_folds: usize },
}

/// Engine lifecycle violations, reported synchronously to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine is still interrupting; wait for it to stop")]
    StillInterrupting,

    #[error("Search spaces cannot change while the engine is running")]
    SearchSpacesFrozen,

    #[error("Engine is busy: cannot {operation} while running")]
    Busy { operation: String },

    #[error("No dataset loaded")]
    NoData,

    #[error("Unknown search space id: {id}")]
    UnknownSpace { id: String },
}

/// A single candidate evaluation failed. Recovered inside the search loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CandidateError {
    #[error("Training failed on fold {fold}: {source}")]
    Fit { fold: usize, source: ModelError },

    #[error("Prediction failed on fold {fold}: {source}")]
    Predict { fold: usize, source: ModelError },

    #[error("Prediction shape mismatch: expected {expected}, got {got}")]
    PredictionShape { expected: String, got: String },

    #[error("Score function returned a non-finite value: {score}")]
    NonFiniteScore { score: f64 },

    #[error("Model panicked: {message}")]
    Panicked { message: String },
}

/// Errors surfaced by model family implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("invalid parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("training did not converge: {message}")]
    NotConverged { message: String },

    #[error("model is not fitted")]
    NotFitted,

    #[error("input has {got} features, model expects {expected}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("{message}")]
    Other { message: String },
}

/// Errors from reading or writing a parameter assignment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("unknown parameter '{key}'")]
    UnknownKey { key: String },

    #[error("parameter '{key}' expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        got: String,
    },

    #[error("{0}")]
    Rule(String),
}

/// Result type alias for Sifter operations
pub type SfResult<T> = Result<T, SfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DataError::NotStratifiable {
            class: 1,
            count: 3,
            n_folds: 5,
        };

        assert!(error.to_string().contains("Class 1"));
        assert!(error.to_string().contains("5 folds"));
    }

    #[test]
    fn test_error_conversion() {
        let config_error = ConfigError::DuplicateId { id: "lr".into() };
        let sf_error: SfError = config_error.into();

        match sf_error {
            SfError::Config(ConfigError::DuplicateId { id }) => assert_eq!(id, "lr"),
            _ => panic!("Expected Config error"),
        }
    }

    #[test]
    fn candidate_error_wraps_model_error() {
        let error = CandidateError::Fit {
            fold: 2,
            source: ModelError::InvalidParameter {
                parameter: "penalty".into(),
                message: "l1 unsupported".into(),
            },
        };
        let text = error.to_string();
        assert!(text.contains("fold 2"));
        assert!(text.contains("penalty"));
    }
}
