//! The binary-classifier seam used by the balance evaluator.
//!
//! The evaluator never names a concrete model; it asks a factory for a fresh
//! [`BinaryClassifier`] per batch. [`crate::logistic::LogisticRegression`] is
//! the default implementation, and tests substitute deterministic fakes.

use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

/// A classifier failed to fit or predict.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("the covariate matrix has {x_rows} rows but the label vector has {y_len}")]
    LabelLengthMismatch { x_rows: usize, y_len: usize },
    #[error("expected {expected} covariate columns, found {found}")]
    CovariateWidthMismatch { expected: usize, found: usize },
    #[error("labels must be exactly 0.0 or 1.0 (found {0})")]
    NonBinaryLabel(f64),
    #[error("labels contain only one class; fitting requires both")]
    SingleClassLabel,
    #[error("the covariate matrix contains a non-finite value")]
    NonFiniteCovariate,
    #[error(
        "IRLS did not converge within {max_iterations} iterations (last deviance change {last_change:.6e})"
    )]
    DidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },
    #[error("a linear system solve failed; the penalized normal equations may be singular: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),
    #[error("predict_proba was called before fit")]
    NotFitted,
}

/// A probabilistic binary classifier.
///
/// `fit` learns from a covariate matrix (one row per subject) and a label
/// vector whose entries are exactly 0.0 or 1.0 with both classes present.
/// `predict_proba` returns the probability of the positive class for each
/// row. Implementations must be deterministic for fixed inputs so that
/// candidate scoring is reproducible.
pub trait BinaryClassifier {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ClassifierError>;

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ClassifierError>;
}
