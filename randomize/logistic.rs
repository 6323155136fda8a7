//! Ridge-penalized logistic regression fit by iteratively reweighted least
//! squares.
//!
//! This is the default [`BinaryClassifier`]: batch membership is modeled as a
//! binary outcome of the covariates and the predicted probabilities feed the
//! balance statistic. Every coefficient except the intercept carries an L2
//! penalty (strength 1.0 unless overridden), which keeps the normal equations
//! well-posed when a small batch is close to separable.

use crate::classifier::{BinaryClassifier, ClassifierError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use ndarray_linalg::Solve;

const MIN_WEIGHT: f64 = 1e-6;
const PROB_EPS: f64 = 1e-8;
const ETA_LIMIT: f64 = 700.0;

/// Logistic model with an unpenalized intercept, fit by IRLS.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    penalty: f64,
    max_iterations: usize,
    tolerance: f64,
    coefficients: Option<Array1<f64>>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            penalty: 1.0,
            max_iterations: 50,
            tolerance: 1e-8,
            coefficients: None,
        }
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the L2 penalty strength. The intercept is never penalized.
    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Fitted coefficients, intercept first. `None` before a successful fit.
    pub fn coefficients(&self) -> Option<ArrayView1<'_, f64>> {
        self.coefficients.as_ref().map(Array1::view)
    }
}

impl BinaryClassifier for LogisticRegression {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ClassifierError> {
        validate_inputs(x, y)?;

        let design = design_matrix(x);
        let mut beta = Array1::<f64>::zeros(design.ncols());
        let mut eta = design.dot(&beta);
        let mut last_penalized_deviance = f64::INFINITY;
        let mut last_change = f64::NAN;

        for iter in 1..=self.max_iterations {
            let (_, weights, z) = update_glm_vectors(y, &eta);

            // Penalized normal equations: (X'WX + lambda * I) beta = X'Wz,
            // with a zero in the intercept slot of the penalty diagonal.
            let weighted_design = &design * &weights.view().insert_axis(Axis(1));
            let mut xtwx = design.t().dot(&weighted_design);
            for j in 1..xtwx.nrows() {
                xtwx[[j, j]] += self.penalty;
            }
            let xtwz = design.t().dot(&(&weights * &z));

            beta = xtwx
                .solve_into(xtwz)
                .map_err(ClassifierError::LinearSystemSolveFailed)?;
            eta = design.dot(&beta);

            let (mu, _, _) = update_glm_vectors(y, &eta);
            let penalty_term = self.penalty * beta.slice(s![1..]).mapv(|b| b * b).sum();
            let penalized_deviance = calculate_deviance(y, &mu) + penalty_term;
            last_change = (last_penalized_deviance - penalized_deviance).abs();

            log::debug!(
                "IRLS iteration #{:<2} | penalized deviance: {:<13.7} | change: {:>12.6e}",
                iter,
                penalized_deviance,
                last_change
            );

            // Scaled tolerance keeps the test meaningful when the deviance is
            // close to zero.
            if last_change < self.tolerance * (0.1 + penalized_deviance.abs()) {
                self.coefficients = Some(beta);
                return Ok(());
            }
            last_penalized_deviance = penalized_deviance;
        }

        Err(ClassifierError::DidNotConverge {
            max_iterations: self.max_iterations,
            last_change,
        })
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ClassifierError> {
        let beta = self
            .coefficients
            .as_ref()
            .ok_or(ClassifierError::NotFitted)?;
        if x.ncols() + 1 != beta.len() {
            return Err(ClassifierError::CovariateWidthMismatch {
                expected: beta.len() - 1,
                found: x.ncols(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ClassifierError::NonFiniteCovariate);
        }

        let eta = design_matrix(x).dot(beta);
        let mut probabilities = eta.mapv(|e| sigmoid(e.clamp(-ETA_LIMIT, ETA_LIMIT)));
        probabilities.mapv_inplace(|p| p.clamp(PROB_EPS, 1.0 - PROB_EPS));
        Ok(probabilities)
    }
}

fn validate_inputs(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ClassifierError> {
    if x.nrows() != y.len() {
        return Err(ClassifierError::LabelLengthMismatch {
            x_rows: x.nrows(),
            y_len: y.len(),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::NonFiniteCovariate);
    }

    let mut positives = 0usize;
    for &label in y.iter() {
        if label == 1.0 {
            positives += 1;
        } else if label != 0.0 {
            return Err(ClassifierError::NonBinaryLabel(label));
        }
    }
    if positives == 0 || positives == y.len() {
        return Err(ClassifierError::SingleClassLabel);
    }
    Ok(())
}

/// Prepends the intercept column to the covariates.
fn design_matrix(x: ArrayView2<f64>) -> Array2<f64> {
    let mut design = Array2::<f64>::ones((x.nrows(), x.ncols() + 1));
    design.slice_mut(s![.., 1..]).assign(&x);
    design
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

/// One IRLS update of the GLM working quantities for the logit link.
fn update_glm_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    // Clamp eta to prevent overflow in exp, and keep mu strictly inside
    // (0, 1) so the weights and the deviance stay finite.
    let eta_clamped = eta.mapv(|e| e.clamp(-ETA_LIMIT, ETA_LIMIT));
    let mut mu = eta_clamped.mapv(sigmoid);
    mu.mapv_inplace(|v| v.clamp(PROB_EPS, 1.0 - PROB_EPS));
    let weights = (&mu * (1.0 - &mu)).mapv(|v| v.max(MIN_WEIGHT));

    let residual = &y - &mu;
    let z = &eta_clamped + &(&residual / &weights);

    (mu, weights, z)
}

/// Binomial deviance of the fitted means.
fn calculate_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-8;
    let total_residual = ndarray::Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let mui_c = mui.clamp(EPS, 1.0 - EPS);
        let term1 = if yi > EPS {
            yi * (yi.ln() - mui_c.ln())
        } else {
            0.0
        };
        let term2 = if yi < 1.0 - EPS {
            (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui_c).ln())
        } else {
            0.0
        };
        acc + term1 + term2
    });
    2.0 * total_residual
}
