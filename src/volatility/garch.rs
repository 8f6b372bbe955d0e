//! GARCH(p,q) conditional volatility behind a swappable fitter interface
//!
//! Zero-mean model on percentage returns:
//!
//! ```text
//! σ²_t = ω + Σ_{i=1..p} α_i · r²_{t-i} + Σ_{j=1..q} β_j · σ²_{t-j}
//! ```
//!
//! with ω > 0, α, β ≥ 0 and Σα + Σβ < 1. Pre-sample terms use the sample
//! variance as backcast. Parameters maximise the Gaussian log-likelihood.

use argmin::core::{CostFunction, Error as ArgminError, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use thiserror::Error;

/// Returns are scaled to percent before fitting
pub const RETURN_SCALE: f64 = 100.0;

/// Smallest sample the MLE fit will attempt
pub const MIN_FIT_OBSERVATIONS: usize = 30;

const MAX_ITERATIONS: u64 = 2_000;
const SD_TOLERANCE: f64 = 1e-10;
const PERSISTENCE_CEIL: f64 = 0.9999;
const INFEASIBLE_COST: f64 = 1e12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("Insufficient data for GARCH fit: {available} < {required}")]
    InsufficientData { available: usize, required: usize },
    #[error("Degenerate return sample (zero or non-finite variance)")]
    Degenerate,
    #[error("GARCH fit did not converge within {0} iterations")]
    NonConvergence(u64),
    #[error("Numerical failure in GARCH fit: {0}")]
    Numerical(String),
    #[error("Solver error: {0}")]
    Solver(String),
}

/// Fits a GARCH(p,q) model and returns the in-sample conditional volatility,
/// one value per input return, in the same units as the input.
#[cfg_attr(test, mockall::automock)]
pub trait GarchFitter: Send + Sync {
    fn fit(&self, returns: &[f64], p: usize, q: usize) -> Result<Vec<f64>, FitError>;
}

/// Fitted coefficients, in percent-return units
#[derive(Debug, Clone, PartialEq)]
pub struct GarchParams {
    pub omega: f64,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
}

impl GarchParams {
    fn from_vector(theta: &[f64], p: usize, q: usize) -> Self {
        Self {
            omega: theta[0],
            alpha: theta[1..=p].to_vec(),
            beta: theta[1 + p..1 + p + q].to_vec(),
        }
    }

    pub fn persistence(&self) -> f64 {
        self.alpha.iter().sum::<f64>() + self.beta.iter().sum::<f64>()
    }

    fn is_feasible(&self) -> bool {
        self.omega > 0.0
            && self.alpha.iter().all(|a| *a >= 0.0)
            && self.beta.iter().all(|b| *b >= 0.0)
            && self.persistence() < PERSISTENCE_CEIL
    }
}

/// Conditional variance recursion with sample-variance backcast
pub fn conditional_variance(returns: &[f64], params: &GarchParams, backcast: f64) -> Vec<f64> {
    let p = params.alpha.len();
    let q = params.beta.len();
    let mut variance: Vec<f64> = Vec::with_capacity(returns.len());

    for t in 0..returns.len() {
        let mut s2 = params.omega;
        for i in 1..=p {
            s2 += params.alpha[i - 1]
                * if t >= i {
                    returns[t - i].powi(2)
                } else {
                    backcast
                };
        }
        for j in 1..=q {
            s2 += params.beta[j - 1] * if t >= j { variance[t - j] } else { backcast };
        }
        variance.push(s2);
    }

    variance
}

/// Negative Gaussian log-likelihood (constant dropped)
struct GarchLikelihood {
    returns: Vec<f64>,
    backcast: f64,
    p: usize,
    q: usize,
}

impl CostFunction for GarchLikelihood {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, ArgminError> {
        let params = GarchParams::from_vector(theta, self.p, self.q);
        if !params.is_feasible() {
            return Ok(INFEASIBLE_COST);
        }

        let variance = conditional_variance(&self.returns, &params, self.backcast);
        let nll: f64 = self
            .returns
            .iter()
            .zip(variance.iter())
            .map(|(r, s2)| 0.5 * (s2.ln() + r * r / s2))
            .sum();

        Ok(if nll.is_finite() { nll } else { INFEASIBLE_COST })
    }
}

/// Maximum-likelihood GARCH fit using Nelder-Mead
#[derive(Debug, Clone, Default)]
pub struct MleGarchFitter;

impl MleGarchFitter {
    pub fn new() -> Self {
        Self
    }

    /// Fit on percentage returns and return the coefficients plus the
    /// percent-unit conditional variance
    pub fn fit_params(
        &self,
        returns: &[f64],
        p: usize,
        q: usize,
    ) -> Result<(GarchParams, Vec<f64>), FitError> {
        if returns.len() < MIN_FIT_OBSERVATIONS {
            return Err(FitError::InsufficientData {
                available: returns.len(),
                required: MIN_FIT_OBSERVATIONS,
            });
        }
        if p == 0 {
            return Err(FitError::Numerical("GARCH requires p >= 1".to_string()));
        }

        let scaled: Vec<f64> = returns.iter().map(|r| r * RETURN_SCALE).collect();
        if scaled.iter().any(|r| !r.is_finite()) {
            return Err(FitError::Degenerate);
        }
        let backcast = scaled.iter().map(|r| r * r).sum::<f64>() / scaled.len() as f64;
        if !backcast.is_finite() || backcast <= 0.0 {
            return Err(FitError::Degenerate);
        }

        let problem = GarchLikelihood {
            returns: scaled.clone(),
            backcast,
            p,
            q,
        };

        let solver = NelderMead::new(initial_simplex(backcast, p, q))
            .with_sd_tolerance(SD_TOLERANCE)
            .map_err(|e| FitError::Solver(e.to_string()))?;

        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(MAX_ITERATIONS))
            .run()
            .map_err(|e| FitError::Solver(e.to_string()))?;

        let state = result.state();
        if matches!(
            state.get_termination_reason(),
            Some(TerminationReason::MaxItersReached)
        ) {
            return Err(FitError::NonConvergence(MAX_ITERATIONS));
        }

        let theta = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| FitError::Solver("solver returned no parameters".to_string()))?;
        let params = GarchParams::from_vector(&theta, p, q);
        if !params.is_feasible() {
            return Err(FitError::Numerical(format!(
                "optimum outside the stationary region (persistence={:.4})",
                params.persistence()
            )));
        }

        let variance = conditional_variance(&scaled, &params, backcast);
        if variance.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(FitError::Numerical(
                "non-positive conditional variance".to_string(),
            ));
        }

        Ok((params, variance))
    }
}

impl GarchFitter for MleGarchFitter {
    fn fit(&self, returns: &[f64], p: usize, q: usize) -> Result<Vec<f64>, FitError> {
        let (_, variance) = self.fit_params(returns, p, q)?;
        Ok(variance
            .into_iter()
            .map(|v| v.sqrt() / RETURN_SCALE)
            .collect())
    }
}

/// Starting simplex around a typical daily-equity GARCH solution
fn initial_simplex(backcast: f64, p: usize, q: usize) -> Vec<Vec<f64>> {
    let alpha_total = 0.08;
    let beta_total = if q > 0 { 0.88 } else { 0.0 };
    let omega = backcast * (1.0 - alpha_total - beta_total);

    let mut base = Vec::with_capacity(1 + p + q);
    base.push(omega);
    base.extend(std::iter::repeat(alpha_total / p as f64).take(p));
    if q > 0 {
        base.extend(std::iter::repeat(beta_total / q as f64).take(q));
    }

    let mut simplex = vec![base.clone()];
    for k in 0..base.len() {
        let mut vertex = base.clone();
        vertex[k] = if k == 0 {
            vertex[k] * 1.5
        } else {
            vertex[k] * 0.8 + 0.01
        };
        simplex.push(vertex);
    }
    simplex
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn simulate_garch(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let z = Normal::new(0.0, 1.0).unwrap();
        let (omega, alpha, beta) = (2e-6, 0.08, 0.9);
        let mut s2 = omega / (1.0 - alpha - beta);
        let mut prev: f64 = 0.0;
        (0..n)
            .map(|_| {
                s2 = omega + alpha * prev * prev + beta * s2;
                prev = s2.sqrt() * z.sample(&mut rng);
                prev
            })
            .collect()
    }

    #[test]
    fn rejects_short_samples() {
        let err = MleGarchFitter::new().fit(&[0.01; 10], 1, 1).unwrap_err();
        assert_eq!(
            err,
            FitError::InsufficientData {
                available: 10,
                required: MIN_FIT_OBSERVATIONS
            }
        );
    }

    #[test]
    fn rejects_zero_variance() {
        let err = MleGarchFitter::new().fit(&[0.0; 100], 1, 1).unwrap_err();
        assert_eq!(err, FitError::Degenerate);
    }

    #[test]
    fn recursion_reacts_to_shocks() {
        let params = GarchParams {
            omega: 0.05,
            alpha: vec![0.1],
            beta: vec![0.85],
        };
        let variance = conditional_variance(&[0.0, 5.0, 0.0, 0.0], &params, 1.0);

        assert!((variance[0] - (0.05 + 0.1 + 0.85)).abs() < 1e-12);
        assert!(variance[2] > variance[1]);
        assert!(variance[3] < variance[2]);
    }

    #[test]
    fn fit_produces_positive_stationary_volatility() {
        let returns = simulate_garch(750, 7);
        match MleGarchFitter::new().fit_params(&returns, 1, 1) {
            Ok((params, variance)) => {
                assert!(params.persistence() < 1.0);
                assert_eq!(variance.len(), returns.len());
                assert!(variance.iter().all(|v| *v > 0.0));
            }
            // Non-convergence is a legitimate outcome the engine falls back from
            Err(FitError::NonConvergence(_)) => {}
            Err(e) => panic!("unexpected fit failure: {e}"),
        }
    }
}
