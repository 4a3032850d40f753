//! Error types for the tracking-error engine.
//!
//! Configuration problems are rejected before any numeric work starts;
//! numerical failures abort the one evaluation that hit them.

use thiserror::Error;

/// Errors produced by the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Input failed validation (weights, probabilities, ranges).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An asset id is not part of the universe.
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    /// A linear solve was singular or too ill-conditioned to trust.
    #[error("numerical instability in {context}: {detail}")]
    NumericalInstability {
        /// Which solve failed.
        context: &'static str,
        /// What went wrong.
        detail: String,
    },
}

impl EngineError {
    /// Creates an invalid-configuration error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Creates a numerical-instability error.
    pub fn numerical(context: &'static str, detail: impl Into<String>) -> Self {
        Self::NumericalInstability {
            context,
            detail: detail.into(),
        }
    }

    /// Returns true for errors caused by caller input.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_) | Self::UnknownAsset(_))
    }
}

/// Result alias used across the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Checks that `value` lies in `[lo, hi]` and is finite.
pub(crate) fn ensure_in_range(name: &str, value: f64, lo: f64, hi: f64) -> EngineResult<()> {
    if !value.is_finite() || value < lo || value > hi {
        return Err(EngineError::invalid(format!(
            "{name} must be in [{lo}, {hi}], got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::numerical("covariance inverse", "matrix is singular");
        assert_eq!(
            err.to_string(),
            "numerical instability in covariance inverse: matrix is singular"
        );
        assert!(!err.is_configuration());
        assert!(EngineError::UnknownAsset("DOGE".into()).is_configuration());
    }

    #[test]
    fn test_range_check() {
        assert!(ensure_in_range("staking", 0.0, 0.0, 1.0).is_ok());
        assert!(ensure_in_range("staking", 1.0, 0.0, 1.0).is_ok());
        assert!(ensure_in_range("staking", 1.01, 0.0, 1.0).is_err());
        assert!(ensure_in_range("staking", f64::NAN, 0.0, 1.0).is_err());
    }
}
