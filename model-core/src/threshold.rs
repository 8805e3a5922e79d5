//! Anomaly threshold policy
//!
//! The serving threshold comes from three places, in priority order: an
//! explicit override (`SMARTGUARD_THRESHOLD` on the server), the
//! calibrated value stored in the artifact at training time, and
//! `DEFAULT_THRESHOLD` as the documented fallback.

use serde::{Deserialize, Serialize};

/// Fallback reconstruction-error cutoff, in normalized-MSE units.
pub const DEFAULT_THRESHOLD: f32 = 0.05;

/// Threshold configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Cutoff used when no calibrated value is available.
    pub base_threshold: f32,

    /// Floor for calibrated values.
    pub min_threshold: f32,

    /// Ceiling for calibrated values.
    pub max_threshold: f32,

    /// Width of the calibration band, in standard deviations.
    pub sigma_factor: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            base_threshold: DEFAULT_THRESHOLD,
            min_threshold: 1e-4,
            max_threshold: 1.0,
            sigma_factor: 3.0,
        }
    }
}

impl ThresholdConfig {
    /// Derive a cutoff from reconstruction errors observed on held-out
    /// normal data: mean + `sigma_factor` * std, clamped to the bounds.
    pub fn calibrate(&self, errors: &[f32]) -> f32 {
        if errors.is_empty() {
            return self.base_threshold;
        }
        let n = errors.len() as f32;
        let mean = errors.iter().sum::<f32>() / n;
        let variance = errors.iter().map(|e| (e - mean).powi(2)).sum::<f32>() / n;
        let cutoff = mean + self.sigma_factor * variance.sqrt();
        cutoff.clamp(self.min_threshold, self.max_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_errors_fall_back_to_base() {
        let config = ThresholdConfig::default();
        assert_eq!(config.calibrate(&[]), DEFAULT_THRESHOLD);
    }

    #[test]
    fn constant_errors_calibrate_to_their_level() {
        let config = ThresholdConfig::default();
        let cutoff = config.calibrate(&[0.02; 32]);
        assert!((cutoff - 0.02).abs() < 1e-6);
    }

    #[test]
    fn spread_widens_the_cutoff() {
        let config = ThresholdConfig::default();
        let tight = config.calibrate(&[0.02; 16]);
        let spread = config.calibrate(&[0.01, 0.03, 0.01, 0.03, 0.02, 0.02]);
        assert!(spread > tight);
    }

    #[test]
    fn cutoff_is_clamped() {
        let config = ThresholdConfig::default();
        assert_eq!(config.calibrate(&[100.0; 4]), config.max_threshold);
        assert_eq!(config.calibrate(&[0.0; 4]), config.min_threshold);
    }
}
