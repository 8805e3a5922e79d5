//! Configuration module

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the compact model artifact loaded at startup
    pub model_path: PathBuf,

    /// Server port
    pub port: u16,

    /// Optional override of the artifact's calibrated anomaly threshold
    pub threshold_override: Option<f32>,

    /// ARP-reply collection window for one scan, in seconds
    pub scan_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            model_path: env::var("SMARTGUARD_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("smartguard_model.sgm")),

            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),

            threshold_override: env::var("SMARTGUARD_THRESHOLD")
                .ok()
                .and_then(|t| t.parse().ok()),

            scan_timeout_secs: env::var("SCAN_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(2),
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}
