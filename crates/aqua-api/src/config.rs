//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

use aqua_media::{
    EncoderSettings, InputLimits, MediaResult, ObjectDetectorConfig, PipelineConfig,
};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Root directory for per-job workspaces
    pub work_dir: PathBuf,
    /// Jobs allowed to run the pipeline at the same time
    pub max_concurrent_jobs: usize,
    /// How long finished jobs and their files are kept
    pub job_ttl: Duration,
    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_body_size: 512 * 1024 * 1024,
            environment: "development".to_string(),
            work_dir: std::env::temp_dir().join("aquafun"),
            max_concurrent_jobs: 1,
            job_ttl: Duration::from_secs(3600),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_or("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_or("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            max_body_size: env_or("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs).max(1),
            job_ttl: Duration::from_secs(env_or("JOB_TTL_SECS", defaults.job_ttl.as_secs())),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Settings for annotating uploaded videos.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub pipeline: PipelineConfig,
    pub detector: ObjectDetectorConfig,
    pub encoder: EncoderSettings,
    pub limits: InputLimits,
}

impl PipelineSettings {
    /// Load from environment variables.
    ///
    /// Unlike the server settings, malformed values here are errors: a typo
    /// in the sampling interval or the failure policy should stop startup.
    pub fn from_env() -> MediaResult<Self> {
        Ok(Self {
            pipeline: PipelineConfig::from_env()?,
            detector: ObjectDetectorConfig::from_env()?,
            encoder: EncoderSettings::from_env(),
            limits: InputLimits::from_env(),
        })
    }
}
