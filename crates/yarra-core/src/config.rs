//! Pipeline configuration.
//!
//! Bucket roles are explicit values passed at construction. Nothing is
//! global: two pipelines with different roles can run in one process.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use yarra_store::{validate_bucket, RetryPolicy, DEFAULT_LOCK_TTL};

use crate::error::ArchiveError;

/// The three named locations a pass works with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRoles {
    /// Source bucket holding staged studies.
    pub sim: String,
    /// Destination bucket for `.zip` archives.
    pub study: String,
    /// Bucket holding lease markers.
    pub lock: String,
}

impl BucketRoles {
    pub fn new(
        sim: impl Into<String>,
        study: impl Into<String>,
        lock: impl Into<String>,
    ) -> Result<Self, ArchiveError> {
        let roles = Self {
            sim: sim.into(),
            study: study.into(),
            lock: lock.into(),
        };
        roles.validate()?;
        Ok(roles)
    }

    pub fn validate(&self) -> Result<(), ArchiveError> {
        for (role, bucket) in [("sim", &self.sim), ("study", &self.study), ("lock", &self.lock)] {
            validate_bucket(bucket)
                .map_err(|e| ArchiveError::validation(format!("{} bucket: {}", role, e)))?;
        }
        Ok(())
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub buckets: BucketRoles,

    /// Backoff for every storage call.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Lease lifetime in seconds.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Studies verified at the same time.
    #[serde(default = "default_verify_concurrency")]
    pub verify_concurrency: usize,

    /// Emit progress events.
    #[serde(default)]
    pub progress: bool,
}

fn default_lock_ttl_secs() -> u64 {
    DEFAULT_LOCK_TTL.as_secs()
}

fn default_verify_concurrency() -> usize {
    8
}

impl PipelineConfig {
    pub fn new(buckets: BucketRoles) -> Self {
        Self {
            buckets,
            retry: RetryPolicy::default(),
            lock_ttl_secs: default_lock_ttl_secs(),
            verify_concurrency: default_verify_concurrency(),
            progress: false,
        }
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `YARRA_SIM_BUCKET` | Source bucket (required) |
    /// | `YARRA_STUDY_BUCKET` | Archive bucket (required) |
    /// | `YARRA_LOCK_BUCKET` | Lock bucket (required) |
    /// | `YARRA_MAX_ATTEMPTS` | Storage call attempts (default: 4) |
    /// | `YARRA_LOCK_TTL_SECS` | Lease lifetime (default: 3600) |
    /// | `YARRA_VERIFY_CONCURRENCY` | Parallel verifications (default: 8) |
    /// | `YARRA_PROGRESS` | Emit progress events (`1`/`true`) |
    pub fn from_env() -> Result<Self, ArchiveError> {
        let required = |name: &str| {
            std::env::var(name)
                .map_err(|_| ArchiveError::validation(format!("{} is not set", name)))
        };
        let buckets = BucketRoles::new(
            required("YARRA_SIM_BUCKET")?,
            required("YARRA_STUDY_BUCKET")?,
            required("YARRA_LOCK_BUCKET")?,
        )?;

        let mut config = Self::new(buckets);
        if let Some(attempts) = env_parse::<u32>("YARRA_MAX_ATTEMPTS") {
            config.retry = config.retry.with_max_attempts(attempts);
        }
        if let Some(ttl) = env_parse("YARRA_LOCK_TTL_SECS") {
            config.lock_ttl_secs = ttl;
        }
        if let Some(n) = env_parse("YARRA_VERIFY_CONCURRENCY") {
            config.verify_concurrency = n;
        }
        config.progress = std::env::var("YARRA_PROGRESS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ArchiveError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ArchiveError::validation(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ArchiveError> {
        self.buckets.validate()?;
        if self.lock_ttl_secs == 0 {
            return Err(ArchiveError::validation("lock_ttl_secs must be positive"));
        }
        if self.verify_concurrency == 0 {
            return Err(ArchiveError::validation("verify_concurrency must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ArchiveError::validation("retry.max_attempts must be positive"));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Same settings, different bucket roles.
    pub fn with_buckets(mut self, buckets: BucketRoles) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_verify_concurrency(mut self, n: usize) -> Self {
        self.verify_concurrency = n;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn rejects_empty_bucket_roles() {
        let err = BucketRoles::new("sim", "", "lock").unwrap_err();
        assert!(matches!(err, ArchiveError::Validation { .. }));
        assert!(err.to_string().contains("study bucket"));
    }

    #[test]
    fn yaml_defaults() {
        let config = PipelineConfig::from_yaml_str(
            "buckets:\n  sim: sim-staging\n  study: study-archive\n  lock: yarra-lock\n",
        )
        .unwrap();
        assert_eq!(config.buckets.sim, "sim-staging");
        assert_eq!(config.lock_ttl(), Duration::from_secs(3600));
        assert_eq!(config.verify_concurrency, 8);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(!config.progress);
    }

    #[test]
    fn yaml_overrides_and_validation() {
        let config = PipelineConfig::from_yaml_str(
            "buckets: {sim: a, study: b, lock: c}\nretry: {max_attempts: 2, randomize: false}\nprogress: true\n",
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert!(!config.retry.randomize);
        assert_eq!(config.retry.min_timeout_ms, 1_000);
        assert!(config.progress);

        assert!(PipelineConfig::from_yaml_str("buckets: {sim: '', study: b, lock: c}\n").is_err());
        assert!(PipelineConfig::from_yaml_str(
            "buckets: {sim: a, study: b, lock: c}\nlock_ttl_secs: 0\n"
        )
        .is_err());
    }

    #[test]
    fn with_buckets_leaves_original_untouched() {
        let original = PipelineConfig::new(BucketRoles::new("a", "b", "c").unwrap());
        let rebound = original
            .clone()
            .with_buckets(BucketRoles::new("x", "y", "z").unwrap());
        assert_eq!(original.buckets.sim, "a");
        assert_eq!(rebound.buckets.sim, "x");
        assert_eq!(rebound.lock_ttl_secs, original.lock_ttl_secs);
    }

    #[test]
    #[serial]
    fn from_env_reads_variables() {
        std::env::set_var("YARRA_SIM_BUCKET", "sim-env");
        std::env::set_var("YARRA_STUDY_BUCKET", "study-env");
        std::env::set_var("YARRA_LOCK_BUCKET", "lock-env");
        std::env::set_var("YARRA_MAX_ATTEMPTS", "6");
        std::env::set_var("YARRA_PROGRESS", "true");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.buckets.lock, "lock-env");
        assert_eq!(config.retry.max_attempts, 6);
        assert!(config.progress);

        for var in [
            "YARRA_SIM_BUCKET",
            "YARRA_STUDY_BUCKET",
            "YARRA_LOCK_BUCKET",
            "YARRA_MAX_ATTEMPTS",
            "YARRA_PROGRESS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn from_env_requires_buckets() {
        std::env::remove_var("YARRA_SIM_BUCKET");
        assert!(matches!(
            PipelineConfig::from_env(),
            Err(ArchiveError::Validation { .. })
        ));
    }
}
