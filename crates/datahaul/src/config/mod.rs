//! Configuration loading and validation.

mod types;

pub use types::*;

use crate::error::{HaulError, Result};
use tracing::warn;

impl JobConfig {
    /// Parse a job configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: JobConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.source.root.is_empty() {
            return Err(HaulError::Config("source.root must not be empty".into()));
        }
        if self.source.workers == 0 {
            return Err(HaulError::Config(
                "source.workers must be at least 1".into(),
            ));
        }
        if let Some(pattern) = &self.source.pattern {
            regex::Regex::new(pattern).map_err(|e| {
                HaulError::Config(format!("invalid source.pattern regex: {}", e))
            })?;
        }
        if self.destination.key.is_none() && self.destination.prefix.is_none() {
            return Err(HaulError::Config(
                "destination requires either key or prefix".into(),
            ));
        }
        self.destination.buffer.validate()
    }
}

impl BufferOptions {
    /// Validate chunk sizing against the selected mode.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(HaulError::Config("chunk_size must be non-zero".into()));
        }
        if self.upload_concurrency == 0 {
            return Err(HaulError::Config(
                "upload_concurrency must be at least 1".into(),
            ));
        }
        // Stores reject undersized non-final parts; small chunks are only
        // viable in multi-object mode where each chunk is its own object.
        if self.mode == SplitMode::SingleObject && self.chunk_size < MIN_PART_SIZE {
            warn!(
                "chunk_size {} is below the {} byte multipart minimum; \
                 most object stores will reject non-final parts",
                self.chunk_size, MIN_PART_SIZE
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_config_from_yaml() {
        let yaml = r#"
source:
  root: /data/incoming
  pattern: ".*\\.csv$"
  recursive: true
  workers: 4
destination:
  prefix: raw/sales
  buffer:
    mode: multi_object
    chunk_size: 16777216
    compression: gzip
"#;
        let config = JobConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.source.root, "/data/incoming");
        assert_eq!(config.source.workers, 4);
        assert!(config.source.skip_unstable);
        assert_eq!(config.destination.buffer.mode, SplitMode::MultiObject);
        assert_eq!(
            config.destination.buffer.compression,
            Some(Compression::Gzip)
        );
    }

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
source:
  root: /data
destination:
  key: out/data.csv
"#;
        let config = JobConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.source.workers, 5);
        assert_eq!(config.source.stability_window_secs, 60);
        assert_eq!(config.destination.buffer.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.destination.buffer.mode, SplitMode::SingleObject);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let yaml = r#"
source:
  root: /data
  pattern: "["
destination:
  key: out.csv
"#;
        assert!(matches!(
            JobConfig::from_yaml(yaml),
            Err(HaulError::Config(_))
        ));
    }

    #[test]
    fn test_missing_destination_rejected() {
        let yaml = r#"
source:
  root: /data
destination: {}
"#;
        assert!(JobConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let opts = BufferOptions {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_resolve_key() {
        let spec = DestinationSpec {
            key: None,
            prefix: Some("raw/sales/".into()),
            buffer: BufferOptions::default(),
        };
        assert_eq!(spec.resolve_key("data.csv"), "raw/sales/data.csv");

        let exact = DestinationSpec {
            key: Some("exact/key.csv".into()),
            prefix: Some("ignored".into()),
            buffer: BufferOptions::default(),
        };
        assert_eq!(exact.resolve_key("data.csv"), "exact/key.csv");
    }
}
