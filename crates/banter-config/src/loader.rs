//! JSON5 config file loading.

use crate::{BanterConfig, ConfigError};
use log::{debug, info};
use std::fs;
use std::path::Path;

impl BanterConfig {
    /// Load and validate a config from a JSON5 file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        parse(&contents)
    }

    /// Load and validate a config from JSON5 contents.
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        parse(contents)
    }
}

fn parse(contents: &str) -> Result<BanterConfig, ConfigError> {
    let config: BanterConfig = json5::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueConfig;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn empty_config_uses_defaults() {
        let config = BanterConfig::load_from_str("{}").expect("load");
        assert_eq!(config.queue.discovery_interval_ms, 1000);
        assert_eq!(config.queue.error_backoff_ms, 5000);
        assert_eq!(config.queue.job_timeout_secs, 120);
        assert_eq!(config.queue.read_batch_size, 1);
        assert_eq!(config.relay.chunk_ttl_secs, 3600);
        assert_eq!(config.history.private_limit, 20);
        assert_eq!(config.history.group_limit, 30);
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.store.path, None);
    }

    #[test]
    fn json5_comments_and_partial_sections_parse() {
        let contents = r#"{
            // only override what differs from the defaults
            queue: { job_timeout_secs: 30 },
            server: { port: 9000 },
        }"#;
        let config = BanterConfig::load_from_str(contents).expect("load");
        assert_eq!(config.queue.job_timeout(), Duration::from_secs(30));
        assert_eq!(config.queue.read_batch_size, 1);
        assert_eq!(config.server.bind_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = BanterConfig::load_from_str("{ queue: { read_batch_size: 0 } }")
            .err()
            .expect("load should fail");
        assert_eq!(
            err.to_string(),
            "invalid config at queue.read_batch_size: must be greater than zero"
        );
    }

    #[test]
    fn builder_replaces_sections() {
        let config = BanterConfig::builder()
            .queue(QueueConfig {
                discovery_interval_ms: 10,
                ..QueueConfig::default()
            })
            .build();
        assert_eq!(config.queue.discovery_interval(), Duration::from_millis(10));
        assert_eq!(config.history.private_limit, 20);
    }

    #[test]
    fn load_from_path_reads_a_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("banter.json5");
        std::fs::write(&path, "{ relay: { chunk_ttl_secs: 60 } }").expect("write");

        let config = BanterConfig::load_from_path(&path).expect("load");
        assert_eq!(config.relay.chunk_ttl(), Duration::from_secs(60));
    }
}
