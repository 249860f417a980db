use super::{types::Config, ConfigError};

/// Upper bound on `queue.batch_size`.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Batch size is within 1..=MAX_BATCH_SIZE
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.queue.batch_size == 0 || config.queue.batch_size > MAX_BATCH_SIZE {
        return Err(ConfigError::ValidationError(format!(
            "queue.batch_size must be between 1 and {}, got {}",
            MAX_BATCH_SIZE, config.queue.batch_size
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, ServerConfig};

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                port: 0,
                ..ServerConfig::default()
            },
            ..Config::default()
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_batch_size_fails() {
        let config = Config {
            queue: QueueConfig {
                batch_size: 0,
                ..QueueConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_oversized_batch_fails() {
        let config = Config {
            queue: QueueConfig {
                batch_size: MAX_BATCH_SIZE + 1,
                ..QueueConfig::default()
            },
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
