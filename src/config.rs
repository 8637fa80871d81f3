use crate::error::{Error, Result};

/// Settings for the software device behind a [`Context`](crate::Context).
///
/// Fixed once the context is created.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker threads servicing out-of-order queues. `None` means one per
    /// logical CPU.
    pub device_lanes: Option<usize>,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_lanes: None,
            thread_name_prefix: "silica-device".to_string(),
            stack_size: Some(2 * 1024 * 1024),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.device_lanes {
            if n == 0 {
                return Err(Error::config("device_lanes must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("device_lanes too large (max 1024)"));
            }
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    pub fn pool_workers(&self) -> usize {
        self.device_lanes.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn device_lanes(mut self, n: usize) -> Self {
        self.config.device_lanes = Some(n);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::default().pool_workers() > 0);
    }

    #[test]
    fn builder_rejects_zero_lanes() {
        let result = Config::builder().device_lanes(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_sets_fields() {
        let config = Config::builder()
            .device_lanes(3)
            .thread_name_prefix("dev")
            .stack_size(1 << 20)
            .build()
            .unwrap();

        assert_eq!(config.device_lanes, Some(3));
        assert_eq!(config.pool_workers(), 3);
        assert_eq!(config.thread_name_prefix, "dev");
        assert_eq!(config.stack_size, Some(1 << 20));
    }
}
