//! Pool configuration

use std::time::Duration;

/// Connection pool configuration.
///
/// Defaults: 2 minimum connections, 10 maximum, 30 second idle timeout,
/// 500 ms delay between connect retries, 3 connect attempts, and a 30
/// second bound on waiting for a saturated pool.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
	/// Idle connections opened by `init()` and kept warm.
	pub min_connections: u32,
	/// Hard bound on concurrently issued connections.
	pub max_connections: u32,
	/// Idle connections older than this are discarded instead of reused.
	pub idle_timeout: Duration,
	/// Pause between failed connect attempts.
	pub retry_delay: Duration,
	/// Connect attempts before an acquire fails.
	pub connect_attempts: u32,
	/// Bound on waiting for a connection when the pool is saturated.
	pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			min_connections: 2,
			max_connections: 10,
			idle_timeout: Duration::from_secs(30),
			retry_delay: Duration::from_millis(500),
			connect_attempts: 3,
			acquire_timeout: Duration::from_secs(30),
		}
	}
}

impl PoolConfig {
	/// Create a configuration with default values.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::pool::PoolConfig;
	///
	/// let config = PoolConfig::new();
	/// assert_eq!(config.min_connections, 2);
	/// assert_eq!(config.max_connections, 10);
	/// ```
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_min_connections(mut self, min: u32) -> Self {
		self.min_connections = min;
		self
	}

	pub fn with_max_connections(mut self, max: u32) -> Self {
		self.max_connections = max;
		self
	}

	pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
		self.idle_timeout = timeout;
		self
	}

	pub fn with_retry_delay(mut self, delay: Duration) -> Self {
		self.retry_delay = delay;
		self
	}

	pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
		self.connect_attempts = attempts;
		self
	}

	pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
		self.acquire_timeout = timeout;
		self
	}

	/// Check the configuration for internal consistency.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::pool::PoolConfig;
	///
	/// let bad = PoolConfig::new().with_max_connections(0);
	/// assert!(bad.validate().is_err());
	/// ```
	pub fn validate(&self) -> Result<(), String> {
		if self.max_connections == 0 {
			return Err("max_connections must be at least 1".to_string());
		}
		if self.min_connections > self.max_connections {
			return Err("min_connections must be <= max_connections".to_string());
		}
		if self.connect_attempts == 0 {
			return Err("connect_attempts must be at least 1".to_string());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_default_config_is_valid() {
		// Arrange
		let config = PoolConfig::default();

		// Assert
		assert!(config.validate().is_ok());
		assert_eq!(config.idle_timeout, Duration::from_secs(30));
		assert_eq!(config.retry_delay, Duration::from_millis(500));
	}

	#[rstest]
	#[case(PoolConfig::new().with_max_connections(0))]
	#[case(PoolConfig::new().with_min_connections(11))]
	#[case(PoolConfig::new().with_connect_attempts(0))]
	fn test_invalid_configs_rejected(#[case] config: PoolConfig) {
		// Act & Assert
		assert!(config.validate().is_err());
	}

	#[rstest]
	fn test_builder_chain() {
		// Act
		let config = PoolConfig::new()
			.with_min_connections(1)
			.with_max_connections(4)
			.with_acquire_timeout(Duration::from_secs(5));

		// Assert
		assert_eq!(config.min_connections, 1);
		assert_eq!(config.max_connections, 4);
		assert_eq!(config.acquire_timeout, Duration::from_secs(5));
	}
}
