//! Environment-driven database settings

use crate::pool::PoolConfig;
use std::env;
use std::time::Duration;

/// Errors raised while reading settings from the environment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
	#[error("missing required environment variable {0}")]
	MissingVar(&'static str),

	#[error("invalid value {value:?} for {key}")]
	InvalidValue { key: &'static str, value: String },

	#[error("invalid pool configuration: {0}")]
	InvalidPool(String),
}

/// Database connection settings.
///
/// `from_env` reads `DATABASE_URL` plus the optional `GRAPPELLI_DB_*` pool
/// overrides; everything not set keeps the documented [`PoolConfig`]
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
	pub url: String,
	pub pool: PoolConfig,
}

impl DatabaseSettings {
	/// Settings for the given URL with default pool sizing.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_db::config::DatabaseSettings;
	///
	/// let settings = DatabaseSettings::new("postgres://localhost/app");
	/// assert_eq!(settings.pool.max_connections, 10);
	/// ```
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			pool: PoolConfig::default(),
		}
	}

	pub fn with_pool(mut self, pool: PoolConfig) -> Self {
		self.pool = pool;
		self
	}

	/// Read settings from the process environment.
	///
	/// Recognized variables:
	///
	/// | variable | meaning | default |
	/// |---|---|---|
	/// | `DATABASE_URL` | connection URL (required) | none |
	/// | `GRAPPELLI_DB_MIN_CONNECTIONS` | warm idle connections | 2 |
	/// | `GRAPPELLI_DB_MAX_CONNECTIONS` | issued-connection bound | 10 |
	/// | `GRAPPELLI_DB_IDLE_TIMEOUT_SECS` | idle eviction age | 30 |
	/// | `GRAPPELLI_DB_RETRY_DELAY_MS` | pause between connect retries | 500 |
	/// | `GRAPPELLI_DB_CONNECT_ATTEMPTS` | connect attempts per acquire | 3 |
	/// | `GRAPPELLI_DB_ACQUIRE_TIMEOUT_SECS` | saturated-pool wait bound | 30 |
	pub fn from_env() -> Result<Self, SettingsError> {
		let url = env::var("DATABASE_URL").map_err(|_| SettingsError::MissingVar("DATABASE_URL"))?;

		let mut pool = PoolConfig::default();
		if let Some(min) = read_u32("GRAPPELLI_DB_MIN_CONNECTIONS")? {
			pool.min_connections = min;
		}
		if let Some(max) = read_u32("GRAPPELLI_DB_MAX_CONNECTIONS")? {
			pool.max_connections = max;
		}
		if let Some(secs) = read_u64("GRAPPELLI_DB_IDLE_TIMEOUT_SECS")? {
			pool.idle_timeout = Duration::from_secs(secs);
		}
		if let Some(millis) = read_u64("GRAPPELLI_DB_RETRY_DELAY_MS")? {
			pool.retry_delay = Duration::from_millis(millis);
		}
		if let Some(attempts) = read_u32("GRAPPELLI_DB_CONNECT_ATTEMPTS")? {
			pool.connect_attempts = attempts;
		}
		if let Some(secs) = read_u64("GRAPPELLI_DB_ACQUIRE_TIMEOUT_SECS")? {
			pool.acquire_timeout = Duration::from_secs(secs);
		}
		pool.validate().map_err(SettingsError::InvalidPool)?;

		Ok(Self { url, pool })
	}
}

fn read_u32(key: &'static str) -> Result<Option<u32>, SettingsError> {
	match env::var(key) {
		Ok(raw) => raw
			.trim()
			.parse()
			.map(Some)
			.map_err(|_| SettingsError::InvalidValue { key, value: raw }),
		Err(_) => Ok(None),
	}
}

fn read_u64(key: &'static str) -> Result<Option<u64>, SettingsError> {
	match env::var(key) {
		Ok(raw) => raw
			.trim()
			.parse()
			.map(Some)
			.map_err(|_| SettingsError::InvalidValue { key, value: raw }),
		Err(_) => Ok(None),
	}
}
