//! Engine configuration.
//!
//! [`EngineConfig`] is a plain struct with documented defaults; the
//! [`EngineBuilder`] offers the same settings as a fluent API.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use qrc_client::{Credentials, EngineConfig};
//!
//! let config = EngineConfig::builder()
//!     .host("10.0.0.5")
//!     .request_timeout(Duration::from_secs(3))
//!     .credentials(Credentials::new("admin", "1234"))
//!     .into_config();
//!
//! assert_eq!(config.port, 1710);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::auth::Credentials;
use crate::engine::Engine;
use crate::error::{QrcError, Result};
use crate::keepalive::{DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_KEEPALIVE_TIMEOUT};
use crate::methods::MethodRegistry;
use crate::notify::DEFAULT_QUEUE_CAPACITY;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::CONTROL_PORT;
use crate::writer::DEFAULT_CHANNEL_CAPACITY;

/// Default host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default time allowed for the TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle time after which a core drops a silent connection.
pub const DEFAULT_SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Applies to every call unless overridden per call.
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    /// The core's idle-disconnect threshold; `keepalive_interval` must be
    /// strictly shorter.
    pub server_idle_timeout: Duration,
    pub max_frame_size: usize,
    pub write_queue_capacity: usize,
    pub notification_queue_capacity: usize,
    /// Authentication is required exactly when set.
    pub credentials: Option<Credentials>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: CONTROL_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            server_idle_timeout: DEFAULT_SERVER_IDLE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_queue_capacity: DEFAULT_CHANNEL_CAPACITY,
            notification_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            credentials: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// `host:port` as used for connecting and in log fields.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, detail: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(QrcError::InvalidConfig(detail.to_string()))
            }
        }

        check(!self.host.trim().is_empty(), "host must not be empty")?;
        check(self.port != 0, "port must not be 0")?;
        check(!self.connect_timeout.is_zero(), "connect_timeout must be positive")?;
        check(!self.request_timeout.is_zero(), "request_timeout must be positive")?;
        check(!self.keepalive_interval.is_zero(), "keepalive_interval must be positive")?;
        check(!self.keepalive_timeout.is_zero(), "keepalive_timeout must be positive")?;
        check(
            self.keepalive_interval < self.server_idle_timeout,
            "keepalive_interval must be shorter than server_idle_timeout",
        )?;
        check(self.max_frame_size > 0, "max_frame_size must be positive")?;
        check(self.write_queue_capacity > 0, "write_queue_capacity must be positive")?;
        check(
            self.notification_queue_capacity > 0,
            "notification_queue_capacity must be positive",
        )?;
        if let Some(credentials) = &self.credentials {
            check(!credentials.user().is_empty(), "credentials user must not be empty")?;
        }
        Ok(())
    }
}

/// Fluent builder for an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Option<MethodRegistry>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: None,
        }
    }

    /// Default: `127.0.0.1`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Default: 1710
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Default: 10 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Default: 20 seconds
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Default: 5 seconds
    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.config.keepalive_timeout = timeout;
        self
    }

    /// Default: 60 seconds
    pub fn server_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.server_idle_timeout = timeout;
        self
    }

    /// Default: 4 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Default: 1024
    pub fn write_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.write_queue_capacity = capacity;
        self
    }

    /// Default: 64
    pub fn notification_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.notification_queue_capacity = capacity;
        self
    }

    /// Require a logon with these credentials on every connect.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Replace the standard method catalogue.
    pub fn registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn into_config(self) -> EngineConfig {
        self.config
    }

    /// Validate the settings and create a disconnected engine.
    pub fn build(self) -> Result<Engine> {
        let registry = self.registry.unwrap_or_else(MethodRegistry::standard);
        Engine::with_registry(self.config, registry)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
