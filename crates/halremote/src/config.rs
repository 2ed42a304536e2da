//! Configuration for a remote component.

use crate::error::{HalRemoteError, Result};

/// Connection settings of one [`crate::HalRemoteComponent`].
///
/// # Example
/// ```
/// use halremote::RemoteComponentConfig;
///
/// let config = RemoteComponentConfig::new("jog-panel")
///     .with_remote_host("192.168.1.2")
///     .with_heartbeat_period_ms(1000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RemoteComponentConfig {
    /// Component name; also the subscription topic and the remote pin-name
    /// prefix.
    pub name: String,

    /// Command service endpoint (halrcmd).
    pub halrcmd_uri: String,

    /// Update service endpoint (halrcomp).
    pub halrcomp_uri: String,

    /// Command-channel heartbeat period in milliseconds (0 disables).
    pub heartbeat_period_ms: u64,
}

impl RemoteComponentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            halrcmd_uri: "tcp://localhost:5001".to_string(),
            halrcomp_uri: "tcp://localhost:5002".to_string(),
            heartbeat_period_ms: 3000,
        }
    }

    /// Derives both service endpoints from a host, using the conventional
    /// ports (halrcmd 5001, halrcomp 5002).
    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.halrcmd_uri = format!("tcp://{}:5001", host);
        self.halrcomp_uri = format!("tcp://{}:5002", host);
        self
    }

    pub fn with_halrcmd_uri(mut self, uri: impl Into<String>) -> Self {
        self.halrcmd_uri = uri.into();
        self
    }

    pub fn with_halrcomp_uri(mut self, uri: impl Into<String>) -> Self {
        self.halrcomp_uri = uri.into();
        self
    }

    /// Sets the command heartbeat period in milliseconds (0 to disable).
    pub fn with_heartbeat_period_ms(mut self, period_ms: u64) -> Self {
        self.heartbeat_period_ms = period_ms;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(HalRemoteError::InvalidConfig(
                "name cannot be empty".to_string(),
            ));
        }
        for (key, uri) in [
            ("halrcmd_uri", &self.halrcmd_uri),
            ("halrcomp_uri", &self.halrcomp_uri),
        ] {
            if !uri.starts_with("tcp://") && !uri.starts_with("ipc://") {
                return Err(HalRemoteError::InvalidConfig(format!(
                    "{} must start with tcp:// or ipc://",
                    key
                )));
            }
        }
        Ok(())
    }
}

impl Default for RemoteComponentConfig {
    fn default() -> Self {
        Self::new("default")
    }
}
