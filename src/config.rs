//! Stream session configuration.
//!
//! The device layer decides the payload size and packet size; everything else
//! has defaults suited to GigE Vision cameras on a dedicated link. A
//! configuration can be built in code or loaded from YAML:
//!
//! ```rust
//! use camstream::StreamConfig;
//!
//! let config = StreamConfig::from_yaml_str(
//!     r#"
//! payload_size: 20000
//! frame_timeout_ms: 150
//! resend:
//!   max_attempts: 5
//! "#,
//! )?;
//! assert_eq!(config.payload_size, 20_000);
//! assert_eq!(config.resend.max_attempts, 5);
//! assert!(config.resend.enabled);
//! # Ok::<(), camstream::StreamError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, StreamError};

/// Retransmission policy for missing units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResendPolicy {
    /// Issue resend requests at all; when off, gaps are final
    pub enabled: bool,
    /// Issues per missing range before it is given up
    pub max_attempts: u32,
    /// Wait before the first re-issue
    pub initial_timeout_ms: u64,
    /// Multiplier applied to the wait after each unanswered issue
    pub backoff_factor: f64,
    /// Upper bound for the wait
    pub max_timeout_ms: u64,
}

impl Default for ResendPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_timeout_ms: 20,
            backoff_factor: 2.0,
            max_timeout_ms: 200,
        }
    }
}

impl ResendPolicy {
    /// Policy that never requests retransmission.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    /// How long the `attempt`-th issue (1-based) stays outstanding.
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_timeout_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_timeout_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }

    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_attempts == 0 {
            return Err(StreamError::config("resend.max_attempts", "must be at least 1"));
        }
        if self.initial_timeout_ms == 0 {
            return Err(StreamError::config("resend.initial_timeout_ms", "must be positive"));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(StreamError::config("resend.backoff_factor", "must be at least 1.0"));
        }
        if self.max_timeout_ms < self.initial_timeout_ms {
            return Err(StreamError::config(
                "resend.max_timeout_ms",
                "must not be smaller than initial_timeout_ms",
            ));
        }
        Ok(())
    }
}

/// Configuration of one stream session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Expected byte length of a complete frame
    pub payload_size: usize,
    /// Image bytes carried by one payload unit
    pub packet_size: usize,
    /// A frame with no activity for this long completes as TIMEOUT
    pub frame_timeout_ms: u64,
    /// Longest single wait on the transport
    pub poll_interval_ms: u64,
    /// Frames reassembled concurrently before the oldest is forced out
    pub max_frames_in_flight: usize,
    /// Consecutive transport errors tolerated before the link counts as lost
    pub max_transport_errors: u32,
    /// Name of the acquisition thread
    pub thread_name: String,
    pub resend: ResendPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            payload_size: 0,
            packet_size: 1400,
            frame_timeout_ms: 200,
            poll_interval_ms: 10,
            max_frames_in_flight: 2,
            max_transport_errors: 10,
            thread_name: "camstream-acquisition".to_string(),
            resend: ResendPolicy::default(),
        }
    }
}

impl StreamConfig {
    /// Default configuration for a given payload size.
    pub fn new(payload_size: usize) -> Self {
        Self { payload_size, ..Self::default() }
    }

    pub fn with_resend(mut self, resend: ResendPolicy) -> Self {
        self.resend = resend;
        self
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StreamConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| StreamError::config("StreamConfig deserialization", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| StreamError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self)
            .map_err(|e| StreamError::config("StreamConfig serialization", e.to_string()))
    }

    /// Check the values a session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.payload_size == 0 {
            return Err(StreamError::config("payload_size", "must be positive"));
        }
        if self.packet_size == 0 {
            return Err(StreamError::config("packet_size", "must be positive"));
        }
        if self.frame_timeout_ms == 0 {
            return Err(StreamError::config("frame_timeout_ms", "must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(StreamError::config("poll_interval_ms", "must be positive"));
        }
        if self.max_frames_in_flight == 0 {
            return Err(StreamError::config("max_frames_in_flight", "must be at least 1"));
        }
        if self.max_transport_errors == 0 {
            return Err(StreamError::config("max_transport_errors", "must be at least 1"));
        }
        self.resend.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn defaults_are_applied_to_missing_fields() -> Result<()> {
        let config = StreamConfig::from_yaml_str("payload_size: 4096\n")?;
        assert_eq!(config.payload_size, 4096);
        assert_eq!(config.packet_size, 1400);
        assert_eq!(config.resend, ResendPolicy::default());
        assert_eq!(config.frame_timeout(), Duration::from_millis(200));
        Ok(())
    }

    #[test]
    fn yaml_roundtrip() -> Result<()> {
        let config = StreamConfig::new(1234)
            .with_packet_size(512)
            .with_frame_timeout(Duration::from_millis(75))
            .with_resend(ResendPolicy { max_attempts: 7, ..ResendPolicy::default() });
        let yaml = config.to_yaml()?;
        let parsed = StreamConfig::from_yaml_str(&yaml)?;
        assert_eq!(parsed, config);
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(StreamConfig::from_yaml_str("payload_size: 0\n").is_err());
        assert!(StreamConfig::from_yaml_str("payload_size: 10\npacket_size: 0\n").is_err());
        assert!(StreamConfig::from_yaml_str("payload_size: 10\nmax_frames_in_flight: 0\n").is_err());
        assert!(
            StreamConfig::from_yaml_str("payload_size: 10\nresend:\n  backoff_factor: 0.5\n").is_err()
        );
        assert!(StreamConfig::from_yaml_str("payload_size: [1, 2]\n").is_err());
    }

    #[test]
    fn disabled_resend_skips_policy_checks() -> Result<()> {
        let config = StreamConfig::from_yaml_str(
            "payload_size: 10\nresend:\n  enabled: false\n  max_attempts: 0\n",
        )?;
        assert!(!config.resend.enabled);
        Ok(())
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = ResendPolicy {
            initial_timeout_ms: 10,
            backoff_factor: 2.0,
            max_timeout_ms: 35,
            ..ResendPolicy::default()
        };
        assert_eq!(policy.timeout_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.timeout_for_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.timeout_for_attempt(3), Duration::from_millis(35));
        assert_eq!(policy.timeout_for_attempt(40), Duration::from_millis(35));
    }

    #[test]
    fn missing_file_maps_to_file_error() {
        let err = StreamConfig::from_yaml_file("/nonexistent/camstream.yml").unwrap_err();
        assert!(matches!(err, StreamError::File { .. }));
    }
}
