//! Relay loop configuration

use crate::{RelayError, RelayResult};
use iap_proto::MAX_DATA_LENGTH;

/// Default local read chunk size (16 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default depth of the outbound frame queue
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Relay loop tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum bytes read from the local stream per Data frame.
    /// Must fit a single frame, so at most 65529. Default 16 KiB.
    pub buffer_size: usize,

    /// Frames queued between the relay directions and the transport writer.
    /// Default 256.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> RelayResult<()> {
        if self.buffer_size == 0 || self.buffer_size > MAX_DATA_LENGTH {
            return Err(RelayError::InvalidConfig(format!(
                "buffer_size must be between 1 and {}, got {}",
                MAX_DATA_LENGTH, self.buffer_size
            )));
        }

        if self.channel_capacity == 0 {
            return Err(RelayError::InvalidConfig(
                "channel_capacity must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RelayConfig::default();
        assert_eq!(config.buffer_size, 16384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buffer_size_bounds() {
        let max = RelayConfig {
            buffer_size: MAX_DATA_LENGTH,
            ..Default::default()
        };
        assert!(max.validate().is_ok());

        let too_big = RelayConfig {
            buffer_size: MAX_DATA_LENGTH + 1,
            ..Default::default()
        };
        assert!(matches!(
            too_big.validate(),
            Err(RelayError::InvalidConfig(_))
        ));

        let zero = RelayConfig {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_zero_channel_capacity() {
        let config = RelayConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
