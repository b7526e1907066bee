use std::time::Duration;

use tandem_netproto::constants::{PLAYER_COUNT, SEND_HISTORY_SIZE};

use crate::error::NetplayError;

/// Tunables for one netplay session.
///
/// Peer addresses are not part of this; they belong to the transport.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Controller slot driven by this side: 0 for the host, 1 for the guest.
    pub local_slot: usize,
    /// Local input captured at tick `t` is scheduled for tick `t + input_delay_frames`.
    pub input_delay_frames: u32,
    /// `LocalTick` never runs more than this many ticks past `ConfirmedTick`.
    pub rollback_max_frames: u32,
    /// Slots per input ring buffer.
    pub history_size: usize,
    /// Checksum every Nth synced tick.
    pub desync_check_rate: u32,
    /// Copies sent of packets that are never repeated otherwise (Handshake, Sync).
    pub redundancy: u32,
    /// While handshaking, re-send a Handshake every N frames.
    pub handshake_resend_interval: u32,
    pub connect_timeout: Duration,
    pub liveness_timeout: Duration,
    /// Bounded inbound queue between the receive worker and the session.
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_slot: 0,
            input_delay_frames: 3,
            rollback_max_frames: 8,
            history_size: 60,
            desync_check_rate: 10,
            redundancy: 5,
            handshake_resend_interval: 10,
            connect_timeout: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(5),
            queue_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn host() -> Self {
        Self::default()
    }

    pub fn guest() -> Self {
        Self {
            local_slot: 1,
            ..Self::default()
        }
    }

    pub fn remote_slot(&self) -> usize {
        1 - self.local_slot
    }

    /// Number of input ticks sent per `PlayerInput`; fixed by the wire format.
    pub fn send_history_size(&self) -> usize {
        SEND_HISTORY_SIZE
    }

    /// Smallest ring that still holds every tick a rollback can reach back to.
    ///
    /// While one side is paused the other keeps running until its window
    /// closes, so on resume the ring must span the input delay on both sides,
    /// the rollback window and one send window.
    pub fn min_history_size(&self) -> usize {
        2 * self.input_delay_frames as usize
            + self.rollback_max_frames as usize
            + SEND_HISTORY_SIZE
            + 1
    }

    pub fn validate(&self) -> Result<(), NetplayError> {
        if self.local_slot >= PLAYER_COUNT {
            return Err(NetplayError::Config(format!(
                "local_slot {} out of range (0..{PLAYER_COUNT})",
                self.local_slot
            )));
        }
        let min = self.min_history_size();
        if self.history_size < min {
            return Err(NetplayError::Config(format!(
                "history_size {} must be at least {min} \
                 (2 * input_delay_frames + rollback_max_frames + {SEND_HISTORY_SIZE} + 1)",
                self.history_size
            )));
        }
        if self.desync_check_rate == 0 {
            return Err(NetplayError::Config("desync_check_rate must be > 0".into()));
        }
        if self.redundancy == 0 {
            return Err(NetplayError::Config("redundancy must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(NetplayError::Config("queue_capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SessionConfig::host().validate().unwrap();
        SessionConfig::guest().validate().unwrap();
        assert_eq!(SessionConfig::guest().remote_slot(), 0);
    }

    #[test]
    fn history_must_outlast_rollback_window() {
        let config = SessionConfig {
            history_size: 19,
            rollback_max_frames: 8,
            input_delay_frames: 3,
            ..SessionConfig::default()
        };
        assert_eq!(config.min_history_size(), 20);
        assert!(matches!(config.validate(), Err(NetplayError::Config(_))));

        let config = SessionConfig {
            history_size: 20,
            ..config
        };
        config.validate().unwrap();

        let config = SessionConfig {
            input_delay_frames: 0,
            rollback_max_frames: 0,
            history_size: SEND_HISTORY_SIZE,
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn slot_and_rates_are_checked() {
        for config in [
            SessionConfig {
                local_slot: 2,
                ..SessionConfig::default()
            },
            SessionConfig {
                desync_check_rate: 0,
                ..SessionConfig::default()
            },
            SessionConfig {
                redundancy: 0,
                ..SessionConfig::default()
            },
        ] {
            assert!(config.validate().is_err());
        }
    }
}
