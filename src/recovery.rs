//! Reconnect policy for abnormal disconnects

use std::time::Duration;

use tracing::debug;

use crate::config::ClientOptions;
use crate::protocol::is_reconnectable;

/// Outcome of evaluating a transport close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule a single reconnect after `delay`
    Retry {
        /// Number of the attempt being scheduled, starting at 1
        attempt: u32,
        delay: Duration,
    },
    /// The attempt cap was exceeded; the client must stop with code 1013
    GiveUp { attempts: u32 },
    /// The close is not eligible for a reconnect
    Stop,
}

/// Exponential back-off with an optional cap on attempts
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    pub base_delay: Duration,
    /// Ceiling of the delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub decay: f64,
    /// Maximum number of consecutive reconnects; unlimited if `None`
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Build the policy from client options
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            base_delay: Duration::from_millis(options.reconnect_interval_ms),
            max_delay: Duration::from_millis(options.max_reconnect_interval_ms),
            decay: options.reconnect_decay,
            max_attempts: options.max_reconnect_attempts,
        }
    }

    /// Delay before reconnecting after `previous_attempts` consecutive failures
    ///
    /// `min(base * decay^previous_attempts, max)`
    pub fn delay_for(&self, previous_attempts: u32) -> Duration {
        let exponent = i32::try_from(previous_attempts).unwrap_or(i32::MAX);
        let delay_ms = self.base_delay.as_millis() as f64 * self.decay.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;

        // NaN from a bad decay collapses to the ceiling
        let capped = if delay_ms.is_nan() {
            max_ms
        } else {
            delay_ms.min(max_ms).max(0.0)
        };
        Duration::from_millis(capped as u64)
    }

    /// Evaluate a close and update the consecutive attempt counter
    pub fn decide(&self, code: u16, attempts: &mut u32) -> ReconnectDecision {
        if !is_reconnectable(code) {
            debug!(code, "Close code is not eligible for reconnect");
            return ReconnectDecision::Stop;
        }

        let previous = *attempts;
        *attempts = previous.saturating_add(1);

        if let Some(max) = self.max_attempts {
            if *attempts > max {
                return ReconnectDecision::GiveUp { attempts: previous };
            }
        }

        ReconnectDecision::Retry {
            attempt: *attempts,
            delay: self.delay_for(previous),
        }
    }
}
