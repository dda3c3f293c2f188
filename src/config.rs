//! Receiver configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default upper bound on an encoded frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Largest frame limit the socket transport's 4-byte length prefix can describe.
pub const MAX_FRAME_LEN_LIMIT: usize = u32::MAX as usize;

/// Default delay between empty-queue checks in the cooperative loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What a consumption loop does when a handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log the failure, count it, and keep dispatching.
    #[default]
    LogAndContinue,
    /// Return the failure from the loop. Events still queued stay queued, so
    /// calling the loop again resumes with the next one.
    Abort,
}

/// Tunables for a [`Receiver`](crate::Receiver) and its transport.
///
/// Can be embedded in a host application's configuration file:
///
/// ```
/// use mpdispatch::{ErrorPolicy, ReceiverConfig};
///
/// let cfg: ReceiverConfig = serde_json::from_str(r#"{"error_policy": "abort"}"#).unwrap();
/// assert_eq!(cfg.error_policy, ErrorPolicy::Abort);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub poll_interval: Duration,
    pub error_policy: ErrorPolicy,
    pub max_frame_len: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_policy: ErrorPolicy::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ReceiverConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        // A zero interval would spin the cooperative loop.
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Sets the frame limit, capped at [`MAX_FRAME_LEN_LIMIT`]. Senders
    /// rebuilt in another process must be given the same limit.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len.min(MAX_FRAME_LEN_LIMIT);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ReceiverConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_millis(10));
        assert_eq!(cfg.error_policy, ErrorPolicy::LogAndContinue);
        assert_eq!(cfg.max_frame_len, 64 * 1024);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: ReceiverConfig =
            serde_json::from_str(r#"{"poll_interval": {"secs": 0, "nanos": 5000000}}"#).unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_millis(5));
        assert_eq!(cfg.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let cfg = ReceiverConfig::default().with_poll_interval(Duration::ZERO);
        assert_eq!(cfg.poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn frame_limit_is_capped() {
        let cfg = ReceiverConfig::default().with_max_frame_len(usize::MAX);
        assert_eq!(cfg.max_frame_len, u32::MAX as usize);
        let cfg = ReceiverConfig::default().with_max_frame_len(256);
        assert_eq!(cfg.max_frame_len, 256);
    }
}
