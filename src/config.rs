//! Connection configuration

use std::fmt;
use std::time::Duration;

use crate::{
    constants::{
        DEFAULT_ACTION_TIMEOUT, DEFAULT_AMI_PORT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_POLL_INTERVAL,
        DEFAULT_RECONNECT_DELAY, MAX_EVENT_QUEUE_SIZE,
    },
    keepalive::KeepAliveOptions,
};

/// Manager account used to log in. Immutable for the client's lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    host: String,
    port: u16,
    username: String,
    secret: String,
}

impl Credentials {
    /// Credentials for `host:port`.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Credentials for `host` on [`DEFAULT_AMI_PORT`].
    pub fn with_default_port(
        host: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self::new(host, DEFAULT_AMI_PORT, username, secret)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Reconnection schedule after a mid-session failure.
///
/// The default retries forever every 5 seconds. Set `multiplier` above 1.0
/// for exponential backoff capped at `max_delay`, and `max_attempts` to give
/// up eventually.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Upper bound for the grown delay.
    pub max_delay: Duration,
    /// Attempts before giving up (None = infinite).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            multiplier: 1.0,
            max_delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, unbounded attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            multiplier: 1.0,
            max_delay: delay,
            max_attempts: None,
        }
    }

    /// Delay to use after `current` failed.
    pub fn next_delay(&self, current: Duration) -> Duration {
        if self.multiplier <= 1.0 {
            return current;
        }
        current
            .mul_f64(self.multiplier)
            .min(self.max_delay.max(self.delay))
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts
            .map_or(true, |max| attempts < max)
    }
}

/// Options for AMI connection configuration.
///
/// Use [`Default::default()`] for standard settings.
#[derive(Debug, Clone)]
pub struct AmiConnectOptions {
    /// Bound on the TCP connect and every handshake read. Default: 10s.
    pub connect_timeout: Duration,
    /// Reader poll interval; shutdown is observed within this. Default: 1s.
    pub poll_interval: Duration,
    /// How long an action waits for its response. Default: 10s.
    pub action_timeout: Duration,
    /// Keep-alive probe settings.
    pub keepalive: KeepAliveOptions,
    /// Reconnection schedule.
    pub reconnect: ReconnectPolicy,
    /// Capacity of each [`AmiEventStream`](crate::AmiEventStream). Default: 1000.
    pub event_queue_size: usize,
}

impl Default for AmiConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            keepalive: KeepAliveOptions::default(),
            reconnect: ReconnectPolicy::default(),
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
        }
    }
}
