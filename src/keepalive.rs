//! Periodic liveness probing

use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use crate::{
    action::ActionChannel,
    command::AmiAction,
    connection::DisconnectReason,
    constants::DEFAULT_KEEPALIVE_INTERVAL,
    error::AmiError,
};

/// Keep-alive probe settings.
#[derive(Debug, Clone)]
pub struct KeepAliveOptions {
    /// Time between `Ping` actions. Default: 30 seconds.
    pub interval: Duration,
    /// Treat a `Ping` that was written but never answered within the action
    /// timeout as a dead connection. Default: `true`.
    ///
    /// With `false` only a failed write counts, so a half-open connection
    /// goes unnoticed until the next read error.
    pub require_reply: bool,
}

impl Default for KeepAliveOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_KEEPALIVE_INTERVAL,
            require_reply: true,
        }
    }
}

/// Probe loop for one connection generation.
///
/// Returns only when the probe fails; the caller turns the returned reason
/// into the reconnect path. The task is aborted when the generation ends
/// for any other reason.
pub(crate) async fn run(actions: Arc<ActionChannel>, options: KeepAliveOptions) -> DisconnectReason {
    loop {
        tokio::time::sleep(options.interval).await;

        match actions
            .send(AmiAction::ping())
            .await
        {
            Ok(_) => trace!("Keep-alive ping answered"),
            Err(AmiError::Timeout { timeout_ms }) if !options.require_reply => {
                trace!("Keep-alive ping unanswered after {}ms, write succeeded", timeout_ms);
            }
            Err(e) => {
                warn!("Keep-alive ping failed: {}", e);
                return DisconnectReason::ProbeFailed(e.to_string());
            }
        }
    }
}
