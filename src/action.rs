//! Serialized action sending with reader-delivered responses

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    command::{AmiAction, AmiResponse},
    connection::ConnectionState,
    error::{AmiError, AmiResult},
    headers::AmiHeader,
    protocol::AmiMessage,
};

/// Slot for the caller currently awaiting a response.
struct PendingReply {
    /// `ActionID` sent with the action
    action_id: String,
    tx: oneshot::Sender<AmiMessage>,
}

/// Sends actions over the current connection generation.
///
/// The writer lock is held through the entire write-and-reply cycle so at
/// most one action is outstanding. Every action carries an `ActionID`; the
/// reader task hands the pending slot only the response echoing it.
pub(crate) struct ActionChannel {
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending_reply: Mutex<Option<PendingReply>>,
    state_rx: watch::Receiver<ConnectionState>,
    response_timeout: Duration,
    next_id: AtomicU64,
}

impl ActionChannel {
    pub(crate) fn new(state_rx: watch::Receiver<ConnectionState>, response_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(None),
            pending_reply: Mutex::new(None),
            state_rx,
            response_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    fn is_connected(&self) -> bool {
        *self
            .state_rx
            .borrow()
            == ConnectionState::Connected
    }

    /// Fresh `ActionID`, unique for this process.
    pub(crate) fn next_action_id(&self) -> String {
        format!(
            "ami-{}-{}",
            std::process::id(),
            self.next_id
                .fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Install the write half of a freshly authenticated connection.
    pub(crate) async fn attach(&self, half: OwnedWriteHalf) {
        let mut writer = self
            .writer
            .lock()
            .await;
        *writer = Some(half);
    }

    /// Drop the current write half, failing any caller waiting for a reply.
    pub(crate) async fn detach(&self) {
        // Fail the waiter first so it releases the writer lock.
        self.pending_reply
            .lock()
            .await
            .take();

        let half = self
            .writer
            .lock()
            .await
            .take();
        if let Some(mut half) = half {
            let _ = timeout(self.response_timeout, half.shutdown()).await;
        }
    }

    /// Hand a response record to the caller waiting for it.
    ///
    /// Only a response echoing the pending `ActionID` fills the slot. Anything
    /// else is a late reply to an action that already timed out, or a reply
    /// the server could not tag; it is discarded and the slot stays armed.
    pub(crate) async fn deliver(&self, message: AmiMessage) {
        let mut pending = self
            .pending_reply
            .lock()
            .await;
        let Some(slot) = pending.take() else {
            warn!("Received response '{}' but no action is pending", message.name);
            return;
        };

        let received_id = message
            .fields
            .get(AmiHeader::ActionId.as_str())
            .map(String::as_str);
        if received_id != Some(slot.action_id.as_str()) {
            warn!(
                "Discarding response for ActionID {:?} while waiting for {}",
                received_id, slot.action_id
            );
            *pending = Some(slot);
            return;
        }
        let _ = slot
            .tx
            .send(message);
    }

    async fn clear_pending(&self) {
        self.pending_reply
            .lock()
            .await
            .take();
    }

    /// Send an action and wait for its response.
    ///
    /// An `ActionID` is generated if the action has none. Both the write and
    /// the wait for the reply are bounded by the response timeout; a write
    /// that cannot complete is reported as an I/O error, since the stream may
    /// hold a partial frame.
    pub(crate) async fn send(&self, action: AmiAction) -> AmiResult<AmiResponse> {
        if !self.is_connected() {
            return Err(AmiError::NotConnected);
        }

        let action = action.ensure_action_id(|| self.next_action_id());
        let action_id = action
            .action_id()
            .unwrap_or_default()
            .to_string();
        let wire = action.to_wire_format()?;
        if action
            .name()
            .eq_ignore_ascii_case("Login")
        {
            debug!("Sending action: Login [REDACTED]");
        } else {
            debug!("Sending action: {:?}", action);
        }

        // Lock writer, serializes concurrent actions and holds through reply.
        let mut writer = self
            .writer
            .lock()
            .await;
        let half = writer
            .as_mut()
            .ok_or(AmiError::NotConnected)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending_reply
                .lock()
                .await;
            *pending = Some(PendingReply { action_id, tx });
        }

        match timeout(self.response_timeout, half.write_all(wire.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.clear_pending()
                    .await;
                return Err(AmiError::Io(e));
            }
            Err(_) => {
                self.clear_pending()
                    .await;
                warn!("Write of {} stalled for {:?}", action.name(), self.response_timeout);
                return Err(AmiError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write to AMI socket timed out",
                )));
            }
        }

        let message = match timeout(self.response_timeout, rx).await {
            Ok(Ok(message)) => message,
            Ok(Err(_)) => return Err(AmiError::ConnectionClosed),
            Err(_) => {
                self.clear_pending()
                    .await;
                return Err(AmiError::timeout(self.response_timeout));
            }
        };
        drop(writer);

        let response = AmiResponse::from(message);
        debug!(
            "Received response to {}: {:?}",
            action.name(),
            response.status()
        );
        Ok(response)
    }
}
