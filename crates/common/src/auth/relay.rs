//! One-shot rendezvous between the redirect listener and the waiting flow
//!
//! The listener handles requests on the HTTP stack's own tasks and must not
//! call back into the flow directly. Instead the flow registers a receiver
//! under a fresh [`ChannelId`], the listener connects to that id, writes a
//! single length-delimited frame, and disconnects.
//!
//! ```text
//!  listener task                       flow
//!  ─────────────                       ────
//!                                      hub.create_receiver(id)
//!  hub.send_payload(id, json) ──frame──► receiver.wait_for_payload(timeout)
//! ```
//!
//! Each channel carries exactly one payload. A producer that fails midway
//! leaves the receiver with `Disconnected`; a producer that never shows up
//! leaves it with `Timeout`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::RelayError;

/// Largest payload a channel accepts
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Length prefix written by the codec
const FRAME_HEADER_BYTES: usize = 4;

type PendingMap = Mutex<HashMap<ChannelId, DuplexStream>>;

/// Unique per-attempt channel identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Fresh random identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(MAX_PAYLOAD_BYTES).new_codec()
}

/// Registry of channels waiting for a producer
///
/// Cheap to clone; clones share the registry.
#[derive(Clone, Default)]
pub struct RelayHub {
    pending: Arc<PendingMap>,
}

impl RelayHub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiver for `channel_id`
    ///
    /// # Errors
    /// Returns `RelayError::DuplicateChannel` if a receiver is already waiting
    /// on this id
    pub fn create_receiver(&self, channel_id: ChannelId) -> Result<RelayReceiver, RelayError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&channel_id) {
            return Err(RelayError::DuplicateChannel(channel_id.to_string()));
        }

        let (producer_end, receiver_end) =
            tokio::io::duplex(MAX_PAYLOAD_BYTES + FRAME_HEADER_BYTES);
        pending.insert(channel_id.clone(), producer_end);
        debug!(channel = %channel_id, "Relay receiver registered");

        Ok(RelayReceiver {
            channel_id,
            frames: FramedRead::new(receiver_end, codec()),
            pending: Arc::downgrade(&self.pending),
        })
    }

    /// Connect to `channel_id`, write one payload, and disconnect
    ///
    /// # Errors
    /// Returns `RelayError::NotFound` if nobody waits on the id (or a producer
    /// already used it), `RelayError::Io` if the frame cannot be written
    pub async fn send_payload(&self, channel_id: &ChannelId, payload: &str) -> Result<(), RelayError> {
        let stream = self
            .pending
            .lock()
            .remove(channel_id)
            .ok_or_else(|| RelayError::NotFound(channel_id.to_string()))?;

        let mut sink = FramedWrite::new(stream, codec());
        if let Err(err) = sink.send(Bytes::copy_from_slice(payload.as_bytes())).await {
            warn!(channel = %channel_id, error = %err, "Relay write failed");
            return Err(err.into());
        }
        SinkExt::<Bytes>::close(&mut sink).await?;

        debug!(channel = %channel_id, bytes = payload.len(), "Relay payload delivered");
        Ok(())
    }

    /// Number of receivers still waiting for a producer
    #[must_use]
    pub fn pending_channels(&self) -> usize {
        self.pending.lock().len()
    }
}

impl fmt::Debug for RelayHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHub").field("pending", &self.pending_channels()).finish()
    }
}

/// Receiving end of one channel
///
/// Dropping it unregisters the channel, so a late producer gets `NotFound`.
pub struct RelayReceiver {
    channel_id: ChannelId,
    frames: FramedRead<DuplexStream, LengthDelimitedCodec>,
    pending: Weak<PendingMap>,
}

impl RelayReceiver {
    /// Channel this receiver listens on
    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Wait for the single payload, up to `timeout`
    ///
    /// # Errors
    /// - `RelayError::Timeout` if no producer completed a write in time
    /// - `RelayError::Disconnected` if the producer left without a frame
    /// - `RelayError::Io` if the frame was truncated or oversized
    /// - `RelayError::InvalidUtf8` if the payload is not text
    pub async fn wait_for_payload(mut self, timeout: Duration) -> Result<String, RelayError> {
        let frame = match tokio::time::timeout(timeout, self.frames.next()).await {
            Err(_) => return Err(RelayError::Timeout(timeout)),
            Ok(None) => return Err(RelayError::Disconnected),
            Ok(Some(frame)) => frame?,
        };

        String::from_utf8(frame.to_vec()).map_err(|_| RelayError::InvalidUtf8)
    }
}

impl Drop for RelayReceiver {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            pending.lock().remove(&self.channel_id);
        }
    }
}

impl fmt::Debug for RelayReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayReceiver").field("channel_id", &self.channel_id).finish()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::relay.
    use super::*;

    /// Validates a payload sent from another task reaches the receiver.
    ///
    /// Assertions:
    /// - Confirms the received text equals the sent text.
    /// - Confirms the hub holds no pending channels afterwards.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_payload_crosses_tasks() {
        let hub = RelayHub::new();
        let id = ChannelId::new();
        let receiver = hub.create_receiver(id.clone()).unwrap();

        let producer = {
            let hub = hub.clone();
            let id = id.clone();
            tokio::spawn(async move { hub.send_payload(&id, r#"{"code":"abc"}"#).await })
        };

        let payload = receiver.wait_for_payload(Duration::from_secs(5)).await.unwrap();
        producer.await.unwrap().unwrap();

        assert_eq!(payload, r#"{"code":"abc"}"#);
        assert_eq!(hub.pending_channels(), 0);
    }

    /// Validates the receiver times out when no producer connects.
    ///
    /// Assertions:
    /// - Ensures the result is `RelayError::Timeout`.
    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_producer() {
        let hub = RelayHub::new();
        let receiver = hub.create_receiver(ChannelId::new()).unwrap();

        let result = receiver.wait_for_payload(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(RelayError::Timeout(_))));
        assert_eq!(hub.pending_channels(), 0);
    }

    /// Validates a channel accepts exactly one producer.
    ///
    /// Assertions:
    /// - Ensures the second send fails with `RelayError::NotFound`.
    #[tokio::test]
    async fn test_second_send_is_rejected() {
        let hub = RelayHub::new();
        let id = ChannelId::new();
        let receiver = hub.create_receiver(id.clone()).unwrap();

        hub.send_payload(&id, "first").await.unwrap();
        let second = hub.send_payload(&id, "second").await;

        assert!(matches!(second, Err(RelayError::NotFound(_))));
        assert_eq!(receiver.wait_for_payload(Duration::from_secs(1)).await.unwrap(), "first");
    }

    /// Validates duplicate registrations are refused.
    ///
    /// Assertions:
    /// - Ensures the second `create_receiver` fails with `DuplicateChannel`.
    #[tokio::test]
    async fn test_duplicate_receiver_rejected() {
        let hub = RelayHub::new();
        let id = ChannelId::new();
        let _receiver = hub.create_receiver(id.clone()).unwrap();

        assert!(matches!(hub.create_receiver(id), Err(RelayError::DuplicateChannel(_))));
    }

    /// Validates dropping a receiver unregisters it.
    ///
    /// Assertions:
    /// - Confirms the pending count returns to zero.
    /// - Ensures a late producer gets `RelayError::NotFound`.
    #[tokio::test]
    async fn test_dropped_receiver_unregisters() {
        let hub = RelayHub::new();
        let id = ChannelId::new();
        drop(hub.create_receiver(id.clone()).unwrap());

        assert_eq!(hub.pending_channels(), 0);
        assert!(matches!(hub.send_payload(&id, "late").await, Err(RelayError::NotFound(_))));
    }

    /// Validates a failed producer does not leave the receiver hanging.
    ///
    /// Assertions:
    /// - Ensures an oversized payload fails on the producer side.
    /// - Ensures the receiver observes `RelayError::Disconnected`.
    #[tokio::test]
    async fn test_failed_producer_disconnects_receiver() {
        let hub = RelayHub::new();
        let id = ChannelId::new();
        let receiver = hub.create_receiver(id.clone()).unwrap();

        let oversized = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        assert!(hub.send_payload(&id, &oversized).await.is_err());

        let result = receiver.wait_for_payload(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(RelayError::Disconnected)));
    }

    /// Validates channel ids are unique.
    ///
    /// Assertions:
    /// - Confirms two fresh ids differ.
    #[test]
    fn test_channel_ids_unique() {
        assert_ne!(ChannelId::new(), ChannelId::new());
    }
}
