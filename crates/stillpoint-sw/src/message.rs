//! Control messages from the host page.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::{OfflineWorker, SwError};

/// Control protocol, wire-compatible with `{"type": "…"}` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Force a waiting worker to activate immediately. No reply.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,

    /// Ask for the deployed version. Replies over the provided channel.
    #[serde(rename = "GET_VERSION")]
    GetVersion,
}

impl ControlMessage {
    /// Parse a raw message body.
    pub fn parse(bytes: &[u8]) -> Result<Self, SwError> {
        serde_json::from_slice(bytes).map_err(|e| SwError::InvalidMessage(e.to_string()))
    }
}

/// Reply to [`ControlMessage::GetVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

impl OfflineWorker {
    /// Handle a control message from the host page.
    pub async fn handle_message(
        &self,
        message: ControlMessage,
        reply: Option<oneshot::Sender<VersionReply>>,
    ) -> Result<(), SwError> {
        debug!(?message, "Control message");
        match message {
            ControlMessage::SkipWaiting => self.skip_waiting().await,
            ControlMessage::GetVersion => {
                let sender = reply.ok_or_else(|| {
                    SwError::InvalidMessage("GET_VERSION requires a reply channel".to_string())
                })?;
                sender
                    .send(VersionReply {
                        version: self.config.cache_version.clone(),
                    })
                    .map_err(|_| SwError::ReplyChannelClosed)
            }
        }
    }
}
